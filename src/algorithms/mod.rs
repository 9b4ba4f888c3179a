//! Positioning algorithms

pub mod trilateration;
pub mod calibration;

pub use trilateration::{solve_3d, solve_known_height, SolverError, SolverResult, TrilaterationSolver};
pub use calibration::{
    compute_anchor_layout, AnchorCalibrator, CalibrationError, CalibrationReport, CalibrationResult, DistanceMatrix,
};
