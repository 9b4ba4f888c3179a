//! UWB Positioning Host
//!
//! Talks to a UWB gateway over a serial line, ranges tags against fixed
//! anchors, trilaterates and smooths tag positions, and recovers the anchors'
//! own planar layout from anchor-to-anchor ranges.

pub mod core;
pub mod hardware;
pub mod processing;
pub mod protocol;
pub mod algorithms;
pub mod api;
pub mod utils;

// Re-export commonly used types
pub use crate::core::{Anchor, AnchorRegistry, NodeId, NodeRole, Tag, TagRegistry};
pub use crate::hardware::{CommError, CommResult, Event, LineTransport, MockTransceiver, SerialConfig, SerialTransceiver};
pub use processing::{FilterParameters, PingSample, PositionKalmanFilter, RangeSample};
pub use protocol::UwbController;
pub use algorithms::{
    compute_anchor_layout, solve_3d, solve_known_height, AnchorCalibrator, CalibrationError, DistanceMatrix,
    SolverError, TrilaterationSolver,
};
pub use api::{CycleReport, CycleStatus, MonitorRow, TagSnapshot, Tracker};
pub use utils::{ConfigError, ConfigurationManager, SystemConfig};
