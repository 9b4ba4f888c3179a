//! Linearized least-squares trilateration
//!
//! Subtracting the first anchor's range equation from every other one
//! cancels the quadratic terms in the unknown position:
//!
//! ```text
//! 2 (a_i - a_0) · p = |a_i|² - |a_0|² + d_0² - d_i²
//! ```
//!
//! The resulting overdetermined system `A p = b` is solved in the
//! least-squares sense through an SVD pseudo-inverse.

use crate::core::constants::{MIN_ANCHORS_3D, MIN_ANCHORS_KNOWN_HEIGHT};
use nalgebra::{DMatrix, DVector, Vector2, Vector3};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("insufficient anchors: {available} available, {required} required")]
    InsufficientAnchors { required: usize, available: usize },
    #[error("{anchors} anchors but {distances} distances")]
    MismatchedInputs { anchors: usize, distances: usize },
    #[error("least-squares system could not be solved")]
    Degenerate,
}

pub type SolverResult<T> = Result<T, SolverError>;

/// Solver bound to a fixed anchor layout
#[derive(Debug, Clone)]
pub struct TrilaterationSolver {
    anchors: Vec<Vector3<f64>>,
}

impl TrilaterationSolver {
    pub fn new(anchors: Vec<Vector3<f64>>) -> Self {
        Self { anchors }
    }

    pub fn anchors(&self) -> &[Vector3<f64>] {
        &self.anchors
    }

    /// Full 3D solve, or a planar solve at `known_height` when given
    pub fn solve(&self, distances: &[f64], known_height: Option<f64>) -> SolverResult<Vector3<f64>> {
        match known_height {
            Some(z) => solve_known_height(&self.anchors, distances, z),
            None => solve_3d(&self.anchors, distances),
        }
    }
}

/// Unconstrained 3D position; needs at least four anchors
pub fn solve_3d(anchors: &[Vector3<f64>], distances: &[f64]) -> SolverResult<Vector3<f64>> {
    check_inputs(anchors.len(), distances.len(), MIN_ANCHORS_3D)?;

    let reference = anchors[0];
    let rows = anchors.len() - 1;
    let mut a = DMatrix::zeros(rows, 3);
    let mut b = DVector::zeros(rows);
    for (row, (anchor, d)) in anchors.iter().zip(distances).skip(1).enumerate() {
        let diff = 2.0 * (anchor - reference);
        a[(row, 0)] = diff.x;
        a[(row, 1)] = diff.y;
        a[(row, 2)] = diff.z;
        b[row] = anchor.norm_squared() - reference.norm_squared() + distances[0].powi(2) - d.powi(2);
    }

    let p = least_squares(a, b)?;
    Ok(Vector3::new(p[0], p[1], p[2]))
}

/// Planar solve for a tag at a known height; needs at least three anchors.
///
/// Each slant range is first projected onto the tag's horizontal plane.
pub fn solve_known_height(anchors: &[Vector3<f64>], distances: &[f64], z: f64) -> SolverResult<Vector3<f64>> {
    check_inputs(anchors.len(), distances.len(), MIN_ANCHORS_KNOWN_HEIGHT)?;

    let planar: Vec<(Vector2<f64>, f64)> = anchors
        .iter()
        .zip(distances)
        .map(|(anchor, d)| (anchor.xy(), planar_distance(*d, z - anchor.z)))
        .collect();

    let (reference, d0) = planar[0];
    let rows = planar.len() - 1;
    let mut a = DMatrix::zeros(rows, 2);
    let mut b = DVector::zeros(rows);
    for (row, (anchor, d)) in planar.iter().skip(1).enumerate() {
        let diff = 2.0 * (anchor - reference);
        a[(row, 0)] = diff.x;
        a[(row, 1)] = diff.y;
        b[row] = anchor.norm_squared() - reference.norm_squared() + d0.powi(2) - d.powi(2);
    }

    let p = least_squares(a, b)?;
    Ok(Vector3::new(p[0], p[1], z))
}

/// Horizontal component of a slant range given the vertical offset.
/// Noise can make the offset exceed the range; that clamps to zero.
pub fn planar_distance(slant: f64, dz: f64) -> f64 {
    (slant * slant - dz * dz).max(0.0).sqrt()
}

fn check_inputs(anchors: usize, distances: usize, required: usize) -> SolverResult<()> {
    if anchors < required {
        return Err(SolverError::InsufficientAnchors {
            required,
            available: anchors,
        });
    }
    if anchors != distances {
        return Err(SolverError::MismatchedInputs { anchors, distances });
    }
    Ok(())
}

/// Minimum-norm least-squares solution, ignoring singular values below the
/// usual `eps * max(m, n) * σ_max` cutoff
fn least_squares(a: DMatrix<f64>, b: DVector<f64>) -> SolverResult<DVector<f64>> {
    let cutoff_scale = f64::EPSILON * a.nrows().max(a.ncols()) as f64;
    let svd = a.svd(true, true);
    let sigma_max = svd.singular_values.max();
    let x = svd
        .solve(&b, cutoff_scale * sigma_max)
        .map_err(|_| SolverError::Degenerate)?;
    if x.iter().all(|v| v.is_finite()) {
        Ok(x)
    } else {
        Err(SolverError::Degenerate)
    }
}
