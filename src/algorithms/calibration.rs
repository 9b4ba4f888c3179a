//! Anchor self-calibration from pairwise ranges
//!
//! Every pair of enabled anchors is ranged a few times, the averages form a
//! symmetric distance matrix, and classical multidimensional scaling turns
//! that matrix into planar coordinates. The layout is then put in a canonical
//! frame: first anchor at the origin, second on the +x axis, third with
//! y >= 0. Heights are not observable this way and are left untouched.

use crate::core::constants::DEFAULT_CALIBRATION_ATTEMPTS;
use crate::core::{AnchorRegistry, NodeId};
use crate::hardware::{CommError, LineTransport};
use crate::protocol::UwbController;
use nalgebra::{DMatrix, SymmetricEigen};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Eigenvalues at or below this are treated as noise
const EIGENVALUE_FLOOR: f64 = 1e-6;

/// Below this the second anchor gives no usable direction for the x axis
const ROTATION_EPSILON: f64 = 1e-8;

/// Largest |d(i, j) - d(j, i)| accepted as symmetric (meters)
const SYMMETRY_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("calibration needs at least 2 enabled anchors, {available} available")]
    NotEnoughAnchors { available: usize },
    #[error("no usable range between anchors 0x{anchor_a:04X} and 0x{anchor_b:04X}")]
    RangingFailed { anchor_a: u16, anchor_b: u16 },
    #[error("distance matrix has no positive eigenvalues")]
    NoPositiveEigenvalues,
    #[error("distance matrix is {rows}x{cols}, expected a square matrix")]
    InvalidMatrix { rows: usize, cols: usize },
    #[error("distance matrix entry ({row}, {col}) is invalid: {reason}")]
    InvalidEntry { row: usize, col: usize, reason: &'static str },
    #[error(transparent)]
    Comm(#[from] CommError),
}

pub type CalibrationResult<T> = Result<T, CalibrationError>;

/// Square, symmetric, zero-diagonal distance matrix over an ordered id list
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    ids: Vec<u16>,
    values: DMatrix<f64>,
}

impl DistanceMatrix {
    pub fn new(ids: Vec<u16>) -> Self {
        let n = ids.len();
        Self {
            ids,
            values: DMatrix::zeros(n, n),
        }
    }

    /// Build from a full matrix. It must be square, match `ids`, hold finite
    /// non-negative distances, be symmetric and have a zero diagonal.
    pub fn from_matrix(ids: Vec<u16>, values: DMatrix<f64>) -> CalibrationResult<Self> {
        if !values.is_square() || values.nrows() != ids.len() {
            return Err(CalibrationError::InvalidMatrix {
                rows: values.nrows(),
                cols: values.ncols(),
            });
        }

        let n = values.nrows();
        for row in 0..n {
            for col in 0..n {
                let value = values[(row, col)];
                let reason = if !value.is_finite() {
                    Some("not a finite number")
                } else if value < 0.0 {
                    Some("negative distance")
                } else if row == col && value != 0.0 {
                    Some("non-zero diagonal")
                } else if (value - values[(col, row)]).abs() > SYMMETRY_TOLERANCE {
                    Some("not symmetric")
                } else {
                    None
                };
                if let Some(reason) = reason {
                    return Err(CalibrationError::InvalidEntry { row, col, reason });
                }
            }
        }
        Ok(Self { ids, values })
    }

    /// Set both (i, j) and (j, i); the diagonal stays zero
    pub fn set(&mut self, i: usize, j: usize, distance: f64) {
        if i == j {
            return;
        }
        self.values[(i, j)] = distance;
        self.values[(j, i)] = distance;
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[(i, j)]
    }

    pub fn ids(&self) -> &[u16] {
        &self.ids
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Recover canonical planar coordinates from pairwise distances.
///
/// Returns one (x, y) per row of the matrix, in the same order.
pub fn compute_anchor_layout(distances: &DistanceMatrix) -> CalibrationResult<Vec<(f64, f64)>> {
    let n = distances.len();
    match n {
        0 => return Ok(Vec::new()),
        1 => return Ok(vec![(0.0, 0.0)]),
        _ => {}
    }

    // B = -1/2 J D² J with J = I - 1/n
    let d2 = distances.values().map(|d| d * d);
    let j = DMatrix::<f64>::identity(n, n) - DMatrix::from_element(n, n, 1.0 / n as f64);
    let b = (&j * d2 * &j) * -0.5;

    let eigen = SymmetricEigen::new(b);
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&l, &r| eigen.eigenvalues[r].total_cmp(&eigen.eigenvalues[l]));

    let positive = order
        .iter()
        .filter(|&&k| eigen.eigenvalues[k] > EIGENVALUE_FLOOR)
        .count();
    if positive == 0 {
        return Err(CalibrationError::NoPositiveEigenvalues);
    }
    let dims = positive.min(2);

    let mut coords: Vec<[f64; 2]> = (0..n)
        .map(|row| {
            let mut point = [0.0; 2];
            for (axis, &k) in order.iter().take(dims).enumerate() {
                point[axis] = eigen.eigenvectors[(row, k)] * eigen.eigenvalues[k].sqrt();
            }
            point
        })
        .collect();

    canonicalize(&mut coords);
    Ok(coords.into_iter().map(|[x, y]| (x, y)).collect())
}

/// Translate, rotate and reflect so the layout no longer depends on the
/// arbitrary frame MDS returns
fn canonicalize(coords: &mut [[f64; 2]]) {
    let Some(&origin) = coords.first() else {
        return;
    };
    for point in coords.iter_mut() {
        point[0] -= origin[0];
        point[1] -= origin[1];
    }

    if let Some(&[x, y]) = coords.get(1) {
        if x.hypot(y) > ROTATION_EPSILON {
            let angle = y.atan2(x);
            let (sin, cos) = (-angle).sin_cos();
            for point in coords.iter_mut() {
                let [px, py] = *point;
                *point = [cos * px - sin * py, sin * px + cos * py];
            }
        }
    }

    if coords.len() > 2 && coords[2][1] < 0.0 {
        for point in coords.iter_mut() {
            point[1] = -point[1];
        }
    }
}

/// Outcome of a successful calibration run
#[derive(Debug, Clone)]
pub struct CalibrationReport {
    pub distances: DistanceMatrix,
    /// (anchor id, x, y) in registry order of the enabled anchors
    pub layout: Vec<(u16, f64, f64)>,
}

/// Drives pairwise ranging between anchors and applies the recovered layout
#[derive(Debug, Clone, Copy)]
pub struct AnchorCalibrator {
    /// Ranging attempts per pair; each attempt tries both directions
    pub attempts: usize,
}

impl Default for AnchorCalibrator {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_CALIBRATION_ATTEMPTS,
        }
    }
}

impl AnchorCalibrator {
    pub fn new(attempts: usize) -> Self {
        Self { attempts }
    }

    /// Average distance between two anchors, or None if no attempt produced
    /// a positive range. Each attempt keeps the first direction that works.
    pub fn measure_pair<T: LineTransport + ?Sized>(
        &self,
        controller: &UwbController<'_, T>,
        anchor_a: u16,
        anchor_b: u16,
    ) -> CalibrationResult<Option<f64>> {
        let mut samples = Vec::with_capacity(self.attempts);
        for _ in 0..self.attempts {
            for (initiator, responder) in [(anchor_a, anchor_b), (anchor_b, anchor_a)] {
                if let Some(sample) = controller.trigger(initiator, responder)? {
                    if sample.is_valid() {
                        samples.push(sample.distance_m);
                        break;
                    }
                }
            }
        }

        if samples.is_empty() {
            return Ok(None);
        }
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        debug!(
            a = %NodeId(anchor_a),
            b = %NodeId(anchor_b),
            samples = samples.len(),
            distance = mean,
            "measured anchor pair"
        );
        Ok(Some(mean))
    }

    /// Range every pair of the given anchors into a distance matrix
    pub fn measure_distances<T: LineTransport + ?Sized>(
        &self,
        controller: &UwbController<'_, T>,
        anchor_ids: &[u16],
    ) -> CalibrationResult<DistanceMatrix> {
        let mut matrix = DistanceMatrix::new(anchor_ids.to_vec());
        for i in 0..anchor_ids.len() {
            for j in (i + 1)..anchor_ids.len() {
                let (a, b) = (anchor_ids[i], anchor_ids[j]);
                match self.measure_pair(controller, a, b)? {
                    Some(distance) => matrix.set(i, j, distance),
                    None => {
                        warn!(a = %NodeId(a), b = %NodeId(b), "anchor pair ranging failed");
                        return Err(CalibrationError::RangingFailed { anchor_a: a, anchor_b: b });
                    }
                }
            }
        }
        Ok(matrix)
    }

    /// Measure, solve and write (x, y) into the enabled anchors.
    /// On any error the registry is left exactly as it was.
    pub fn calibrate<T: LineTransport + ?Sized>(
        &self,
        controller: &UwbController<'_, T>,
        anchors: &mut AnchorRegistry,
    ) -> CalibrationResult<CalibrationReport> {
        let indices = anchors.active_indices();
        if indices.len() < 2 {
            return Err(CalibrationError::NotEnoughAnchors {
                available: indices.len(),
            });
        }

        let ids = anchors.ids_for_indices(&indices);
        let distances = self.measure_distances(controller, &ids)?;
        let coords = compute_anchor_layout(&distances)?;

        let mut layout = Vec::with_capacity(coords.len());
        for ((&index, &id), &(x, y)) in indices.iter().zip(&ids).zip(&coords) {
            anchors.set_planar_position(index, x, y);
            layout.push((id, x, y));
        }

        info!(anchors = layout.len(), "anchor calibration complete");
        Ok(CalibrationReport { distances, layout })
    }
}
