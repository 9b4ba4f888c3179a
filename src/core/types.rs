//! Core data types for the positioning system

use crate::core::constants::{ANCHOR_ID_BASE, DEFAULT_PATH_HISTORY_LIMIT, TAG_ID_BASE};
use crate::processing::kalman::{FilterParameters, PositionKalmanFilter};
use nalgebra::Vector3;
use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

/// Role of a node on the ranging network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Anchor,
    Tag,
}

/// Network id of the `index`-th node of the given role
pub fn node_id(role: NodeRole, index: u16) -> u16 {
    let base = match role {
        NodeRole::Anchor => ANCHOR_ID_BASE,
        NodeRole::Tag => TAG_ID_BASE,
    };
    base.wrapping_add(index)
}

/// Display wrapper printing a node id as `0xFF00`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(pub u16);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Fixed reference node with a known or calibrated position (meters)
#[derive(Debug, Clone, PartialEq)]
pub struct Anchor {
    pub id: u16,
    pub position: Vector3<f64>,
    pub enabled: bool,
}

impl Anchor {
    pub fn new(id: u16, position: Vector3<f64>) -> Self {
        Self {
            id,
            position,
            enabled: true,
        }
    }
}

/// Mobile node whose position is being estimated.
///
/// The tag owns its filter and its trajectory. Neither is shared, and the
/// filter is only ever reset by creating a new `Tag`.
#[derive(Debug, Clone)]
pub struct Tag {
    pub id: u16,
    /// Assumed height of the tag (meters), used for known-height solves
    pub height: f64,
    pub enabled: bool,
    filter: PositionKalmanFilter,
    path: VecDeque<(f64, f64)>,
    path_limit: usize,
    last_seen: Option<Instant>,
}

impl Tag {
    pub fn new(id: u16, height: f64) -> Self {
        Self::with_parameters(id, height, FilterParameters::default(), DEFAULT_PATH_HISTORY_LIMIT)
    }

    pub fn with_parameters(id: u16, height: f64, filter: FilterParameters, path_limit: usize) -> Self {
        Self {
            id,
            height,
            enabled: true,
            filter: PositionKalmanFilter::from_parameters(&filter),
            path: VecDeque::with_capacity(path_limit),
            path_limit,
            last_seen: None,
        }
    }

    /// Run the tag's filter once on a raw fix and return the smoothed position
    pub fn apply_fix(&mut self, raw: &Vector3<f64>, now: Instant) -> Vector3<f64> {
        let filtered = self.filter.filter(raw);
        self.push_path_point(filtered.x, filtered.y);
        self.last_seen = Some(now);
        filtered
    }

    fn push_path_point(&mut self, x: f64, y: f64) {
        if self.path_limit == 0 {
            return;
        }
        while self.path.len() >= self.path_limit {
            self.path.pop_front();
        }
        self.path.push_back((x, y));
    }

    /// Recent filtered (x, y) points, oldest first
    pub fn path(&self) -> &VecDeque<(f64, f64)> {
        &self.path
    }

    pub fn clear_path(&mut self) {
        self.path.clear();
    }

    pub fn filter(&self) -> &PositionKalmanFilter {
        &self.filter
    }

    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    /// Forget when the tag was last seen so it is reported hidden only once
    pub fn mark_unseen(&mut self) {
        self.last_seen = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ids() {
        assert_eq!(node_id(NodeRole::Anchor, 0), 0xFF00);
        assert_eq!(node_id(NodeRole::Anchor, 3), 0xFF03);
        assert_eq!(node_id(NodeRole::Tag, 2), 0x0002);
        assert_eq!(NodeId(0xFF01).to_string(), "0xFF01");
        assert_eq!(NodeId(7).to_string(), "0x0007");
    }

    #[test]
    fn test_path_history_is_bounded() {
        let mut tag = Tag::with_parameters(1, 1.0, FilterParameters::default(), 3);
        let now = Instant::now();
        for i in 0..5 {
            tag.apply_fix(&Vector3::new(i as f64, 0.0, 1.0), now);
        }
        assert_eq!(tag.path().len(), 3);
        assert!(tag.last_seen().is_some());

        tag.clear_path();
        assert!(tag.path().is_empty());
    }
}
