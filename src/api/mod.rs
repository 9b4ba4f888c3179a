//! Tracking cycle and the snapshots it produces

pub mod tracker;
pub mod types;

pub use tracker::Tracker;
pub use types::{CycleReport, CycleStatus, MonitorRow, TagSnapshot};
