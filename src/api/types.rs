//! Immutable snapshots handed to display and logging layers

use crate::core::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One tag/anchor pair of a tracking cycle, for the range monitor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonitorRow {
    pub tag_id: u16,
    pub anchor_id: u16,
    /// Reported distance (meters); None when the exchange timed out
    pub distance_m: Option<f64>,
    pub rssi_dbm: Option<f64>,
}

impl fmt::Display for MonitorRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", NodeId(self.tag_id), NodeId(self.anchor_id))?;
        match self.distance_m {
            Some(d) => write!(f, "{:.2}m ", d)?,
            None => write!(f, "--m ")?,
        }
        match self.rssi_dbm {
            Some(rssi) => write!(f, "{:.1}dBm", rssi),
            None => write!(f, "--dBm"),
        }
    }
}

/// Position state of one tag after a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSnapshot {
    pub tag_id: u16,
    /// Unfiltered solver output, if this cycle produced a fix
    pub raw: Option<[f64; 3]>,
    /// Filtered position, if this cycle produced a fix
    pub filtered: Option<[f64; 3]>,
    /// Recent filtered (x, y) points, oldest first
    pub path: Vec<(f64, f64)>,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    /// False once the tag has gone unseen longer than the stale limit
    pub visible: bool,
}

/// Why a cycle produced no positions at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleStatus {
    Completed,
    /// Fewer than three anchors are enabled
    InsufficientAnchors { enabled: usize },
    /// The link failed part way; rows and snapshots cover what was done before
    ConnectionLost,
}

/// Everything one tracking cycle produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub status: CycleStatus,
    pub monitor: Vec<MonitorRow>,
    pub snapshots: Vec<TagSnapshot>,
}

impl CycleReport {
    pub fn new(status: CycleStatus) -> Self {
        Self {
            status,
            monitor: Vec::new(),
            snapshots: Vec::new(),
        }
    }

    pub fn snapshot(&self, tag_id: u16) -> Option<&TagSnapshot> {
        self.snapshots.iter().find(|s| s.tag_id == tag_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_row_display() {
        let row = MonitorRow {
            tag_id: 0,
            anchor_id: 0xFF01,
            distance_m: Some(1.234),
            rssi_dbm: Some(-63.27),
        };
        assert_eq!(row.to_string(), "0x0000 0xFF01 1.23m -63.3dBm");

        let missing = MonitorRow {
            distance_m: None,
            rssi_dbm: None,
            ..row
        };
        assert_eq!(missing.to_string(), "0x0000 0xFF01 --m --dBm");
    }

    #[test]
    fn test_report_serializes() {
        let report = CycleReport::new(CycleStatus::InsufficientAnchors { enabled: 2 });
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("InsufficientAnchors"));
        assert!(report.snapshot(0).is_none());
    }
}
