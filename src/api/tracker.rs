//! Per-cycle tag tracking
//!
//! One cycle ranges every enabled tag against every enabled anchor, solves
//! each tag at its known height, smooths the fix through the tag's own filter
//! and reports the result as immutable snapshots. Failures for one tag never
//! stop the cycle: that tag simply has no new position this time. Only a
//! lost link ends the cycle early.

use crate::algorithms::trilateration::solve_known_height;
use crate::api::types::{CycleReport, CycleStatus, MonitorRow, TagSnapshot};
use crate::core::constants::{DEFAULT_STALE_AFTER_MS, MIN_ANCHORS_KNOWN_HEIGHT};
use crate::core::{AnchorRegistry, NodeId, TagRegistry};
use crate::hardware::{now_ms, CommResult, LineTransport};
use crate::processing::parser::PingSample;
use crate::protocol::UwbController;
use nalgebra::Vector3;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct Tracker {
    /// A tag without a fix for longer than this is reported as hidden
    pub stale_after: Duration,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_STALE_AFTER_MS))
    }
}

impl Tracker {
    pub fn new(stale_after: Duration) -> Self {
        Self { stale_after }
    }

    /// Run one tracking cycle over the enabled anchors and tags
    pub fn update_cycle<T: LineTransport + ?Sized>(
        &self,
        controller: &UwbController<'_, T>,
        anchors: &AnchorRegistry,
        tags: &mut TagRegistry,
    ) -> CycleReport {
        let active = anchors.active();
        if active.len() < MIN_ANCHORS_KNOWN_HEIGHT {
            debug!(enabled = active.len(), "not enough anchors to locate tags");
            return CycleReport::new(CycleStatus::InsufficientAnchors { enabled: active.len() });
        }
        let anchor_ids: Vec<u16> = active.iter().map(|a| a.id).collect();
        let anchor_positions: Vec<Vector3<f64>> = active.iter().map(|a| a.position).collect();

        // Replies that straggled in after the previous cycle must not be
        // taken as answers to this one
        controller.drain_stale();

        let mut report = CycleReport::new(CycleStatus::Completed);
        'tags: for tag in tags.iter_mut().filter(|t| t.enabled) {
            let mut positions = Vec::with_capacity(anchor_ids.len());
            let mut distances = Vec::with_capacity(anchor_ids.len());
            for (&anchor_id, position) in anchor_ids.iter().zip(&anchor_positions) {
                let sample = match controller.trigger(tag.id, anchor_id) {
                    Ok(sample) => sample,
                    Err(e) if e.is_fatal() => {
                        warn!(tag = %NodeId(tag.id), anchor = %NodeId(anchor_id), error = %e, "ranging aborted");
                        report.status = CycleStatus::ConnectionLost;
                        break 'tags;
                    }
                    Err(e) => {
                        warn!(tag = %NodeId(tag.id), anchor = %NodeId(anchor_id), error = %e, "ranging exchange failed");
                        None
                    }
                };

                report.monitor.push(MonitorRow {
                    tag_id: tag.id,
                    anchor_id,
                    distance_m: sample.map(|s| s.distance_m),
                    rssi_dbm: sample.map(|s| s.rssi_dbm),
                });
                if let Some(sample) = sample.filter(|s| s.is_valid()) {
                    positions.push(*position);
                    distances.push(sample.distance_m);
                }
            }

            let now = Instant::now();
            let fix = if positions.len() >= MIN_ANCHORS_KNOWN_HEIGHT {
                match solve_known_height(&positions, &distances, tag.height) {
                    Ok(raw) => Some(raw),
                    Err(e) => {
                        warn!(tag = %NodeId(tag.id), error = %e, "position solve failed");
                        None
                    }
                }
            } else {
                None
            };

            match fix {
                Some(raw) => {
                    let filtered = tag.apply_fix(&raw, now);
                    debug!(
                        tag = %NodeId(tag.id),
                        x = filtered.x,
                        y = filtered.y,
                        z = filtered.z,
                        "tag position"
                    );
                    report.snapshots.push(TagSnapshot {
                        tag_id: tag.id,
                        raw: Some(raw.into()),
                        filtered: Some(filtered.into()),
                        path: tag.path().iter().copied().collect(),
                        timestamp_ms: now_ms(),
                        visible: true,
                    });
                }
                None => {
                    let stale = tag
                        .last_seen()
                        .is_some_and(|seen| now.duration_since(seen) > self.stale_after);
                    if stale {
                        info!(tag = %NodeId(tag.id), "tag lost");
                        tag.mark_unseen();
                        report.snapshots.push(TagSnapshot {
                            tag_id: tag.id,
                            raw: None,
                            filtered: None,
                            path: tag.path().iter().copied().collect(),
                            timestamp_ms: now_ms(),
                            visible: false,
                        });
                    }
                }
            }
        }

        report
    }

    /// Health-check a list of nodes; one entry per id, in order
    pub fn ping_nodes<T: LineTransport + ?Sized>(
        &self,
        controller: &UwbController<'_, T>,
        node_ids: &[u16],
    ) -> CommResult<Vec<(u16, Option<PingSample>)>> {
        let responses = controller.ping_multiple(node_ids)?;
        for (&id, response) in node_ids.iter().zip(&responses) {
            if response.is_none() {
                warn!(node = %NodeId(id), "no ping response");
            }
        }
        Ok(node_ids.iter().copied().zip(responses).collect())
    }
}
