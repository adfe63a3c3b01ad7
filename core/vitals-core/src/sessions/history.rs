//! History listing and the GSR trend.

use serde::Serialize;

use super::{SessionEntry, SessionMap};

/// Every reading, newest first. Equal timestamps list the greater id first.
pub fn newest_first(view: &SessionMap) -> Vec<SessionEntry> {
    let mut entries: Vec<SessionEntry> = view
        .iter()
        .map(|(session_id, record)| SessionEntry {
            session_id: session_id.clone(),
            record: record.clone(),
        })
        .collect();
    entries.sort_by(|a, b| {
        b.record
            .timestamp
            .cmp(&a.record.timestamp)
            .then_with(|| b.session_id.cmp(&a.session_id))
    });
    entries
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GsrPoint {
    pub timestamp: i64,
    pub gsr: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GsrSeries {
    pub points: Vec<GsrPoint>,
}

impl GsrSeries {
    /// A trend line needs at least two points.
    pub fn is_plottable(&self) -> bool {
        self.points.len() >= 2
    }
}

/// Readings that carry a GSR value and a real timestamp, oldest first.
pub fn gsr_series(view: &SessionMap) -> GsrSeries {
    let mut points: Vec<GsrPoint> = view
        .values()
        .filter(|record| record.timestamp > 0)
        .filter_map(|record| {
            record.gsr.map(|gsr| GsrPoint {
                timestamp: record.timestamp,
                gsr,
            })
        })
        .collect();
    points.sort_by_key(|point| point.timestamp);
    GsrSeries { points }
}
