//! Driver reading history.
//!
//! Readings for one driver live in two places: the primary store and the
//! legacy store older firmware still writes to. [`SessionReconciler`] merges
//! them, and everything else in this module derives from the merged view.

use std::collections::BTreeMap;

use vitals_protocol::SessionRecord;

pub mod history;
pub mod reconciler;
pub mod selector;
pub mod vitals;

pub use history::{gsr_series, newest_first, GsrPoint, GsrSeries};
pub use reconciler::{merge, SessionReconciler, SessionSource, SourceUpdate};
pub use selector::{latest, SessionEntry};
pub use vitals::TemperatureBand;

/// Session id → record.
pub type SessionMap = BTreeMap<String, SessionRecord>;
