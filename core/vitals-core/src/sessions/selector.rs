//! Most recent reading of a reconciled view.

use serde::Serialize;
use vitals_protocol::SessionRecord;

use super::SessionMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub session_id: String,
    pub record: SessionRecord,
}

/// Record with the greatest timestamp, `None` for an empty view.
///
/// Equal timestamps resolve to the greatest session id so a given view always
/// yields the same winner.
pub fn latest(view: &SessionMap) -> Option<SessionEntry> {
    view.iter()
        .max_by(|(a_id, a), (b_id, b)| a.timestamp.cmp(&b.timestamp).then_with(|| a_id.cmp(b_id)))
        .map(|(session_id, record)| SessionEntry {
            session_id: session_id.clone(),
            record: record.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(entries: &[(&str, i64)]) -> SessionMap {
        entries
            .iter()
            .map(|(key, ts)| (key.to_string(), SessionRecord::at(*ts)))
            .collect()
    }

    #[test]
    fn picks_greatest_timestamp() {
        let latest = latest(&view(&[("a", 100), ("b", 300), ("c", 200)])).expect("latest");
        assert_eq!(latest.session_id, "b");
        assert_eq!(latest.record.timestamp, 300);
    }

    #[test]
    fn empty_view_has_no_latest() {
        assert_eq!(latest(&SessionMap::new()), None);
    }

    #[test]
    fn ties_resolve_deterministically() {
        let sessions = view(&[("m", 50), ("z", 50), ("a", 50)]);
        let first = latest(&sessions).expect("latest");
        let second = latest(&sessions).expect("latest");
        assert_eq!(first, second);
        assert_eq!(first.session_id, "z");
    }
}
