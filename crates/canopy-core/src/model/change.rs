// ── Realtime change events ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row change on a subscribed table.
///
/// `new` is absent on DELETE; `old` is present for UPDATE and DELETE when
/// the backend replicates the full old row (at least its id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub table: String,
    pub new: Option<serde_json::Value>,
    pub old: Option<serde_json::Value>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChangeEvent {
    /// Id of the affected row: the old record's id on DELETE, the new
    /// record's otherwise.
    pub fn record_id(&self) -> Option<EntityId> {
        let source = match self.kind {
            ChangeKind::Delete => self.old.as_ref(),
            ChangeKind::Insert | ChangeKind::Update => self.new.as_ref().or(self.old.as_ref()),
        }?;
        match source.get("id")? {
            serde_json::Value::String(s) => Some(EntityId::from(s.as_str())),
            serde_json::Value::Number(n) => Some(EntityId::Key(n.to_string())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(kind: ChangeKind, new: Option<serde_json::Value>, old: Option<serde_json::Value>) -> ChangeEvent {
        ChangeEvent {
            kind,
            table: "rows".into(),
            new,
            old,
            timestamp: None,
        }
    }

    #[test]
    fn delete_uses_old_record_id() {
        let e = event(ChangeKind::Delete, None, Some(json!({ "id": "r1" })));
        assert_eq!(e.record_id(), Some(EntityId::from("r1")));
    }

    #[test]
    fn update_prefers_new_record_id() {
        let e = event(ChangeKind::Update, Some(json!({ "id": 7 })), Some(json!({ "id": 6 })));
        assert_eq!(e.record_id(), Some(EntityId::Key("7".into())));
    }

    #[test]
    fn missing_id_yields_none() {
        assert_eq!(event(ChangeKind::Insert, Some(json!({})), None).record_id(), None);
    }
}
