// Wire types for the REST table endpoints.
//
// Field names mirror the backend columns. Nested `*Tree` types are what a
// `select=*,racks(*,shelves(*))` embedding returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Table names shared by the REST client and the realtime feed.
pub mod tables {
    pub const ROWS: &str = "rows";
    pub const RACKS: &str = "racks";
    pub const SHELVES: &str = "shelves";
    pub const DEVICES: &str = "devices";
    pub const DEVICE_ASSIGNMENTS: &str = "device_assignments";
}

/// Error body returned by the REST layer on non-2xx responses.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub message: Option<String>,
    pub code: Option<String>,
    pub details: Option<String>,
    pub hint: Option<String>,
}

// ── Topology ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRow {
    pub id: String,
    pub farm_id: String,
    pub name: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRack {
    pub id: String,
    pub row_id: String,
    pub name: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiShelf {
    pub id: String,
    pub rack_id: String,
    pub name: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A row with its embedded racks.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiRowTree {
    #[serde(flatten)]
    pub row: ApiRow,
    #[serde(default)]
    pub racks: Vec<ApiRackTree>,
}

/// A rack with its embedded shelves.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiRackTree {
    #[serde(flatten)]
    pub rack: ApiRack,
    #[serde(default)]
    pub shelves: Vec<ApiShelf>,
}

/// Insert body for a row, rack, or shelf. Exactly one parent column is set.
#[derive(Debug, Clone, Serialize)]
pub struct NewNodeBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub farm_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rack_id: Option<String>,
    pub name: String,
    pub position: i64,
}

/// Partial update body for a row, rack, or shelf.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodePatchBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

// ── Devices ──────────────────────────────────────────────────────────

/// A device mirrored from the device registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiDevice {
    pub entity_id: String,
    #[serde(default)]
    pub friendly_name: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub last_changed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiAssignment {
    pub id: String,
    pub farm_id: String,
    pub entity_id: String,
    #[serde(default)]
    pub friendly_name: Option<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
    pub target_type: String,
    pub target_id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewAssignmentBody {
    pub farm_id: String,
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    pub entity_type: String,
    pub target_type: String,
    pub target_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_tree_deserializes_embedded_children() {
        let raw = serde_json::json!({
            "id": "r1",
            "farm_id": "f1",
            "name": "Row A",
            "position": 0,
            "racks": [{
                "id": "k1",
                "row_id": "r1",
                "name": "Rack 1",
                "position": 0,
                "shelves": [{ "id": "s1", "rack_id": "k1", "name": "Shelf 1", "position": 0 }]
            }]
        });

        let tree: ApiRowTree = serde_json::from_value(raw).expect("valid tree");
        assert_eq!(tree.row.name, "Row A");
        assert_eq!(tree.racks.len(), 1);
        assert_eq!(tree.racks[0].shelves[0].id, "s1");
    }

    #[test]
    fn node_body_skips_unused_parents() {
        let body = NewNodeBody {
            farm_id: None,
            row_id: Some("r1".into()),
            rack_id: None,
            name: "Rack 2".into(),
            position: 1,
        };
        let json = serde_json::to_value(&body).expect("serializable");
        assert_eq!(
            json,
            serde_json::json!({ "row_id": "r1", "name": "Rack 2", "position": 1 })
        );
    }
}
