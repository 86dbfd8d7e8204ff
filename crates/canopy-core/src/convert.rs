// ── API-to-domain type conversions ──
//
// Bridges raw `canopy_api` wire types into canonical `canopy_core::model`
// types and back into request bodies. Realtime records arrive as untyped
// JSON and go through `FromRecord`.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use canopy_api::realtime::{ChangeType, PostgresChange};
use canopy_api::rest::models::{
    ApiAssignment, ApiDevice, ApiRack, ApiRow, ApiRowTree, ApiShelf, NewAssignmentBody,
    NewNodeBody, NodePatchBody,
};

use crate::error::CoreError;
use crate::model::{
    AssignRequest, AssignmentTarget, ChangeEvent, ChangeKind, Device, DeviceAssignment,
    DeviceDomain, DeviceEntityId, EntityId, NewNode, NodeKind, NodePatch, ParentRef, Rack, Row,
    Shelf,
};
use crate::store::TopologySnapshot;

// ── Helpers ────────────────────────────────────────────────────────

/// Clamp a stored position into the `u32` ordering space. Negative
/// values sort first.
fn position(raw: i64) -> u32 {
    u32::try_from(raw.max(0)).unwrap_or(u32::MAX)
}

fn parse_datetime(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

// ── Topology ───────────────────────────────────────────────────────

impl From<ApiRow> for Row {
    fn from(r: ApiRow) -> Self {
        Self {
            id: EntityId::from(r.id),
            farm_id: r.farm_id,
            name: r.name,
            position: position(r.position),
        }
    }
}

impl From<ApiRack> for Rack {
    fn from(r: ApiRack) -> Self {
        Self {
            id: EntityId::from(r.id),
            row_id: EntityId::from(r.row_id),
            name: r.name,
            position: position(r.position),
        }
    }
}

impl From<ApiShelf> for Shelf {
    fn from(s: ApiShelf) -> Self {
        Self {
            id: EntityId::from(s.id),
            rack_id: EntityId::from(s.rack_id),
            name: s.name,
            position: position(s.position),
        }
    }
}

/// Flatten the embedded row → rack → shelf response.
pub(crate) fn flatten_tree(rows: Vec<ApiRowTree>) -> TopologySnapshot {
    let mut snapshot = TopologySnapshot::default();
    for tree in rows {
        snapshot.rows.push(Row::from(tree.row));
        for rack_tree in tree.racks {
            snapshot.racks.push(Rack::from(rack_tree.rack));
            snapshot
                .shelves
                .extend(rack_tree.shelves.into_iter().map(Shelf::from));
        }
    }
    snapshot
}

pub(crate) fn node_body(parent: &ParentRef, node: &NewNode) -> NewNodeBody {
    let (farm_id, row_id, rack_id) = match parent {
        ParentRef::Farm(id) => (Some(id.clone()), None, None),
        ParentRef::Row(id) => (None, Some(id.to_string()), None),
        ParentRef::Rack(id) => (None, None, Some(id.to_string())),
    };
    NewNodeBody {
        farm_id,
        row_id,
        rack_id,
        name: node.name.clone(),
        position: i64::from(node.position),
    }
}

pub(crate) fn patch_body(patch: &NodePatch) -> NodePatchBody {
    NodePatchBody {
        name: patch.name.clone(),
        position: patch.position.map(i64::from),
    }
}

// ── Devices ────────────────────────────────────────────────────────

impl From<ApiDevice> for Device {
    fn from(d: ApiDevice) -> Self {
        let entity_id = DeviceEntityId::new(&d.entity_id);
        let domain = d
            .domain
            .as_deref()
            .or_else(|| entity_id.domain())
            .map_or_else(|| DeviceDomain::Other(String::new()), DeviceDomain::from);
        Self {
            name: d
                .friendly_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| entity_id.to_string()),
            entity_id,
            domain,
            state: d.state,
            area: d.area,
            last_changed: d.last_changed,
        }
    }
}

impl TryFrom<ApiAssignment> for DeviceAssignment {
    type Error = CoreError;

    fn try_from(a: ApiAssignment) -> Result<Self, Self::Error> {
        let kind: NodeKind = a.target_type.parse().map_err(|_| {
            CoreError::Internal(format!(
                "assignment {} has unknown target type '{}'",
                a.id, a.target_type
            ))
        })?;
        let entity_id = DeviceEntityId::new(&a.entity_id);
        let entity_type = a
            .entity_type
            .as_deref()
            .or_else(|| entity_id.domain())
            .map_or_else(|| DeviceDomain::Other(String::new()), DeviceDomain::from);
        Ok(Self {
            id: EntityId::from(a.id),
            farm_id: a.farm_id,
            entity_id,
            friendly_name: a.friendly_name,
            entity_type,
            target: AssignmentTarget::new(kind, a.target_id),
            created_at: a.created_at,
        })
    }
}

pub(crate) fn assignment_body(request: &AssignRequest) -> NewAssignmentBody {
    NewAssignmentBody {
        farm_id: request.farm_id.clone(),
        entity_id: request.entity_id.to_string(),
        friendly_name: request.friendly_name.clone(),
        entity_type: request.entity_type.to_string(),
        target_type: request.target.kind.to_string(),
        target_id: request.target.id.to_string(),
    }
}

// ── Realtime records ───────────────────────────────────────────────

/// Decode a domain value from an untyped change record.
pub trait FromRecord: Sized {
    fn from_record(record: &serde_json::Value) -> Result<Self, CoreError>;
}

fn decode<W: DeserializeOwned>(record: &serde_json::Value) -> Result<W, CoreError> {
    serde_json::from_value(record.clone())
        .map_err(|e| CoreError::Internal(format!("malformed change record: {e}")))
}

impl FromRecord for Row {
    fn from_record(record: &serde_json::Value) -> Result<Self, CoreError> {
        decode::<ApiRow>(record).map(Row::from)
    }
}

impl FromRecord for Rack {
    fn from_record(record: &serde_json::Value) -> Result<Self, CoreError> {
        decode::<ApiRack>(record).map(Rack::from)
    }
}

impl FromRecord for Shelf {
    fn from_record(record: &serde_json::Value) -> Result<Self, CoreError> {
        decode::<ApiShelf>(record).map(Shelf::from)
    }
}

impl FromRecord for Device {
    fn from_record(record: &serde_json::Value) -> Result<Self, CoreError> {
        decode::<ApiDevice>(record).map(Device::from)
    }
}

impl FromRecord for DeviceAssignment {
    fn from_record(record: &serde_json::Value) -> Result<Self, CoreError> {
        decode::<ApiAssignment>(record).and_then(DeviceAssignment::try_from)
    }
}

impl From<PostgresChange> for ChangeEvent {
    fn from(c: PostgresChange) -> Self {
        Self {
            kind: match c.change_type {
                ChangeType::Insert => ChangeKind::Insert,
                ChangeType::Update => ChangeKind::Update,
                ChangeType::Delete => ChangeKind::Delete,
            },
            timestamp: parse_datetime(c.commit_timestamp.as_deref()),
            table: c.table,
            new: c.record.filter(|r| !r.as_object().is_some_and(serde_json::Map::is_empty)),
            old: c.old_record.filter(|r| !r.as_object().is_some_and(serde_json::Map::is_empty)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn device_falls_back_to_entity_id_for_name_and_domain() {
        let device = Device::from(ApiDevice {
            entity_id: "Sensor.Shelf_Temp".into(),
            friendly_name: None,
            domain: None,
            state: Some("21.5".into()),
            area: None,
            last_changed: None,
        });
        assert_eq!(device.name, "sensor.shelf_temp");
        assert_eq!(device.domain, DeviceDomain::Sensor);
    }

    #[test]
    fn assignment_with_unknown_target_is_rejected() {
        let raw = ApiAssignment {
            id: "a1".into(),
            farm_id: "f".into(),
            entity_id: "light.a".into(),
            friendly_name: None,
            entity_type: None,
            target_type: "greenhouse".into(),
            target_id: "g1".into(),
            created_at: None,
        };
        assert!(DeviceAssignment::try_from(raw).is_err());
    }

    #[test]
    fn node_body_sets_single_parent_column() {
        let body = node_body(
            &ParentRef::Rack("k1".into()),
            &NewNode {
                name: "Shelf 1".into(),
                position: 0,
            },
        );
        assert_eq!(body.rack_id.as_deref(), Some("k1"));
        assert!(body.farm_id.is_none() && body.row_id.is_none());
    }

    #[test]
    fn negative_positions_clamp_to_zero() {
        let row = Row::from_record(&json!({
            "id": "r1", "farm_id": "f", "name": "Row 1", "position": -3
        }))
        .unwrap();
        assert_eq!(row.position, 0);
    }

    #[test]
    fn delete_change_drops_empty_new_record() {
        let event = ChangeEvent::from(PostgresChange {
            change_type: ChangeType::Delete,
            schema: "public".into(),
            table: "racks".into(),
            record: Some(json!({})),
            old_record: Some(json!({ "id": "k1" })),
            commit_timestamp: Some("2026-05-01T10:00:00Z".into()),
        });
        assert!(event.new.is_none());
        assert_eq!(event.record_id(), Some(EntityId::from("k1")));
        assert!(event.timestamp.is_some());
    }
}
