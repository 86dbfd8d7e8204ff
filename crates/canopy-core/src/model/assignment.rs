// ── Device assignment types ──

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::device::{Device, DeviceDomain};
use super::ids::{DeviceEntityId, EntityId};
use super::topology::NodeKind;

/// The topology node a device is bound to. Formats as `shelf:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignmentTarget {
    pub kind: NodeKind,
    pub id: EntityId,
}

impl AssignmentTarget {
    pub fn new(kind: NodeKind, id: impl Into<EntityId>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn shelf(id: impl Into<EntityId>) -> Self {
        Self::new(NodeKind::Shelf, id)
    }
}

impl fmt::Display for AssignmentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for AssignmentTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("expected <row|rack|shelf>:<id>, got '{s}'"))?;
        let kind: NodeKind = kind
            .parse()
            .map_err(|_| format!("unknown target type '{kind}' (expected row, rack, or shelf)"))?;
        if id.trim().is_empty() {
            return Err("target id must not be empty".into());
        }
        Ok(Self::new(kind, id.trim()))
    }
}

/// An active binding of a device to a node.
///
/// A device entity id appears in at most one assignment per farm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAssignment {
    pub id: EntityId,
    pub farm_id: String,
    pub entity_id: DeviceEntityId,
    /// Display name captured when the assignment was made.
    pub friendly_name: Option<String>,
    pub entity_type: DeviceDomain,
    pub target: AssignmentTarget,
    pub created_at: Option<DateTime<Utc>>,
}

/// Create request handed to the device registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignRequest {
    pub farm_id: String,
    pub entity_id: DeviceEntityId,
    pub friendly_name: Option<String>,
    pub entity_type: DeviceDomain,
    pub target: AssignmentTarget,
}

impl AssignRequest {
    pub fn for_device(farm_id: impl Into<String>, device: &Device, target: AssignmentTarget) -> Self {
        Self {
            farm_id: farm_id.into(),
            entity_id: device.entity_id.clone(),
            friendly_name: Some(device.name.clone()),
            entity_type: device.domain.clone(),
            target,
        }
    }
}

/// Outcome of a bulk assign.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuickAssignReport {
    pub assigned: Vec<DeviceAssignment>,
    /// Entity ids that failed, with the failure message.
    pub failed: Vec<(DeviceEntityId, String)>,
}

impl QuickAssignReport {
    pub fn success_count(&self) -> usize {
        self.assigned.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }
}
