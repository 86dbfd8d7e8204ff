// ── Command API ──
//
// All write operations flow through a unified `Command` enum. The
// controller's processor task applies them one at a time, in arrival
// order.

use crate::error::CoreError;
use crate::model::{
    AssignmentTarget, Device, DeviceAssignment, DeviceDomain, EntityId, NodeDraft, NodeKind,
    NodeRecord, ParentRef, QuickAssignReport,
};
use crate::store::CascadeReport;

/// A command envelope sent through the command channel.
/// Contains the command and a oneshot response channel.
pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub response_tx: tokio::sync::oneshot::Sender<Result<CommandResult, CoreError>>,
}

/// All possible write operations against a farm.
#[derive(Debug, Clone)]
pub enum Command {
    // ── Topology ─────────────────────────────────────────────────────
    AddNode {
        parent: ParentRef,
        draft: NodeDraft,
    },
    RenameNode {
        kind: NodeKind,
        id: EntityId,
        name: String,
    },
    /// Requires confirmation through the controller's prompt.
    RemoveNode {
        kind: NodeKind,
        id: EntityId,
    },
    Reorder {
        parent: ParentRef,
        order: Vec<EntityId>,
    },
    MoveNode {
        kind: NodeKind,
        id: EntityId,
        index: usize,
    },

    // ── Assignments ──────────────────────────────────────────────────
    AssignDevice {
        device: Device,
        target: AssignmentTarget,
    },
    UnassignDevice {
        assignment_id: EntityId,
    },
    QuickAssign {
        target: AssignmentTarget,
        domain: DeviceDomain,
    },
}

/// Result of a successfully executed command.
#[derive(Debug, Clone)]
pub enum CommandResult {
    Ok,
    Node(NodeRecord),
    Removed(CascadeReport),
    Assignment(DeviceAssignment),
    QuickAssign(QuickAssignReport),
}
