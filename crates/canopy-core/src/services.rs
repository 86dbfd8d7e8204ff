// ── External collaborators ──
//
// The core talks to persistence, the device registry, the realtime feed,
// the notification sink and the confirmation prompt only through these
// traits. `backend` provides the REST/websocket implementations; tests
// substitute in-memory fakes.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::error::CoreError;
use crate::model::{
    AssignRequest, AssignmentTarget, ChangeEvent, Device, DeviceAssignment, DeviceDomain, EntityId,
    NewNode, NodeKind, NodePatch, NodeRecord, ParentRef,
};
use crate::realtime::{ChannelSpec, ConnectionState};
use crate::store::TopologySnapshot;

/// Row/rack/shelf CRUD.
#[async_trait]
pub trait TopologyPersistence: Send + Sync {
    /// Load every row, rack and shelf of a farm.
    async fn load(&self, farm_id: &str) -> Result<TopologySnapshot, CoreError>;

    async fn create(&self, parent: &ParentRef, node: &NewNode) -> Result<NodeRecord, CoreError>;

    async fn update(
        &self,
        kind: NodeKind,
        id: &EntityId,
        patch: &NodePatch,
    ) -> Result<NodeRecord, CoreError>;

    /// Delete a node. The backend cascades to descendant nodes but not to
    /// assignments, which carry no foreign key.
    async fn delete(&self, kind: NodeKind, id: &EntityId) -> Result<(), CoreError>;
}

/// Device search and assignment records.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn search(
        &self,
        farm_id: &str,
        query: &str,
        domain: Option<&DeviceDomain>,
    ) -> Result<Vec<Device>, CoreError>;

    /// Assignments of a farm, optionally narrowed to one target.
    async fn assigned_devices(
        &self,
        farm_id: &str,
        target: Option<&AssignmentTarget>,
    ) -> Result<Vec<DeviceAssignment>, CoreError>;

    async fn assign(&self, request: &AssignRequest) -> Result<DeviceAssignment, CoreError>;

    /// Fails with [`CoreError::NotFound`] when the assignment is gone.
    async fn unassign(&self, assignment_id: &EntityId) -> Result<(), CoreError>;

    /// Remove every assignment of a farm pointing at one of `targets`.
    /// Returns how many were removed.
    async fn unassign_targets(
        &self,
        farm_id: &str,
        targets: &[AssignmentTarget],
    ) -> Result<usize, CoreError>;
}

/// Channel-based change feed keyed by table plus row filter.
pub trait RealtimeTransport: Send + Sync {
    /// Open a channel. Events arrive in transport order.
    fn open(&self, spec: &ChannelSpec) -> mpsc::UnboundedReceiver<ChangeEvent>;

    /// Close a channel opened with `open`.
    fn close(&self, spec: &ChannelSpec);

    fn connection_state(&self) -> watch::Receiver<ConnectionState>;

    /// Close the connection for good. No reconnection follows.
    fn shutdown(&self);
}

/// Fire-and-forget sink for user-facing outcomes.
pub trait Notifier: Send + Sync {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
}

/// Yes/no prompt shown before destructive actions.
#[async_trait]
pub trait ConfirmPrompt: Send + Sync {
    async fn confirm(&self, message: &str) -> bool;
}

// ── Default implementations ──────────────────────────────────────────

/// Routes notifications to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn success(&self, message: &str) {
        info!(outcome = "success", "{message}");
    }

    fn error(&self, message: &str) {
        warn!(outcome = "error", "{message}");
    }
}

/// Answers every prompt with a fixed value (`--yes`, scripted runs).
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub bool);

#[async_trait]
impl ConfirmPrompt for AutoConfirm {
    async fn confirm(&self, message: &str) -> bool {
        tracing::debug!(answer = self.0, "auto-confirm: {message}");
        self.0
    }
}
