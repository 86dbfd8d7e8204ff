// ── REST and websocket collaborators ──
//
// Production implementations of the service traits on top of
// `canopy-api`. Wire types are converted at this boundary; nothing past
// it sees JSON rows or socket frames.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use canopy_api::rest::models::{ApiRack, ApiRow, ApiShelf};
use canopy_api::transport::{ApiCredentials, TlsMode, TransportConfig};
use canopy_api::{ChannelTopic, RealtimeClient, RealtimeConfig, RestClient, SocketState};

use crate::config::{AuthCredentials, FarmConfig, TlsVerification};
use crate::convert::{assignment_body, flatten_tree, node_body, patch_body};
use crate::error::CoreError;
use crate::model::{
    AssignRequest, AssignmentTarget, ChangeEvent, Device, DeviceAssignment, DeviceDomain, EntityId,
    NewNode, NodeKind, NodePatch, NodeRecord, ParentRef, Rack, Row, Shelf,
};
use crate::realtime::{ChannelSpec, ConnectionState};
use crate::services::{DeviceRegistry, RealtimeTransport, TopologyPersistence};
use crate::store::TopologySnapshot;

const REALTIME_SCHEMA: &str = "public";

// ── Transport setup ──────────────────────────────────────────────

fn credentials(auth: &AuthCredentials) -> ApiCredentials {
    let creds = ApiCredentials::new(auth.anon_key.clone());
    match &auth.access_token {
        Some(token) => creds.with_access_token(token.clone()),
        None => creds,
    }
}

/// Build a [`TransportConfig`] from the farm configuration.
fn build_transport(config: &FarmConfig) -> TransportConfig {
    TransportConfig {
        tls: tls_to_transport(&config.tls),
        timeout: config.timeout,
    }
}

fn tls_to_transport(tls: &TlsVerification) -> TlsMode {
    match tls {
        TlsVerification::SystemDefaults => TlsMode::System,
        TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
        TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
    }
}

// ── RestBackend ──────────────────────────────────────────────────

/// Topology persistence and device registry over the REST table API.
#[derive(Clone)]
pub struct RestBackend {
    client: RestClient,
}

impl RestBackend {
    pub fn new(config: &FarmConfig) -> Result<Self, CoreError> {
        let client = RestClient::new(
            config.url.clone(),
            &credentials(&config.auth),
            &build_transport(config),
        )?;
        Ok(Self { client })
    }

    pub fn from_client(client: RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TopologyPersistence for RestBackend {
    async fn load(&self, farm_id: &str) -> Result<TopologySnapshot, CoreError> {
        let tree = self.client.fetch_topology(farm_id).await?;
        Ok(flatten_tree(tree))
    }

    async fn create(&self, parent: &ParentRef, node: &NewNode) -> Result<NodeRecord, CoreError> {
        let body = node_body(parent, node);
        let table = parent.child_kind().table();
        let record = match parent.child_kind() {
            NodeKind::Row => NodeRecord::Row(Row::from(
                self.client.create_node::<ApiRow>(table, &body).await?,
            )),
            NodeKind::Rack => NodeRecord::Rack(Rack::from(
                self.client.create_node::<ApiRack>(table, &body).await?,
            )),
            NodeKind::Shelf => NodeRecord::Shelf(Shelf::from(
                self.client.create_node::<ApiShelf>(table, &body).await?,
            )),
        };
        Ok(record)
    }

    async fn update(
        &self,
        kind: NodeKind,
        id: &EntityId,
        patch: &NodePatch,
    ) -> Result<NodeRecord, CoreError> {
        let body = patch_body(patch);
        let table = kind.table();
        let id = id.to_string();
        let record = match kind {
            NodeKind::Row => NodeRecord::Row(Row::from(
                self.client.update_node::<ApiRow>(table, &id, &body).await?,
            )),
            NodeKind::Rack => NodeRecord::Rack(Rack::from(
                self.client.update_node::<ApiRack>(table, &id, &body).await?,
            )),
            NodeKind::Shelf => NodeRecord::Shelf(Shelf::from(
                self.client.update_node::<ApiShelf>(table, &id, &body).await?,
            )),
        };
        Ok(record)
    }

    async fn delete(&self, kind: NodeKind, id: &EntityId) -> Result<(), CoreError> {
        self.client
            .delete_node(kind.table(), &id.to_string())
            .await
            .map_err(CoreError::from)
    }
}

#[async_trait]
impl DeviceRegistry for RestBackend {
    async fn search(
        &self,
        farm_id: &str,
        query: &str,
        domain: Option<&DeviceDomain>,
    ) -> Result<Vec<Device>, CoreError> {
        let raw = self
            .client
            .search_devices(farm_id, query, domain.map(DeviceDomain::as_str))
            .await?;
        Ok(raw.into_iter().map(Device::from).collect())
    }

    async fn assigned_devices(
        &self,
        farm_id: &str,
        target: Option<&AssignmentTarget>,
    ) -> Result<Vec<DeviceAssignment>, CoreError> {
        let target_parts = target.map(|t| (t.kind.to_string(), t.id.to_string()));
        let raw = self
            .client
            .list_assignments(
                farm_id,
                target_parts
                    .as_ref()
                    .map(|(kind, id)| (kind.as_str(), id.as_str())),
            )
            .await?;

        let mut assignments = Vec::with_capacity(raw.len());
        for record in raw {
            match DeviceAssignment::try_from(record) {
                Ok(a) => assignments.push(a),
                Err(e) => warn!(error = %e, "skipping malformed assignment"),
            }
        }
        Ok(assignments)
    }

    async fn assign(&self, request: &AssignRequest) -> Result<DeviceAssignment, CoreError> {
        match self.client.create_assignment(&assignment_body(request)).await {
            Ok(raw) => DeviceAssignment::try_from(raw),
            Err(e) if e.is_unique_violation() => Err(CoreError::DuplicateAssignment {
                entity_id: request.entity_id.to_string(),
                target: "another target".into(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn unassign(&self, assignment_id: &EntityId) -> Result<(), CoreError> {
        self.client
            .delete_assignment(&assignment_id.to_string())
            .await
            .map_err(CoreError::from)
    }

    async fn unassign_targets(
        &self,
        farm_id: &str,
        targets: &[AssignmentTarget],
    ) -> Result<usize, CoreError> {
        let mut removed = 0;
        for kind in [NodeKind::Row, NodeKind::Rack, NodeKind::Shelf] {
            let ids: Vec<String> = targets
                .iter()
                .filter(|t| t.kind == kind)
                .map(|t| t.id.to_string())
                .collect();
            let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
            removed += self
                .client
                .delete_assignments_for_targets(farm_id, &kind.to_string(), &ids)
                .await?;
        }
        Ok(removed)
    }
}

// ── RealtimeBackend ──────────────────────────────────────────────

/// Change feed over the realtime websocket.
///
/// Spawns the socket loop on construction, so it must be created inside a
/// Tokio runtime.
pub struct RealtimeBackend {
    client: RealtimeClient,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl RealtimeBackend {
    pub fn connect(config: &FarmConfig) -> Self {
        let mut rt_config = RealtimeConfig::new(config.url.clone(), credentials(&config.auth));
        rt_config.reconnect = config.reconnect.clone();
        let client = RealtimeClient::connect(rt_config);

        let cancel = CancellationToken::new();
        let (state_tx, state) = watch::channel(ConnectionState::Connecting);
        tokio::spawn(state_bridge_task(client.state(), state_tx, cancel.clone()));

        Self {
            client,
            state,
            cancel,
        }
    }
}

fn topic_for(spec: &ChannelSpec) -> ChannelTopic {
    let topic = ChannelTopic::table(REALTIME_SCHEMA, spec.table.clone());
    match &spec.filter {
        Some(filter) => topic.with_filter(filter.clone()),
        None => topic,
    }
}

fn map_socket_state(state: &SocketState) -> ConnectionState {
    match state {
        SocketState::Connecting => ConnectionState::Connecting,
        SocketState::Connected => ConnectionState::Connected,
        SocketState::Reconnecting { attempt } => ConnectionState::Reconnecting { attempt: *attempt },
        SocketState::Disconnected => ConnectionState::Disconnected,
        SocketState::Failed => ConnectionState::Failed,
    }
}

impl RealtimeTransport for RealtimeBackend {
    fn open(&self, spec: &ChannelSpec) -> mpsc::UnboundedReceiver<ChangeEvent> {
        let mut raw = self.client.join(topic_for(spec));
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = spec.key();

        tokio::spawn(async move {
            while let Some(change) = raw.recv().await {
                if tx.send(ChangeEvent::from(change)).is_err() {
                    break;
                }
            }
            debug!(channel = %channel, "realtime forwarder finished");
        });
        rx
    }

    fn close(&self, spec: &ChannelSpec) {
        self.client.leave(&topic_for(spec));
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    fn shutdown(&self) {
        self.client.disconnect();
        self.cancel.cancel();
    }
}

impl Drop for RealtimeBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn state_bridge_task(
    mut socket: watch::Receiver<SocketState>,
    out: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
) {
    loop {
        let mapped = map_socket_state(&socket.borrow_and_update());
        out.send_replace(mapped);

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = socket.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    // The socket is gone for good; report its final state.
    out.send_replace(map_socket_state(&socket.borrow()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_states_map_one_to_one() {
        assert_eq!(
            map_socket_state(&SocketState::Reconnecting { attempt: 3 }),
            ConnectionState::Reconnecting { attempt: 3 }
        );
        assert_eq!(
            map_socket_state(&SocketState::Disconnected),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn channel_spec_becomes_filtered_topic() {
        let topic = topic_for(&ChannelSpec::scoped("racks", "user_id", "u1"));
        assert_eq!(topic.topic(), "realtime:public:racks:user_id=eq.u1");
    }
}
