// Shared in-memory collaborators for canopy-core integration tests.
#![allow(clippy::unwrap_used, dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::{mpsc, watch};

use canopy_core::{
    AssignRequest, AssignmentTarget, AuthCredentials, ChangeEvent, ChannelSpec, ConfirmPrompt,
    ConnectionState, CoreError, Device, DeviceAssignment, DeviceDomain, DeviceEntityId,
    DeviceRegistry, EntityId, FarmConfig, NewNode, NodeKind, NodePatch, NodeRecord, Notifier,
    ParentRef, Rack, RealtimeTransport, Row, Services, Shelf, TopologyPersistence,
    TopologySnapshot,
};

pub const FARM: &str = "farm-1";

// ── Backend ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct BackendState {
    pub rows: Vec<Row>,
    pub racks: Vec<Rack>,
    pub shelves: Vec<Shelf>,
    pub devices: Vec<Device>,
    pub assignments: Vec<DeviceAssignment>,
    next_id: usize,
    /// Position updates that succeed before every later one fails.
    pub position_updates_before_failure: Option<usize>,
    pub position_updates: Vec<(EntityId, u32)>,
    pub fail_search: bool,
    pub fail_unassign_targets: bool,
}

impl BackendState {
    fn next_id(&mut self, prefix: &str) -> EntityId {
        self.next_id += 1;
        EntityId::from(format!("{prefix}-{}", self.next_id))
    }
}

/// Persistence and device registry backed by plain vectors.
#[derive(Default)]
pub struct FakeBackend {
    pub state: Mutex<BackendState>,
    pub calls: AtomicUsize,
}

impl FakeBackend {
    pub fn with_row(name: &str) -> (Arc<Self>, EntityId) {
        let backend = Arc::new(Self::default());
        let id = backend.add_row(name, 0);
        (backend, id)
    }

    pub fn add_row(&self, name: &str, position: u32) -> EntityId {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("row");
        state.rows.push(Row {
            id: id.clone(),
            farm_id: FARM.into(),
            name: name.into(),
            position,
        });
        id
    }

    pub fn add_rack(&self, row_id: &EntityId, name: &str, position: u32) -> EntityId {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("rack");
        state.racks.push(Rack {
            id: id.clone(),
            row_id: row_id.clone(),
            name: name.into(),
            position,
        });
        id
    }

    pub fn add_shelf(&self, rack_id: &EntityId, name: &str, position: u32) -> EntityId {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("shelf");
        state.shelves.push(Shelf {
            id: id.clone(),
            rack_id: rack_id.clone(),
            name: name.into(),
            position,
        });
        id
    }

    pub fn add_device(&self, entity_id: &str, state_value: Option<&str>) -> Device {
        let device = device(entity_id, state_value);
        self.state.lock().unwrap().devices.push(device.clone());
        device
    }

    pub fn fail_position_updates_after(&self, n: usize) {
        self.state.lock().unwrap().position_updates_before_failure = Some(n);
    }

    /// Store an assignment directly, as if made by another client.
    pub fn add_assignment(&self, entity_id: &str, target: AssignmentTarget) -> EntityId {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("asg");
        let entity_id = DeviceEntityId::new(entity_id);
        state.assignments.push(DeviceAssignment {
            id: id.clone(),
            farm_id: FARM.into(),
            entity_type: DeviceDomain::from(entity_id.domain().unwrap_or_default()),
            entity_id,
            friendly_name: None,
            target,
            created_at: None,
        });
        id
    }

    pub fn assignment_count(&self) -> usize {
        self.state.lock().unwrap().assignments.len()
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn device(entity_id: &str, state: Option<&str>) -> Device {
    let entity_id = DeviceEntityId::new(entity_id);
    Device {
        domain: DeviceDomain::from(entity_id.domain().unwrap_or_default()),
        name: entity_id.to_string(),
        entity_id,
        state: state.map(str::to_owned),
        area: None,
        last_changed: None,
    }
}

fn missing(kind: NodeKind, id: &EntityId) -> CoreError {
    CoreError::not_found(kind.label(), id)
}

#[async_trait]
impl TopologyPersistence for FakeBackend {
    async fn load(&self, farm_id: &str) -> Result<TopologySnapshot, CoreError> {
        self.touch();
        let state = self.state.lock().unwrap();
        Ok(TopologySnapshot {
            rows: state
                .rows
                .iter()
                .filter(|r| r.farm_id == farm_id)
                .cloned()
                .collect(),
            racks: state.racks.clone(),
            shelves: state.shelves.clone(),
        })
    }

    async fn create(&self, parent: &ParentRef, node: &NewNode) -> Result<NodeRecord, CoreError> {
        self.touch();
        let mut state = self.state.lock().unwrap();
        let record = match parent {
            ParentRef::Farm(farm_id) => {
                let row = Row {
                    id: state.next_id("row"),
                    farm_id: farm_id.clone(),
                    name: node.name.clone(),
                    position: node.position,
                };
                state.rows.push(row.clone());
                NodeRecord::Row(row)
            }
            ParentRef::Row(row_id) => {
                if !state.rows.iter().any(|r| &r.id == row_id) {
                    return Err(missing(NodeKind::Row, row_id));
                }
                let rack = Rack {
                    id: state.next_id("rack"),
                    row_id: row_id.clone(),
                    name: node.name.clone(),
                    position: node.position,
                };
                state.racks.push(rack.clone());
                NodeRecord::Rack(rack)
            }
            ParentRef::Rack(rack_id) => {
                if !state.racks.iter().any(|r| &r.id == rack_id) {
                    return Err(missing(NodeKind::Rack, rack_id));
                }
                let shelf = Shelf {
                    id: state.next_id("shelf"),
                    rack_id: rack_id.clone(),
                    name: node.name.clone(),
                    position: node.position,
                };
                state.shelves.push(shelf.clone());
                NodeRecord::Shelf(shelf)
            }
        };
        Ok(record)
    }

    async fn update(
        &self,
        kind: NodeKind,
        id: &EntityId,
        patch: &NodePatch,
    ) -> Result<NodeRecord, CoreError> {
        self.touch();
        let mut state = self.state.lock().unwrap();

        if let Some(position) = patch.position {
            if let Some(limit) = state.position_updates_before_failure {
                if state.position_updates.len() >= limit {
                    return Err(CoreError::Network {
                        message: "connection reset".into(),
                        code: None,
                        status: Some(503),
                    });
                }
            }
            state.position_updates.push((id.clone(), position));
        }

        macro_rules! patch_in {
            ($list:expr, $variant:ident) => {{
                let item = $list
                    .iter_mut()
                    .find(|n| &n.id == id)
                    .ok_or_else(|| missing(kind, id))?;
                if let Some(name) = &patch.name {
                    item.name = name.clone();
                }
                if let Some(position) = patch.position {
                    item.position = position;
                }
                NodeRecord::$variant(item.clone())
            }};
        }

        let record = match kind {
            NodeKind::Row => patch_in!(state.rows, Row),
            NodeKind::Rack => patch_in!(state.racks, Rack),
            NodeKind::Shelf => patch_in!(state.shelves, Shelf),
        };
        Ok(record)
    }

    async fn delete(&self, kind: NodeKind, id: &EntityId) -> Result<(), CoreError> {
        self.touch();
        let mut state = self.state.lock().unwrap();
        let mut racks: Vec<EntityId> = Vec::new();
        let mut shelves: Vec<EntityId> = Vec::new();
        match kind {
            NodeKind::Row => {
                let before = state.rows.len();
                state.rows.retain(|r| &r.id != id);
                if state.rows.len() == before {
                    return Err(missing(kind, id));
                }
                racks = state
                    .racks
                    .iter()
                    .filter(|r| &r.row_id == id)
                    .map(|r| r.id.clone())
                    .collect();
            }
            NodeKind::Rack => {
                if !state.racks.iter().any(|r| &r.id == id) {
                    return Err(missing(kind, id));
                }
                racks.push(id.clone());
            }
            NodeKind::Shelf => {
                if !state.shelves.iter().any(|s| &s.id == id) {
                    return Err(missing(kind, id));
                }
                shelves.push(id.clone());
            }
        }
        state.racks.retain(|r| !racks.contains(&r.id));
        shelves.extend(
            state
                .shelves
                .iter()
                .filter(|s| racks.contains(&s.rack_id))
                .map(|s| s.id.clone()),
        );
        // Foreign keys cascade to child nodes only; assignments stay.
        state.shelves.retain(|s| !shelves.contains(&s.id));
        Ok(())
    }
}

#[async_trait]
impl DeviceRegistry for FakeBackend {
    async fn search(
        &self,
        _farm_id: &str,
        query: &str,
        domain: Option<&DeviceDomain>,
    ) -> Result<Vec<Device>, CoreError> {
        self.touch();
        let state = self.state.lock().unwrap();
        if state.fail_search {
            return Err(CoreError::Network {
                message: "registry offline".into(),
                code: None,
                status: Some(502),
            });
        }
        let query = query.to_lowercase();
        Ok(state
            .devices
            .iter()
            .filter(|d| domain.is_none_or(|want| &d.domain == want))
            .filter(|d| {
                query.is_empty()
                    || d.entity_id.as_str().contains(&query)
                    || d.name.to_lowercase().contains(&query)
            })
            .cloned()
            .collect())
    }

    async fn assigned_devices(
        &self,
        farm_id: &str,
        target: Option<&AssignmentTarget>,
    ) -> Result<Vec<DeviceAssignment>, CoreError> {
        self.touch();
        let state = self.state.lock().unwrap();
        Ok(state
            .assignments
            .iter()
            .filter(|a| a.farm_id == farm_id)
            .filter(|a| target.is_none_or(|t| &a.target == t))
            .cloned()
            .collect())
    }

    async fn assign(&self, request: &AssignRequest) -> Result<DeviceAssignment, CoreError> {
        self.touch();
        let mut state = self.state.lock().unwrap();
        if state
            .assignments
            .iter()
            .any(|a| a.entity_id == request.entity_id)
        {
            return Err(CoreError::Network {
                message: "duplicate key value violates unique constraint".into(),
                code: Some("23505".into()),
                status: Some(409),
            });
        }
        let assignment = DeviceAssignment {
            id: state.next_id("asg"),
            farm_id: request.farm_id.clone(),
            entity_id: request.entity_id.clone(),
            friendly_name: request.friendly_name.clone(),
            entity_type: request.entity_type.clone(),
            target: request.target.clone(),
            created_at: None,
        };
        state.assignments.push(assignment.clone());
        Ok(assignment)
    }

    async fn unassign(&self, assignment_id: &EntityId) -> Result<(), CoreError> {
        self.touch();
        let mut state = self.state.lock().unwrap();
        let before = state.assignments.len();
        state.assignments.retain(|a| &a.id != assignment_id);
        if state.assignments.len() == before {
            return Err(CoreError::not_found("Assignment", assignment_id));
        }
        Ok(())
    }

    async fn unassign_targets(
        &self,
        farm_id: &str,
        targets: &[AssignmentTarget],
    ) -> Result<usize, CoreError> {
        self.touch();
        let mut state = self.state.lock().unwrap();
        if state.fail_unassign_targets {
            return Err(CoreError::Network {
                message: "registry offline".into(),
                code: None,
                status: Some(502),
            });
        }
        let before = state.assignments.len();
        state
            .assignments
            .retain(|a| a.farm_id != farm_id || !targets.contains(&a.target));
        Ok(before - state.assignments.len())
    }
}

// ── Notifier / confirm ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Note {
    Success(String),
    Error(String),
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notes: Mutex<Vec<Note>>,
}

impl RecordingNotifier {
    pub fn take(&self) -> Vec<Note> {
        std::mem::take(&mut *self.notes.lock().unwrap())
    }

    pub fn errors(&self) -> usize {
        self.notes
            .lock()
            .unwrap()
            .iter()
            .filter(|n| matches!(n, Note::Error(_)))
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn success(&self, message: &str) {
        self.notes.lock().unwrap().push(Note::Success(message.into()));
    }

    fn error(&self, message: &str) {
        self.notes.lock().unwrap().push(Note::Error(message.into()));
    }
}

/// Answers with a settable value and records every prompt.
pub struct ScriptedConfirm {
    pub answer: AtomicBool,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedConfirm {
    pub fn new(answer: bool) -> Self {
        Self {
            answer: AtomicBool::new(answer),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ConfirmPrompt for ScriptedConfirm {
    async fn confirm(&self, message: &str) -> bool {
        self.prompts.lock().unwrap().push(message.into());
        self.answer.load(Ordering::SeqCst)
    }
}

// ── Realtime ────────────────────────────────────────────────────────

/// Transport whose channels are fed by the test.
pub struct FakeRealtime {
    channels: Mutex<Vec<(ChannelSpec, mpsc::UnboundedSender<ChangeEvent>)>>,
    state: watch::Sender<ConnectionState>,
    pub shut_down: AtomicBool,
}

impl Default for FakeRealtime {
    fn default() -> Self {
        Self {
            channels: Mutex::new(Vec::new()),
            state: watch::channel(ConnectionState::Connected).0,
            shut_down: AtomicBool::new(false),
        }
    }
}

impl FakeRealtime {
    pub fn open_tables(&self) -> Vec<String> {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .map(|(spec, _)| spec.table.clone())
            .collect()
    }

    /// Deliver an event on every open channel for its table.
    pub fn push(&self, event: &ChangeEvent) {
        for (spec, tx) in self.channels.lock().unwrap().iter() {
            if spec.table == event.table {
                let _ = tx.send(event.clone());
            }
        }
    }
}

impl RealtimeTransport for FakeRealtime {
    fn open(&self, spec: &ChannelSpec) -> mpsc::UnboundedReceiver<ChangeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.lock().unwrap().push((spec.clone(), tx));
        rx
    }

    fn close(&self, spec: &ChannelSpec) {
        self.channels.lock().unwrap().retain(|(s, _)| s != spec);
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.state.send_replace(ConnectionState::Disconnected);
    }
}

// ── Wiring ──────────────────────────────────────────────────────────

pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub notifier: Arc<RecordingNotifier>,
    pub confirm: Arc<ScriptedConfirm>,
    pub realtime: Arc<FakeRealtime>,
}

impl Harness {
    pub fn new(backend: Arc<FakeBackend>) -> Self {
        Self {
            backend,
            notifier: Arc::new(RecordingNotifier::default()),
            confirm: Arc::new(ScriptedConfirm::new(true)),
            realtime: Arc::new(FakeRealtime::default()),
        }
    }

    pub fn services(&self) -> Services {
        let realtime: Arc<dyn RealtimeTransport> = self.realtime.clone();
        Services {
            persistence: self.backend.clone(),
            registry: self.backend.clone(),
            realtime: Some(realtime),
            notifier: self.notifier.clone(),
            confirm: self.confirm.clone(),
        }
    }

    pub fn config(&self, realtime: bool) -> FarmConfig {
        let mut config = FarmConfig::new(
            "https://farm.example.co".parse().unwrap(),
            AuthCredentials::anon(SecretString::from("anon-key")),
            FARM,
        );
        config.realtime_enabled = realtime;
        config.refresh_interval_secs = 0;
        config
    }
}
