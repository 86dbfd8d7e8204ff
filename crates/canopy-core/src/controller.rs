// ── Farm controller ──
//
// Full lifecycle management for one open farm. Handles the initial load,
// background refresh, command routing, realtime store sync and reactive
// data streaming through the FarmStore.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use canopy_api::tables;

use crate::assignment::AssignmentEngine;
use crate::backend::{RealtimeBackend, RestBackend};
use crate::command::{Command, CommandEnvelope, CommandResult};
use crate::config::FarmConfig;
use crate::error::CoreError;
use crate::layers::LayerCoordinator;
use crate::model::{Device, TopologyTree};
use crate::realtime::{ChannelSpec, ConnectionState, Subscription, SubscriptionRegistry};
use crate::services::{
    AutoConfirm, ConfirmPrompt, DeviceRegistry, Notifier, RealtimeTransport, TopologyPersistence,
    TracingNotifier,
};
use crate::store::FarmStore;
use crate::topology::FarmTopology;

const COMMAND_CHANNEL_SIZE: usize = 64;

// ── Services ─────────────────────────────────────────────────────

/// The collaborators a controller works through.
#[derive(Clone)]
pub struct Services {
    pub persistence: Arc<dyn TopologyPersistence>,
    pub registry: Arc<dyn DeviceRegistry>,
    /// Change feed. When `None` and realtime is enabled, `connect` opens
    /// the websocket feed described by the config.
    pub realtime: Option<Arc<dyn RealtimeTransport>>,
    pub notifier: Arc<dyn Notifier>,
    pub confirm: Arc<dyn ConfirmPrompt>,
}

impl Services {
    /// REST persistence and registry, tracing notifications, and a prompt
    /// that declines every destructive action.
    pub fn rest(config: &FarmConfig) -> Result<Self, CoreError> {
        let rest = Arc::new(RestBackend::new(config)?);
        let persistence: Arc<dyn TopologyPersistence> = rest.clone();
        Ok(Self {
            persistence,
            registry: rest,
            realtime: None,
            notifier: Arc::new(TracingNotifier),
            confirm: Arc::new(AutoConfirm(false)),
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_confirm(mut self, confirm: Arc<dyn ConfirmPrompt>) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_realtime(mut self, realtime: Arc<dyn RealtimeTransport>) -> Self {
        self.realtime = Some(realtime);
        self
    }
}

// ── FarmController ───────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. Reads go straight to the
/// store; mutations are sent as [`Command`]s to a single processor task
/// and applied in arrival order.
#[derive(Clone)]
pub struct FarmController {
    inner: Arc<ControllerInner>,
}

struct ActiveRealtime {
    transport: Arc<dyn RealtimeTransport>,
    registry: SubscriptionRegistry,
    subscriptions: Vec<Subscription>,
}

struct ControllerInner {
    config: FarmConfig,
    services: Services,
    store: Arc<FarmStore>,
    topology: FarmTopology,
    assignments: AssignmentEngine,
    layers: Arc<LayerCoordinator>,
    connection_state: watch::Sender<ConnectionState>,
    command_tx: Mutex<mpsc::Sender<CommandEnvelope>>,
    command_rx: Mutex<Option<mpsc::Receiver<CommandEnvelope>>>,
    cancel: CancellationToken,
    /// Child token for the current connection, cancelled on disconnect and
    /// replaced on reconnect.
    cancel_child: Mutex<CancellationToken>,
    realtime: Mutex<Option<ActiveRealtime>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl FarmController {
    /// Create a controller talking to the REST backend. Does NOT connect;
    /// call [`connect()`](Self::connect) to load the farm and start
    /// background tasks.
    pub fn new(config: FarmConfig) -> Result<Self, CoreError> {
        let services = Services::rest(&config)?;
        Ok(Self::with_services(config, services))
    }

    /// Create a controller over explicit collaborators.
    pub fn with_services(config: FarmConfig, services: Services) -> Self {
        let store = Arc::new(FarmStore::new(config.farm_id.clone()));
        let topology = FarmTopology::new(
            Arc::clone(&store),
            Arc::clone(&services.persistence),
            Arc::clone(&services.registry),
            Arc::clone(&services.notifier),
            Arc::clone(&services.confirm),
        );
        let assignments = AssignmentEngine::new(
            Arc::clone(&store),
            Arc::clone(&services.registry),
            Arc::clone(&services.notifier),
        );
        let layers = Arc::new(LayerCoordinator::with_mode(config.layer_mode));
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();

        Self {
            inner: Arc::new(ControllerInner {
                config,
                services,
                store,
                topology,
                assignments,
                layers,
                connection_state,
                command_tx: Mutex::new(command_tx),
                command_rx: Mutex::new(Some(command_rx)),
                cancel,
                cancel_child: Mutex::new(cancel_child),
                realtime: Mutex::new(None),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &FarmConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<FarmStore> {
        &self.inner.store
    }

    pub fn topology(&self) -> &FarmTopology {
        &self.inner.topology
    }

    pub fn assignments(&self) -> &AssignmentEngine {
        &self.inner.assignments
    }

    pub fn layers(&self) -> &LayerCoordinator {
        &self.inner.layers
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Load the farm and start background tasks (command processor,
    /// periodic refresh, realtime store sync).
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.inner
            .connection_state
            .send_replace(ConnectionState::Connecting);

        // Fresh child token for this connection (supports reconnect).
        let child = self.inner.cancel.child_token();
        *self.inner.cancel_child.lock().await = child.clone();

        if let Err(e) = self.full_refresh().await {
            warn!(error = %e, "initial load failed");
            self.inner
                .connection_state
                .send_replace(ConnectionState::Failed);
            return Err(e);
        }

        let config = &self.inner.config;
        let mut handles = self.inner.task_handles.lock().await;

        if let Some(rx) = self.inner.command_rx.lock().await.take() {
            let ctrl = self.clone();
            handles.push(tokio::spawn(command_processor_task(ctrl, rx)));
        }

        let interval_secs = config.refresh_interval_secs;
        if interval_secs > 0 {
            let ctrl = self.clone();
            let cancel = child.clone();
            handles.push(tokio::spawn(refresh_task(ctrl, interval_secs, cancel)));
        }
        drop(handles);

        if config.realtime_enabled {
            self.start_realtime().await;
        }

        self.inner
            .connection_state
            .send_replace(ConnectionState::Connected);
        info!(farm_id = %config.farm_id, "farm connected");
        Ok(())
    }

    /// Open one channel per synced table and merge its changes into the
    /// store.
    async fn start_realtime(&self) {
        let transport: Arc<dyn RealtimeTransport> = match &self.inner.services.realtime {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(RealtimeBackend::connect(&self.inner.config)),
        };
        let registry = SubscriptionRegistry::new(Arc::clone(&transport));

        let subscriptions = sync_channels(&self.inner.config)
            .into_iter()
            .map(|spec| {
                let store = Arc::clone(&self.inner.store);
                let layers = Arc::clone(&self.inner.layers);
                registry.subscribe(spec, move |event| match store.apply_change(event) {
                    Ok(true) => {
                        if matches!(
                            event.table.as_str(),
                            tables::DEVICES | tables::DEVICE_ASSIGNMENTS
                        ) {
                            layers.recompute_alerts(&store);
                        }
                    }
                    Ok(false) => {}
                    Err(e) => warn!(table = %event.table, error = %e, "dropping change event"),
                })
            })
            .collect();

        debug!(channels = registry.channel_count(), "realtime sync started");
        *self.inner.realtime.lock().await = Some(ActiveRealtime {
            transport,
            registry,
            subscriptions,
        });
    }

    /// Stop background tasks and close the realtime feed. The feed is not
    /// reopened until the next [`connect()`](Self::connect).
    pub async fn disconnect(&self) {
        // Cancel the child token (not the parent, which allows reconnect).
        self.inner.cancel_child.lock().await.cancel();

        if let Some(active) = self.inner.realtime.lock().await.take() {
            drop(active.subscriptions);
            active.registry.close_all();
            active.transport.shutdown();
        }

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        drop(handles);

        // Recreate the command channel so a reconnect can spawn a fresh
        // processor.
        {
            let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
            *self.inner.command_tx.lock().await = tx;
            *self.inner.command_rx.lock().await = Some(rx);
        }

        self.inner
            .connection_state
            .send_replace(ConnectionState::Disconnected);
        debug!("disconnected");
    }

    /// Reload topology, devices and assignments, then rederive alert
    /// badges.
    ///
    /// A failed device search keeps the cached devices; topology and
    /// assignment failures abort the refresh.
    pub async fn full_refresh(&self) -> Result<(), CoreError> {
        let services = &self.inner.services;
        let store = &self.inner.store;
        let farm_id = store.farm_id();

        let (topology, devices, assignments) = tokio::join!(
            services.persistence.load(farm_id),
            services.registry.search(farm_id, "", None),
            services.registry.assigned_devices(farm_id, None),
        );
        let topology = topology?;
        let assignments = assignments?;
        let devices = devices.unwrap_or_else(|e| {
            warn!(error = %e, "device refresh failed, keeping cached devices");
            store
                .devices_snapshot()
                .iter()
                .map(|d| Device::clone(d))
                .collect()
        });

        debug!(
            rows = topology.rows.len(),
            devices = devices.len(),
            assignments = assignments.len(),
            "full refresh"
        );
        store.apply_full_snapshot(topology, devices, assignments);
        self.inner.layers.recompute_alerts(store);
        Ok(())
    }

    // ── Command execution ────────────────────────────────────────

    /// Execute a command through the processor task and await its result.
    pub async fn execute(&self, cmd: Command) -> Result<CommandResult, CoreError> {
        if *self.inner.connection_state.borrow() != ConnectionState::Connected {
            return Err(CoreError::Disconnected);
        }

        let (tx, rx) = tokio::sync::oneshot::channel();

        let command_tx = self.inner.command_tx.lock().await.clone();

        command_tx
            .send(CommandEnvelope {
                command: cmd,
                response_tx: tx,
            })
            .await
            .map_err(|_| CoreError::Disconnected)?;

        rx.await.map_err(|_| CoreError::Disconnected)?
    }

    // ── One-shot convenience ─────────────────────────────────────

    /// One-shot: connect, run closure, disconnect.
    ///
    /// Disables realtime and periodic refresh since a single CLI call only
    /// needs one request-response cycle.
    pub async fn oneshot<F, Fut, T>(
        config: FarmConfig,
        services: Option<Services>,
        f: F,
    ) -> Result<T, CoreError>
    where
        F: FnOnce(FarmController) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let mut cfg = config;
        cfg.realtime_enabled = false;
        cfg.refresh_interval_secs = 0;

        let controller = match services {
            Some(services) => FarmController::with_services(cfg, services),
            None => FarmController::new(cfg)?,
        };
        controller.connect().await?;
        let result = f(controller.clone()).await;
        controller.disconnect().await;
        result
    }

    // ── State observation ────────────────────────────────────────

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// State of the realtime feed, while one is open.
    pub async fn realtime_state(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.inner
            .realtime
            .lock()
            .await
            .as_ref()
            .map(|active| active.transport.connection_state())
    }

    pub fn tree(&self) -> TopologyTree {
        self.inner.store.tree()
    }
}

/// Channels kept in sync with the store. Racks and shelves carry no farm
/// column, so they are scoped by user when one is configured.
pub fn sync_channels(config: &FarmConfig) -> Vec<ChannelSpec> {
    let by_farm = |table: &str| ChannelSpec::scoped(table, "farm_id", &config.farm_id);
    let by_user = |table: &str| match &config.user_id {
        Some(user) => ChannelSpec::scoped(table, "user_id", user),
        None => ChannelSpec::table(table),
    };
    vec![
        by_farm(tables::ROWS),
        by_user(tables::RACKS),
        by_user(tables::SHELVES),
        by_farm(tables::DEVICES),
        by_farm(tables::DEVICE_ASSIGNMENTS),
    ]
}

// ── Background tasks ─────────────────────────────────────────────

async fn refresh_task(controller: FarmController, interval_secs: u64, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = controller.full_refresh().await {
                    warn!(error = %e, "periodic refresh failed");
                }
            }
        }
    }
}

/// Apply commands from the channel one at a time.
async fn command_processor_task(
    controller: FarmController,
    mut rx: mpsc::Receiver<CommandEnvelope>,
) {
    let cancel = controller.inner.cancel_child.lock().await.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let result = route_command(&controller, envelope.command).await;
                let _ = envelope.response_tx.send(result);
            }
        }
    }
}

// ── Command routing ──────────────────────────────────────────────

async fn route_command(
    controller: &FarmController,
    cmd: Command,
) -> Result<CommandResult, CoreError> {
    let topology = &controller.inner.topology;
    let assignments = &controller.inner.assignments;

    let result = match cmd {
        Command::AddNode { parent, draft } => topology
            .add_child(&parent, draft)
            .await
            .map(CommandResult::Node),
        Command::RenameNode { kind, id, name } => topology
            .rename(kind, &id, &name)
            .await
            .map(CommandResult::Node),
        Command::RemoveNode { kind, id } => topology
            .remove_child(kind, &id)
            .await
            .map(CommandResult::Removed),
        Command::Reorder { parent, order } => topology
            .apply_reorder(&parent, &order)
            .await
            .map(|()| CommandResult::Ok),
        Command::MoveNode { kind, id, index } => topology
            .move_node(kind, &id, index)
            .await
            .map(|()| CommandResult::Ok),
        Command::AssignDevice { device, target } => assignments
            .assign_device(&device, &target)
            .await
            .map(CommandResult::Assignment),
        Command::UnassignDevice { assignment_id } => assignments
            .unassign_device(&assignment_id)
            .await
            .map(|()| CommandResult::Ok),
        Command::QuickAssign { target, domain } => assignments
            .quick_assign_by_type(&target, &domain)
            .await
            .map(CommandResult::QuickAssign),
    };

    controller
        .inner
        .layers
        .recompute_alerts(&controller.inner.store);
    result
}
