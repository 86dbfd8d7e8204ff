// ── Overlay layer coordination ──
//
// Tracks which overlay is active over the topology view and the alert
// badge count of each layer. Activation rules are a policy object chosen
// at construction; every transition is one `send_modify`, so subscribers
// never observe an intermediate state.

use std::sync::Arc;

use strum::IntoEnumIterator;
use tokio::sync::watch;
use tracing::debug;

use crate::model::{LayerMode, LayerSnapshot, OverlayLayer};
use crate::store::FarmStore;

// ── Activation policies ──────────────────────────────────────────

/// How toggling a layer affects the other layers.
pub trait ActivationPolicy: Send + Sync {
    fn mode(&self) -> LayerMode;

    /// Apply a toggle of `layer` to `state`.
    fn toggle(&self, state: &mut LayerSnapshot, layer: OverlayLayer);
}

/// At most one layer is active; activating one deactivates the rest.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExclusiveActivation;

impl ActivationPolicy for ExclusiveActivation {
    fn mode(&self) -> LayerMode {
        LayerMode::Exclusive
    }

    fn toggle(&self, state: &mut LayerSnapshot, layer: OverlayLayer) {
        let turn_on = !state.is_active(layer);
        for other in OverlayLayer::iter() {
            state.get_mut(other).active = false;
        }
        state.get_mut(layer).active = turn_on;
    }
}

/// Each layer toggles on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndependentActivation;

impl ActivationPolicy for IndependentActivation {
    fn mode(&self) -> LayerMode {
        LayerMode::Independent
    }

    fn toggle(&self, state: &mut LayerSnapshot, layer: OverlayLayer) {
        let entry = state.get_mut(layer);
        entry.active = !entry.active;
    }
}

pub fn policy_for(mode: LayerMode) -> Arc<dyn ActivationPolicy> {
    match mode {
        LayerMode::Exclusive => Arc::new(ExclusiveActivation),
        LayerMode::Independent => Arc::new(IndependentActivation),
    }
}

// ── LayerCoordinator ─────────────────────────────────────────────

/// Observable overlay state. Starts with every layer inactive and every
/// alert count at zero.
pub struct LayerCoordinator {
    policy: Arc<dyn ActivationPolicy>,
    state: watch::Sender<LayerSnapshot>,
}

impl LayerCoordinator {
    pub fn new(policy: Arc<dyn ActivationPolicy>) -> Self {
        let (state, _) = watch::channel(LayerSnapshot::default());
        Self { policy, state }
    }

    pub fn with_mode(mode: LayerMode) -> Self {
        Self::new(policy_for(mode))
    }

    pub fn mode(&self) -> LayerMode {
        self.policy.mode()
    }

    pub fn toggle_layer(&self, layer: OverlayLayer) -> LayerSnapshot {
        self.state
            .send_modify(|state| self.policy.toggle(state, layer));
        let snapshot = self.snapshot();
        debug!(%layer, active = ?snapshot.active_layers(), "layer toggled");
        snapshot
    }

    /// Deactivate every layer. Alert counts are kept.
    pub fn clear_all_layers(&self) {
        self.state.send_modify(|state| {
            for layer in OverlayLayer::iter() {
                state.get_mut(layer).active = false;
            }
        });
    }

    /// Set a badge count. Activation is unaffected.
    pub fn set_layer_alert_count(&self, layer: OverlayLayer, count: u32) {
        self.state.send_if_modified(|state| {
            let entry = state.get_mut(layer);
            let changed = entry.alert_count != count;
            entry.alert_count = count;
            changed
        });
    }

    pub fn snapshot(&self) -> LayerSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LayerSnapshot> {
        self.state.subscribe()
    }

    /// Derive the devices and monitoring badges from the store.
    ///
    /// Devices: assigned devices the registry reports as unavailable.
    /// Monitoring: sensors reporting a problem or unreachable. The
    /// automation and grows counts are left to their owners.
    pub fn recompute_alerts(&self, store: &FarmStore) {
        let assigned = store.assigned_entity_ids();
        let devices = store.devices_snapshot();

        let unavailable = devices
            .iter()
            .filter(|d| assigned.contains(&d.entity_id) && d.is_unavailable())
            .count();
        let problems = devices.iter().filter(|d| d.reports_problem()).count();

        self.set_layer_alert_count(OverlayLayer::Devices, saturating_u32(unavailable));
        self.set_layer_alert_count(OverlayLayer::Monitoring, saturating_u32(problems));
    }
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
