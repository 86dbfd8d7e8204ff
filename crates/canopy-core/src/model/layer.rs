// ── Overlay layer types ──

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// A visual overlay rendered on top of the topology view.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OverlayLayer {
    Devices,
    Automation,
    Monitoring,
    Grows,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerState {
    pub active: bool,
    pub alert_count: u32,
}

/// State of all four layers, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LayerSnapshot {
    pub devices: LayerState,
    pub automation: LayerState,
    pub monitoring: LayerState,
    pub grows: LayerState,
}

impl LayerSnapshot {
    pub fn get(&self, layer: OverlayLayer) -> &LayerState {
        match layer {
            OverlayLayer::Devices => &self.devices,
            OverlayLayer::Automation => &self.automation,
            OverlayLayer::Monitoring => &self.monitoring,
            OverlayLayer::Grows => &self.grows,
        }
    }

    pub fn get_mut(&mut self, layer: OverlayLayer) -> &mut LayerState {
        match layer {
            OverlayLayer::Devices => &mut self.devices,
            OverlayLayer::Automation => &mut self.automation,
            OverlayLayer::Monitoring => &mut self.monitoring,
            OverlayLayer::Grows => &mut self.grows,
        }
    }

    pub fn active_layers(&self) -> Vec<OverlayLayer> {
        OverlayLayer::iter().filter(|l| self.get(*l).active).collect()
    }

    pub fn is_active(&self, layer: OverlayLayer) -> bool {
        self.get(layer).active
    }
}

/// How toggling one layer affects the others.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LayerMode {
    /// At most one layer is active.
    #[default]
    Exclusive,
    Independent,
}
