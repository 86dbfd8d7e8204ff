//! Reactive farm layer between `canopy-api` and UI consumers (CLI).
//!
//! This crate owns the business logic, domain model, and reactive data
//! infrastructure for the canopy workspace:
//!
//! - **[`FarmController`]**: central facade. [`connect()`](FarmController::connect)
//!   loads the farm, then spawns the command processor, periodic refresh,
//!   and realtime store sync. [`FarmController::oneshot()`] runs a single
//!   CLI action without background tasks.
//!
//! - **[`FarmStore`]**: per-table reactive collections (`IndexMap` behind
//!   an `RwLock` plus `tokio::sync::watch` snapshots) holding rows, racks,
//!   shelves, devices and assignments. [`TopologyTree`] is assembled from
//!   it on demand.
//!
//! - **Components**: [`FarmTopology`] (add, rename, reorder, cascading
//!   delete), [`AssignmentEngine`] (search, assign, unassign, quick-assign),
//!   [`ReorderList`] (drag-and-drop sequencing), [`LayerCoordinator`]
//!   (overlay activation and alert badges) and [`SubscriptionRegistry`]
//!   (shared realtime channels with per-callback unsubscribe).
//!
//! - **Collaborators** ([`services`]): persistence, device registry,
//!   realtime transport, notification sink and confirmation prompt are
//!   traits; [`backend`] implements them over REST and the websocket feed.

pub mod assignment;
pub mod backend;
pub mod command;
pub mod config;
pub mod controller;
pub mod convert;
pub mod error;
pub mod layers;
pub mod model;
pub mod realtime;
pub mod reorder;
pub mod services;
pub mod store;
pub mod topology;

// ── Primary re-exports ──────────────────────────────────────────────
pub use assignment::{AssignmentEngine, contextual_device_types, rank_for};
pub use backend::{RealtimeBackend, RestBackend};
pub use command::{Command, CommandResult};
pub use config::{AuthCredentials, FarmConfig, ReconnectConfig, TlsVerification};
pub use controller::{FarmController, Services, sync_channels};
pub use error::CoreError;
pub use layers::{
    ActivationPolicy, ExclusiveActivation, IndependentActivation, LayerCoordinator, policy_for,
};
pub use realtime::{
    ChangeCallback, ChannelSpec, ConnectionState, Subscription, SubscriptionRegistry,
};
pub use reorder::{ReorderList, array_move};
pub use services::{
    AutoConfirm, ConfirmPrompt, DeviceRegistry, Notifier, RealtimeTransport, TopologyPersistence,
    TracingNotifier,
};
pub use store::{CascadeReport, FarmStore, TopologySnapshot};
pub use topology::{FarmTopology, confirmation_message, element_type, validate_permutation};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    AssignRequest, AssignmentTarget, ChangeEvent, ChangeKind, Device, DeviceAssignment,
    DeviceDomain, DeviceEntityId, DeviceFilter, EntityId, LayerMode, LayerSnapshot, LayerState,
    NewNode, NodeDraft, NodeKind, NodePatch, NodeRecord, OverlayLayer, ParentRef,
    QuickAssignReport, Rack, RackNode, RankedDevice, Row, RowNode, Shelf, ShelfNode,
    TopologyElement, TopologyTree,
};
