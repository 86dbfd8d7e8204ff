// ── Domain model ──
//
// Canonical farm types. Wire types from `canopy-api` are converted into
// these in `convert`; consumers never see raw rows.

pub mod assignment;
pub mod change;
pub mod device;
pub mod ids;
pub mod layer;
pub mod topology;

pub use assignment::{AssignRequest, AssignmentTarget, DeviceAssignment, QuickAssignReport};
pub use change::{ChangeEvent, ChangeKind};
pub use device::{Device, DeviceDomain, DeviceFilter, RankedDevice};
pub use ids::{DeviceEntityId, EntityId};
pub use layer::{LayerMode, LayerSnapshot, LayerState, OverlayLayer};
pub use topology::{
    NewNode, NodeDraft, NodeKind, NodePatch, NodeRecord, ParentRef, Rack, RackNode, Row, RowNode,
    Shelf, ShelfNode, TopologyElement, TopologyTree,
};
