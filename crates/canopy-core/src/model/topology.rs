// ── Farm topology types ──
//
// Rows own racks, racks own shelves. Records are stored flat (one
// collection per table, children pointing at their parent); the nested
// `TopologyTree` is assembled on demand for rendering.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use canopy_api::tables;

use super::assignment::{AssignmentTarget, DeviceAssignment};
use super::ids::EntityId;

// ── NodeKind ────────────────────────────────────────────────────────

/// The three structural levels of a farm.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum NodeKind {
    Row,
    Rack,
    Shelf,
}

impl NodeKind {
    /// Classify an untyped element by its nested collection field.
    ///
    /// A `racks` field marks a row; failing that, a `shelves` field marks a
    /// rack; anything else is a shelf. The row check runs first.
    pub fn classify(element: &serde_json::Value) -> Self {
        if element.get("racks").is_some() {
            Self::Row
        } else if element.get("shelves").is_some() {
            Self::Rack
        } else {
            Self::Shelf
        }
    }

    /// Capitalized display label used for generated names.
    pub fn label(self) -> &'static str {
        match self {
            Self::Row => "Row",
            Self::Rack => "Rack",
            Self::Shelf => "Shelf",
        }
    }

    /// Backend table holding records of this kind.
    pub fn table(self) -> &'static str {
        match self {
            Self::Row => tables::ROWS,
            Self::Rack => tables::RACKS,
            Self::Shelf => tables::SHELVES,
        }
    }

    /// Kind of the directly nested children, if any.
    pub fn child(self) -> Option<Self> {
        match self {
            Self::Row => Some(Self::Rack),
            Self::Rack => Some(Self::Shelf),
            Self::Shelf => None,
        }
    }

    pub fn from_table(table: &str) -> Option<Self> {
        match table {
            tables::ROWS => Some(Self::Row),
            tables::RACKS => Some(Self::Rack),
            tables::SHELVES => Some(Self::Shelf),
            _ => None,
        }
    }
}

// ── Records ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub id: EntityId,
    pub farm_id: String,
    pub name: String,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rack {
    pub id: EntityId,
    pub row_id: EntityId,
    pub name: String,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shelf {
    pub id: EntityId,
    pub rack_id: EntityId,
    pub name: String,
    pub position: u32,
}

/// Any single topology record, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeRecord {
    Row(Row),
    Rack(Rack),
    Shelf(Shelf),
}

impl NodeRecord {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Row(_) => NodeKind::Row,
            Self::Rack(_) => NodeKind::Rack,
            Self::Shelf(_) => NodeKind::Shelf,
        }
    }

    pub fn id(&self) -> &EntityId {
        match self {
            Self::Row(r) => &r.id,
            Self::Rack(r) => &r.id,
            Self::Shelf(s) => &s.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Row(r) => &r.name,
            Self::Rack(r) => &r.name,
            Self::Shelf(s) => &s.name,
        }
    }

    pub fn position(&self) -> u32 {
        match self {
            Self::Row(r) => r.position,
            Self::Rack(r) => r.position,
            Self::Shelf(s) => s.position,
        }
    }

    /// The container this record lives in.
    pub fn parent(&self) -> ParentRef {
        match self {
            Self::Row(r) => ParentRef::Farm(r.farm_id.clone()),
            Self::Rack(r) => ParentRef::Row(r.row_id.clone()),
            Self::Shelf(s) => ParentRef::Rack(s.rack_id.clone()),
        }
    }
}

// ── ParentRef ───────────────────────────────────────────────────────

/// A container of orderable children: a farm holds rows, a row holds
/// racks, a rack holds shelves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ParentRef {
    Farm(String),
    Row(EntityId),
    Rack(EntityId),
}

impl ParentRef {
    /// Kind of the children this container holds.
    pub fn child_kind(&self) -> NodeKind {
        match self {
            Self::Farm(_) => NodeKind::Row,
            Self::Row(_) => NodeKind::Rack,
            Self::Rack(_) => NodeKind::Shelf,
        }
    }

    /// The container formed by a node of `kind`, if it can hold children.
    pub fn of_node(kind: NodeKind, id: EntityId) -> Option<Self> {
        match kind {
            NodeKind::Row => Some(Self::Row(id)),
            NodeKind::Rack => Some(Self::Rack(id)),
            NodeKind::Shelf => None,
        }
    }
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Farm(id) => write!(f, "farm {id}"),
            Self::Row(id) => write!(f, "row {id}"),
            Self::Rack(id) => write!(f, "rack {id}"),
        }
    }
}

// ── Drafts and patches ──────────────────────────────────────────────

/// What the caller supplies when adding a child. A missing name is
/// generated from the sibling count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeDraft {
    pub name: Option<String>,
}

impl NodeDraft {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

/// Fully resolved create request handed to persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNode {
    pub name: String,
    pub position: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodePatch {
    pub name: Option<String>,
    pub position: Option<u32>,
}

impl NodePatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            position: None,
        }
    }

    pub fn reposition(position: u32) -> Self {
        Self {
            name: None,
            position: Some(position),
        }
    }
}

// ── Tree view ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ShelfNode {
    #[serde(flatten)]
    pub shelf: Shelf,
    pub assignments: Vec<DeviceAssignment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RackNode {
    #[serde(flatten)]
    pub rack: Rack,
    pub shelves: Vec<ShelfNode>,
    pub assignments: Vec<DeviceAssignment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowNode {
    #[serde(flatten)]
    pub row: Row,
    pub racks: Vec<RackNode>,
    pub assignments: Vec<DeviceAssignment>,
}

/// Borrowed view of one node in a [`TopologyTree`].
#[derive(Debug, Clone, Copy)]
pub enum TopologyElement<'a> {
    Row(&'a RowNode),
    Rack(&'a RackNode),
    Shelf(&'a ShelfNode),
}

impl TopologyElement<'_> {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Row(_) => NodeKind::Row,
            Self::Rack(_) => NodeKind::Rack,
            Self::Shelf(_) => NodeKind::Shelf,
        }
    }

    pub fn id(&self) -> &EntityId {
        match self {
            Self::Row(n) => &n.row.id,
            Self::Rack(n) => &n.rack.id,
            Self::Shelf(n) => &n.shelf.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Row(n) => &n.row.name,
            Self::Rack(n) => &n.rack.name,
            Self::Shelf(n) => &n.shelf.name,
        }
    }

    /// Assignments targeting this node directly.
    pub fn assignments(&self) -> &[DeviceAssignment] {
        match self {
            Self::Row(n) => &n.assignments,
            Self::Rack(n) => &n.assignments,
            Self::Shelf(n) => &n.assignments,
        }
    }
}

/// Nested Row → Rack → Shelf view with assignments attached to their
/// targets. Children are ordered by position, then name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TopologyTree {
    pub farm_id: String,
    pub rows: Vec<RowNode>,
}

impl TopologyTree {
    /// Assemble the tree from flat record lists.
    ///
    /// Records whose parent is missing are dropped; they belong to a
    /// subtree that is being deleted.
    pub fn build(
        farm_id: &str,
        rows: &[Arc<Row>],
        racks: &[Arc<Rack>],
        shelves: &[Arc<Shelf>],
        assignments: &[Arc<DeviceAssignment>],
    ) -> Self {
        let for_target = |kind: NodeKind, id: &EntityId| -> Vec<DeviceAssignment> {
            assignments
                .iter()
                .filter(|a| a.target.kind == kind && &a.target.id == id)
                .map(|a| DeviceAssignment::clone(a))
                .collect()
        };

        let mut row_nodes: Vec<RowNode> = rows
            .iter()
            .filter(|r| r.farm_id == farm_id)
            .map(|row| {
                let mut rack_nodes: Vec<RackNode> = racks
                    .iter()
                    .filter(|k| k.row_id == row.id)
                    .map(|rack| {
                        let mut shelf_nodes: Vec<ShelfNode> = shelves
                            .iter()
                            .filter(|s| s.rack_id == rack.id)
                            .map(|shelf| ShelfNode {
                                shelf: Shelf::clone(shelf),
                                assignments: for_target(NodeKind::Shelf, &shelf.id),
                            })
                            .collect();
                        shelf_nodes.sort_by(|a, b| {
                            (a.shelf.position, &a.shelf.name).cmp(&(b.shelf.position, &b.shelf.name))
                        });
                        RackNode {
                            rack: Rack::clone(rack),
                            shelves: shelf_nodes,
                            assignments: for_target(NodeKind::Rack, &rack.id),
                        }
                    })
                    .collect();
                rack_nodes.sort_by(|a, b| {
                    (a.rack.position, &a.rack.name).cmp(&(b.rack.position, &b.rack.name))
                });
                RowNode {
                    row: Row::clone(row),
                    racks: rack_nodes,
                    assignments: for_target(NodeKind::Row, &row.id),
                }
            })
            .collect();
        row_nodes.sort_by(|a, b| (a.row.position, &a.row.name).cmp(&(b.row.position, &b.row.name)));

        Self {
            farm_id: farm_id.to_owned(),
            rows: row_nodes,
        }
    }

    /// Depth-first iteration over every node.
    pub fn elements(&self) -> impl Iterator<Item = TopologyElement<'_>> {
        self.rows.iter().flat_map(|row| {
            std::iter::once(TopologyElement::Row(row)).chain(row.racks.iter().flat_map(|rack| {
                std::iter::once(TopologyElement::Rack(rack))
                    .chain(rack.shelves.iter().map(TopologyElement::Shelf))
            }))
        })
    }

    pub fn find(&self, id: &EntityId) -> Option<TopologyElement<'_>> {
        self.elements().find(|e| e.id() == id)
    }

    /// Ordered child ids of a container. Unknown containers yield nothing.
    pub fn children_ids(&self, parent: &ParentRef) -> Vec<EntityId> {
        match parent {
            ParentRef::Farm(_) => self.rows.iter().map(|r| r.row.id.clone()).collect(),
            ParentRef::Row(id) => match self.find(id) {
                Some(TopologyElement::Row(row)) => {
                    row.racks.iter().map(|r| r.rack.id.clone()).collect()
                }
                _ => Vec::new(),
            },
            ParentRef::Rack(id) => match self.find(id) {
                Some(TopologyElement::Rack(rack)) => {
                    rack.shelves.iter().map(|s| s.shelf.id.clone()).collect()
                }
                _ => Vec::new(),
            },
        }
    }

    /// Total assignments attached anywhere in the tree.
    pub fn assignment_count(&self) -> usize {
        self.elements().map(|e| e.assignments().len()).sum()
    }
}

impl AssignmentTarget {
    /// Resolve the target against a tree.
    pub fn resolve<'a>(&self, tree: &'a TopologyTree) -> Option<TopologyElement<'a>> {
        tree.find(&self.id).filter(|e| e.kind() == self.kind)
    }
}
