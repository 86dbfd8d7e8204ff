// ── Central reactive farm store ──
//
// Holds the open farm's topology records, device cache and assignments.
// Mutations are broadcast to subscribers via `watch` channels.

pub(crate) mod collection;
mod refresh;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, trace};

use canopy_api::tables;

use crate::convert::FromRecord;
use crate::error::CoreError;
use crate::model::{
    AssignmentTarget, ChangeEvent, ChangeKind, Device, DeviceAssignment, DeviceEntityId, EntityId,
    NodeKind, NodeRecord, ParentRef, Rack, Row, Shelf, TopologyTree,
};
use collection::EntityCollection;

pub use refresh::TopologySnapshot;

pub(crate) fn record_key(id: &EntityId) -> String {
    id.to_string()
}

/// What a cascading node removal took with it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CascadeReport {
    pub rows: usize,
    pub racks: usize,
    pub shelves: usize,
    pub assignments: usize,
}

/// Reactive store for one farm.
///
/// Records are kept flat per table; [`tree`](Self::tree) assembles the
/// nested view on demand. Readers are never blocked by a slow writer for
/// longer than one collection update.
pub struct FarmStore {
    farm_id: String,
    pub(crate) rows: EntityCollection<Row>,
    pub(crate) racks: EntityCollection<Rack>,
    pub(crate) shelves: EntityCollection<Shelf>,
    pub(crate) devices: EntityCollection<Device>,
    pub(crate) assignments: EntityCollection<DeviceAssignment>,
    /// Realtime racks and shelves whose parent has not arrived yet, by id.
    parked: Mutex<HashMap<String, NodeRecord>>,
    pub(crate) last_full_refresh: watch::Sender<Option<DateTime<Utc>>>,
    pub(crate) last_change: watch::Sender<Option<DateTime<Utc>>>,
}

impl FarmStore {
    pub fn new(farm_id: impl Into<String>) -> Self {
        let (last_full_refresh, _) = watch::channel(None);
        let (last_change, _) = watch::channel(None);

        Self {
            farm_id: farm_id.into(),
            rows: EntityCollection::new(),
            racks: EntityCollection::new(),
            shelves: EntityCollection::new(),
            devices: EntityCollection::new(),
            assignments: EntityCollection::new(),
            parked: Mutex::new(HashMap::new()),
            last_full_refresh,
            last_change,
        }
    }

    pub fn farm_id(&self) -> &str {
        &self.farm_id
    }

    // ── Snapshot accessors ───────────────────────────────────────────

    pub fn rows_snapshot(&self) -> Arc<Vec<Arc<Row>>> {
        self.rows.snapshot()
    }

    pub fn racks_snapshot(&self) -> Arc<Vec<Arc<Rack>>> {
        self.racks.snapshot()
    }

    pub fn shelves_snapshot(&self) -> Arc<Vec<Arc<Shelf>>> {
        self.shelves.snapshot()
    }

    pub fn devices_snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.devices.snapshot()
    }

    pub fn assignments_snapshot(&self) -> Arc<Vec<Arc<DeviceAssignment>>> {
        self.assignments.snapshot()
    }

    pub fn last_full_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_full_refresh.borrow()
    }

    pub fn last_change(&self) -> Option<DateTime<Utc>> {
        *self.last_change.borrow()
    }

    /// Sum of collection versions; changes whenever anything changes.
    pub fn version(&self) -> u64 {
        self.rows.version()
            + self.racks.version()
            + self.shelves.version()
            + self.devices.version()
            + self.assignments.version()
    }

    // ── Topology reads ───────────────────────────────────────────────

    pub fn tree(&self) -> TopologyTree {
        TopologyTree::build(
            &self.farm_id,
            &self.rows.snapshot(),
            &self.racks.snapshot(),
            &self.shelves.snapshot(),
            &self.assignments.snapshot(),
        )
    }

    pub fn node(&self, kind: NodeKind, id: &EntityId) -> Option<NodeRecord> {
        let key = record_key(id);
        match kind {
            NodeKind::Row => self.rows.get(&key).map(|r| NodeRecord::Row(Row::clone(&r))),
            NodeKind::Rack => self.racks.get(&key).map(|r| NodeRecord::Rack(Rack::clone(&r))),
            NodeKind::Shelf => self
                .shelves
                .get(&key)
                .map(|s| NodeRecord::Shelf(Shelf::clone(&s))),
        }
    }

    /// Find a node of any kind.
    pub fn find_node(&self, id: &EntityId) -> Option<NodeRecord> {
        [NodeKind::Row, NodeKind::Rack, NodeKind::Shelf]
            .into_iter()
            .find_map(|kind| self.node(kind, id))
    }

    /// Whether a container exists (farms always do).
    pub fn has_parent(&self, parent: &ParentRef) -> bool {
        match parent {
            ParentRef::Farm(id) => *id == self.farm_id,
            ParentRef::Row(id) => self.rows.contains(&record_key(id)),
            ParentRef::Rack(id) => self.racks.contains(&record_key(id)),
        }
    }

    /// Children of a container ordered by position, then name.
    pub fn children(&self, parent: &ParentRef) -> Vec<NodeRecord> {
        let mut children: Vec<NodeRecord> = match parent {
            ParentRef::Farm(farm_id) => self
                .rows
                .snapshot()
                .iter()
                .filter(|r| &r.farm_id == farm_id)
                .map(|r| NodeRecord::Row(Row::clone(r)))
                .collect(),
            ParentRef::Row(row_id) => self
                .racks
                .snapshot()
                .iter()
                .filter(|r| &r.row_id == row_id)
                .map(|r| NodeRecord::Rack(Rack::clone(r)))
                .collect(),
            ParentRef::Rack(rack_id) => self
                .shelves
                .snapshot()
                .iter()
                .filter(|s| &s.rack_id == rack_id)
                .map(|s| NodeRecord::Shelf(Shelf::clone(s)))
                .collect(),
        };
        children.sort_by(|a, b| (a.position(), a.name()).cmp(&(b.position(), b.name())));
        children
    }

    pub fn child_ids(&self, parent: &ParentRef) -> Vec<EntityId> {
        self.children(parent)
            .into_iter()
            .map(|c| c.id().clone())
            .collect()
    }

    // ── Assignment reads ─────────────────────────────────────────────

    /// The active assignment of a device, if any.
    pub fn assignment_for_entity(&self, entity_id: &DeviceEntityId) -> Option<Arc<DeviceAssignment>> {
        self.assignments
            .snapshot()
            .iter()
            .find(|a| &a.entity_id == entity_id)
            .map(Arc::clone)
    }

    pub fn assignments_for_target(&self, target: &AssignmentTarget) -> Vec<Arc<DeviceAssignment>> {
        self.assignments
            .snapshot()
            .iter()
            .filter(|a| &a.target == target)
            .map(Arc::clone)
            .collect()
    }

    pub fn assignment(&self, id: &EntityId) -> Option<Arc<DeviceAssignment>> {
        self.assignments.get(&record_key(id))
    }

    pub fn assigned_entity_ids(&self) -> HashSet<DeviceEntityId> {
        self.assignments
            .snapshot()
            .iter()
            .map(|a| a.entity_id.clone())
            .collect()
    }

    pub fn device(&self, entity_id: &DeviceEntityId) -> Option<Arc<Device>> {
        self.devices.get(entity_id.as_str())
    }

    // ── Writes ───────────────────────────────────────────────────────

    pub(crate) fn upsert_node(&self, record: NodeRecord) {
        match record {
            NodeRecord::Row(r) => {
                self.rows.upsert(record_key(&r.id), r);
            }
            NodeRecord::Rack(r) => {
                self.racks.upsert(record_key(&r.id), r);
            }
            NodeRecord::Shelf(s) => {
                self.shelves.upsert(record_key(&s.id), s);
            }
        }
    }

    /// Set a node's position. Returns the previous position.
    pub(crate) fn set_position(&self, kind: NodeKind, id: &EntityId, position: u32) -> Option<u32> {
        let key = record_key(id);
        match kind {
            NodeKind::Row => self.rows.update(&key, |r| r.position = position).map(|p| p.position),
            NodeKind::Rack => self.racks.update(&key, |r| r.position = position).map(|p| p.position),
            NodeKind::Shelf => self
                .shelves
                .update(&key, |s| s.position = position)
                .map(|p| p.position),
        }
    }

    /// The node and all of its descendants, as assignment targets.
    pub(crate) fn subtree_targets(&self, kind: NodeKind, id: &EntityId) -> Vec<AssignmentTarget> {
        let mut targets = vec![AssignmentTarget::new(kind, id.clone())];
        let mut pending = vec![(kind, id.clone())];
        while let Some((kind, id)) = pending.pop() {
            let Some(container) = ParentRef::of_node(kind, id) else {
                continue;
            };
            for child in self.children(&container) {
                targets.push(AssignmentTarget::new(child.kind(), child.id().clone()));
                pending.push((child.kind(), child.id().clone()));
            }
        }
        targets
    }

    /// Remove a node, its descendants, and every assignment targeting any
    /// of them. Siblings and their assignments are untouched.
    pub(crate) fn remove_node_cascade(&self, kind: NodeKind, id: &EntityId) -> CascadeReport {
        let mut report = CascadeReport::default();
        let mut removed_targets: HashSet<AssignmentTarget> = HashSet::new();

        let mut rack_ids: HashSet<EntityId> = HashSet::new();
        let mut shelf_ids: HashSet<EntityId> = HashSet::new();

        match kind {
            NodeKind::Row => {
                report.rows = usize::from(self.rows.remove(&record_key(id)).is_some());
                removed_targets.insert(AssignmentTarget::new(NodeKind::Row, id.clone()));
                for rack in self.racks.retain(|r| &r.row_id != id) {
                    rack_ids.insert(rack.id.clone());
                }
                report.racks = rack_ids.len();
            }
            NodeKind::Rack => {
                report.racks = usize::from(self.racks.remove(&record_key(id)).is_some());
                // Shelves pointing at it go even if the rack was already gone.
                rack_ids.insert(id.clone());
            }
            NodeKind::Shelf => {
                report.shelves = usize::from(self.shelves.remove(&record_key(id)).is_some());
                shelf_ids.insert(id.clone());
            }
        }

        if !rack_ids.is_empty() {
            for shelf in self.shelves.retain(|s| !rack_ids.contains(&s.rack_id)) {
                shelf_ids.insert(shelf.id.clone());
            }
            report.shelves = shelf_ids.len();
        }

        removed_targets.extend(
            rack_ids
                .iter()
                .map(|r| AssignmentTarget::new(NodeKind::Rack, r.clone())),
        );
        removed_targets.extend(
            shelf_ids
                .iter()
                .map(|s| AssignmentTarget::new(NodeKind::Shelf, s.clone())),
        );

        report.assignments = self
            .assignments
            .retain(|a| !removed_targets.contains(&a.target))
            .len();

        debug!(%kind, %id, ?report, "cascade removal");
        report
    }

    pub(crate) fn upsert_assignment(&self, assignment: DeviceAssignment) {
        self.assignments.upsert(record_key(&assignment.id), assignment);
    }

    pub(crate) fn remove_assignment(&self, id: &EntityId) -> Option<Arc<DeviceAssignment>> {
        self.assignments.remove(&record_key(id))
    }

    pub(crate) fn upsert_devices(&self, devices: &[Device]) {
        for device in devices {
            self.devices
                .upsert(device.entity_id.to_string(), device.clone());
        }
    }

    // ── Realtime merge ───────────────────────────────────────────────

    /// Apply one change event. INSERT and UPDATE upsert by id; DELETE
    /// removes by the old record's id (cascading for topology tables).
    ///
    /// Returns `Ok(false)` for tables this store does not hold.
    pub fn apply_change(&self, event: &ChangeEvent) -> Result<bool, CoreError> {
        trace!(table = %event.table, kind = %event.kind, "applying change");
        let applied = match event.table.as_str() {
            tables::ROWS => self.merge_node::<Row>(NodeKind::Row, event, NodeRecord::Row)?,
            tables::RACKS => self.merge_node::<Rack>(NodeKind::Rack, event, NodeRecord::Rack)?,
            tables::SHELVES => {
                self.merge_node::<Shelf>(NodeKind::Shelf, event, NodeRecord::Shelf)?
            }
            tables::DEVICE_ASSIGNMENTS => match event.kind {
                ChangeKind::Delete => {
                    let id = deleted_id(event)?;
                    self.remove_assignment(&id);
                    true
                }
                ChangeKind::Insert | ChangeKind::Update => {
                    let assignment = DeviceAssignment::from_record(new_record(event)?)?;
                    if assignment.farm_id == self.farm_id {
                        self.upsert_assignment(assignment);
                    }
                    true
                }
            },
            tables::DEVICES => match event.kind {
                ChangeKind::Delete => {
                    let entity_id = event
                        .old
                        .as_ref()
                        .and_then(|old| old.get("entity_id"))
                        .and_then(serde_json::Value::as_str)
                        .ok_or_else(|| missing("old"))?;
                    self.devices.remove(DeviceEntityId::new(entity_id).as_str());
                    true
                }
                ChangeKind::Insert | ChangeKind::Update => {
                    let device = Device::from_record(new_record(event)?)?;
                    self.devices.upsert(device.entity_id.to_string(), device);
                    true
                }
            },
            _ => false,
        };

        if applied {
            self.last_change
                .send_replace(Some(event.timestamp.unwrap_or_else(Utc::now)));
        }
        Ok(applied)
    }

    fn merge_node<T: FromRecord>(
        &self,
        kind: NodeKind,
        event: &ChangeEvent,
        into_record: impl FnOnce(T) -> NodeRecord,
    ) -> Result<bool, CoreError> {
        match event.kind {
            ChangeKind::Delete => {
                let id = deleted_id(event)?;
                self.parked().remove(&record_key(&id));
                self.remove_node_cascade(kind, &id);
            }
            ChangeKind::Insert | ChangeKind::Update => {
                let record = T::from_record(new_record(event)?)?;
                self.place_node(into_record(record));
            }
        }
        Ok(true)
    }

    /// Store a realtime record, or park it until its parent shows up.
    ///
    /// Each table has its own feed, so a shelf can arrive before its rack.
    /// Rack and shelf feeds may also be scoped by user rather than farm;
    /// records of other farms stay parked until the next full refresh.
    fn place_node(&self, record: NodeRecord) {
        let placeable = match &record {
            NodeRecord::Row(r) => r.farm_id == self.farm_id,
            NodeRecord::Rack(_) | NodeRecord::Shelf(_) => self.has_parent(&record.parent()),
        };
        if !placeable {
            if record.kind() != NodeKind::Row {
                trace!(kind = %record.kind(), id = %record.id(), "parent not loaded, parking");
                self.parked().insert(record_key(record.id()), record);
            }
            return;
        }

        let container = ParentRef::of_node(record.kind(), record.id().clone());
        self.upsert_node(record);
        if let Some(container) = container {
            self.adopt_parked(&container);
        }
    }

    fn adopt_parked(&self, parent: &ParentRef) {
        let adopted: Vec<NodeRecord> = {
            let mut parked = self.parked();
            let keys: Vec<String> = parked
                .iter()
                .filter(|(_, r)| &r.parent() == parent)
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| parked.remove(k)).collect()
        };
        for record in adopted {
            debug!(kind = %record.kind(), id = %record.id(), %parent, "adopting parked record");
            self.place_node(record);
        }
    }

    fn parked(&self) -> MutexGuard<'_, HashMap<String, NodeRecord>> {
        self.parked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn clear_parked(&self) {
        self.parked().clear();
    }
}

fn missing(which: &str) -> CoreError {
    CoreError::Internal(format!("change event without {which} record"))
}

fn new_record(event: &ChangeEvent) -> Result<&serde_json::Value, CoreError> {
    event.new.as_ref().ok_or_else(|| missing("new"))
}

fn deleted_id(event: &ChangeEvent) -> Result<EntityId, CoreError> {
    event
        .record_id()
        .ok_or_else(|| CoreError::Internal("delete event without record id".into()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::DeviceDomain;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn seeded() -> FarmStore {
        let store = FarmStore::new("farm");
        store.apply_topology(TopologySnapshot {
            rows: vec![
                Row { id: "r1".into(), farm_id: "farm".into(), name: "Row 1".into(), position: 0 },
                Row { id: "r2".into(), farm_id: "farm".into(), name: "Row 2".into(), position: 1 },
            ],
            racks: vec![
                Rack { id: "k1".into(), row_id: "r1".into(), name: "Rack 1".into(), position: 0 },
                Rack { id: "k2".into(), row_id: "r1".into(), name: "Rack 2".into(), position: 1 },
                Rack { id: "k3".into(), row_id: "r2".into(), name: "Rack 1".into(), position: 0 },
            ],
            shelves: vec![
                Shelf { id: "s1".into(), rack_id: "k1".into(), name: "Shelf 1".into(), position: 0 },
                Shelf { id: "s2".into(), rack_id: "k2".into(), name: "Shelf 1".into(), position: 0 },
                Shelf { id: "s3".into(), rack_id: "k3".into(), name: "Shelf 1".into(), position: 0 },
            ],
        });
        for (id, entity, target) in [
            ("a1", "light.one", AssignmentTarget::shelf("s1")),
            ("a2", "fan.two", AssignmentTarget::new(NodeKind::Rack, "k2")),
            ("a3", "valve.three", AssignmentTarget::new(NodeKind::Row, "r1")),
            ("a4", "light.four", AssignmentTarget::shelf("s3")),
        ] {
            store.upsert_assignment(DeviceAssignment {
                id: id.into(),
                farm_id: "farm".into(),
                entity_id: entity.into(),
                friendly_name: None,
                entity_type: DeviceDomain::Light,
                target,
                created_at: None,
            });
        }
        store
    }

    #[test]
    fn row_cascade_spares_siblings() {
        let store = seeded();
        let report = store.remove_node_cascade(NodeKind::Row, &"r1".into());

        assert_eq!(
            report,
            CascadeReport { rows: 1, racks: 2, shelves: 2, assignments: 3 }
        );
        assert_eq!(store.child_ids(&ParentRef::Farm("farm".into())), vec![EntityId::from("r2")]);
        assert!(store.node(NodeKind::Shelf, &"s3".into()).is_some());
        assert_eq!(store.assignments_snapshot().len(), 1);
    }

    #[test]
    fn shelf_cascade_removes_only_its_assignments() {
        let store = seeded();
        let report = store.remove_node_cascade(NodeKind::Shelf, &"s1".into());
        assert_eq!(report, CascadeReport { rows: 0, racks: 0, shelves: 1, assignments: 1 });
        assert!(store.assignment_for_entity(&"fan.two".into()).is_some());
    }

    #[test]
    fn subtree_targets_cover_every_descendant() {
        let store = seeded();
        let targets: HashSet<AssignmentTarget> =
            store.subtree_targets(NodeKind::Row, &"r1".into()).into_iter().collect();
        let expected: HashSet<AssignmentTarget> = [
            AssignmentTarget::new(NodeKind::Row, "r1"),
            AssignmentTarget::new(NodeKind::Rack, "k1"),
            AssignmentTarget::new(NodeKind::Rack, "k2"),
            AssignmentTarget::shelf("s1"),
            AssignmentTarget::shelf("s2"),
        ]
        .into_iter()
        .collect();
        assert_eq!(targets, expected);
    }

    #[test]
    fn children_sorted_by_position() {
        let store = seeded();
        store.set_position(NodeKind::Rack, &"k1".into(), 5);
        assert_eq!(
            store.child_ids(&ParentRef::Row("r1".into())),
            vec![EntityId::from("k2"), EntityId::from("k1")]
        );
    }

    #[test]
    fn update_event_applied_twice_is_idempotent() {
        let store = seeded();
        let event = ChangeEvent {
            kind: ChangeKind::Update,
            table: "racks".into(),
            new: Some(json!({ "id": "k1", "row_id": "r1", "name": "Nursery", "position": 0 })),
            old: Some(json!({ "id": "k1" })),
            timestamp: None,
        };

        store.apply_change(&event).unwrap();
        let once = store.tree();
        store.apply_change(&event).unwrap();
        let twice = store.tree();

        assert_eq!(
            serde_json::to_value(&once).unwrap(),
            serde_json::to_value(&twice).unwrap()
        );
        assert_eq!(store.node(NodeKind::Rack, &"k1".into()).unwrap().name(), "Nursery");
    }

    #[test]
    fn delete_event_cascades() {
        let store = seeded();
        let event = ChangeEvent {
            kind: ChangeKind::Delete,
            table: "rows".into(),
            new: None,
            old: Some(json!({ "id": "r2" })),
            timestamp: None,
        };
        assert!(store.apply_change(&event).unwrap());
        assert!(store.node(NodeKind::Rack, &"k3".into()).is_none());
        assert!(store.assignment_for_entity(&"light.four".into()).is_none());
        assert!(store.last_change().is_some());
    }

    fn insert(table: &str, new: serde_json::Value) -> ChangeEvent {
        ChangeEvent {
            kind: ChangeKind::Insert,
            table: table.into(),
            new: Some(new),
            old: None,
            timestamp: None,
        }
    }

    #[test]
    fn shelf_arriving_before_its_rack_is_kept() {
        let store = seeded();
        store
            .apply_change(&insert("shelves", json!({ "id": "s9", "rack_id": "k9", "name": "Shelf 9", "position": 0 })))
            .unwrap();
        assert!(store.node(NodeKind::Shelf, &"s9".into()).is_none());

        store
            .apply_change(&insert("racks", json!({ "id": "k9", "row_id": "r2", "name": "Rack 9", "position": 1 })))
            .unwrap();

        assert_eq!(
            store.child_ids(&ParentRef::Rack("k9".into())),
            vec![EntityId::from("s9")]
        );
    }

    #[test]
    fn parked_records_cascade_through_late_row() {
        let store = seeded();
        store
            .apply_change(&insert("shelves", json!({ "id": "s8", "rack_id": "k8", "name": "S", "position": 0 })))
            .unwrap();
        store
            .apply_change(&insert("racks", json!({ "id": "k8", "row_id": "r8", "name": "K", "position": 0 })))
            .unwrap();
        store
            .apply_change(&insert("rows", json!({ "id": "r8", "farm_id": "farm", "name": "R", "position": 2 })))
            .unwrap();

        assert!(store.node(NodeKind::Rack, &"k8".into()).is_some());
        assert!(store.node(NodeKind::Shelf, &"s8".into()).is_some());
    }

    #[test]
    fn deleted_parked_record_is_not_adopted() {
        let store = seeded();
        store
            .apply_change(&insert("shelves", json!({ "id": "s7", "rack_id": "k7", "name": "S", "position": 0 })))
            .unwrap();
        store
            .apply_change(&ChangeEvent {
                kind: ChangeKind::Delete,
                table: "shelves".into(),
                new: None,
                old: Some(json!({ "id": "s7" })),
                timestamp: None,
            })
            .unwrap();
        store
            .apply_change(&insert("racks", json!({ "id": "k7", "row_id": "r1", "name": "K", "position": 3 })))
            .unwrap();

        assert!(store.child_ids(&ParentRef::Rack("k7".into())).is_empty());
    }

    #[test]
    fn foreign_farm_rows_are_ignored() {
        let store = seeded();
        let event = ChangeEvent {
            kind: ChangeKind::Insert,
            table: "rows".into(),
            new: Some(json!({ "id": "x", "farm_id": "other", "name": "X", "position": 0 })),
            old: None,
            timestamp: None,
        };
        store.apply_change(&event).unwrap();
        assert!(store.node(NodeKind::Row, &"x".into()).is_none());
    }

    #[test]
    fn unknown_table_is_not_applied() {
        let store = seeded();
        let event = ChangeEvent {
            kind: ChangeKind::Insert,
            table: "grow_recipes".into(),
            new: Some(json!({ "id": "g" })),
            old: None,
            timestamp: None,
        };
        assert!(!store.apply_change(&event).unwrap());
    }
}
