// ── Farm topology operations ──
//
// Mutation entry points over the store's Row → Rack → Shelf records.
// Create, rename and delete wait for the backend before touching the
// store; reorder is optimistic and rolls back on failure.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::model::{
    AssignmentTarget, EntityId, NewNode, NodeDraft, NodeKind, NodePatch, NodeRecord, ParentRef,
};
use crate::reorder::ReorderList;
use crate::services::{ConfirmPrompt, DeviceRegistry, Notifier, TopologyPersistence};
use crate::store::{CascadeReport, FarmStore};

/// Classify an untyped element: `racks` field → row, `shelves` → rack,
/// anything else → shelf.
pub fn element_type(element: &serde_json::Value) -> NodeKind {
    NodeKind::classify(element)
}

/// Check that `proposed` contains exactly the ids of `current`.
pub fn validate_permutation(current: &[EntityId], proposed: &[EntityId]) -> Result<(), CoreError> {
    if current.len() != proposed.len() {
        return Err(CoreError::validation(format!(
            "new order has {} entries, expected {}",
            proposed.len(),
            current.len()
        )));
    }
    let mut seen = HashSet::with_capacity(proposed.len());
    for id in proposed {
        if !seen.insert(id) {
            return Err(CoreError::validation(format!("{id} appears more than once")));
        }
    }
    if let Some(missing) = current.iter().find(|id| !seen.contains(id)) {
        return Err(CoreError::validation(format!("{missing} is missing from the new order")));
    }
    Ok(())
}

/// Confirmation text naming what a delete takes with it.
pub fn confirmation_message(kind: NodeKind, name: &str) -> String {
    let consequence = match kind {
        NodeKind::Row => {
            "All racks and shelves in this row, and their device assignments, will also be deleted."
        }
        NodeKind::Rack => {
            "All shelves in this rack, and their device assignments, will also be deleted."
        }
        NodeKind::Shelf => "Device assignments on this shelf will also be removed.",
    };
    format!("Delete {kind} \"{name}\"? {consequence}")
}

/// Topology mutations for the open farm.
pub struct FarmTopology {
    store: Arc<FarmStore>,
    persistence: Arc<dyn TopologyPersistence>,
    registry: Arc<dyn DeviceRegistry>,
    notifier: Arc<dyn Notifier>,
    confirm: Arc<dyn ConfirmPrompt>,
}

impl FarmTopology {
    pub fn new(
        store: Arc<FarmStore>,
        persistence: Arc<dyn TopologyPersistence>,
        registry: Arc<dyn DeviceRegistry>,
        notifier: Arc<dyn Notifier>,
        confirm: Arc<dyn ConfirmPrompt>,
    ) -> Self {
        Self {
            store,
            persistence,
            registry,
            notifier,
            confirm,
        }
    }

    pub fn store(&self) -> &Arc<FarmStore> {
        &self.store
    }

    /// Reload rows, racks and shelves from persistence.
    pub async fn load(&self) -> Result<(), CoreError> {
        let snapshot = self.persistence.load(self.store.farm_id()).await?;
        debug!(
            rows = snapshot.rows.len(),
            racks = snapshot.racks.len(),
            shelves = snapshot.shelves.len(),
            "topology loaded"
        );
        self.store.apply_topology(snapshot);
        Ok(())
    }

    // ── Reorder ──────────────────────────────────────────────────

    /// Reorder the children of `parent` to `new_order`.
    ///
    /// The store is updated before persistence is called. If any position
    /// fails to persist, local positions are restored from the snapshot
    /// taken beforehand and already-persisted positions are reverted on a
    /// best-effort basis.
    pub async fn apply_reorder(
        &self,
        parent: &ParentRef,
        new_order: &[EntityId],
    ) -> Result<(), CoreError> {
        let children = self.store.children(parent);
        let current: Vec<EntityId> = children.iter().map(|c| c.id().clone()).collect();

        if let Err(e) = validate_permutation(&current, new_order) {
            self.notifier.error(&e.user_message());
            return Err(e);
        }
        if current == new_order {
            return Ok(());
        }

        let kind = parent.child_kind();
        let before: Vec<(EntityId, u32)> = children
            .iter()
            .map(|c| (c.id().clone(), c.position()))
            .collect();
        let old_position = |id: &EntityId| before.iter().find(|(i, _)| i == id).map(|(_, p)| *p);

        let changed: Vec<(EntityId, u32)> = new_order
            .iter()
            .zip(0u32..)
            .filter(|&(id, pos)| old_position(id) != Some(pos))
            .map(|(id, pos)| (id.clone(), pos))
            .collect();

        for (id, pos) in &changed {
            self.store.set_position(kind, id, *pos);
        }

        let mut persisted: Vec<&EntityId> = Vec::with_capacity(changed.len());
        for (id, pos) in &changed {
            if let Err(e) = self
                .persistence
                .update(kind, id, &NodePatch::reposition(*pos))
                .await
            {
                warn!(%parent, %id, error = %e, "reorder failed, rolling back");
                for (id, pos) in &before {
                    self.store.set_position(kind, id, *pos);
                }
                for id in persisted {
                    let Some(pos) = old_position(id) else { continue };
                    if let Err(revert) = self
                        .persistence
                        .update(kind, id, &NodePatch::reposition(pos))
                        .await
                    {
                        warn!(%id, error = %revert, "could not revert persisted position");
                    }
                }
                self.notifier
                    .error(&format!("Failed to save the new order: {}", e.user_message()));
                return Err(e);
            }
            persisted.push(id);
        }

        info!(%parent, moved = changed.len(), "order saved");
        self.notifier
            .success(&format!("{} order saved", kind.label()));
        Ok(())
    }

    /// Move one node to `index` among its siblings.
    pub async fn move_node(
        &self,
        kind: NodeKind,
        id: &EntityId,
        index: usize,
    ) -> Result<(), CoreError> {
        let Some(record) = self.store.node(kind, id) else {
            return Err(self.report(CoreError::not_found(kind.label(), id)));
        };
        let parent = record.parent();
        let mut list = ReorderList::new(self.store.child_ids(&parent));
        match list.move_to(id, index) {
            Some(order) => self.apply_reorder(&parent, &order).await,
            None => Ok(()),
        }
    }

    // ── Create / rename / delete ─────────────────────────────────

    /// Append a child to `parent`. Without a draft name, the name is
    /// `"<Kind> <count + 1>"`, bumped until it is unique among siblings.
    pub async fn add_child(
        &self,
        parent: &ParentRef,
        draft: NodeDraft,
    ) -> Result<NodeRecord, CoreError> {
        if !self.store.has_parent(parent) {
            let e = match parent {
                ParentRef::Farm(id) => CoreError::not_found("Farm", id),
                ParentRef::Row(id) => CoreError::not_found("Row", id),
                ParentRef::Rack(id) => CoreError::not_found("Rack", id),
            };
            return Err(self.report(e));
        }

        let kind = parent.child_kind();
        let siblings = self.store.children(parent);
        let name = match draft.name.map(|n| n.trim().to_owned()) {
            Some(name) if !name.is_empty() => name,
            _ => generated_name(kind, &siblings),
        };
        let position = siblings
            .iter()
            .map(NodeRecord::position)
            .max()
            .map_or(0, |p| p.saturating_add(1));

        let node = NewNode { name, position };
        match self.persistence.create(parent, &node).await {
            Ok(record) => {
                self.store.upsert_node(record.clone());
                info!(%parent, id = %record.id(), name = record.name(), "node created");
                self.notifier
                    .success(&format!("{} \"{}\" added", kind.label(), record.name()));
                Ok(record)
            }
            Err(e) => Err(self.report_failure(&format!("Failed to add {kind}"), e)),
        }
    }

    pub async fn rename(
        &self,
        kind: NodeKind,
        id: &EntityId,
        name: &str,
    ) -> Result<NodeRecord, CoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(self.report(CoreError::validation(format!(
                "{} name cannot be empty",
                kind.label()
            ))));
        }
        if self.store.node(kind, id).is_none() {
            return Err(self.report(CoreError::not_found(kind.label(), id)));
        }

        match self
            .persistence
            .update(kind, id, &NodePatch::rename(name))
            .await
        {
            Ok(record) => {
                self.store.upsert_node(record.clone());
                self.notifier
                    .success(&format!("{} renamed to \"{name}\"", kind.label()));
                Ok(record)
            }
            Err(e) => Err(self.report_failure(&format!("Failed to rename {kind}"), e)),
        }
    }

    /// Delete a node after explicit confirmation, cascading to its
    /// descendants and their assignments.
    ///
    /// Declining returns [`CoreError::Cancelled`] without touching
    /// anything. A node the backend no longer has is still swept from the
    /// store, and the `NotFound` is returned so the caller can refresh.
    pub async fn remove_child(
        &self,
        kind: NodeKind,
        id: &EntityId,
    ) -> Result<CascadeReport, CoreError> {
        let Some(record) = self.store.node(kind, id) else {
            return Err(self.report(CoreError::not_found(kind.label(), id)));
        };

        let message = confirmation_message(kind, record.name());
        if !self.confirm.confirm(&message).await {
            debug!(%kind, %id, "delete declined");
            return Err(CoreError::Cancelled {
                action: format!("delete {kind} \"{}\"", record.name()),
            });
        }

        let targets = self.store.subtree_targets(kind, id);
        match self.persistence.delete(kind, id).await {
            Ok(()) => {
                self.sweep_assignments(&targets).await;
                let report = self.store.remove_node_cascade(kind, id);
                info!(%kind, %id, ?report, "node deleted");
                self.notifier
                    .success(&format!("{} \"{}\" deleted", kind.label(), record.name()));
                Ok(report)
            }
            Err(e) if e.is_recoverable() => {
                self.sweep_assignments(&targets).await;
                self.store.remove_node_cascade(kind, id);
                Err(self.report_failure(&format!("{} was already removed", kind.label()), e))
            }
            Err(e) => Err(self.report_failure(&format!("Failed to delete {kind}"), e)),
        }
    }

    /// Delete the server-side assignments of a removed subtree.
    ///
    /// The node is already gone by now, so a failure here is reported but
    /// does not fail the delete.
    async fn sweep_assignments(&self, targets: &[AssignmentTarget]) {
        match self
            .registry
            .unassign_targets(self.store.farm_id(), targets)
            .await
        {
            Ok(removed) => debug!(removed, "assignments of deleted nodes removed"),
            Err(e) => {
                warn!(error = %e, "could not remove assignments of deleted nodes");
                self.notifier.error(&format!(
                    "Device assignments could not be removed: {}",
                    e.user_message()
                ));
            }
        }
    }

    // ── Notification helpers ─────────────────────────────────────

    fn report(&self, e: CoreError) -> CoreError {
        self.notifier.error(&e.user_message());
        e
    }

    fn report_failure(&self, context: &str, e: CoreError) -> CoreError {
        warn!(error = %e, "{context}");
        self.notifier
            .error(&format!("{context}: {}", e.user_message()));
        e
    }
}

fn generated_name(kind: NodeKind, siblings: &[NodeRecord]) -> String {
    let taken: HashSet<&str> = siblings.iter().map(NodeRecord::name).collect();
    let mut n = siblings.len() + 1;
    loop {
        let candidate = format!("{} {n}", kind.label());
        if !taken.contains(candidate.as_str()) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Rack;
    use pretty_assertions::assert_eq;

    fn ids(raw: &[&str]) -> Vec<EntityId> {
        raw.iter().map(|s| EntityId::from(*s)).collect()
    }

    #[test]
    fn permutation_accepts_reordering() {
        assert!(validate_permutation(&ids(&["a", "b", "c"]), &ids(&["c", "a", "b"])).is_ok());
    }

    #[test]
    fn permutation_rejects_loss_duplicate_and_addition() {
        let current = ids(&["a", "b", "c"]);
        assert!(validate_permutation(&current, &ids(&["a", "b"])).is_err());
        assert!(validate_permutation(&current, &ids(&["a", "a", "b"])).is_err());
        assert!(validate_permutation(&current, &ids(&["a", "b", "x"])).is_err());
    }

    #[test]
    fn confirmation_names_the_cascade() {
        let text = confirmation_message(NodeKind::Row, "A");
        assert!(text.contains("All racks and shelves in this row"));
        assert!(text.starts_with("Delete row \"A\""));
    }

    #[test]
    fn generated_name_skips_taken_names() {
        let sibling = |name: &str| {
            NodeRecord::Rack(Rack {
                id: name.into(),
                row_id: "r".into(),
                name: name.into(),
                position: 0,
            })
        };
        assert_eq!(generated_name(NodeKind::Rack, &[]), "Rack 1");
        assert_eq!(
            generated_name(NodeKind::Rack, &[sibling("Rack 2"), sibling("Rack 1")]),
            "Rack 3"
        );
        assert_eq!(
            generated_name(NodeKind::Rack, &[sibling("Rack 2")]),
            "Rack 3"
        );
    }

    #[test]
    fn element_type_uses_nested_fields() {
        assert_eq!(
            element_type(&serde_json::json!({ "racks": [] })),
            NodeKind::Row
        );
    }
}
