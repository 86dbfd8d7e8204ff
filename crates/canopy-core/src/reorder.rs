// ── Drag-and-drop sequencing ──
//
// A local mirror of one parent's child order. Drops compute the new
// order with an array move; the caller hands the result to
// `FarmTopology::apply_reorder`. Persistence is not this module's concern.

use crate::model::EntityId;

/// Move the element at `from` to `to`, shifting everything in between.
///
/// Out-of-range indices leave the slice untouched.
pub fn array_move<T>(items: &mut [T], from: usize, to: usize) {
    if from >= items.len() || to >= items.len() || from == to {
        return;
    }
    if from < to {
        items[from..=to].rotate_left(1);
    } else {
        items[to..=from].rotate_right(1);
    }
}

/// Ordered child ids of a single parent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReorderList {
    ids: Vec<EntityId>,
}

impl ReorderList {
    pub fn new(ids: Vec<EntityId>) -> Self {
        Self { ids }
    }

    pub fn ids(&self) -> &[EntityId] {
        &self.ids
    }

    pub fn position(&self, id: &EntityId) -> Option<usize> {
        self.ids.iter().position(|i| i == id)
    }

    /// Replace the local order with the upstream one. Never merges, so no
    /// stale drag state survives a server round-trip or realtime update.
    pub fn sync(&mut self, upstream: Vec<EntityId>) {
        self.ids = upstream;
    }

    /// Drop `dragged` onto `target`'s slot.
    ///
    /// Returns the new order when it changed. Dropping outside any target
    /// (`None`), onto an unknown id, or onto its own slot is a no-op.
    pub fn drop_onto(&mut self, dragged: &EntityId, target: Option<&EntityId>) -> Option<Vec<EntityId>> {
        let target = target?;
        let to = self.position(target)?;
        self.move_to(dragged, to)
    }

    /// Move `id` to `index` (clamped to the last slot).
    ///
    /// Returns the new order when it changed.
    pub fn move_to(&mut self, id: &EntityId, index: usize) -> Option<Vec<EntityId>> {
        let from = self.position(id)?;
        let to = index.min(self.ids.len().saturating_sub(1));
        if from == to {
            return None;
        }
        array_move(&mut self.ids, from, to);
        Some(self.ids.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(raw: &[&str]) -> Vec<EntityId> {
        raw.iter().map(|s| EntityId::from(*s)).collect()
    }

    #[test]
    fn array_move_forward_and_back() {
        let mut v = vec![1, 2, 3, 4, 5];
        array_move(&mut v, 0, 3);
        assert_eq!(v, vec![2, 3, 4, 1, 5]);
        array_move(&mut v, 4, 1);
        assert_eq!(v, vec![2, 5, 3, 4, 1]);
    }

    #[test]
    fn array_move_out_of_range_is_ignored() {
        let mut v = vec![1, 2, 3];
        array_move(&mut v, 5, 0);
        array_move(&mut v, 0, 3);
        assert_eq!(v, vec![1, 2, 3]);
    }

    #[test]
    fn drop_onto_same_slot_is_noop() {
        let mut list = ReorderList::new(ids(&["a", "b", "c"]));
        assert_eq!(list.drop_onto(&"b".into(), Some(&"b".into())), None);
        assert_eq!(list.ids(), ids(&["a", "b", "c"]).as_slice());
    }

    #[test]
    fn drop_outside_is_noop() {
        let mut list = ReorderList::new(ids(&["a", "b", "c"]));
        assert_eq!(list.drop_onto(&"a".into(), None), None);
        assert_eq!(list.drop_onto(&"a".into(), Some(&"zzz".into())), None);
    }

    #[test]
    fn drop_returns_full_permutation() {
        let mut list = ReorderList::new(ids(&["a", "b", "c", "d"]));
        let order = list.drop_onto(&"a".into(), Some(&"c".into())).unwrap_or_default();
        assert_eq!(order, ids(&["b", "c", "a", "d"]));

        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(sorted, ids(&["a", "b", "c", "d"]));
    }

    #[test]
    fn move_to_clamps_index() {
        let mut list = ReorderList::new(ids(&["a", "b", "c"]));
        assert_eq!(list.move_to(&"a".into(), 99), Some(ids(&["b", "c", "a"])));
    }

    #[test]
    fn sync_replaces_rather_than_merges() {
        let mut list = ReorderList::new(ids(&["a", "b", "c"]));
        list.move_to(&"c".into(), 0);
        list.sync(ids(&["x", "a"]));
        assert_eq!(list.ids(), ids(&["x", "a"]).as_slice());
    }
}
