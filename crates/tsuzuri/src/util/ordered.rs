use std::collections::BTreeMap;

/// Restores index order for items that complete out of order.
///
/// Items are parked in `pending` until every smaller index has been taken out,
/// so memory is bounded by the skew between producers rather than the total.
pub struct ReorderBuffer<T> {
    pending: BTreeMap<usize, T>,
    next_index: usize,
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            next_index: 0,
        }
    }

    /// Parks `item` under `index`.
    ///
    /// Returns `false` when the index was already released or is already pending.
    pub fn insert(&mut self, index: usize, item: T) -> bool {
        if index < self.next_index || self.pending.contains_key(&index) {
            return false;
        }
        self.pending.insert(index, item);
        true
    }

    /// Takes the item at the cursor, if it has arrived, and advances the cursor.
    pub fn pop_ready(&mut self) -> Option<(usize, T)> {
        let item = self.pending.remove(&self.next_index)?;
        let index = self.next_index;
        self.next_index += 1;
        Some((index, item))
    }

    pub fn next_index(&self) -> usize {
        self.next_index
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
