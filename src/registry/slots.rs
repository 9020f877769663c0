//! Indexed slot list with tombstones and a round-robin cursor.
//!
//! Sequence numbers are `index + 1` and stay fixed while an item occupies
//! its slot. Removing the last slot shrinks the list (trailing tombstones
//! are trimmed with it); removing an earlier slot leaves a tombstone that
//! the next insert reuses.

/// Slot arena backing an endpoint group.
#[derive(Debug)]
pub struct SlotList<T> {
    slots: Vec<Option<T>>,
    cursor: usize,
    live: usize,
}

impl<T> Default for SlotList<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            cursor: 0,
            live: 0,
        }
    }
}

impl<T> SlotList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `item` in the first free slot (or a new one) and return its sequence number.
    pub fn insert(&mut self, item: T) -> usize {
        self.live += 1;
        match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = Some(item);
                index + 1
            }
            None => {
                self.slots.push(Some(item));
                self.slots.len()
            }
        }
    }

    /// Remove the item holding `sequence`.
    pub fn remove(&mut self, sequence: usize) -> Option<T> {
        let index = sequence.checked_sub(1)?;
        let item = self.slots.get_mut(index)?.take()?;
        self.live -= 1;
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        Some(item)
    }

    /// Remove the first item matching `predicate`, returning its sequence number too.
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&T) -> bool) -> Option<(usize, T)> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(&mut predicate))?;
        let sequence = index + 1;
        self.remove(sequence).map(|item| (sequence, item))
    }

    pub fn get(&self, sequence: usize) -> Option<&T> {
        self.slots.get(sequence.checked_sub(1)?)?.as_ref()
    }

    /// Number of live items.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots, tombstones included.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Live items with their sequence numbers, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|item| (i + 1, item)))
    }

    /// Next live item in round-robin order, skipping tombstones.
    pub fn next(&mut self) -> Option<&T> {
        let len = self.slots.len();
        if self.live == 0 || len == 0 {
            return None;
        }
        for step in 0..len {
            let index = (self.cursor + step) % len;
            if self.slots[index].is_some() {
                self.cursor = (index + 1) % len;
                return self.slots[index].as_ref();
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_are_one_based_and_reused() {
        let mut slots = SlotList::new();
        assert_eq!(slots.insert("a"), 1);
        assert_eq!(slots.insert("b"), 2);
        assert_eq!(slots.insert("c"), 3);

        assert_eq!(slots.remove(2), Some("b"));
        assert_eq!(slots.len(), 2);
        assert_eq!(slots.slot_count(), 3);
        assert_eq!(slots.get(2), None);

        assert_eq!(slots.insert("d"), 2);
        assert_eq!(slots.get(3), Some(&"c"));
    }

    #[test]
    fn removing_last_slot_shrinks() {
        let mut slots = SlotList::new();
        slots.insert(1);
        slots.insert(2);
        slots.insert(3);
        slots.remove(2);
        slots.remove(3);
        // Trailing tombstone trimmed along with the last slot.
        assert_eq!(slots.slot_count(), 1);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots.insert(4), 2);
    }

    #[test]
    fn removal_is_idempotent() {
        let mut slots = SlotList::new();
        slots.insert('x');
        assert_eq!(slots.remove(1), Some('x'));
        assert_eq!(slots.remove(1), None);
        assert_eq!(slots.remove(0), None);
        assert!(slots.is_empty());
    }

    #[test]
    fn round_robin_cycles_and_skips_tombstones() {
        let mut slots = SlotList::new();
        slots.insert("c1");
        slots.insert("c2");
        slots.insert("c3");

        let first: Vec<_> = (0..3).map(|_| *slots.next().unwrap()).collect();
        assert_eq!(first, vec!["c1", "c2", "c3"]);
        assert_eq!(slots.next(), Some(&"c1"));

        slots.remove(2);
        let rest: Vec<_> = (0..4).map(|_| *slots.next().unwrap()).collect();
        assert_eq!(rest, vec!["c3", "c1", "c3", "c1"]);
    }

    #[test]
    fn size_matches_live_slots_under_churn() {
        let mut slots = SlotList::new();
        let mut live = Vec::new();
        for round in 0..50usize {
            if round % 3 == 2 && !live.is_empty() {
                let seq = live.remove(round % live.len());
                assert!(slots.remove(seq).is_some());
            } else {
                live.push(slots.insert(round));
            }
            assert_eq!(slots.len(), slots.iter().count());
            let mut seqs: Vec<_> = slots.iter().map(|(s, _)| s).collect();
            seqs.dedup();
            assert_eq!(seqs.len(), slots.len());
        }
    }

    #[test]
    fn empty_list_has_no_next() {
        let mut slots: SlotList<u8> = SlotList::new();
        assert!(slots.next().is_none());
        slots.insert(1);
        slots.remove(1);
        assert!(slots.next().is_none());
    }
}
