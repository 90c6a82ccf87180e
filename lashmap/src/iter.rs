use std::collections::VecDeque;

use crate::error::Result;
use crate::layout::Layout;
use crate::map::DiskMap;

/// Lazy iterator over the records of a [`DiskMap`].
///
/// Each primary slot is copied out under its stripe lock when the iterator
/// reaches it, so only one slot's records are buffered at a time. Iteration
/// stops after the first error.
pub struct Iter<'a, L: Layout> {
    map: &'a DiskMap<L>,
    next_slot: u64,
    pending: VecDeque<(Vec<u8>, Vec<u8>)>,
    failed: bool,
}

impl<'a, L: Layout> Iter<'a, L> {
    pub(crate) fn new(map: &'a DiskMap<L>) -> Self {
        Self {
            map,
            next_slot: 0,
            pending: VecDeque::new(),
            failed: false,
        }
    }
}

impl<L: Layout> Iterator for Iter<'_, L> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(Ok(record));
            }
            if self.failed || self.next_slot >= self.map.slot_count() {
                return None;
            }
            let idx = self.next_slot;
            self.next_slot += 1;
            if let Err(err) = self.map.collect_slot(idx, &mut self.pending) {
                self.failed = true;
                return Some(Err(err));
            }
        }
    }
}
