use crossbeam_utils::CachePadded;
use parking_lot::{Mutex, MutexGuard};

/// A fixed set of mutexes partitioning the hash space by its low bits.
pub struct StripeLockSet {
    locks: Box<[CachePadded<Mutex<()>>]>,
    mask: u64,
}

/// Every stripe lock, taken in ascending order and released in reverse.
pub struct AllStripes<'a> {
    guards: Vec<MutexGuard<'a, ()>>,
}

impl Drop for AllStripes<'_> {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

impl StripeLockSet {
    /// `stripes` must be a power of two.
    pub fn new(stripes: usize) -> Self {
        debug_assert!(stripes.is_power_of_two());
        let locks = (0..stripes)
            .map(|_| CachePadded::new(Mutex::new(())))
            .collect();
        Self {
            locks,
            mask: stripes as u64 - 1,
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn stripe_of(&self, hash: u64) -> usize {
        (hash & self.mask) as usize
    }

    /// Locks the stripe owning `hash`. Bucket indexes can be passed as
    /// hashes: a bucket index shares its low bits with every hash routed to it.
    pub fn lock_for_hash(&self, hash: u64) -> MutexGuard<'_, ()> {
        self.locks[self.stripe_of(hash)].lock()
    }

    pub fn lock_all(&self) -> AllStripes<'_> {
        AllStripes {
            guards: self.locks.iter().map(|lock| lock.lock()).collect(),
        }
    }
}
