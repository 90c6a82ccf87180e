//! Record layouts: how a primary slot and the arena hold the records routed
//! to one bucket index.

use std::collections::VecDeque;

use crate::arena::Arena;
use crate::error::{LashError, Result};
use crate::region::MmapRegion;

pub mod bucket;
pub mod chain;

pub use bucket::BucketLayout;
pub use chain::ChainLayout;

/// The regions a layout works on, borrowed for one operation.
///
/// `primary` is borrowed from a shared guard, so the layout may write through
/// it but never resize it.
#[derive(Clone, Copy)]
pub struct Storage<'a> {
    pub primary: &'a MmapRegion,
    pub arena: &'a Arena,
}

/// Condition under which an upsert writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode<'v> {
    Always,
    IfAbsent,
    IfPresent,
    IfEquals(&'v [u8]),
}

impl PutMode<'_> {
    pub fn applies(&self, existing: Option<&[u8]>) -> bool {
        match (self, existing) {
            (PutMode::Always, _) => true,
            (PutMode::IfAbsent, current) => current.is_none(),
            (PutMode::IfPresent, current) => current.is_some(),
            (PutMode::IfEquals(expected), Some(current)) => current == *expected,
            (PutMode::IfEquals(_), None) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub previous: Option<Vec<u8>>,
    pub applied: bool,
}

impl PutOutcome {
    /// The write added a new key.
    pub fn inserted(&self) -> bool {
        self.applied && self.previous.is_none()
    }
}

/// One strategy for storing records behind a primary slot.
///
/// Every method except [`Layout::stage`] and [`Layout::clear`] is called
/// with the stripe lock of `idx` held, and `idx` is the routed index of
/// `hash`. Implementations must not hold a guard from [`Arena::region`]
/// while calling [`Arena::alloc`].
pub trait Layout: Default + Send + Sync {
    /// Bytes per primary slot.
    const SLOT_BYTES: u64;
    /// Records one slot is sized for, used as the load factor denominator.
    const RECORDS_PER_SLOT: u64;

    /// Writes what an unconditional put needs into the arena before the
    /// stripe lock is taken, returning its offset for [`Layout::upsert`].
    ///
    /// Conditional puts stage from inside [`Layout::upsert`], and overflow
    /// buckets are allocated there too, so [`Arena::alloc`] can still run
    /// under a stripe lock. That is safe because the arena guard is always
    /// taken last and never held while waiting on a stripe.
    fn stage(&self, arena: &Arena, hash: u64, key: &[u8], val: &[u8]) -> Result<u64>;

    fn get(&self, storage: Storage<'_>, idx: u64, hash: u64, key: &[u8])
    -> Result<Option<Vec<u8>>>;

    /// Inserts or overwrites `key` when `mode` allows it. `staged` is the
    /// result of [`Layout::stage`] for the same key and value, if any.
    #[allow(clippy::too_many_arguments)]
    fn upsert(
        &self,
        storage: Storage<'_>,
        idx: u64,
        hash: u64,
        key: &[u8],
        val: &[u8],
        staged: Option<u64>,
        mode: PutMode<'_>,
    ) -> Result<PutOutcome>;

    /// Removes `key`, only if its value equals `expected` when given.
    fn remove(
        &self,
        storage: Storage<'_>,
        idx: u64,
        hash: u64,
        key: &[u8],
        expected: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>>;

    /// Moves every record of bucket `idx` whose hash selects
    /// `idx + bucket_count` under the doubled modulus into that bucket.
    fn split(&self, storage: Storage<'_>, idx: u64, bucket_count: u64) -> Result<()>;

    /// Appends copies of every record behind slot `idx` to `out`.
    fn collect(
        &self,
        storage: Storage<'_>,
        idx: u64,
        out: &mut VecDeque<(Vec<u8>, Vec<u8>)>,
    ) -> Result<()>;

    /// Forgets layout state tied to arena offsets. Called with every stripe
    /// locked, after the arena has been reset.
    fn clear(&self);
}

pub(crate) fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| LashError::RecordTooLarge(len as u64))
}

/// Which half of the doubled table `hash` belongs to when `idx` is split.
pub(crate) fn split_target(hash: u64, idx: u64, bucket_count: u64) -> Result<bool> {
    let target = hash & (2 * bucket_count - 1);
    if target == idx {
        Ok(false)
    } else if target == idx + bucket_count {
        Ok(true)
    } else {
        Err(LashError::invariant(format!(
            "record with hash {hash:#x} in bucket {idx} rehashes to {target}"
        )))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::header::HEADER_LEN;

    /// Regions for driving a layout directly, sized for `buckets` slots.
    pub(crate) fn scratch<L: Layout>(buckets: u64) -> (MmapRegion, Arena) {
        let primary = MmapRegion::anonymous(buckets * 2 * L::SLOT_BYTES).unwrap();
        let arena = Arena::new(MmapRegion::anonymous(4096).unwrap(), HEADER_LEN).unwrap();
        (primary, arena)
    }

    #[test]
    fn test_put_modes() {
        assert!(PutMode::Always.applies(None));
        assert!(PutMode::Always.applies(Some(b"x")));
        assert!(PutMode::IfAbsent.applies(None));
        assert!(!PutMode::IfAbsent.applies(Some(b"x")));
        assert!(!PutMode::IfPresent.applies(None));
        assert!(PutMode::IfPresent.applies(Some(b"x")));
        assert!(PutMode::IfEquals(b"x").applies(Some(b"x")));
        assert!(!PutMode::IfEquals(b"x").applies(Some(b"y")));
        assert!(!PutMode::IfEquals(b"x").applies(None));
    }

    #[test]
    fn test_split_target() {
        assert!(!split_target(0b0101, 5, 8).unwrap());
        assert!(split_target(0b1101, 5, 8).unwrap());
        assert!(matches!(
            split_target(0b0110, 5, 8),
            Err(LashError::Invariant(_))
        ));
    }

    #[test]
    fn test_len_limit() {
        assert_eq!(len_u32(7).unwrap(), 7);
        assert!(len_u32(usize::MAX).is_err() || usize::BITS == 32);
    }
}
