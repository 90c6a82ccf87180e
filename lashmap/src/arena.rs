use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard};
use tracing::debug;

use crate::error::{LashError, Result};
use crate::header::HEADER_LEN;
use crate::region::MmapRegion;

/// Append-only bump allocator over the secondary region.
///
/// Offsets handed out are never reused by the allocator. The first
/// [`HEADER_LEN`] bytes of the region belong to the table header, so a
/// returned offset is always non-zero and `0` is free to mean "no record".
pub struct Arena {
    region: RwLock<MmapRegion>,
    cursor: AtomicU64,
}

impl Arena {
    /// Wraps `region`, resuming allocation at `cursor`.
    pub fn new(region: MmapRegion, cursor: u64) -> Result<Self> {
        if cursor < HEADER_LEN || cursor > region.size() {
            return Err(LashError::Corrupt(format!(
                "arena cursor {cursor} outside [{HEADER_LEN}, {}]",
                region.size()
            )));
        }
        Ok(Self {
            region: RwLock::new(region),
            cursor: AtomicU64::new(cursor),
        })
    }

    /// Reserves `len` bytes and returns their offset.
    ///
    /// Contended callers race on a compare-and-swap under the shared guard;
    /// only a reservation that would run past the mapped length takes the
    /// exclusive guard to double the region. The caller must not hold a
    /// guard from [`Arena::region`] while allocating.
    pub fn alloc(&self, len: u64) -> Result<u64> {
        loop {
            {
                let region = self.region.read();
                let limit = region.size();
                let mut pos = self.cursor.load(Ordering::Acquire);
                loop {
                    let end = pos.checked_add(len).ok_or(LashError::OutOfBounds {
                        pos,
                        len,
                        size: limit,
                    })?;
                    if end > limit {
                        break;
                    }
                    match self.cursor.compare_exchange_weak(
                        pos,
                        end,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return Ok(pos),
                        Err(actual) => pos = actual,
                    }
                }
            }

            let mut region = self.region.write();
            let needed = self.cursor.load(Ordering::Acquire) + len;
            if needed > region.size() {
                let mut new_len = region.size() * 2;
                while new_len < needed {
                    new_len *= 2;
                }
                debug!(from = region.size(), to = new_len, "growing arena");
                region.grow(new_len)?;
            }
        }
    }

    /// Shared access to the underlying region for reading and writing
    /// already-allocated bytes.
    pub fn region(&self) -> RwLockReadGuard<'_, MmapRegion> {
        self.region.read()
    }

    /// Next offset the allocator will hand out.
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Forgets every allocation. Callers must hold every stripe lock.
    pub fn reset(&self) {
        self.cursor.store(HEADER_LEN, Ordering::Release);
    }

    pub fn flush(&self) -> Result<()> {
        self.region.read().flush()
    }

    pub fn into_region(self) -> MmapRegion {
        self.region.into_inner()
    }
}
