//! Bookkeeping for incremental doubling of the bucket count.
//!
//! Resizing is split into one ticket per bucket plus a terminal expansion.
//! Two packed cursors drive it: `processing` hands out tickets with a
//! fetch-and-add, `completed` counts the contiguous prefix of buckets that
//! have already been split. Both carry a generation that changes on every
//! expansion and every clear, so a ticket taken before either of those is
//! recognised as stale and dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_utils::Backoff;
use modular_bitfield::prelude::*;

use crate::error::{LashError, Result};

const GENERATION_MASK: u32 = (1 << 24) - 1;

#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorWord {
    count: B40,
    generation: B24,
}

impl CursorWord {
    fn at(generation: u32, count: u64) -> Self {
        CursorWord::new()
            .with_count(count)
            .with_generation(generation & GENERATION_MASK)
    }
}

impl From<CursorWord> for u64 {
    fn from(word: CursorWord) -> u64 {
        u64::from_le_bytes(word.into_bytes())
    }
}

impl From<u64> for CursorWord {
    fn from(value: u64) -> Self {
        CursorWord::from_bytes(value.to_le_bytes())
    }
}

/// One unit of resize work handed to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ticket {
    /// Split bucket `index` of a table with `bucket_count` buckets.
    Split {
        index: u64,
        bucket_count: u64,
        generation: u32,
    },
    /// Every bucket is split; double the bucket count.
    Expand { bucket_count: u64, generation: u32 },
    /// Nothing can be claimed right now.
    Busy,
}

pub struct ResizeState {
    bucket_count: AtomicU64,
    processing: AtomicU64,
    completed: AtomicU64,
    poisoned: AtomicBool,
}

impl ResizeState {
    pub fn new(bucket_count: u64, split: u64) -> Self {
        Self {
            bucket_count: AtomicU64::new(bucket_count),
            processing: AtomicU64::new(CursorWord::at(0, split).into()),
            completed: AtomicU64::new(CursorWord::at(0, split).into()),
            poisoned: AtomicBool::new(false),
        }
    }

    pub fn bucket_count(&self) -> u64 {
        self.bucket_count.load(Ordering::Acquire)
    }

    fn completed(&self) -> CursorWord {
        self.completed.load(Ordering::Acquire).into()
    }

    /// Buckets of the current window that live in both halves already.
    pub fn split_count(&self) -> u64 {
        self.completed().count().min(self.bucket_count())
    }

    /// Buckets currently holding records: the old ones plus each split partner.
    pub fn effective_buckets(&self) -> u64 {
        self.bucket_count() + self.split_count()
    }

    /// Primary index for `hash`. Must be called under the stripe lock of
    /// `hash`: only that lock orders it against the split of its bucket.
    pub fn route(&self, hash: u64) -> u64 {
        let n = self.bucket_count();
        let h0 = hash & (n - 1);
        if self.completed().count() > h0 {
            hash & (2 * n - 1)
        } else {
            h0
        }
    }

    /// Claims the next unit of work.
    pub fn next_ticket(&self) -> Ticket {
        let completed = self.completed();
        let n = self.bucket_count();
        let done = completed.count();

        if done == n {
            let claimed = CursorWord::at(completed.generation(), n + 1);
            return match self.completed.compare_exchange(
                completed.into(),
                claimed.into(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => Ticket::Expand {
                    bucket_count: n,
                    generation: completed.generation(),
                },
                Err(_) => Ticket::Busy,
            };
        }
        if done > n {
            return Ticket::Busy;
        }

        let peek = CursorWord::from(self.processing.load(Ordering::Acquire));
        if peek.generation() != completed.generation() || peek.count() >= n {
            return Ticket::Busy;
        }

        let taken = CursorWord::from(self.processing.fetch_add(1, Ordering::AcqRel));
        // bucket_count is published before processing is reset, so this read
        // belongs to the ticket's own generation
        let n = self.bucket_count();
        if taken.count() < n {
            Ticket::Split {
                index: taken.count(),
                bucket_count: n,
                generation: taken.generation(),
            }
        } else {
            Ticket::Busy
        }
    }

    /// Spins, holding no lock, until every bucket before `index` is split.
    /// Returns `false` if the ticket went stale in the meantime, or was
    /// handed out from a window that was already being expanded.
    pub fn wait_turn(&self, index: u64, generation: u32) -> Result<bool> {
        let backoff = Backoff::new();
        loop {
            self.check_poisoned()?;
            let completed = self.completed();
            if completed.generation() != generation {
                return Ok(false);
            }
            match completed.count() {
                done if done == index => return Ok(true),
                // only an expansion claim moves past a ticket it never saw
                done if done > index => return Ok(false),
                _ => backoff.snooze(),
            }
        }
    }

    /// Whether the ticket is still next in line. Call under its stripe lock.
    pub fn is_current(&self, index: u64, generation: u32) -> bool {
        self.completed() == CursorWord::at(generation, index)
    }

    /// Marks bucket `index` as split. Call under its stripe lock.
    pub fn finish_split(&self, index: u64, generation: u32) -> Result<()> {
        self.completed
            .compare_exchange(
                CursorWord::at(generation, index).into(),
                CursorWord::at(generation, index + 1).into(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|actual| {
                let actual = CursorWord::from(actual);
                LashError::invariant(format!(
                    "completed cursor moved to {} (generation {}) while bucket {index} was split",
                    actual.count(),
                    actual.generation()
                ))
            })
    }

    /// Records that a split failed so that waiting tickets give up.
    pub fn poison(&self) {
        self.poisoned.store(true, Ordering::Release);
    }

    pub fn check_poisoned(&self) -> Result<()> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(LashError::invariant(
                "resize stalled after an earlier split failed",
            ));
        }
        Ok(())
    }

    /// Whether an expansion claimed with `generation` is still valid.
    /// Call with every stripe locked.
    pub fn expansion_pending(&self, bucket_count: u64, generation: u32) -> bool {
        self.completed() == CursorWord::at(generation, bucket_count + 1)
    }

    /// Hands a claimed expansion back so that a later caller retries it.
    pub fn abandon_expansion(&self, bucket_count: u64, generation: u32) {
        let _ = self.completed.compare_exchange(
            CursorWord::at(generation, bucket_count + 1).into(),
            CursorWord::at(generation, bucket_count).into(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Publishes the doubled bucket count and opens a new window.
    /// Call with every stripe locked, after the primary region has grown.
    pub fn finish_expansion(&self, bucket_count: u64, generation: u32) {
        let next = CursorWord::at(generation.wrapping_add(1), 0);
        self.bucket_count.store(bucket_count * 2, Ordering::Release);
        self.completed.store(next.into(), Ordering::Release);
        self.processing.store(next.into(), Ordering::Release);
    }

    /// Drops every outstanding ticket, lifts a poisoning and restarts the
    /// current window from bucket zero. Call with every stripe locked, once
    /// the table is empty.
    pub fn reset(&self) {
        let generation = self.completed().generation();
        let next = CursorWord::at(generation.wrapping_add(1), 0);
        self.completed.store(next.into(), Ordering::Release);
        self.processing.store(next.into(), Ordering::Release);
        self.poisoned.store(false, Ordering::Release);
    }
}
