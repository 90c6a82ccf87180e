//! Each primary slot embeds a fixed-size bucket of record pointers; full
//! buckets chain to overflow buckets allocated in the arena.
//!
//! Bucket format: `next: u64 | reserved: u64 | 170 × RecordPointer`.
//! Keys and values live in the arena as `key | val` and are reached through
//! a pointer's `data_ptr`.

use std::collections::VecDeque;

use bytemuck::{Pod, Zeroable};
use parking_lot::Mutex;
use tracing::debug;

use super::{Layout, PutMode, PutOutcome, Storage, len_u32, split_target};
use crate::arena::Arena;
use crate::error::{LashError, Result};
use crate::region::MmapRegion;

pub const BUCKET_BYTES: u64 = 4096;
const BUCKET_HEADER_LEN: u64 = 16;
const POINTER_LEN: u64 = std::mem::size_of::<RecordPointer>() as u64;
/// Record pointers per bucket.
pub const BUCKET_CAPACITY: u64 = (BUCKET_BYTES - BUCKET_HEADER_LEN) / POINTER_LEN;
/// Records written per bucket when a chain is rebuilt.
pub const BUCKET_FILL_TARGET: usize = 128;

const FREE_PTR: i64 = 0;
const TOMBSTONE_PTR: i64 = -1;

/// Starting probe position within a bucket, taken from the high bits of
/// the hash so that it is independent of the bucket index.
fn probe_start(hash: u64) -> u64 {
    (hash >> (BUCKET_CAPACITY.leading_zeros() - 1)) % BUCKET_CAPACITY
}

/// On-disk form of a bucket slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct RecordPointer {
    pub hash: u64,
    pub data_ptr: i64,
    pub key_len: u32,
    pub val_len: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Tombstone,
    Occupied(u64),
}

impl RecordPointer {
    fn occupied(hash: u64, data: u64, key_len: u32, val_len: u32) -> Self {
        Self {
            hash,
            data_ptr: data as i64,
            key_len,
            val_len,
        }
    }

    fn tombstone() -> Self {
        Self {
            hash: u64::MAX,
            data_ptr: TOMBSTONE_PTR,
            key_len: u32::MAX,
            val_len: u32::MAX,
        }
    }

    pub fn state(&self) -> Result<SlotState> {
        match self.data_ptr {
            FREE_PTR => Ok(SlotState::Free),
            TOMBSTONE_PTR => Ok(SlotState::Tombstone),
            ptr if ptr > 0 => Ok(SlotState::Occupied(ptr as u64)),
            ptr => Err(LashError::Corrupt(format!("record pointer {ptr}"))),
        }
    }

    fn key_matches(&self, arena: &MmapRegion, data: u64, hash: u64, key: &[u8]) -> Result<bool> {
        if self.hash != hash || self.key_len as usize != key.len() {
            return Ok(false);
        }
        Ok(arena.get_bytes(data, key.len() as u64)? == key)
    }

    fn key(&self, arena: &MmapRegion, data: u64) -> Result<Vec<u8>> {
        arena.get_bytes(data, self.key_len as u64)
    }

    fn value(&self, arena: &MmapRegion, data: u64) -> Result<Vec<u8>> {
        arena.get_bytes(data + self.key_len as u64, self.val_len as u64)
    }
}

/// A bucket either embedded in the primary region or living in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BucketAt {
    Primary(u64),
    Arena(u64),
}

impl BucketAt {
    fn region<'r>(self, primary: &'r MmapRegion, arena: &'r MmapRegion) -> (&'r MmapRegion, u64) {
        match self {
            BucketAt::Primary(idx) => (primary, idx * BUCKET_BYTES),
            BucketAt::Arena(at) => (arena, at),
        }
    }

    fn next(self, primary: &MmapRegion, arena: &MmapRegion) -> Result<u64> {
        let (region, base) = self.region(primary, arena);
        region.get_u64(base)
    }

    fn set_next(self, primary: &MmapRegion, arena: &MmapRegion, next: u64) -> Result<()> {
        let (region, base) = self.region(primary, arena);
        region.put_u64(base, next)
    }

    fn read(self, primary: &MmapRegion, arena: &MmapRegion, slot: u64) -> Result<RecordPointer> {
        let (region, base) = self.region(primary, arena);
        region.read_pod(base + BUCKET_HEADER_LEN + slot * POINTER_LEN)
    }

    fn write(
        self,
        primary: &MmapRegion,
        arena: &MmapRegion,
        slot: u64,
        pointer: &RecordPointer,
    ) -> Result<()> {
        let (region, base) = self.region(primary, arena);
        region.write_pod(base + BUCKET_HEADER_LEN + slot * POINTER_LEN, pointer)
    }

    fn zero(self, primary: &MmapRegion, arena: &MmapRegion) -> Result<()> {
        let (region, base) = self.region(primary, arena);
        region.zero_range(base, BUCKET_BYTES)
    }

    /// Writes `pointer` at the first free slot of its probe sequence.
    fn place(self, primary: &MmapRegion, arena: &MmapRegion, pointer: &RecordPointer) -> Result<()> {
        let start = probe_start(pointer.hash);
        for i in 0..BUCKET_CAPACITY {
            let slot = (start + i) % BUCKET_CAPACITY;
            if self.read(primary, arena, slot)?.state()? == SlotState::Free {
                return self.write(primary, arena, slot, pointer);
            }
        }
        Err(LashError::invariant(format!("no free slot in bucket {self:?}")))
    }

    fn chain(self, primary: &MmapRegion, arena: &MmapRegion) -> Result<Vec<BucketAt>> {
        let mut buckets = vec![self];
        let mut next = self.next(primary, arena)?;
        while next != 0 {
            let bucket = BucketAt::Arena(next);
            buckets.push(bucket);
            next = bucket.next(primary, arena)?;
        }
        Ok(buckets)
    }
}

#[derive(Debug, Clone, Copy)]
struct SlotAt {
    bucket: BucketAt,
    slot: u64,
}

struct Search {
    hit: Option<(SlotAt, RecordPointer, u64)>,
    /// First free or tombstoned slot met along the probe.
    reusable: Option<SlotAt>,
    last: BucketAt,
}

/// Multi-record buckets with overflow chaining and a pool of emptied
/// overflow buckets.
#[derive(Debug, Default)]
pub struct BucketLayout {
    free_buckets: Mutex<Vec<u64>>,
}

impl BucketLayout {
    /// Number of overflow buckets waiting to be reused.
    pub fn pooled_buckets(&self) -> usize {
        self.free_buckets.lock().len()
    }

    fn search(
        primary: &MmapRegion,
        arena: &MmapRegion,
        idx: u64,
        hash: u64,
        key: &[u8],
    ) -> Result<Search> {
        let start = probe_start(hash);
        let mut reusable = None;
        let mut bucket = BucketAt::Primary(idx);
        loop {
            for i in 0..BUCKET_CAPACITY {
                let slot = (start + i) % BUCKET_CAPACITY;
                let pointer = bucket.read(primary, arena, slot)?;
                match pointer.state()? {
                    SlotState::Occupied(data) => {
                        if pointer.key_matches(arena, data, hash, key)? {
                            return Ok(Search {
                                hit: Some((SlotAt { bucket, slot }, pointer, data)),
                                reusable,
                                last: bucket,
                            });
                        }
                    }
                    SlotState::Tombstone => {
                        if reusable.is_none() {
                            reusable = Some(SlotAt { bucket, slot });
                        }
                    }
                    SlotState::Free => {
                        if reusable.is_none() {
                            reusable = Some(SlotAt { bucket, slot });
                        }
                        // later buckets of the chain may still hold the key
                        break;
                    }
                }
            }
            match bucket.next(primary, arena)? {
                0 => {
                    return Ok(Search {
                        hit: None,
                        reusable,
                        last: bucket,
                    });
                }
                next => bucket = BucketAt::Arena(next),
            }
        }
    }

    /// A zeroed overflow bucket, from `spare`, then the pool, then the arena.
    fn acquire_bucket(&self, arena: &Arena, spare: &mut Vec<u64>) -> Result<u64> {
        let recycled = spare.pop().or_else(|| self.free_buckets.lock().pop());
        let at = match recycled {
            Some(at) => at,
            None => arena.alloc(BUCKET_BYTES)?,
        };
        arena.region().zero_range(at, BUCKET_BYTES)?;
        Ok(at)
    }

    /// Rebuilds the chain headed by `head` from `pointers`, at most
    /// [`BUCKET_FILL_TARGET`] per bucket.
    fn write_chain(
        &self,
        storage: Storage<'_>,
        head: BucketAt,
        pointers: &[RecordPointer],
        spare: &mut Vec<u64>,
    ) -> Result<()> {
        head.zero(storage.primary, &storage.arena.region())?;
        let mut bucket = head;
        for (i, chunk) in pointers.chunks(BUCKET_FILL_TARGET).enumerate() {
            if i > 0 {
                let next = self.acquire_bucket(storage.arena, spare)?;
                bucket.set_next(storage.primary, &storage.arena.region(), next)?;
                bucket = BucketAt::Arena(next);
            }
            let arena = storage.arena.region();
            for pointer in chunk {
                bucket.place(storage.primary, &arena, pointer)?;
            }
        }
        Ok(())
    }

    /// Every occupied pointer behind slot `idx` and the overflow buckets
    /// holding them.
    fn drain_chain(
        primary: &MmapRegion,
        arena: &MmapRegion,
        idx: u64,
    ) -> Result<(Vec<RecordPointer>, Vec<u64>)> {
        let mut pointers = Vec::new();
        let mut overflow = Vec::new();
        for bucket in BucketAt::Primary(idx).chain(primary, arena)? {
            if let BucketAt::Arena(at) = bucket {
                overflow.push(at);
            }
            for slot in 0..BUCKET_CAPACITY {
                let pointer = bucket.read(primary, arena, slot)?;
                if let SlotState::Occupied(_) = pointer.state()? {
                    pointers.push(pointer);
                }
            }
        }
        Ok((pointers, overflow))
    }

    /// Number of buckets, primary included, in the chain behind slot `idx`.
    pub fn chain_len(&self, storage: Storage<'_>, idx: u64) -> Result<usize> {
        let arena = storage.arena.region();
        Ok(BucketAt::Primary(idx).chain(storage.primary, &arena)?.len())
    }
}

impl Layout for BucketLayout {
    const SLOT_BYTES: u64 = BUCKET_BYTES;
    const RECORDS_PER_SLOT: u64 = BUCKET_CAPACITY;

    fn stage(&self, arena: &Arena, _hash: u64, key: &[u8], val: &[u8]) -> Result<u64> {
        len_u32(key.len())?;
        len_u32(val.len())?;
        let at = arena.alloc(key.len() as u64 + val.len() as u64)?;
        let region = arena.region();
        region.put_bytes(at, key)?;
        region.put_bytes(at + key.len() as u64, val)?;
        Ok(at)
    }

    fn get(
        &self,
        storage: Storage<'_>,
        idx: u64,
        hash: u64,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        let arena = storage.arena.region();
        match Self::search(storage.primary, &arena, idx, hash, key)?.hit {
            Some((_, pointer, data)) => pointer.value(&arena, data).map(Some),
            None => Ok(None),
        }
    }

    fn upsert(
        &self,
        storage: Storage<'_>,
        idx: u64,
        hash: u64,
        key: &[u8],
        val: &[u8],
        staged: Option<u64>,
        mode: PutMode<'_>,
    ) -> Result<PutOutcome> {
        let (search, previous) = {
            let arena = storage.arena.region();
            let search = Self::search(storage.primary, &arena, idx, hash, key)?;
            let previous = match &search.hit {
                Some((_, pointer, data)) => Some(pointer.value(&arena, *data)?),
                None => None,
            };
            (search, previous)
        };

        if !mode.applies(previous.as_deref()) {
            return Ok(PutOutcome {
                previous,
                applied: false,
            });
        }

        let data = match staged {
            Some(at) => at,
            None => self.stage(storage.arena, hash, key, val)?,
        };
        let pointer = RecordPointer::occupied(hash, data, len_u32(key.len())?, len_u32(val.len())?);

        let target = match search.hit.map(|(at, _, _)| at).or(search.reusable) {
            Some(at) => at,
            None => {
                let fresh = self.acquire_bucket(storage.arena, &mut Vec::new())?;
                search
                    .last
                    .set_next(storage.primary, &storage.arena.region(), fresh)?;
                SlotAt {
                    bucket: BucketAt::Arena(fresh),
                    slot: probe_start(hash),
                }
            }
        };
        target
            .bucket
            .write(storage.primary, &storage.arena.region(), target.slot, &pointer)?;

        Ok(PutOutcome {
            previous,
            applied: true,
        })
    }

    fn remove(
        &self,
        storage: Storage<'_>,
        idx: u64,
        hash: u64,
        key: &[u8],
        expected: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>> {
        let arena = storage.arena.region();
        let search = Self::search(storage.primary, &arena, idx, hash, key)?;
        let Some((at, pointer, data)) = search.hit else {
            return Ok(None);
        };
        let value = pointer.value(&arena, data)?;
        if expected.is_some_and(|expected| expected != value.as_slice()) {
            return Ok(None);
        }
        at.bucket
            .write(storage.primary, &arena, at.slot, &RecordPointer::tombstone())?;
        Ok(Some(value))
    }

    fn split(&self, storage: Storage<'_>, idx: u64, bucket_count: u64) -> Result<()> {
        let (pointers, overflow) = {
            let arena = storage.arena.region();
            let partner = BucketAt::Primary(idx + bucket_count);
            let (stray, _) = Self::drain_chain(storage.primary, &arena, idx + bucket_count)?;
            if !stray.is_empty() || partner.next(storage.primary, &arena)? != 0 {
                return Err(LashError::invariant(format!(
                    "split partner {} of bucket {idx} is not empty",
                    idx + bucket_count
                )));
            }
            Self::drain_chain(storage.primary, &arena, idx)?
        };

        let mut keep = Vec::new();
        let mut moved = Vec::new();
        for pointer in pointers {
            if split_target(pointer.hash, idx, bucket_count)? {
                moved.push(pointer);
            } else {
                keep.push(pointer);
            }
        }

        // reuse the old overflow buckets front to back
        let mut spare: Vec<u64> = overflow.into_iter().rev().collect();
        self.write_chain(storage, BucketAt::Primary(idx), &keep, &mut spare)?;
        self.write_chain(
            storage,
            BucketAt::Primary(idx + bucket_count),
            &moved,
            &mut spare,
        )?;

        if !spare.is_empty() {
            let arena = storage.arena.region();
            for &at in &spare {
                arena.zero_range(at, BUCKET_BYTES)?;
            }
            debug!(bucket = idx, recycled = spare.len(), "pooling emptied overflow buckets");
            self.free_buckets.lock().extend(spare);
        }
        Ok(())
    }

    fn collect(
        &self,
        storage: Storage<'_>,
        idx: u64,
        out: &mut VecDeque<(Vec<u8>, Vec<u8>)>,
    ) -> Result<()> {
        let arena = storage.arena.region();
        for bucket in BucketAt::Primary(idx).chain(storage.primary, &arena)? {
            for slot in 0..BUCKET_CAPACITY {
                let pointer = bucket.read(storage.primary, &arena, slot)?;
                if let SlotState::Occupied(data) = pointer.state()? {
                    out.push_back((pointer.key(&arena, data)?, pointer.value(&arena, data)?));
                }
            }
        }
        Ok(())
    }

    fn clear(&self) {
        let mut pool = self.free_buckets.lock();
        if !pool.is_empty() {
            debug!(dropped = pool.len(), "dropping pooled buckets");
            pool.clear();
        }
    }
}
