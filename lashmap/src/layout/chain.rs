//! Each primary slot is the head pointer of a singly linked list of
//! variable-size records living in the arena.
//!
//! Record format: `hash: u64 | next: u64 | key_len: u32 | val_len: u32 |
//! key | val`, with `next == 0` ending the chain.

use std::collections::VecDeque;

use bytemuck::{Pod, Zeroable};

use super::{Layout, PutMode, PutOutcome, Storage, len_u32, split_target};
use crate::arena::Arena;
use crate::error::Result;
use crate::region::MmapRegion;

const RECORD_HEADER_LEN: u64 = std::mem::size_of::<RecordHeader>() as u64;
const NEXT_OFFSET: u64 = 8;

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct RecordHeader {
    hash: u64,
    next: u64,
    key_len: u32,
    val_len: u32,
}

impl RecordHeader {
    fn key_pos(&self, at: u64) -> u64 {
        at + RECORD_HEADER_LEN
    }

    fn val_pos(&self, at: u64) -> u64 {
        at + RECORD_HEADER_LEN + self.key_len as u64
    }
}

/// Where a pointer to a record is stored.
#[derive(Debug, Clone, Copy)]
enum Link {
    Slot(u64),
    Record(u64),
}

impl Link {
    fn set(self, primary: &MmapRegion, arena: &MmapRegion, target: u64) -> Result<()> {
        match self {
            Link::Slot(idx) => primary.put_u64(slot_pos(idx), target),
            Link::Record(at) => arena.put_u64(at + NEXT_OFFSET, target),
        }
    }
}

struct Search {
    /// Link pointing at the hit, or at the end of the chain on a miss.
    link: Link,
    hit: Option<(u64, RecordHeader)>,
}

fn slot_pos(idx: u64) -> u64 {
    idx * ChainLayout::SLOT_BYTES
}

/// Records threaded through the arena from an 8-byte primary slot.
#[derive(Debug, Default)]
pub struct ChainLayout;

impl ChainLayout {
    fn key_matches(
        arena: &MmapRegion,
        at: u64,
        record: &RecordHeader,
        hash: u64,
        key: &[u8],
    ) -> Result<bool> {
        if record.hash != hash || record.key_len as usize != key.len() {
            return Ok(false);
        }
        Ok(arena.get_bytes(record.key_pos(at), key.len() as u64)? == key)
    }

    fn value(arena: &MmapRegion, at: u64, record: &RecordHeader) -> Result<Vec<u8>> {
        arena.get_bytes(record.val_pos(at), record.val_len as u64)
    }

    fn search(
        primary: &MmapRegion,
        arena: &MmapRegion,
        idx: u64,
        hash: u64,
        key: &[u8],
    ) -> Result<Search> {
        let mut link = Link::Slot(idx);
        let mut at = primary.get_u64(slot_pos(idx))?;
        while at != 0 {
            let record: RecordHeader = arena.read_pod(at)?;
            if Self::key_matches(arena, at, &record, hash, key)? {
                return Ok(Search {
                    link,
                    hit: Some((at, record)),
                });
            }
            link = Link::Record(at);
            at = record.next;
        }
        Ok(Search { link, hit: None })
    }

    /// Offsets and hashes of every record behind slot `idx`, in chain order.
    fn walk(primary: &MmapRegion, arena: &MmapRegion, idx: u64) -> Result<Vec<(u64, u64)>> {
        let mut nodes = Vec::new();
        let mut at = primary.get_u64(slot_pos(idx))?;
        while at != 0 {
            let record: RecordHeader = arena.read_pod(at)?;
            nodes.push((at, record.hash));
            at = record.next;
        }
        Ok(nodes)
    }

    /// Threads `nodes` into a fresh chain headed at slot `idx`.
    fn rewrite_chain(
        primary: &MmapRegion,
        arena: &MmapRegion,
        idx: u64,
        nodes: &[u64],
    ) -> Result<()> {
        primary.put_u64(slot_pos(idx), nodes.first().copied().unwrap_or(0))?;
        for pair in nodes.windows(2) {
            arena.put_u64(pair[0] + NEXT_OFFSET, pair[1])?;
        }
        if let Some(&last) = nodes.last() {
            arena.put_u64(last + NEXT_OFFSET, 0)?;
        }
        Ok(())
    }
}

impl Layout for ChainLayout {
    const SLOT_BYTES: u64 = 8;
    const RECORDS_PER_SLOT: u64 = 1;

    fn stage(&self, arena: &Arena, hash: u64, key: &[u8], val: &[u8]) -> Result<u64> {
        let record = RecordHeader {
            hash,
            next: 0,
            key_len: len_u32(key.len())?,
            val_len: len_u32(val.len())?,
        };
        let at = arena.alloc(RECORD_HEADER_LEN + key.len() as u64 + val.len() as u64)?;
        let region = arena.region();
        region.write_pod(at, &record)?;
        region.put_bytes(record.key_pos(at), key)?;
        region.put_bytes(record.val_pos(at), val)?;
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
            Some((at, record)) => Self::value(&arena, at, &record).map(Some),
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
                Some((at, record)) => Some(Self::value(&arena, *at, record)?),
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

        let fresh = match staged {
            Some(at) => at,
            None => self.stage(storage.arena, hash, key, val)?,
        };
        let arena = storage.arena.region();
        if let Some((_, replaced)) = search.hit {
            // the new record takes the old one's place in the chain
            arena.put_u64(fresh + NEXT_OFFSET, replaced.next)?;
        }
        search.link.set(storage.primary, &arena, fresh)?;

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
        let Some((at, record)) = search.hit else {
            return Ok(None);
        };
        let value = Self::value(&arena, at, &record)?;
        if expected.is_some_and(|expected| expected != value.as_slice()) {
            return Ok(None);
        }
        search.link.set(storage.primary, &arena, record.next)?;
        Ok(Some(value))
    }

    fn split(&self, storage: Storage<'_>, idx: u64, bucket_count: u64) -> Result<()> {
        let arena = storage.arena.region();
        let mut keep = Vec::new();
        let mut moved = Vec::new();
        for (at, hash) in Self::walk(storage.primary, &arena, idx)? {
            if split_target(hash, idx, bucket_count)? {
                moved.push(at);
            } else {
                keep.push(at);
            }
        }
        Self::rewrite_chain(storage.primary, &arena, idx, &keep)?;
        Self::rewrite_chain(storage.primary, &arena, idx + bucket_count, &moved)
    }

    fn collect(
        &self,
        storage: Storage<'_>,
        idx: u64,
        out: &mut VecDeque<(Vec<u8>, Vec<u8>)>,
    ) -> Result<()> {
        let arena = storage.arena.region();
        let mut at = storage.primary.get_u64(slot_pos(idx))?;
        while at != 0 {
            let record: RecordHeader = arena.read_pod(at)?;
            let key = arena.get_bytes(record.key_pos(at), record.key_len as u64)?;
            out.push_back((key, Self::value(&arena, at, &record)?));
            at = record.next;
        }
        Ok(())
    }

    fn clear(&self) {}
}
