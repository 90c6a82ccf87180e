use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::Backoff;
use parking_lot::RwLock;
use tracing::{debug, info, trace};

use crate::arena::Arena;
use crate::config::DiskMapConfig;
use crate::error::{LashError, Result};
use crate::hash::murmur_hash;
use crate::header::{HEADER_LEN, TableHeader};
use crate::iter::Iter;
use crate::layout::{BucketLayout, ChainLayout, Layout, PutMode, PutOutcome, Storage};
use crate::region::MmapRegion;
use crate::rehash::{ResizeState, Ticket};
use crate::stripes::StripeLockSet;

pub const PRIMARY_FILE: &str = "primary.hash";
pub const SECONDARY_FILE: &str = "secondary.hash";

pub type ChainDiskMap = DiskMap<ChainLayout>;
pub type BucketDiskMap = DiskMap<BucketLayout>;

/// A concurrent hash map from byte strings to byte strings, stored in two
/// memory-mapped regions.
///
/// Operations on keys in different stripes run in parallel. Growing the
/// table is done a bucket at a time by callers whose writes push the load
/// factor over the configured threshold, so no caller ever waits for a
/// rehash of the whole table.
///
/// The header is only written by [`DiskMap::close`] and [`DiskMap::flush`];
/// dropping an open map leaves the files readable only up to the last flush.
pub struct DiskMap<L: Layout = BucketLayout> {
    dir: Option<PathBuf>,
    primary: RwLock<MmapRegion>,
    arena: Arena,
    stripes: StripeLockSet,
    /// Held shared from staging a record until it is linked, and exclusively
    /// by [`DiskMap::clear`], which rewinds the arena under it.
    staging: RwLock<()>,
    resize: ResizeState,
    size: AtomicU64,
    layout: L,
    load_threshold: f64,
}

impl<L: Layout> DiskMap<L> {
    /// Opens the table stored in `dir`, creating the directory and an empty
    /// table if needed.
    pub fn open(dir: impl AsRef<Path>, config: DiskMapConfig) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let primary = MmapRegion::open(dir.join(PRIMARY_FILE), 0)?;
        let secondary = MmapRegion::open(dir.join(SECONDARY_FILE), config.arena_initial_len)?;
        Self::assemble(Some(dir), primary, secondary, config)
    }

    /// Creates an empty table that lives only in memory.
    pub fn anonymous(config: DiskMapConfig) -> Result<Self> {
        config.validate()?;
        let primary = MmapRegion::anonymous(0)?;
        let secondary = MmapRegion::anonymous(config.arena_initial_len)?;
        Self::assemble(None, primary, secondary, config)
    }

    fn assemble(
        dir: Option<PathBuf>,
        mut primary: MmapRegion,
        secondary: MmapRegion,
        config: DiskMapConfig,
    ) -> Result<Self> {
        let stored = TableHeader::read_from(&secondary)?;
        let header = if stored.is_fresh() {
            TableHeader {
                size: 0,
                bucket_count: config.initial_buckets,
                arena_write_pos: HEADER_LEN,
                resize_cursor: 0,
            }
            .with_split_count(0)
        } else {
            stored.validate(secondary.size())?;
            stored
        };

        if header.bucket_count < config.stripes as u64 {
            return Err(LashError::InvalidConfig(format!(
                "table has {} buckets, fewer than the {} requested stripes",
                header.bucket_count, config.stripes
            )));
        }
        primary.grow(2 * header.bucket_count * L::SLOT_BYTES)?;

        info!(
            dir = ?dir,
            fresh = stored.is_fresh(),
            size = header.size,
            buckets = header.bucket_count,
            "opened disk map"
        );

        Ok(Self {
            dir,
            primary: RwLock::new(primary),
            arena: Arena::new(secondary, header.arena_write_pos)?,
            stripes: StripeLockSet::new(config.stripes),
            staging: RwLock::new(()),
            resize: ResizeState::new(header.bucket_count, header.split_count()),
            size: AtomicU64::new(header.size),
            layout: L::default(),
            load_threshold: config.load_threshold,
        })
    }

    pub fn len(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records per record slot currently available, counting buckets
    /// already split in the running resize window.
    pub fn load(&self) -> f64 {
        let capacity = self.resize.effective_buckets() * L::RECORDS_PER_SLOT;
        self.len() as f64 / capacity as f64
    }

    pub fn bucket_count(&self) -> u64 {
        self.resize.bucket_count()
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Highest bucket index split in the current resize window, `-1` if none.
    pub fn resize_cursor(&self) -> i64 {
        self.resize.split_count() as i64 - 1
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let hash = murmur_hash(key);
        let _stripe = self.stripes.lock_for_hash(hash);
        let primary = self.primary.read();
        let idx = self.resize.route(hash);
        self.layout.get(self.storage(&primary), idx, hash, key)
    }

    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Inserts or overwrites `key`, returning the previous value.
    pub fn put(&self, key: &[u8], val: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.upsert(key, val, PutMode::Always)?.previous)
    }

    /// Inserts `key` only if it is absent. Returns the value already present,
    /// or `None` if the insert happened.
    pub fn put_if_absent(&self, key: &[u8], val: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.upsert(key, val, PutMode::IfAbsent)?.previous)
    }

    /// Overwrites `key` only if it is present, returning the previous value.
    pub fn replace(&self, key: &[u8], val: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.upsert(key, val, PutMode::IfPresent)?.previous)
    }

    /// Overwrites `key` only if its current value equals `old`.
    pub fn replace_if(&self, key: &[u8], old: &[u8], new: &[u8]) -> Result<bool> {
        Ok(self.upsert(key, new, PutMode::IfEquals(old))?.applied)
    }

    pub fn remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.delete_record(key, None)
    }

    /// Removes `key` only if its current value equals `val`.
    pub fn remove_if(&self, key: &[u8], val: &[u8]) -> Result<bool> {
        Ok(self.delete_record(key, Some(val))?.is_some())
    }

    fn upsert(&self, key: &[u8], val: &[u8], mode: PutMode<'_>) -> Result<PutOutcome> {
        self.rehash_while_loaded()?;

        let hash = murmur_hash(key);
        let _staging = self.staging.read();
        let staged = match mode {
            PutMode::Always => Some(self.layout.stage(&self.arena, hash, key, val)?),
            _ => None,
        };

        let _stripe = self.stripes.lock_for_hash(hash);
        let primary = self.primary.read();
        let idx = self.resize.route(hash);
        let outcome = self
            .layout
            .upsert(self.storage(&primary), idx, hash, key, val, staged, mode)?;
        if outcome.inserted() {
            self.size.fetch_add(1, Ordering::AcqRel);
        }
        Ok(outcome)
    }

    fn delete_record(&self, key: &[u8], expected: Option<&[u8]>) -> Result<Option<Vec<u8>>> {
        self.rehash_while_loaded()?;

        let hash = murmur_hash(key);
        let _stripe = self.stripes.lock_for_hash(hash);
        let primary = self.primary.read();
        let idx = self.resize.route(hash);
        let removed = self
            .layout
            .remove(self.storage(&primary), idx, hash, key, expected)?;
        if removed.is_some() {
            self.size.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(removed)
    }

    fn storage<'a>(&'a self, primary: &'a MmapRegion) -> Storage<'a> {
        Storage {
            primary,
            arena: &self.arena,
        }
    }

    /// Does resize work until the load factor is back under the threshold.
    fn rehash_while_loaded(&self) -> Result<()> {
        let backoff = Backoff::new();
        while self.load() > self.load_threshold {
            match self.resize.next_ticket() {
                Ticket::Split {
                    index,
                    bucket_count,
                    generation,
                } => {
                    self.split_bucket(index, bucket_count, generation)?;
                    backoff.reset();
                }
                Ticket::Expand {
                    bucket_count,
                    generation,
                } => {
                    self.expand(bucket_count, generation)?;
                    backoff.reset();
                }
                Ticket::Busy => {
                    self.resize.check_poisoned()?;
                    backoff.snooze();
                }
            }
        }
        Ok(())
    }

    fn split_bucket(&self, index: u64, bucket_count: u64, generation: u32) -> Result<()> {
        if !self.resize.wait_turn(index, generation)? {
            return Ok(());
        }
        let _stripe = self.stripes.lock_for_hash(index);
        if !self.resize.is_current(index, generation) {
            return Ok(());
        }
        let primary = self.primary.read();
        trace!(bucket = index, bucket_count, "splitting bucket");
        let split = self
            .layout
            .split(self.storage(&primary), index, bucket_count)
            .and_then(|()| self.resize.finish_split(index, generation));
        if split.is_err() {
            self.resize.poison();
        }
        split
    }

    fn expand(&self, bucket_count: u64, generation: u32) -> Result<()> {
        let _all = self.stripes.lock_all();
        if !self.resize.expansion_pending(bucket_count, generation) {
            return Ok(());
        }
        let mut primary = self.primary.write();
        if let Err(err) = primary.grow(4 * bucket_count * L::SLOT_BYTES) {
            self.resize.abandon_expansion(bucket_count, generation);
            return Err(err);
        }
        self.resize.finish_expansion(bucket_count, generation);
        info!(
            from = bucket_count,
            to = bucket_count * 2,
            size = self.len(),
            "doubled bucket count"
        );
        Ok(())
    }

    /// Removes every record. Waits for staged puts to be linked, then takes
    /// every stripe lock.
    pub fn clear(&self) -> Result<()> {
        let _staging = self.staging.write();
        let _all = self.stripes.lock_all();
        self.primary.write().zero_fill();
        self.arena.reset();
        self.layout.clear();
        self.size.store(0, Ordering::Release);
        self.resize.reset();
        debug!(buckets = self.bucket_count(), "cleared disk map");
        Ok(())
    }

    /// Number of primary slots, split partners included.
    pub(crate) fn slot_count(&self) -> u64 {
        2 * self.resize.bucket_count()
    }

    /// Copies the records behind primary slot `idx` under its stripe lock.
    pub(crate) fn collect_slot(
        &self,
        idx: u64,
        out: &mut VecDeque<(Vec<u8>, Vec<u8>)>,
    ) -> Result<()> {
        let _stripe = self.stripes.lock_for_hash(idx);
        let primary = self.primary.read();
        self.layout.collect(self.storage(&primary), idx, out)
    }

    /// Lazily walks every record, one primary slot at a time.
    ///
    /// Removing the record just yielded is fine. Other writes racing the
    /// iterator, including resize work they trigger, may cause records to
    /// be skipped or seen twice.
    pub fn iter(&self) -> Iter<'_, L> {
        Iter::new(self)
    }

    /// Calls `f` on every record while holding the stripe lock of its slot,
    /// stopping early when `f` returns `false`. `f` must not call back into
    /// the map.
    pub fn for_each_record<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let mut records = VecDeque::new();
        let mut idx = 0;
        while idx < self.slot_count() {
            let _stripe = self.stripes.lock_for_hash(idx);
            {
                let primary = self.primary.read();
                self.layout.collect(self.storage(&primary), idx, &mut records)?;
            }
            for (key, val) in records.drain(..) {
                if !f(&key, &val) {
                    return Ok(());
                }
            }
            idx += 1;
        }
        Ok(())
    }

    /// Total key and value bytes stored.
    pub fn stored_bytes(&self) -> Result<u64> {
        let mut total = 0;
        self.for_each_record(|key, val| {
            total += (key.len() + val.len()) as u64;
            true
        })?;
        Ok(total)
    }

    /// Mean key plus value length, `0.0` for an empty table.
    pub fn avg_record_size(&self) -> Result<f64> {
        let len = self.len();
        if len == 0 {
            return Ok(0.0);
        }
        Ok(self.stored_bytes()? as f64 / len as f64)
    }

    fn header(&self) -> TableHeader {
        TableHeader {
            size: self.len(),
            bucket_count: self.bucket_count(),
            arena_write_pos: self.arena.cursor(),
            resize_cursor: 0,
        }
        .with_split_count(self.resize.split_count())
    }

    /// Writes the header and flushes both regions to their files.
    pub fn flush(&self) -> Result<()> {
        let _all = self.stripes.lock_all();
        self.header().write_to(&self.arena.region())?;
        self.primary.read().flush()?;
        self.arena.flush()
    }

    /// Writes the header, flushes and unmaps both regions.
    pub fn close(self) -> Result<()> {
        let header = self.header();
        header.write_to(&self.arena.region())?;
        info!(
            dir = ?self.dir,
            size = header.size,
            buckets = header.bucket_count,
            "closing disk map"
        );
        self.primary.into_inner().close()?;
        self.arena.into_region().close()
    }

    /// Unmaps both regions and removes their files, and the directory if
    /// nothing else is left in it.
    pub fn delete(self) -> Result<()> {
        info!(dir = ?self.dir, "deleting disk map");
        self.primary.into_inner().delete_backing_file()?;
        self.arena.into_region().delete_backing_file()?;
        if let Some(dir) = self.dir {
            if fs::read_dir(&dir)?.next().is_none() {
                fs::remove_dir(&dir)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rustc_hash::FxHashMap;
    use tempfile::tempdir;

    fn small() -> DiskMapConfig {
        DiskMapConfig::default()
            .with_stripes(4)
            .with_initial_buckets(4)
            .with_arena_initial_len(4096)
    }

    fn key(i: u64) -> [u8; 8] {
        i.to_le_bytes()
    }

    #[test]
    fn test_chain_round_trip() {
        let map = ChainDiskMap::anonymous(small()).unwrap();
        assert!(map.is_empty());
        assert_eq!(map.put(b"hello", b"world").unwrap(), None);
        assert_eq!(map.get(b"hello").unwrap().as_deref(), Some(&b"world"[..]));
        assert_eq!(map.put(b"hello", b"there").unwrap().as_deref(), Some(&b"world"[..]));
        assert_eq!(map.len(), 1);
        assert_eq!(map.stripe_count(), 4);
        assert!(map.contains_key(b"hello").unwrap());
        assert!(!map.contains_key(b"bye").unwrap());
    }

    #[test]
    fn test_bucket_round_trip() {
        let map = BucketDiskMap::anonymous(small()).unwrap();
        assert_eq!(map.put(b"", b"").unwrap(), None);
        assert_eq!(map.get(b"").unwrap().as_deref(), Some(&b""[..]));
        assert_eq!(map.remove(b"").unwrap().as_deref(), Some(&b""[..]));
        assert!(map.is_empty());
    }

    fn conditional_ops<L: Layout>() {
        let map = DiskMap::<L>::anonymous(small()).unwrap();

        assert_eq!(map.put_if_absent(b"k", b"v1").unwrap(), None);
        assert_eq!(map.put_if_absent(b"k", b"v2").unwrap().as_deref(), Some(&b"v1"[..]));
        assert_eq!(map.get(b"k").unwrap().as_deref(), Some(&b"v1"[..]));

        assert_eq!(map.replace(b"missing", b"x").unwrap(), None);
        assert!(!map.contains_key(b"missing").unwrap());
        assert_eq!(map.replace(b"k", b"v3").unwrap().as_deref(), Some(&b"v1"[..]));

        assert!(!map.replace_if(b"k", b"v1", b"v4").unwrap());
        assert!(map.replace_if(b"k", b"v3", b"v4").unwrap());
        assert_eq!(map.get(b"k").unwrap().as_deref(), Some(&b"v4"[..]));

        assert!(!map.remove_if(b"k", b"v3").unwrap());
        assert_eq!(map.len(), 1);
        assert!(map.remove_if(b"k", b"v4").unwrap());
        assert_eq!(map.len(), 0);
        assert_eq!(map.remove(b"k").unwrap(), None);
    }

    #[test]
    fn test_conditional_ops_chain() {
        conditional_ops::<ChainLayout>();
    }

    #[test]
    fn test_conditional_ops_bucket() {
        conditional_ops::<BucketLayout>();
    }

    #[test]
    fn test_chain_grows_under_load() {
        let map = ChainDiskMap::anonymous(small()).unwrap();
        for i in 0..1_000u64 {
            map.put(&key(i), &key(i + 1)).unwrap();
        }
        assert!(map.bucket_count() >= 1024);
        assert!(map.load() <= 0.75 + 1.0 / map.bucket_count() as f64);
        for i in 0..1_000u64 {
            assert_eq!(map.get(&key(i)).unwrap(), Some(key(i + 1).to_vec()));
        }
    }

    #[test]
    fn test_bucket_load_counts_records_per_bucket() {
        let map = BucketDiskMap::anonymous(small()).unwrap();
        for i in 0..100u64 {
            map.put(&key(i), b"v").unwrap();
        }
        assert_eq!(map.bucket_count(), 4);
        assert!((map.load() - 100.0 / (4.0 * 170.0)).abs() < 1e-9);
    }

    #[test]
    fn test_resize_cursor_tracks_splits() {
        let map = ChainDiskMap::anonymous(small()).unwrap();
        assert_eq!(map.resize_cursor(), -1);
        for i in 0..4u64 {
            map.put(&key(i), b"x").unwrap();
        }
        assert_eq!(map.resize_cursor(), -1);
        // load 4/4 before the fifth put, 4/6 after splitting two buckets
        map.put(&key(4), b"x").unwrap();
        assert_eq!(map.bucket_count(), 4);
        assert_eq!(map.resize_cursor(), 1);
    }

    #[test]
    fn test_clear_resets_everything() {
        let map = BucketDiskMap::anonymous(small()).unwrap();
        for i in 0..2_000u64 {
            map.put(&key(i), &key(i)).unwrap();
        }
        let buckets = map.bucket_count();
        map.clear().unwrap();

        assert_eq!(map.len(), 0);
        assert_eq!(map.resize_cursor(), -1);
        assert_eq!(map.bucket_count(), buckets);
        assert_eq!(map.iter().count(), 0);
        assert_eq!(map.get(&key(5)).unwrap(), None);

        for i in 0..2_000u64 {
            assert_eq!(map.put(&key(i), b"again").unwrap(), None);
        }
        assert_eq!(map.len(), 2_000);
        assert_eq!(map.get(&key(1_999)).unwrap().as_deref(), Some(&b"again"[..]));
    }

    #[test]
    fn test_for_each_record_stops_early() {
        let map = ChainDiskMap::anonymous(small()).unwrap();
        for i in 0..50u64 {
            map.put(&key(i), b"abc").unwrap();
        }
        let mut seen = 0;
        map.for_each_record(|_, _| {
            seen += 1;
            seen < 10
        })
        .unwrap();
        assert_eq!(seen, 10);

        assert_eq!(map.stored_bytes().unwrap(), 50 * 11);
        assert!((map.avg_record_size().unwrap() - 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_reopen_restores_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table");

        let map = ChainDiskMap::open(&path, small()).unwrap();
        for i in 0..500u64 {
            map.put(&key(i), &key(i * 7)).unwrap();
        }
        map.remove(&key(3)).unwrap();
        let buckets = map.bucket_count();
        let cursor = map.resize_cursor();
        map.close().unwrap();

        let map = ChainDiskMap::open(&path, small()).unwrap();
        assert_eq!(map.len(), 499);
        assert_eq!(map.bucket_count(), buckets);
        assert_eq!(map.resize_cursor(), cursor);
        assert_eq!(map.get(&key(3)).unwrap(), None);
        for i in (0..500u64).filter(|&i| i != 3) {
            assert_eq!(map.get(&key(i)).unwrap(), Some(key(i * 7).to_vec()));
        }

        // keeps working after the reopen
        map.put(&key(1_000), b"late").unwrap();
        map.delete().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_rejects_more_stripes_than_stored_buckets() {
        let dir = tempdir().unwrap();
        let map = BucketDiskMap::open(dir.path(), small()).unwrap();
        map.close().unwrap();

        let wide = small().with_stripes(8).with_initial_buckets(8);
        assert!(matches!(
            BucketDiskMap::open(dir.path(), wide),
            Err(LashError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let bad = DiskMapConfig::default().with_stripes(6);
        assert!(matches!(
            ChainDiskMap::anonymous(bad),
            Err(LashError::InvalidConfig(_))
        ));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(u8, u8),
        PutIfAbsent(u8, u8),
        Replace(u8, u8),
        Remove(u8),
        RemoveIf(u8, u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (any::<u8>(), any::<u8>()).prop_map(|(k, v)| Op::Put(k, v)),
            (any::<u8>(), any::<u8>()).prop_map(|(k, v)| Op::PutIfAbsent(k, v)),
            (any::<u8>(), any::<u8>()).prop_map(|(k, v)| Op::Replace(k, v)),
            any::<u8>().prop_map(Op::Remove),
            (any::<u8>(), any::<u8>()).prop_map(|(k, v)| Op::RemoveIf(k, v)),
        ]
    }

    fn check_against_model<L: Layout>(ops: &[Op]) -> std::result::Result<(), TestCaseError> {
        let map = DiskMap::<L>::anonymous(small()).unwrap();
        let mut model: FxHashMap<u8, u8> = FxHashMap::default();

        for op in ops {
            match *op {
                Op::Put(k, v) => {
                    let prev = map.put(&[k], &[v]).unwrap();
                    prop_assert_eq!(prev, model.insert(k, v).map(|p| vec![p]));
                }
                Op::PutIfAbsent(k, v) => {
                    let existing = map.put_if_absent(&[k], &[v]).unwrap();
                    let expected = model.get(&k).map(|p| vec![*p]);
                    if expected.is_none() {
                        model.insert(k, v);
                    }
                    prop_assert_eq!(existing, expected);
                }
                Op::Replace(k, v) => {
                    let prev = map.replace(&[k], &[v]).unwrap();
                    let expected = model.get_mut(&k).map(|slot| vec![std::mem::replace(slot, v)]);
                    prop_assert_eq!(prev, expected);
                }
                Op::Remove(k) => {
                    prop_assert_eq!(map.remove(&[k]).unwrap(), model.remove(&k).map(|p| vec![p]));
                }
                Op::RemoveIf(k, v) => {
                    let expected = model.get(&k) == Some(&v);
                    if expected {
                        model.remove(&k);
                    }
                    prop_assert_eq!(map.remove_if(&[k], &[v]).unwrap(), expected);
                }
            }
            prop_assert_eq!(map.len(), model.len() as u64);
        }

        for (k, v) in &model {
            prop_assert_eq!(map.get(&[*k]).unwrap(), Some(vec![*v]));
        }
        prop_assert_eq!(map.iter().count(), model.len());
        Ok(())
    }

    proptest! {
        #[test]
        fn prop_chain_matches_model(ops in prop::collection::vec(op_strategy(), 1..300)) {
            check_against_model::<ChainLayout>(&ops)?;
        }

        #[test]
        fn prop_bucket_matches_model(ops in prop::collection::vec(op_strategy(), 1..300)) {
            check_against_model::<BucketLayout>(&ops)?;
        }

        #[test]
        fn prop_put_then_get(
            entries in prop::collection::vec(
                (prop::collection::vec(any::<u8>(), 0..32), prop::collection::vec(any::<u8>(), 0..64)),
                1..100
            )
        ) {
            let map = ChainDiskMap::anonymous(small()).unwrap();
            let mut model = FxHashMap::default();
            for (k, v) in &entries {
                map.put(k, v).unwrap();
                model.insert(k.clone(), v.clone());
            }
            for (k, v) in &model {
                let got = map.get(k).unwrap();
                prop_assert_eq!(got.as_ref(), Some(v));
            }
        }
    }
}
