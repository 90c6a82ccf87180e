//! Typed keys and values on top of [`lashmap::DiskMap`].
//!
//! Keys and values pass through a codec ([`Native`], [`PodSlice`], [`Str`],
//! [`Bytes`] or any [`BytesEncode`]/[`BytesDecode`] pair) on their way in and
//! out of the byte store. Equality of keys is equality of their encoded bytes.

mod error;
pub mod types;

use std::marker::PhantomData;
use std::path::Path;

use lashmap::{BucketLayout, DiskMap, DiskMapConfig, Layout};

pub use error::{Result, TypedMapError};
pub use types::{Bytes, BytesDecode, BytesEncode, CowBytes, Native, PodSlice, Str};

pub struct TypedDiskMap<K, V, L: Layout = BucketLayout> {
    inner: DiskMap<L>,
    _marker: PhantomData<fn() -> (K, V)>,
}

pub type U64StringMap<L = BucketLayout> = TypedDiskMap<Native<u64>, Str, L>;
pub type StringU64Map<L = BucketLayout> = TypedDiskMap<Str, Native<u64>, L>;
pub type StringStringMap<L = BucketLayout> = TypedDiskMap<Str, Str, L>;
pub type U64LongArrayMap<L = BucketLayout> = TypedDiskMap<Native<u64>, PodSlice<i64>, L>;

fn encode<'a, C: BytesEncode<'a>>(item: &'a C::EItem) -> Result<CowBytes<'a>> {
    C::bytes_encode(item).map_err(|e| TypedMapError::Encoding(e.to_string()))
}

fn decode<C: BytesDecode>(bytes: &[u8]) -> Result<C::DItem> {
    C::bytes_decode(bytes).map_err(|e| TypedMapError::Decoding(e.to_string()))
}

impl<K, V, L: Layout> TypedDiskMap<K, V, L> {
    /// Opens or creates a typed map whose files live in `dir`.
    pub fn open(dir: impl AsRef<Path>, config: DiskMapConfig) -> Result<Self> {
        Ok(Self::from_raw(DiskMap::open(dir, config)?))
    }

    /// Creates a typed map backed by anonymous memory.
    pub fn anonymous(config: DiskMapConfig) -> Result<Self> {
        Ok(Self::from_raw(DiskMap::anonymous(config)?))
    }

    pub fn from_raw(inner: DiskMap<L>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// The byte map underneath.
    pub fn raw(&self) -> &DiskMap<L> {
        &self.inner
    }

    pub fn into_raw(self) -> DiskMap<L> {
        self.inner
    }

    pub fn len(&self) -> u64 {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&self) -> Result<()> {
        Ok(self.inner.clear()?)
    }

    pub fn flush(&self) -> Result<()> {
        Ok(self.inner.flush()?)
    }

    pub fn close(self) -> Result<()> {
        Ok(self.inner.close()?)
    }

    pub fn delete(self) -> Result<()> {
        Ok(self.inner.delete()?)
    }
}

impl<K, V, L> TypedDiskMap<K, V, L>
where
    K: for<'a> BytesEncode<'a> + BytesDecode,
    V: for<'a> BytesEncode<'a> + BytesDecode,
    L: Layout,
{
    pub fn get<'a>(&self, key: &'a <K as BytesEncode<'a>>::EItem) -> Result<Option<V::DItem>> {
        let key = encode::<K>(key)?;
        self.inner
            .get(&key)?
            .map(|val| decode::<V>(&val))
            .transpose()
    }

    pub fn contains_key<'a>(&self, key: &'a <K as BytesEncode<'a>>::EItem) -> Result<bool> {
        let key = encode::<K>(key)?;
        Ok(self.inner.contains_key(&key)?)
    }

    /// Scans every record for one holding `value`.
    pub fn contains_value<'a>(&self, value: &'a <V as BytesEncode<'a>>::EItem) -> Result<bool> {
        let value = encode::<V>(value)?;
        let mut found = false;
        self.inner.for_each_record(|_, val| {
            found = val == &*value;
            !found
        })?;
        Ok(found)
    }

    /// Inserts or overwrites, returning the previous value.
    pub fn insert<'a, 'b>(
        &self,
        key: &'a <K as BytesEncode<'a>>::EItem,
        value: &'b <V as BytesEncode<'b>>::EItem,
    ) -> Result<Option<V::DItem>> {
        let key = encode::<K>(key)?;
        let value = encode::<V>(value)?;
        self.decode_previous(self.inner.put(&key, &value)?)
    }

    /// Inserts only when `key` is absent, returning the value already there.
    pub fn insert_if_absent<'a, 'b>(
        &self,
        key: &'a <K as BytesEncode<'a>>::EItem,
        value: &'b <V as BytesEncode<'b>>::EItem,
    ) -> Result<Option<V::DItem>> {
        let key = encode::<K>(key)?;
        let value = encode::<V>(value)?;
        self.decode_previous(self.inner.put_if_absent(&key, &value)?)
    }

    /// Overwrites only when `key` is present, returning the replaced value.
    pub fn replace<'a, 'b>(
        &self,
        key: &'a <K as BytesEncode<'a>>::EItem,
        value: &'b <V as BytesEncode<'b>>::EItem,
    ) -> Result<Option<V::DItem>> {
        let key = encode::<K>(key)?;
        let value = encode::<V>(value)?;
        self.decode_previous(self.inner.replace(&key, &value)?)
    }

    pub fn replace_if<'a, 'b, 'c>(
        &self,
        key: &'a <K as BytesEncode<'a>>::EItem,
        old: &'b <V as BytesEncode<'b>>::EItem,
        new: &'c <V as BytesEncode<'c>>::EItem,
    ) -> Result<bool> {
        let key = encode::<K>(key)?;
        let old = encode::<V>(old)?;
        let new = encode::<V>(new)?;
        Ok(self.inner.replace_if(&key, &old, &new)?)
    }

    pub fn remove<'a>(&self, key: &'a <K as BytesEncode<'a>>::EItem) -> Result<Option<V::DItem>> {
        let key = encode::<K>(key)?;
        self.decode_previous(self.inner.remove(&key)?)
    }

    pub fn remove_if<'a, 'b>(
        &self,
        key: &'a <K as BytesEncode<'a>>::EItem,
        value: &'b <V as BytesEncode<'b>>::EItem,
    ) -> Result<bool> {
        let key = encode::<K>(key)?;
        let value = encode::<V>(value)?;
        Ok(self.inner.remove_if(&key, &value)?)
    }

    /// Lazily decodes every record. Same consistency rules as
    /// [`DiskMap::iter`].
    pub fn iter(&self) -> impl Iterator<Item = Result<(K::DItem, V::DItem)>> {
        self.inner.iter().map(|record| {
            let (key, val) = record?;
            Ok((decode::<K>(&key)?, decode::<V>(&val)?))
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = Result<K::DItem>> {
        self.inner
            .iter()
            .map(|record| decode::<K>(&record?.0))
    }

    pub fn values(&self) -> impl Iterator<Item = Result<V::DItem>> {
        self.inner
            .iter()
            .map(|record| decode::<V>(&record?.1))
    }

    /// Inserts every pair, stopping at the first error.
    pub fn extend<'a, 'b, I>(&self, pairs: I) -> Result<()>
    where
        I: IntoIterator<
            Item = (
                &'a <K as BytesEncode<'a>>::EItem,
                &'b <V as BytesEncode<'b>>::EItem,
            ),
        >,
    {
        for (key, value) in pairs {
            self.insert(key, value)?;
        }
        Ok(())
    }

    fn decode_previous(&self, previous: Option<Vec<u8>>) -> Result<Option<V::DItem>> {
        previous.map(|val| decode::<V>(&val)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lashmap::ChainLayout;
    use proptest::prelude::*;
    use rustc_hash::FxHashMap;
    use tempfile::TempDir;

    fn small() -> DiskMapConfig {
        DiskMapConfig::default()
            .with_stripes(4)
            .with_initial_buckets(4)
    }

    #[test]
    fn test_u64_string_map() {
        let map = U64StringMap::<ChainLayout>::anonymous(small()).unwrap();
        assert_eq!(map.insert(&1, "one").unwrap(), None);
        assert_eq!(map.insert(&2, "two").unwrap(), None);
        assert_eq!(map.insert(&1, "uno").unwrap().as_deref(), Some("one"));

        assert_eq!(map.get(&1).unwrap().as_deref(), Some("uno"));
        assert_eq!(map.get(&3).unwrap(), None);
        assert!(map.contains_key(&2).unwrap());
        assert!(map.contains_value("two").unwrap());
        assert!(!map.contains_value("one").unwrap());
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_conditional_ops() {
        let map = StringU64Map::<BucketLayout>::anonymous(small()).unwrap();
        assert_eq!(map.replace("a", &1).unwrap(), None);
        assert_eq!(map.get("a").unwrap(), None);

        assert_eq!(map.insert_if_absent("a", &1).unwrap(), None);
        assert_eq!(map.insert_if_absent("a", &2).unwrap(), Some(1));
        assert_eq!(map.replace("a", &3).unwrap(), Some(1));

        assert!(!map.replace_if("a", &1, &4).unwrap());
        assert!(map.replace_if("a", &3, &4).unwrap());
        assert_eq!(map.get("a").unwrap(), Some(4));

        assert!(!map.remove_if("a", &3).unwrap());
        assert!(map.remove_if("a", &4).unwrap());
        assert!(map.is_empty());
        assert_eq!(map.remove("a").unwrap(), None);
    }

    #[test]
    fn test_decoding_error_surfaces() {
        let map = StringStringMap::<ChainLayout>::anonymous(small()).unwrap();
        map.raw().put(b"bad", &[0xff, 0xfe]).unwrap();
        assert!(matches!(
            map.get("bad"),
            Err(TypedMapError::Decoding(_))
        ));
        assert!(map.values().any(|v| v.is_err()));
    }

    #[test]
    fn test_long_array_values() {
        let map = U64LongArrayMap::<BucketLayout>::anonymous(small()).unwrap();
        let longs = [3i64, -1, i64::MIN];
        assert_eq!(map.insert(&1, &longs[..]).unwrap(), None);
        assert_eq!(map.insert(&2, &[0i64; 0][..]).unwrap(), None);

        assert_eq!(map.get(&1).unwrap(), Some(longs.to_vec()));
        assert_eq!(map.get(&2).unwrap(), Some(Vec::new()));
        assert!(map.contains_value(&longs[..]).unwrap());

        map.raw().put(&3u64.to_ne_bytes(), &[0; 5]).unwrap();
        assert!(matches!(map.get(&3), Err(TypedMapError::Decoding(_))));
    }

    #[test]
    fn test_iter_keys_values() {
        let map = TypedDiskMap::<Native<u32>, Bytes, BucketLayout>::anonymous(small()).unwrap();
        let pairs: Vec<(u32, Vec<u8>)> = (0..500u32).map(|i| (i, vec![i as u8; 3])).collect();
        map.extend(pairs.iter().map(|(k, v)| (k, v.as_slice())))
            .unwrap();

        let mut seen: Vec<(u32, Vec<u8>)> = map.iter().collect::<Result<_>>().unwrap();
        seen.sort();
        assert_eq!(seen, pairs);

        let mut keys: Vec<u32> = map.keys().collect::<Result<_>>().unwrap();
        keys.sort_unstable();
        assert_eq!(keys, (0..500).collect::<Vec<_>>());
        assert_eq!(map.values().count(), 500);

        map.clear().unwrap();
        assert_eq!(map.iter().count(), 0);
    }

    #[test]
    fn test_reopen_typed() {
        let temp_dir = TempDir::new().unwrap();
        let map = StringStringMap::<BucketLayout>::open(temp_dir.path(), small()).unwrap();
        for i in 0..1_000 {
            map.insert(format!("key-{i}").as_str(), format!("value-{i}").as_str())
                .unwrap();
        }
        map.close().unwrap();

        let map = StringStringMap::<BucketLayout>::open(temp_dir.path(), small()).unwrap();
        assert_eq!(map.len(), 1_000);
        assert_eq!(
            map.get("key-999").unwrap().as_deref(),
            Some("value-999")
        );
        map.delete().unwrap();
    }

    proptest! {
        #[test]
        fn prop_matches_hashmap(pairs in prop::collection::vec((any::<u64>(), ".{0,20}"), 0..300)) {
            let map = U64StringMap::<ChainLayout>::anonymous(small()).unwrap();
            let mut expected: FxHashMap<u64, String> = FxHashMap::default();
            for (k, v) in &pairs {
                let previous = map.insert(k, v.as_str()).unwrap();
                prop_assert_eq!(previous, expected.insert(*k, v.clone()));
            }
            prop_assert_eq!(map.len(), expected.len() as u64);
            for (k, v) in &expected {
                let got = map.get(k).unwrap();
                prop_assert_eq!(got.as_ref(), Some(v));
            }
        }
    }
}
