use bytemuck::{Pod, Zeroable};

use crate::error::{LashError, Result};
use crate::region::MmapRegion;

/// Bytes reserved at the start of the secondary region.
pub const HEADER_LEN: u64 = std::mem::size_of::<TableHeader>() as u64;

/// Table metadata persisted at offset 0 of the secondary region.
///
/// `resize_cursor` stores the highest contiguously split bucket index as a
/// two's complement `i64`, so `u64::MAX` means "nothing split yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct TableHeader {
    pub size: u64,
    pub bucket_count: u64,
    pub arena_write_pos: u64,
    pub resize_cursor: u64,
}

impl TableHeader {
    pub fn read_from(region: &MmapRegion) -> Result<Self> {
        region.read_pod(0)
    }

    pub fn write_to(&self, region: &MmapRegion) -> Result<()> {
        region.write_pod(0, self)
    }

    /// An all-zero header is what a freshly created file holds.
    pub fn is_fresh(&self) -> bool {
        self.bucket_count == 0
    }

    /// Number of buckets already split in the current resize window.
    pub fn split_count(&self) -> u64 {
        (self.resize_cursor as i64 + 1) as u64
    }

    pub fn with_split_count(mut self, split: u64) -> Self {
        self.resize_cursor = (split as i64 - 1) as u64;
        self
    }

    /// Checks that a header loaded from disk can describe a table whose
    /// secondary region is `region_len` bytes long.
    pub fn validate(&self, region_len: u64) -> Result<()> {
        if !self.bucket_count.is_power_of_two() {
            return Err(LashError::Corrupt(format!(
                "bucket count {} is not a power of two",
                self.bucket_count
            )));
        }
        let cursor = self.resize_cursor as i64;
        if cursor < -1 || cursor >= self.bucket_count as i64 {
            return Err(LashError::Corrupt(format!(
                "resize cursor {cursor} outside bucket count {}",
                self.bucket_count
            )));
        }
        if self.arena_write_pos < HEADER_LEN || self.arena_write_pos > region_len {
            return Err(LashError::Corrupt(format!(
                "arena write position {} outside region of {region_len} bytes",
                self.arena_write_pos
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_32_bytes() {
        assert_eq!(HEADER_LEN, 32);
    }

    #[test]
    fn test_header_field_offsets() {
        let region = MmapRegion::anonymous(4096).unwrap();
        let header = TableHeader {
            size: 11,
            bucket_count: 512,
            arena_write_pos: 4000,
            resize_cursor: 7,
        };
        header.write_to(&region).unwrap();

        assert_eq!(region.get_u64(0).unwrap(), 11);
        assert_eq!(region.get_u64(8).unwrap(), 512);
        assert_eq!(region.get_u64(16).unwrap(), 4000);
        assert_eq!(region.get_u64(24).unwrap(), 7);
        assert_eq!(TableHeader::read_from(&region).unwrap(), header);
    }

    #[test]
    fn test_zeroed_region_is_fresh() {
        let region = MmapRegion::anonymous(4096).unwrap();
        assert!(TableHeader::read_from(&region).unwrap().is_fresh());
    }

    #[test]
    fn test_split_count_encoding() {
        let header = TableHeader::zeroed().with_split_count(0);
        assert_eq!(header.resize_cursor, u64::MAX);
        assert_eq!(header.split_count(), 0);
        assert_eq!(header.with_split_count(5).resize_cursor, 4);
        assert_eq!(header.with_split_count(5).split_count(), 5);
    }

    #[test]
    fn test_validate_rejects_bad_headers() {
        let good = TableHeader {
            size: 0,
            bucket_count: 256,
            arena_write_pos: HEADER_LEN,
            resize_cursor: u64::MAX,
        };
        assert!(good.validate(4096).is_ok());

        let odd = TableHeader { bucket_count: 300, ..good };
        assert!(matches!(odd.validate(4096), Err(LashError::Corrupt(_))));

        let past = good.with_split_count(257);
        assert!(past.validate(4096).is_err());

        let beyond = TableHeader { arena_write_pos: 5000, ..good };
        assert!(beyond.validate(4096).is_err());
    }
}
