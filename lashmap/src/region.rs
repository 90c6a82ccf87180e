use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::ptr;

use bytemuck::Pod;
use memmap2::MmapMut;
use tracing::debug;

use crate::error::{LashError, Result};

/// Granularity every region length is rounded up to.
pub const PAGE_SIZE: u64 = 4096;

/// Rounds `len` up to the next multiple of [`PAGE_SIZE`], never below one page.
pub fn round_to_page(len: u64) -> u64 {
    ((len + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)).max(PAGE_SIZE)
}

struct Backing {
    file: File,
    path: PathBuf,
}

/// A resizable, byte-addressable memory-mapped region.
///
/// Backed either by a file (persistent) or by an anonymous mapping. Integers
/// are read and written in native byte order. Every access is bounds checked
/// against the current length and reports [`LashError::OutOfBounds`].
///
/// Reads and writes take `&self` so that many threads can touch disjoint
/// parts of the region at once; the owner is responsible for making sure two
/// threads never touch the same bytes concurrently, and that [`grow`] and
/// [`zero_fill`] (which take `&mut self`) are only reached through an
/// exclusive guard.
///
/// [`grow`]: MmapRegion::grow
/// [`zero_fill`]: MmapRegion::zero_fill
pub struct MmapRegion {
    mmap: MmapMut,
    ptr: *mut u8,
    len: u64,
    backing: Option<Backing>,
}

// SAFETY: the raw pointer is derived from the owned mapping and only
// dereferenced inside bounds-checked accessors; remapping requires `&mut self`.
unsafe impl Send for MmapRegion {}
// SAFETY: see above. Concurrent accessors operate on disjoint byte ranges as
// arranged by the stripe locks and the arena allocator.
unsafe impl Sync for MmapRegion {}

impl MmapRegion {
    /// Opens (creating if needed) a file-backed region of at least
    /// `initial_len` bytes. An existing file longer than that keeps its length.
    pub fn open(path: impl AsRef<Path>, initial_len: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let current = file.metadata()?.len();
        let len = round_to_page(initial_len.max(current));
        if current != len {
            file.set_len(len).map_err(|source| LashError::Allocation {
                requested: len,
                source,
            })?;
        }

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let ptr = mmap.as_mut_ptr();
        Ok(Self {
            mmap,
            ptr,
            len,
            backing: Some(Backing { file, path }),
        })
    }

    /// Creates a zeroed, memory-only region of at least `initial_len` bytes.
    pub fn anonymous(initial_len: u64) -> Result<Self> {
        let len = round_to_page(initial_len);
        let mut mmap = MmapMut::map_anon(len as usize).map_err(|source| {
            LashError::Allocation {
                requested: len,
                source,
            }
        })?;
        let ptr = mmap.as_mut_ptr();
        Ok(Self {
            mmap,
            ptr,
            len,
            backing: None,
        })
    }

    /// Current length in bytes.
    pub fn size(&self) -> u64 {
        self.len
    }

    /// Path of the backing file, `None` for anonymous regions.
    pub fn path(&self) -> Option<&Path> {
        self.backing.as_ref().map(|b| b.path.as_path())
    }

    fn check(&self, pos: u64, len: u64) -> Result<usize> {
        match pos.checked_add(len) {
            Some(end) if end <= self.len => Ok(pos as usize),
            _ => Err(LashError::OutOfBounds {
                pos,
                len,
                size: self.len,
            }),
        }
    }

    /// Copies `dst.len()` bytes starting at `pos` into `dst`.
    pub fn read_into(&self, pos: u64, dst: &mut [u8]) -> Result<()> {
        let at = self.check(pos, dst.len() as u64)?;
        // SAFETY: bounds checked above; `dst` cannot alias the mapping.
        unsafe { ptr::copy_nonoverlapping(self.ptr.add(at), dst.as_mut_ptr(), dst.len()) };
        Ok(())
    }

    /// Returns a copy of `len` bytes starting at `pos`.
    pub fn get_bytes(&self, pos: u64, len: u64) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len as usize];
        self.read_into(pos, &mut out)?;
        Ok(out)
    }

    /// Writes `bytes` starting at `pos`.
    pub fn put_bytes(&self, pos: u64, bytes: &[u8]) -> Result<()> {
        let at = self.check(pos, bytes.len() as u64)?;
        // SAFETY: bounds checked above; `bytes` cannot alias the mapping.
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.add(at), bytes.len()) };
        Ok(())
    }

    /// Zeroes `len` bytes starting at `pos`.
    pub fn zero_range(&self, pos: u64, len: u64) -> Result<()> {
        let at = self.check(pos, len)?;
        // SAFETY: bounds checked above.
        unsafe { ptr::write_bytes(self.ptr.add(at), 0, len as usize) };
        Ok(())
    }

    /// Reads a plain-old-data value stored at `pos`, which need not be aligned.
    pub fn read_pod<T: Pod>(&self, pos: u64) -> Result<T> {
        let at = self.check(pos, std::mem::size_of::<T>() as u64)?;
        // SAFETY: bounds checked above and every bit pattern is a valid `T`.
        Ok(unsafe { ptr::read_unaligned(self.ptr.add(at) as *const T) })
    }

    /// Writes a plain-old-data value at `pos`, which need not be aligned.
    pub fn write_pod<T: Pod>(&self, pos: u64, value: &T) -> Result<()> {
        self.put_bytes(pos, bytemuck::bytes_of(value))
    }

    pub fn get_u8(&self, pos: u64) -> Result<u8> {
        self.read_pod(pos)
    }

    pub fn get_u32(&self, pos: u64) -> Result<u32> {
        self.read_pod(pos)
    }

    pub fn get_u64(&self, pos: u64) -> Result<u64> {
        self.read_pod(pos)
    }

    pub fn put_u8(&self, pos: u64, value: u8) -> Result<()> {
        self.write_pod(pos, &value)
    }

    pub fn put_u32(&self, pos: u64, value: u32) -> Result<()> {
        self.write_pod(pos, &value)
    }

    pub fn put_u64(&self, pos: u64, value: u64) -> Result<()> {
        self.write_pod(pos, &value)
    }

    /// Grows the region to at least `new_len` bytes (rounded up to a page),
    /// preserving its contents. The new tail reads as zero.
    pub fn grow(&mut self, new_len: u64) -> Result<()> {
        let new_len = round_to_page(new_len);
        if new_len <= self.len {
            return Ok(());
        }
        debug!(old_len = self.len, new_len, path = ?self.path(), "growing region");

        let mut mmap = match &self.backing {
            Some(backing) => {
                self.mmap.flush()?;
                backing
                    .file
                    .set_len(new_len)
                    .map_err(|source| LashError::Allocation {
                        requested: new_len,
                        source,
                    })?;
                unsafe { MmapMut::map_mut(&backing.file) }.map_err(|source| {
                    LashError::Allocation {
                        requested: new_len,
                        source,
                    }
                })?
            }
            None => {
                let mut fresh = MmapMut::map_anon(new_len as usize).map_err(|source| {
                    LashError::Allocation {
                        requested: new_len,
                        source,
                    }
                })?;
                fresh[..self.len as usize].copy_from_slice(&self.mmap[..]);
                fresh
            }
        };

        self.ptr = mmap.as_mut_ptr();
        self.mmap = mmap;
        self.len = new_len;
        Ok(())
    }

    /// Zeroes the whole region.
    pub fn zero_fill(&mut self) {
        self.mmap.fill(0);
    }

    /// Flushes outstanding writes to the backing file, if any.
    pub fn flush(&self) -> Result<()> {
        if self.backing.is_some() {
            self.mmap.flush()?;
        }
        Ok(())
    }

    /// Flushes and unmaps the region.
    pub fn close(self) -> Result<()> {
        self.flush()?;
        if let Some(backing) = &self.backing {
            backing.file.sync_all()?;
        }
        Ok(())
    }

    /// Unmaps the region and removes its backing file.
    pub fn delete_backing_file(self) -> Result<()> {
        let Self { mmap, backing, .. } = self;
        drop(mmap);
        if let Some(backing) = backing {
            drop(backing.file);
            fs::remove_file(&backing.path)?;
        }
        Ok(())
    }
}
