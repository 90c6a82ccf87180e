pub mod arena;
pub mod config;
pub mod error;
pub mod hash;
pub mod header;
mod iter;
pub mod layout;
pub mod map;
pub mod region;
mod rehash;
mod stripes;

pub use config::DiskMapConfig;
pub use error::{LashError, Result};
pub use hash::{find_collision, murmur_hash};
pub use iter::Iter;
pub use layout::{BucketLayout, ChainLayout, Layout};
pub use map::{BucketDiskMap, ChainDiskMap, DiskMap};
pub use region::MmapRegion;
