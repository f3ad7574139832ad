//! # scuttle-map
//!
//! The immutable sharded map at the heart of Scuttle.
//!
//! This crate provides:
//! - A deterministic shard codec: sorted entry lists whose value half is a
//!   three-shape union (value / child / child + value)
//! - Copy-on-write [`put`] / [`del`] with automatic splitting by key length
//!   and encoded size, reporting the exact block delta
//! - [`difference`]: structural diff between any two roots, bounded by the
//!   shape of the change
//! - [`merge`]: reconciliation of N divergent roots by diff and replay
//!
//! The map is a persistent DAG over an external async block store. Nothing
//! here persists blocks; write operations return `{root, additions,
//! removals}` and the caller decides what to store and what to collect.
//!
//! ## Example
//!
//! ```rust
//! use scuttle_block::{Link, MemoryBlockstore};
//! use scuttle_map::{get, put, ShardBlock, ShardConfig};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = MemoryBlockstore::new();
//! let root = ShardBlock::empty_root();
//! store.put_block(&root.as_block());
//!
//! let value = Link::of(b"some data");
//! let result = put(&store, &root.link, "greeting", value, &ShardConfig::default())
//!     .await
//!     .unwrap();
//! for block in &result.additions {
//!     store.put_block(&block.as_block());
//! }
//!
//! let found = get(&store, &result.root, "greeting").await.unwrap();
//! assert_eq!(found, Some(value));
//! # });
//! ```

mod diff;
mod map;
mod merge;
mod shard;

pub use diff::{difference, Difference, KeyChange, ShardDelta};
pub use map::{del, entries, get, put, WriteResult};
pub use merge::merge;
pub use shard::{
    find_common_prefix, put_entry, MapError, Shard, ShardBlock, ShardConfig, ShardEntry,
    ShardFetcher, ShardValue,
};
