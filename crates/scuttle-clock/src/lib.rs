//! # scuttle-clock
//!
//! Merkle-Clock causal DAG for Scuttle.
//!
//! This crate provides:
//! - Content-addressed [`EventBlock`]s with multi-parent links
//! - [`advance`]: head maintenance that converges to the same minimal
//!   frontier for any delivery order
//! - [`contains`]: the causal ancestry test behind `advance`
//! - Replay ordering ([`find_common_ancestor`], [`find_sorted_events`]) so
//!   every replica applies the same events in the same order
//!
//! The clock tracks *which* events are known, not what they changed; a
//! higher layer pairs it with the sharded map to order put/del operations.
//!
//! ## Example
//!
//! ```rust
//! use scuttle_block::MemoryBlockstore;
//! use scuttle_clock::{advance, Event, EventBlock};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = MemoryBlockstore::new();
//!
//! let origin = EventBlock::encode(Event::new("origin".to_string(), vec![]));
//! store.put_block(&origin.as_block());
//! let head = advance(&store, &[], origin.link).await.unwrap();
//!
//! let next = EventBlock::encode(Event::new("next".to_string(), head.clone()));
//! store.put_block(&next.as_block());
//! let head = advance(&store, &head, next.link).await.unwrap();
//!
//! assert_eq!(head, vec![next.link]);
//! # });
//! ```

mod advance;
mod event;
mod ordering;

pub use advance::{advance, contains};
pub use event::{ClockError, Event, EventBlock, EventFetcher, Payload};
pub use ordering::{find_common_ancestor, find_sorted_events};
