//! # scuttle-block
//!
//! Content addressing and block plumbing for Scuttle.
//!
//! This crate provides:
//! - [`Link`]: SHA-256 content identifiers for immutable blocks
//! - A deterministic DAG-oriented CBOR subset codec ([`cbor`])
//! - The async [`BlockFetcher`] seam the algorithm crates read through
//! - [`MemoryBlockstore`] and [`MultiFetcher`] plumbing for tests and merge
//!
//! Everything above this crate is a pure transformation over these pieces:
//! blocks are encoded once, addressed by the hash of their bytes, and never
//! mutated.

pub mod cbor;
mod link;
mod store;

pub use cbor::{CodecError, Value};
pub use link::Link;
pub use store::{Block, BlockFetcher, MemoryBlockstore, MultiFetcher};
