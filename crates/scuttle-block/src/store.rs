//! Block store plumbing.
//!
//! The core never persists anything itself: it reads blocks through the
//! async [`BlockFetcher`] seam and returns freshly encoded blocks to the
//! caller. [`MemoryBlockstore`] backs tests and scratch work during merge;
//! [`MultiFetcher`] layers a scratch store over a backing store so replayed
//! operations can read the blocks they just produced.

use crate::cbor::{self, Value};
use crate::link::Link;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// An encoded block together with its content-derived link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub link: Link,
    pub bytes: Vec<u8>,
}

impl Block {
    /// Encode a value and address it by the hash of its bytes.
    pub fn encode(value: &Value) -> Self {
        let bytes = cbor::encode(value);
        Block {
            link: Link::of(&bytes),
            bytes,
        }
    }
}

/// Async content-addressed block lookup.
///
/// `get` returns `None` for blocks the store does not have; the layers above
/// decide whether absence is an error.
#[async_trait]
pub trait BlockFetcher: Send + Sync {
    async fn get(&self, link: &Link) -> Option<Block>;
}

/// In-memory block store.
#[derive(Debug, Default)]
pub struct MemoryBlockstore {
    blocks: RwLock<HashMap<Link, Vec<u8>>>,
}

impl MemoryBlockstore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store encoded bytes under a link.
    pub fn put(&self, link: Link, bytes: Vec<u8>) {
        self.blocks.write().insert(link, bytes);
    }

    /// Store an already-encoded block.
    pub fn put_block(&self, block: &Block) {
        self.put(block.link, block.bytes.clone());
    }

    pub fn contains(&self, link: &Link) -> bool {
        self.blocks.read().contains_key(link)
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}

#[async_trait]
impl BlockFetcher for MemoryBlockstore {
    async fn get(&self, link: &Link) -> Option<Block> {
        self.blocks.read().get(link).map(|bytes| Block {
            link: *link,
            bytes: bytes.clone(),
        })
    }
}

/// Layered fetcher: earlier layers shadow later ones, first hit wins.
pub struct MultiFetcher<'a> {
    layers: Vec<&'a dyn BlockFetcher>,
}

impl<'a> MultiFetcher<'a> {
    pub fn new(layers: Vec<&'a dyn BlockFetcher>) -> Self {
        MultiFetcher { layers }
    }
}

#[async_trait]
impl BlockFetcher for MultiFetcher<'_> {
    async fn get(&self, link: &Link) -> Option<Block> {
        for layer in &self.layers {
            if let Some(block) = layer.get(link).await {
                return Some(block);
            }
        }
        None
    }
}
