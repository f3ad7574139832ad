//! Shard model and wire codec.
//!
//! A shard is an immutable block holding a sorted list of
//! `(key suffix, value)` entries. Keys are relative to the prefix
//! accumulated on the path from the root; the prefix is positional context
//! and is not part of the hashed bytes. The value half of an entry is a
//! three-shape union and the wire form is the discriminator:
//!
//! - bare link            -> terminal value
//! - `[child]`            -> link to a child shard
//! - `[child, value]`     -> child shard link plus a value at exactly this key

use scuttle_block::{cbor, Block, BlockFetcher, Link, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the sharded map.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum MapError {
    /// A referenced block is absent from the store. Retry/backoff belongs to
    /// the store's transport, never to this crate.
    #[error("missing block: {0}")]
    MissingBlock(Link),

    /// Block bytes did not decode to a well-formed entry list, or a shard's
    /// structure violated an invariant during traversal.
    #[error("malformed shard: {0}")]
    MalformedShard(Link),

    /// A shard exceeds the size limit and holds no common prefix to split on.
    #[error("shard limit exceeded: no common prefix left to split on")]
    ShardLimitExceeded,
}

/// Limits governing shard layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardConfig {
    /// Longest key suffix a single entry may carry, in characters. Longer
    /// keys become chains of single-entry shards.
    pub max_key_length: usize,
    /// Upper bound on a shard's encoded byte length; exceeding it forces a
    /// split.
    pub max_shard_size: usize,
}

impl Default for ShardConfig {
    fn default() -> Self {
        ShardConfig {
            max_key_length: 64,
            max_shard_size: 512 * 1024,
        }
    }
}

/// The value half of a shard entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShardValue {
    /// Terminal value link.
    Value(Link),
    /// Link to a child shard holding longer keys.
    Child(Link),
    /// Child shard link plus a value at exactly this key.
    ChildValue(Link, Link),
}

impl ShardValue {
    /// The terminal value at this exact key, if any.
    pub fn value(&self) -> Option<Link> {
        match self {
            ShardValue::Value(v) => Some(*v),
            ShardValue::ChildValue(_, v) => Some(*v),
            ShardValue::Child(_) => None,
        }
    }

    /// The child shard link, if any.
    pub fn child(&self) -> Option<Link> {
        match self {
            ShardValue::Child(c) => Some(*c),
            ShardValue::ChildValue(c, _) => Some(*c),
            ShardValue::Value(_) => None,
        }
    }

    fn to_cbor(self) -> Value {
        match self {
            ShardValue::Value(v) => Value::Link(v),
            ShardValue::Child(c) => Value::Array(vec![Value::Link(c)]),
            ShardValue::ChildValue(c, v) => {
                Value::Array(vec![Value::Link(c), Value::Link(v)])
            }
        }
    }

    fn from_cbor(value: &Value) -> Option<Self> {
        if let Some(link) = value.as_link() {
            return Some(ShardValue::Value(link));
        }
        match value.as_array()? {
            [child] => Some(ShardValue::Child(child.as_link()?)),
            [child, val] => Some(ShardValue::ChildValue(child.as_link()?, val.as_link()?)),
            _ => None,
        }
    }
}

/// A single `(key suffix, value)` pair within a shard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardEntry {
    pub key: String,
    pub value: ShardValue,
}

impl ShardEntry {
    pub fn new(key: impl Into<String>, value: ShardValue) -> Self {
        ShardEntry {
            key: key.into(),
            value,
        }
    }
}

/// An ordered, unique-keyed entry list; the node type of the map DAG.
pub type Shard = Vec<ShardEntry>;

/// A decoded shard together with its link, encoded bytes, and the key
/// prefix accumulated on the path from the root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardBlock {
    pub link: Link,
    pub bytes: Vec<u8>,
    pub entries: Shard,
    pub prefix: String,
}

impl ShardBlock {
    /// Encode an entry list, addressing the block by its bytes.
    pub fn encode(entries: Shard, prefix: impl Into<String>) -> Self {
        let value = Value::Array(
            entries
                .iter()
                .map(|e| Value::Array(vec![Value::Text(e.key.clone()), e.value.to_cbor()]))
                .collect(),
        );
        let Block { link, bytes } = Block::encode(&value);
        ShardBlock {
            link,
            bytes,
            entries,
            prefix: prefix.into(),
        }
    }

    /// The root shard of an empty map.
    pub fn empty_root() -> Self {
        Self::encode(Vec::new(), "")
    }

    /// Decode shard bytes fetched from a store.
    pub fn decode(link: Link, bytes: Vec<u8>, prefix: impl Into<String>) -> Result<Self, MapError> {
        let value = cbor::decode(&bytes).map_err(|_| MapError::MalformedShard(link))?;
        let items = value.as_array().ok_or(MapError::MalformedShard(link))?;
        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            let entry = (|| {
                let pair = item.as_array()?;
                match pair {
                    [key, value] => Some(ShardEntry::new(
                        key.as_text()?,
                        ShardValue::from_cbor(value)?,
                    )),
                    _ => None,
                }
            })()
            .ok_or(MapError::MalformedShard(link))?;
            entries.push(entry);
        }
        Ok(ShardBlock {
            link,
            bytes,
            entries,
            prefix: prefix.into(),
        })
    }

    /// Convert to a plain block for persistence by the caller.
    pub fn as_block(&self) -> Block {
        Block {
            link: self.link,
            bytes: self.bytes.clone(),
        }
    }
}

/// Fetches and decodes shards through a [`BlockFetcher`].
pub struct ShardFetcher<'a, S: ?Sized> {
    blocks: &'a S,
}

impl<'a, S: BlockFetcher + ?Sized> ShardFetcher<'a, S> {
    pub fn new(blocks: &'a S) -> Self {
        ShardFetcher { blocks }
    }

    pub async fn get(&self, link: &Link, prefix: &str) -> Result<ShardBlock, MapError> {
        let block = self
            .blocks
            .get(link)
            .await
            .ok_or(MapError::MissingBlock(*link))?;
        ShardBlock::decode(block.link, block.bytes, prefix)
    }
}

/// Insert an entry into a sorted entry list, returning the new list.
///
/// When the key already exists the halves reconcile instead of clobbering:
/// a child-only write onto an entry that also carries a value keeps the
/// value, and a value write onto an entry that carries a child keeps the
/// child.
pub fn put_entry(target: &Shard, entry: ShardEntry) -> Shard {
    let mut shard = Vec::with_capacity(target.len() + 1);
    for (i, existing) in target.iter().enumerate() {
        if entry.key == existing.key {
            let value = reconcile(existing.value, entry.value);
            shard.push(ShardEntry::new(entry.key, value));
            shard.extend_from_slice(&target[i + 1..]);
            return shard;
        }
        if entry.key < existing.key {
            shard.push(entry);
            shard.extend_from_slice(&target[i..]);
            return shard;
        }
        shard.push(existing.clone());
    }
    shard.push(entry);
    shard
}

fn reconcile(old: ShardValue, new: ShardValue) -> ShardValue {
    match (old, new) {
        // Child-only write must not delete an existing terminal value.
        (ShardValue::ChildValue(_, v), ShardValue::Child(c)) => ShardValue::ChildValue(c, v),
        // Value write onto a key that is also a prefix keeps the subtree.
        (ShardValue::Child(c), ShardValue::Value(v))
        | (ShardValue::ChildValue(c, _), ShardValue::Value(v)) => ShardValue::ChildValue(c, v),
        (_, new) => new,
    }
}

/// Find the longest prefix of `skey` (or, failing that, of subsequent keys,
/// wrapping around the shard) shared by at least two entries. Returns the
/// prefix and the matching entries, or `None` when the shard has no
/// decomposable structure left.
pub fn find_common_prefix<'s>(
    shard: &'s Shard,
    skey: &str,
) -> Option<(String, Vec<&'s ShardEntry>)> {
    let start = shard.iter().position(|e| e.key == skey)?;
    let mut i = start;
    loop {
        let mut pfx = drop_last_char(&shard[i].key);
        while !pfx.is_empty() {
            let matches: Vec<&ShardEntry> =
                shard.iter().filter(|e| e.key.starts_with(pfx)).collect();
            if matches.len() > 1 {
                return Some((pfx.to_string(), matches));
            }
            pfx = drop_last_char(pfx);
        }
        i = (i + 1) % shard.len();
        if i == start {
            return None;
        }
    }
}

fn drop_last_char(s: &str) -> &str {
    match s.char_indices().last() {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(seed: &[u8]) -> Link {
        Link::of(seed)
    }

    fn value_entry(key: &str, seed: &[u8]) -> ShardEntry {
        ShardEntry::new(key, ShardValue::Value(link(seed)))
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let entries = vec![
            value_entry("apple", b"1"),
            ShardEntry::new("b", ShardValue::Child(link(b"2"))),
            ShardEntry::new("cherry", ShardValue::ChildValue(link(b"3"), link(b"4"))),
        ];
        let block = ShardBlock::encode(entries.clone(), "pfx/");
        let decoded = ShardBlock::decode(block.link, block.bytes.clone(), "pfx/").unwrap();
        assert_eq!(decoded.entries, entries);
        assert_eq!(decoded.link, block.link);
        assert_eq!(decoded.prefix, "pfx/");
    }

    #[test]
    fn test_encode_is_stable() {
        let entries = vec![value_entry("k", b"v")];
        let a = ShardBlock::encode(entries.clone(), "");
        let b = ShardBlock::encode(entries, "");
        assert_eq!(a.link, b.link);
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn test_prefix_not_hashed() {
        let entries = vec![value_entry("k", b"v")];
        let a = ShardBlock::encode(entries.clone(), "");
        let b = ShardBlock::encode(entries, "deep/nested/");
        assert_eq!(a.link, b.link);
    }

    #[test]
    fn test_decode_rejects_non_list() {
        let block = Block::encode(&Value::Text("not a shard".into()));
        let err = ShardBlock::decode(block.link, block.bytes, "").unwrap_err();
        assert_eq!(err, MapError::MalformedShard(block.link));
    }

    #[test]
    fn test_decode_rejects_bad_entry_shape() {
        // An entry whose value is a 3-element array is outside the union.
        let l = Value::Link(link(b"x"));
        let bad = Value::Array(vec![Value::Array(vec![
            Value::Text("k".into()),
            Value::Array(vec![l.clone(), l.clone(), l]),
        ])]);
        let block = Block::encode(&bad);
        assert!(ShardBlock::decode(block.link, block.bytes, "").is_err());
    }

    #[test]
    fn test_put_entry_into_empty() {
        let shard = put_entry(&Vec::new(), value_entry("a", b"1"));
        assert_eq!(shard, vec![value_entry("a", b"1")]);
    }

    #[test]
    fn test_put_entry_keeps_sorted_order() {
        let mut shard = Vec::new();
        for key in ["m", "a", "z", "k"] {
            shard = put_entry(&shard, value_entry(key, key.as_bytes()));
        }
        let keys: Vec<&str> = shard.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "k", "m", "z"]);
    }

    #[test]
    fn test_put_entry_replaces_value() {
        let shard = put_entry(&vec![value_entry("a", b"old")], value_entry("a", b"new"));
        assert_eq!(shard, vec![value_entry("a", b"new")]);
    }

    #[test]
    fn test_put_entry_child_preserves_existing_value() {
        let existing = vec![ShardEntry::new(
            "a",
            ShardValue::ChildValue(link(b"c1"), link(b"v")),
        )];
        let shard = put_entry(
            &existing,
            ShardEntry::new("a", ShardValue::Child(link(b"c2"))),
        );
        assert_eq!(
            shard,
            vec![ShardEntry::new(
                "a",
                ShardValue::ChildValue(link(b"c2"), link(b"v"))
            )]
        );
    }

    #[test]
    fn test_put_entry_value_preserves_existing_child() {
        let existing = vec![ShardEntry::new("a", ShardValue::Child(link(b"c")))];
        let shard = put_entry(
            &existing,
            ShardEntry::new("a", ShardValue::Value(link(b"v"))),
        );
        assert_eq!(
            shard,
            vec![ShardEntry::new(
                "a",
                ShardValue::ChildValue(link(b"c"), link(b"v"))
            )]
        );
    }

    #[test]
    fn test_put_entry_child_value_replaces_child_value() {
        let existing = vec![ShardEntry::new(
            "a",
            ShardValue::ChildValue(link(b"c1"), link(b"v1")),
        )];
        let shard = put_entry(
            &existing,
            ShardEntry::new("a", ShardValue::ChildValue(link(b"c2"), link(b"v2"))),
        );
        assert_eq!(
            shard,
            vec![ShardEntry::new(
                "a",
                ShardValue::ChildValue(link(b"c2"), link(b"v2"))
            )]
        );
    }

    #[test]
    fn test_find_common_prefix_longest_wins() {
        let shard = vec![
            value_entry("test/alpha", b"1"),
            value_entry("test/alps", b"2"),
            value_entry("test/beta", b"3"),
        ];
        let (prefix, matches) = find_common_prefix(&shard, "test/alpha").unwrap();
        assert_eq!(prefix, "test/alp");
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn test_find_common_prefix_wraps_to_other_entries() {
        // The inserted key shares nothing, but other entries do.
        let shard = vec![
            value_entry("aaa1", b"1"),
            value_entry("aaa2", b"2"),
            value_entry("xyz", b"3"),
        ];
        let (prefix, matches) = find_common_prefix(&shard, "xyz").unwrap();
        assert_eq!(prefix, "aaa");
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn test_find_common_prefix_none_when_disjoint() {
        let shard = vec![value_entry("abc", b"1"), value_entry("xyz", b"2")];
        assert!(find_common_prefix(&shard, "abc").is_none());
    }

    #[test]
    fn test_find_common_prefix_requires_known_key() {
        let shard = vec![value_entry("abc", b"1")];
        assert!(find_common_prefix(&shard, "zzz").is_none());
    }
}
