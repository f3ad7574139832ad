//! Traversal and copy-on-write mutation over the shard DAG.
//!
//! Shards are never mutated in place: `put` and `del` rewrite the path from
//! the owning shard back to the root and report exactly which blocks the
//! operation created and which it superseded. Persisting the additions and
//! garbage-collecting the removals is the caller's job.

use crate::shard::{
    find_common_prefix, put_entry, MapError, Shard, ShardBlock, ShardConfig, ShardEntry,
    ShardFetcher, ShardValue,
};
use scuttle_block::{BlockFetcher, Link};
use tracing::{debug, trace};

/// Outcome of a copy-on-write mutation: the new root plus the exact block
/// delta. Additions are ordered leaf to root; removals are the superseded
/// path from root to the shard that owned the key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteResult {
    pub root: Link,
    pub additions: Vec<ShardBlock>,
    pub removals: Vec<ShardBlock>,
}

impl WriteResult {
    fn unchanged(root: Link) -> Self {
        WriteResult {
            root,
            additions: Vec::new(),
            removals: Vec::new(),
        }
    }
}

/// Walk from the root to the shard that owns `key`, collecting the visited
/// shards. The last element is the owner: either it already holds an entry
/// for the remaining suffix or the suffix belongs in it.
async fn traverse<S: BlockFetcher + ?Sized>(
    shards: &ShardFetcher<'_, S>,
    root: ShardBlock,
    key: &str,
) -> Result<Vec<ShardBlock>, MapError> {
    let mut path = vec![root];
    let mut remaining = key.to_string();
    loop {
        let descend = {
            let shard = path.last().expect("path is never empty");
            let mut next = None;
            for entry in &shard.entries {
                if remaining == entry.key {
                    break;
                }
                if remaining.starts_with(entry.key.as_str()) {
                    if let Some(child) = entry.value.child() {
                        next = Some((
                            child,
                            entry.key.len(),
                            format!("{}{}", shard.prefix, entry.key),
                        ));
                        break;
                    }
                }
            }
            next
        };
        match descend {
            Some((child, matched, prefix)) => {
                let block = shards.get(&child, &prefix).await?;
                remaining = remaining.split_off(matched);
                path.push(block);
            }
            None => return Ok(path),
        }
    }
}

/// Get the value stored for `key`, or `None` when the key is absent.
pub async fn get<S: BlockFetcher + ?Sized>(
    blocks: &S,
    root: &Link,
    key: &str,
) -> Result<Option<Link>, MapError> {
    let shards = ShardFetcher::new(blocks);
    let rshard = shards.get(root, "").await?;
    let path = traverse(&shards, rshard, key).await?;
    let target = path.last().expect("path is never empty");
    let skey = &key[target.prefix.len()..];
    Ok(target
        .entries
        .iter()
        .find(|e| e.key == skey)
        .and_then(|e| e.value.value()))
}

/// Put a value for `key`, overwriting any existing value at that exact key.
pub async fn put<S: BlockFetcher + ?Sized>(
    blocks: &S,
    root: &Link,
    key: &str,
    value: Link,
    config: &ShardConfig,
) -> Result<WriteResult, MapError> {
    let shards = ShardFetcher::new(blocks);
    let rshard = shards.get(root, "").await?;
    let path = traverse(&shards, rshard, key).await?;
    let target = path.last().expect("path is never empty");
    let skey = key[target.prefix.len()..].to_string();

    let mut additions: Vec<ShardBlock> = Vec::new();
    let mut entry = ShardEntry::new(skey.clone(), ShardValue::Value(value));

    // Keys longer than the per-entry limit become a chain of single-entry
    // shards, built tail first so the deepest shard holds the real value.
    if skey.chars().count() > config.max_key_length {
        let slices = char_chunks(&skey, config.max_key_length);
        let mut prefixes = Vec::with_capacity(slices.len());
        let mut acc = target.prefix.clone();
        for slice in &slices {
            prefixes.push(acc.clone());
            acc.push_str(slice);
        }

        let deepest = slices.len() - 1;
        let mut child = ShardBlock::encode(
            vec![ShardEntry::new(slices[deepest], ShardValue::Value(value))],
            prefixes[deepest].clone(),
        );
        additions.push(child.clone());
        for i in (1..deepest).rev() {
            child = ShardBlock::encode(
                vec![ShardEntry::new(slices[i], ShardValue::Child(child.link))],
                prefixes[i].clone(),
            );
            additions.push(child.clone());
        }
        entry = ShardEntry::new(slices[0], ShardValue::Child(child.link));
    }

    let mut shard = put_entry(&target.entries, entry.clone());
    let mut child = ShardBlock::encode(shard.clone(), target.prefix.clone());

    // Split on the longest shared prefix when the encoded shard overflows.
    if child.bytes.len() > config.max_shard_size {
        let (prefix, matches) =
            find_common_prefix(&shard, &entry.key).ok_or(MapError::ShardLimitExceeded)?;
        let matches: Vec<ShardEntry> = matches.into_iter().cloned().collect();
        debug!(
            shard = %child.link.short(),
            prefix = %prefix,
            moved = matches.len(),
            "splitting overflowing shard"
        );

        let moved: Shard = matches
            .iter()
            .filter(|e| e.key != prefix)
            .map(|e| ShardEntry::new(&e.key[prefix.len()..], e.value))
            .collect();
        let block = ShardBlock::encode(moved, format!("{}{}", target.prefix, prefix));
        additions.push(block.clone());

        let value = match matches.iter().find(|e| e.key == prefix) {
            Some(at_prefix) => match at_prefix.value {
                ShardValue::Value(v) => ShardValue::ChildValue(block.link, v),
                // Entries at this prefix that already link to a shard should
                // have been grouped below it; the shard is inconsistent.
                _ => return Err(MapError::MalformedShard(child.link)),
            },
            None => ShardValue::Child(block.link),
        };

        shard.retain(|e| !matches.iter().any(|m| m.key == e.key));
        shard = put_entry(&shard, ShardEntry::new(prefix, value));
        child = ShardBlock::encode(shard, target.prefix.clone());
    }

    // Same link means the write changed nothing; surface an empty delta.
    if child.link == target.link {
        return Ok(WriteResult::unchanged(*root));
    }
    additions.push(child.clone());

    // Rewrite ancestors from the owner back to the root, repointing each
    // parent's entry at the fresh child and keeping co-resident values.
    for parent in path[..path.len() - 1].iter().rev() {
        child = repoint(parent, &child)?;
        additions.push(child.clone());
    }

    Ok(WriteResult {
        root: child.link,
        additions,
        removals: path,
    })
}

/// Delete the value for `key`. Deleting an absent key is a no-op with an
/// empty delta.
pub async fn del<S: BlockFetcher + ?Sized>(
    blocks: &S,
    root: &Link,
    key: &str,
    _config: &ShardConfig,
) -> Result<WriteResult, MapError> {
    let shards = ShardFetcher::new(blocks);
    let rshard = shards.get(root, "").await?;
    let path = traverse(&shards, rshard, key).await?;
    let target = path.last().expect("path is never empty");
    let skey = &key[target.prefix.len()..];

    let Some(entryidx) = target.entries.iter().position(|e| e.key == *skey) else {
        return Ok(WriteResult::unchanged(*root));
    };
    let entry = &target.entries[entryidx];

    let mut shard = target.entries.clone();
    match entry.value {
        // A bare child link carries no value at this key; nothing to delete.
        ShardValue::Child(_) => return Ok(WriteResult::unchanged(*root)),
        ShardValue::ChildValue(child, _) => {
            shard[entryidx] = ShardEntry::new(entry.key.clone(), ShardValue::Child(child));
        }
        ShardValue::Value(_) => {
            shard.remove(entryidx);
        }
    }

    // Shards left empty collapse into their parent: the parent's link entry
    // is dropped (or demoted to its value half), cascading upward. The root
    // is the one shard allowed to be empty.
    let mut level = path.len() - 1;
    while shard.is_empty() && level > 0 {
        let parent = &path[level - 1];
        let key_in_parent = &path[level].prefix[parent.prefix.len()..];
        trace!(
            shard = %path[level].link.short(),
            parent = %parent.link.short(),
            "collapsing empty shard"
        );
        shard = parent
            .entries
            .iter()
            .filter_map(|e| {
                if e.key != key_in_parent {
                    return Some(e.clone());
                }
                match e.value {
                    ShardValue::ChildValue(_, v) => {
                        Some(ShardEntry::new(e.key.clone(), ShardValue::Value(v)))
                    }
                    _ => None,
                }
            })
            .collect();
        level -= 1;
    }

    let mut child = ShardBlock::encode(shard, path[level].prefix.clone());
    let mut additions = vec![child.clone()];
    for parent in path[..level].iter().rev() {
        child = repoint(parent, &child)?;
        additions.push(child.clone());
    }

    Ok(WriteResult {
        root: child.link,
        additions,
        removals: path,
    })
}

/// Rewrite `parent` so its entry for `child`'s position points at `child`'s
/// new link, preserving any co-resident value.
fn repoint(parent: &ShardBlock, child: &ShardBlock) -> Result<ShardBlock, MapError> {
    let key_in_parent = &child.prefix[parent.prefix.len()..];
    let entries: Shard = parent
        .entries
        .iter()
        .map(|e| {
            if e.key != key_in_parent {
                return Ok(e.clone());
            }
            match e.value {
                ShardValue::Child(_) => {
                    Ok(ShardEntry::new(e.key.clone(), ShardValue::Child(child.link)))
                }
                ShardValue::ChildValue(_, v) => Ok(ShardEntry::new(
                    e.key.clone(),
                    ShardValue::ChildValue(child.link, v),
                )),
                ShardValue::Value(_) => Err(MapError::MalformedShard(parent.link)),
            }
        })
        .collect::<Result<_, _>>()?;
    Ok(ShardBlock::encode(entries, parent.prefix.clone()))
}

/// Enumerate every `(key, value)` pair reachable from `root`, in key order.
pub async fn entries<S: BlockFetcher + ?Sized>(
    blocks: &S,
    root: &Link,
) -> Result<Vec<(String, Link)>, MapError> {
    let shards = ShardFetcher::new(blocks);
    let rshard = shards.get(root, "").await?;
    let mut out = Vec::new();
    // Explicit worklist: (shard, next entry index). Entries are visited in
    // sorted order and a key's own value precedes the keys below it, so the
    // output needs no final sort.
    let mut stack: Vec<(ShardBlock, usize)> = vec![(rshard, 0)];
    'outer: loop {
        let (entry, prefix) = loop {
            match stack.last_mut() {
                None => break 'outer,
                Some((shard, idx)) if *idx >= shard.entries.len() => {
                    stack.pop();
                }
                Some((shard, idx)) => {
                    let entry = shard.entries[*idx].clone();
                    *idx += 1;
                    break (entry, shard.prefix.clone());
                }
            }
        };
        let key = format!("{}{}", prefix, entry.key);
        if let Some(value) = entry.value.value() {
            out.push((key.clone(), value));
        }
        if let Some(child) = entry.value.child() {
            let block = shards.get(&child, &key).await?;
            stack.push((block, 0));
        }
    }
    Ok(out)
}

fn char_chunks(s: &str, size: usize) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = s;
    while !rest.is_empty() {
        let end = rest
            .char_indices()
            .nth(size)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        out.push(&rest[..end]);
        rest = &rest[end..];
    }
    out
}
