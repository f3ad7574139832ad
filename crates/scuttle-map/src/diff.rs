//! Structural diff between two shard DAG roots.
//!
//! The walk is shaped by the actual change: identical links are skipped
//! without fetching, shared children with different links recurse, and
//! subtrees present on only one side are enumerated rather than compared.

use crate::shard::{MapError, ShardBlock, ShardFetcher, ShardValue};
use futures::future::BoxFuture;
use futures::FutureExt;
use scuttle_block::{BlockFetcher, Link};
use std::collections::BTreeMap;
use tracing::trace;

/// A single key-level change: the value before and after. `None` on one
/// side means the key is absent there.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyChange {
    pub key: String,
    pub before: Option<Link>,
    pub after: Option<Link>,
}

/// Block-level delta between two roots. After cancellation the sets are
/// exact: a block appears in `additions` only if it is reachable from `b`
/// and not from `a`, and vice versa for `removals`.
#[derive(Clone, Debug, Default)]
pub struct ShardDelta {
    pub additions: Vec<ShardBlock>,
    pub removals: Vec<ShardBlock>,
}

/// Result of [`difference`]: key changes in sorted order plus the exact
/// block delta.
#[derive(Clone, Debug, Default)]
pub struct Difference {
    pub keys: Vec<KeyChange>,
    pub shards: ShardDelta,
}

struct DiffAcc {
    keys: BTreeMap<String, (Option<Link>, Option<Link>)>,
    additions: BTreeMap<Link, ShardBlock>,
    removals: BTreeMap<Link, ShardBlock>,
}

impl DiffAcc {
    /// Record a key change. The before half only ever comes from `a`'s side
    /// of the walk and the after half from `b`'s, so halves merge rather
    /// than overwrite; a key collected as removed on one side and added
    /// identically on the other nets out to no change.
    fn record(&mut self, key: String, before: Option<Link>, after: Option<Link>) {
        let slot = self.keys.entry(key).or_insert((None, None));
        if before.is_some() {
            slot.0 = before;
        }
        if after.is_some() {
            slot.1 = after;
        }
    }
}

/// Compute the difference between roots `a` and `b`.
pub async fn difference<S: BlockFetcher + ?Sized>(
    blocks: &S,
    a: &Link,
    b: &Link,
) -> Result<Difference, MapError> {
    if a == b {
        return Ok(Difference::default());
    }
    let mut acc = DiffAcc {
        keys: BTreeMap::new(),
        additions: BTreeMap::new(),
        removals: BTreeMap::new(),
    };
    diff_shards(blocks, *a, *b, String::new(), &mut acc).await?;

    // A shard rewritten back to identical structure through independent
    // operations lands on both sides; prune it so the delta is exact.
    let overlap: Vec<Link> = acc
        .removals
        .keys()
        .filter(|link| acc.additions.contains_key(link))
        .copied()
        .collect();
    for link in overlap {
        acc.additions.remove(&link);
        acc.removals.remove(&link);
    }

    let keys = acc
        .keys
        .into_iter()
        .filter(|(_, (before, after))| before != after)
        .map(|(key, (before, after))| KeyChange { key, before, after })
        .collect();
    Ok(Difference {
        keys,
        shards: ShardDelta {
            additions: acc.additions.into_values().collect(),
            removals: acc.removals.into_values().collect(),
        },
    })
}

fn diff_shards<'a, S: BlockFetcher + ?Sized>(
    blocks: &'a S,
    a: Link,
    b: Link,
    prefix: String,
    acc: &'a mut DiffAcc,
) -> BoxFuture<'a, Result<(), MapError>> {
    async move {
        let shards = ShardFetcher::new(blocks);
        let (ashard, bshard) =
            futures::try_join!(shards.get(&a, &prefix), shards.get(&b, &prefix))?;
        trace!(a = %a.short(), b = %b.short(), prefix = %prefix, "diffing shards");
        acc.removals.insert(ashard.link, ashard.clone());
        acc.additions.insert(bshard.link, bshard.clone());

        use ShardValue::{Child, ChildValue, Value};
        for aentry in &ashard.entries {
            let key = format!("{}{}", ashard.prefix, aentry.key);
            let bvalue = bshard
                .entries
                .iter()
                .find(|e| e.key == aentry.key)
                .map(|e| e.value);
            match (aentry.value, bvalue) {
                // Key (and any subtree below it) exists only in `a`.
                (Value(av), None) => acc.record(key, Some(av), None),
                (Child(ac), None) => {
                    collect_side(blocks, ac, key, acc, Side::Removed).await?;
                }
                (ChildValue(ac, av), None) => {
                    acc.record(key.clone(), Some(av), None);
                    collect_side(blocks, ac, key, acc, Side::Removed).await?;
                }
                // Plain values on both sides.
                (Value(av), Some(Value(bv))) => acc.record(key, Some(av), Some(bv)),
                // Shape change: the subtree in `a` is gone from `b`.
                (Child(ac), Some(Value(bv))) => {
                    acc.record(key.clone(), None, Some(bv));
                    collect_side(blocks, ac, key, acc, Side::Removed).await?;
                }
                (ChildValue(ac, av), Some(Value(bv))) => {
                    acc.record(key.clone(), Some(av), Some(bv));
                    collect_side(blocks, ac, key, acc, Side::Removed).await?;
                }
                // Shape change: the key grew a subtree in `b`.
                (Value(av), Some(Child(bc))) => {
                    acc.record(key.clone(), Some(av), None);
                    collect_side(blocks, bc, key, acc, Side::Added).await?;
                }
                (Value(av), Some(ChildValue(bc, bv))) => {
                    acc.record(key.clone(), Some(av), Some(bv));
                    collect_side(blocks, bc, key, acc, Side::Added).await?;
                }
                // Children on both sides: recurse only when the links differ;
                // co-resident value changes never force a descent.
                (Child(ac), Some(Child(bc))) => {
                    if ac != bc {
                        diff_shards(blocks, ac, bc, key, &mut *acc).await?;
                    }
                }
                (Child(ac), Some(ChildValue(bc, bv))) => {
                    if ac != bc {
                        diff_shards(blocks, ac, bc, key.clone(), &mut *acc).await?;
                    }
                    acc.record(key, None, Some(bv));
                }
                (ChildValue(ac, av), Some(Child(bc))) => {
                    if ac != bc {
                        diff_shards(blocks, ac, bc, key.clone(), &mut *acc).await?;
                    }
                    acc.record(key, Some(av), None);
                }
                (ChildValue(ac, av), Some(ChildValue(bc, bv))) => {
                    if ac != bc {
                        diff_shards(blocks, ac, bc, key.clone(), &mut *acc).await?;
                    }
                    acc.record(key, Some(av), Some(bv));
                }
            }
        }

        // Keys that exist only in `b`.
        for bentry in &bshard.entries {
            if ashard.entries.iter().any(|e| e.key == bentry.key) {
                continue;
            }
            let key = format!("{}{}", bshard.prefix, bentry.key);
            if let Some(bv) = bentry.value.value() {
                acc.record(key.clone(), None, Some(bv));
            }
            if let Some(child) = bentry.value.child() {
                collect_side(blocks, child, key, acc, Side::Added).await?;
            }
        }

        Ok(())
    }
    .boxed()
}

#[derive(Clone, Copy)]
enum Side {
    Added,
    Removed,
}

/// Enumerate a subtree present on only one side, recording every key it
/// holds and every shard block it is made of.
async fn collect_side<S: BlockFetcher + ?Sized>(
    blocks: &S,
    root: Link,
    prefix: String,
    acc: &mut DiffAcc,
    side: Side,
) -> Result<(), MapError> {
    let shards = ShardFetcher::new(blocks);
    let mut queue = vec![(root, prefix)];
    while let Some((link, prefix)) = queue.pop() {
        let shard = shards.get(&link, &prefix).await?;
        for entry in &shard.entries {
            let key = format!("{}{}", shard.prefix, entry.key);
            if let Some(value) = entry.value.value() {
                match side {
                    Side::Added => acc.record(key.clone(), None, Some(value)),
                    Side::Removed => acc.record(key.clone(), Some(value), None),
                }
            }
            if let Some(child) = entry.value.child() {
                queue.push((child, key));
            }
        }
        match side {
            Side::Added => acc.additions.insert(shard.link, shard),
            Side::Removed => acc.removals.insert(shard.link, shard),
        };
    }
    Ok(())
}
