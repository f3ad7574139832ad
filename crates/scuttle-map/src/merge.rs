//! Reconciliation of divergent roots by diff and replay.
//!
//! Conflict policy: when two targets changed the same key relative to the
//! base, the target that appears later in the `targets` slice wins. This is
//! deterministic for a fixed target order but caller-order-dependent; it is
//! not causality- or timestamp-aware resolution. Callers that need a
//! stronger policy must order the targets themselves.

use crate::diff::difference;
use crate::map::{del, put, WriteResult};
use crate::shard::{MapError, ShardBlock, ShardConfig};
use futures::future::try_join_all;
use scuttle_block::{BlockFetcher, Link, MemoryBlockstore, MultiFetcher};
use std::collections::BTreeMap;
use tracing::debug;

/// Fold N divergent roots back into `base`, producing one reconciled root
/// and the net block delta.
pub async fn merge<S: BlockFetcher>(
    blocks: &S,
    base: &Link,
    targets: &[Link],
    config: &ShardConfig,
) -> Result<WriteResult, MapError> {
    // Diffs are read-only; compute them concurrently.
    let diffs = try_join_all(targets.iter().map(|t| difference(blocks, base, t))).await?;

    // Replay through a scratch store layered over the caller's so each
    // operation can read the blocks the previous one produced.
    let scratch = MemoryBlockstore::new();
    let fetcher = MultiFetcher::new(vec![&scratch, blocks]);

    let mut root = *base;
    let mut additions: BTreeMap<Link, ShardBlock> = BTreeMap::new();
    let mut removals: BTreeMap<Link, ShardBlock> = BTreeMap::new();

    for diff in &diffs {
        debug!(base = %base.short(), changes = diff.keys.len(), "replaying diff");
        for change in &diff.keys {
            let result = match change.after {
                Some(value) => put(&fetcher, &root, &change.key, value, config).await?,
                None => del(&fetcher, &root, &change.key, config).await?,
            };
            for block in result.additions {
                scratch.put_block(&block.as_block());
                additions.insert(block.link, block);
            }
            for block in result.removals {
                removals.insert(block.link, block);
            }
            root = result.root;
        }
    }

    // Blocks created by one replayed operation and superseded by a later
    // one cancel, mirroring diff's own rule. Intermediate roots fall out
    // here: each was added by one operation and removed by the next.
    let overlap: Vec<Link> = removals
        .keys()
        .filter(|link| additions.contains_key(link))
        .copied()
        .collect();
    for link in overlap {
        additions.remove(&link);
        removals.remove(&link);
    }

    Ok(WriteResult {
        root,
        additions: additions.into_values().collect(),
        removals: removals.into_values().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{entries, get};
    use scuttle_block::MemoryBlockstore;

    fn link(seed: &[u8]) -> Link {
        Link::of(seed)
    }

    fn store_with_empty_root() -> (MemoryBlockstore, Link) {
        let store = MemoryBlockstore::new();
        let root = ShardBlock::empty_root();
        store.put_block(&root.as_block());
        (store, root.link)
    }

    fn persist(store: &MemoryBlockstore, result: &WriteResult) -> Link {
        for block in &result.additions {
            store.put_block(&block.as_block());
        }
        result.root
    }

    async fn apply(
        store: &MemoryBlockstore,
        root: Link,
        ops: &[(&str, Option<Link>)],
    ) -> Link {
        let config = ShardConfig::default();
        let mut root = root;
        for (key, value) in ops {
            let result = match value {
                Some(v) => put(store, &root, key, *v, &config).await.unwrap(),
                None => del(store, &root, key, &config).await.unwrap(),
            };
            root = persist(store, &result);
        }
        root
    }

    #[tokio::test]
    async fn test_merge_single_target_reproduces_it() {
        let (store, base) = store_with_empty_root();
        let base = apply(&store, base, &[("shared", Some(link(b"s")))]).await;
        let target = apply(
            &store,
            base,
            &[("added", Some(link(b"a"))), ("shared", None)],
        )
        .await;

        let config = ShardConfig::default();
        let result = merge(&store, &base, &[target], &config).await.unwrap();
        assert_eq!(result.root, target);
    }

    #[tokio::test]
    async fn test_merge_disjoint_writers() {
        let (store, base) = store_with_empty_root();
        let base = apply(&store, base, &[("common", Some(link(b"c")))]).await;

        let alice = apply(&store, base, &[("alice", Some(link(b"a")))]).await;
        let bob = apply(&store, base, &[("bob", Some(link(b"b")))]).await;

        let config = ShardConfig::default();
        let result = merge(&store, &base, &[alice, bob], &config).await.unwrap();
        let root = persist(&store, &result);

        let listed = entries(&store, &root).await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["alice", "bob", "common"]);
    }

    #[tokio::test]
    async fn test_merge_later_target_wins_conflicts() {
        let (store, base) = store_with_empty_root();
        let base = apply(&store, base, &[("k", Some(link(b"base")))]).await;

        let first = apply(&store, base, &[("k", Some(link(b"first")))]).await;
        let second = apply(&store, base, &[("k", Some(link(b"second")))]).await;

        let config = ShardConfig::default();
        let result = merge(&store, &base, &[first, second], &config).await.unwrap();
        let root = persist(&store, &result);
        assert_eq!(get(&store, &root, "k").await.unwrap(), Some(link(b"second")));

        // Reversed order flips the winner.
        let result = merge(&store, &base, &[second, first], &config).await.unwrap();
        let root = persist(&store, &result);
        assert_eq!(get(&store, &root, "k").await.unwrap(), Some(link(b"first")));
    }

    #[tokio::test]
    async fn test_merge_delete_vs_update() {
        let (store, base) = store_with_empty_root();
        let base = apply(&store, base, &[("k", Some(link(b"base")))]).await;

        let deleter = apply(&store, base, &[("k", None)]).await;
        let updater = apply(&store, base, &[("k", Some(link(b"upd")))]).await;

        let config = ShardConfig::default();
        let result = merge(&store, &base, &[updater, deleter], &config).await.unwrap();
        let root = persist(&store, &result);
        assert_eq!(get(&store, &root, "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_merge_no_targets_is_identity() {
        let (store, base) = store_with_empty_root();
        let base = apply(&store, base, &[("k", Some(link(b"v")))]).await;

        let config = ShardConfig::default();
        let result = merge(&store, &base, &[], &config).await.unwrap();
        assert_eq!(result.root, base);
        assert!(result.additions.is_empty());
        assert!(result.removals.is_empty());
    }

    #[tokio::test]
    async fn test_merge_delta_is_net() {
        let (store, base) = store_with_empty_root();
        let base = apply(&store, base, &[("a", Some(link(b"a")))]).await;

        let t1 = apply(&store, base, &[("b", Some(link(b"b")))]).await;
        let t2 = apply(&store, base, &[("c", Some(link(b"c")))]).await;

        let config = ShardConfig::default();
        let result = merge(&store, &base, &[t1, t2], &config).await.unwrap();

        // Nothing reported as added is also reported as removed.
        for added in &result.additions {
            assert!(result.removals.iter().all(|r| r.link != added.link));
        }
        // The final root is among the additions; intermediate roots are not.
        assert!(result.additions.iter().any(|b| b.link == result.root));

        // Persisting just the additions makes the merged map readable.
        let root = persist(&store, &result);
        assert_eq!(get(&store, &root, "a").await.unwrap(), Some(link(b"a")));
        assert_eq!(get(&store, &root, "b").await.unwrap(), Some(link(b"b")));
        assert_eq!(get(&store, &root, "c").await.unwrap(), Some(link(b"c")));
    }
}
