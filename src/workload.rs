//! Disconnected-writer workloads over the full reconciliation core.
//!
//! Each scenario simulates independent writers that diverge from a shared
//! base, then reconciles them with diff + merge while a Merkle-Clock tracks
//! the events, and verifies the outcome.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scuttle_block::{Link, MemoryBlockstore};
use scuttle_clock::{advance, find_common_ancestor, find_sorted_events, Event, EventBlock};
use scuttle_map::{difference, entries, get, merge, put, ShardBlock, ShardConfig, WriteResult};
use std::time::Instant;

pub struct WorkloadStats {
    pub writers: usize,
    pub ops: usize,
    pub keys_final: usize,
    pub blocks_added: usize,
    pub blocks_removed: usize,
    pub head_size: usize,
    pub elapsed_ms: u128,
}

impl WorkloadStats {
    pub fn print(&self) {
        println!("  writers:         {}", self.writers);
        println!("  ops replayed:    {}", self.ops);
        println!("  final keys:      {}", self.keys_final);
        println!("  blocks added:    {}", self.blocks_added);
        println!("  blocks removed:  {}", self.blocks_removed);
        println!("  clock head size: {}", self.head_size);
        println!("  elapsed:         {}ms", self.elapsed_ms);
    }
}

fn persist(store: &MemoryBlockstore, result: &WriteResult) -> Link {
    for block in &result.additions {
        store.put_block(&block.as_block());
    }
    result.root
}

fn random_key(rng: &mut StdRng) -> String {
    let len = rng.gen_range(1..=12);
    (0..len)
        .map(|_| char::from(b'a' + rng.gen_range(0..4)))
        .collect()
}

/// N writers diverge from a shared base and merge back into one root.
pub async fn divergent_writers(writers: usize, ops_per_writer: usize, seed: u64) -> WorkloadStats {
    let start = Instant::now();
    let mut rng = StdRng::seed_from_u64(seed);
    let config = ShardConfig::default();

    let store = MemoryBlockstore::new();
    let empty = ShardBlock::empty_root();
    store.put_block(&empty.as_block());

    // Shared base.
    let mut base = empty.link;
    for i in 0..16u32 {
        let key = random_key(&mut rng);
        let value = Link::of(&i.to_be_bytes());
        let result = put(&store, &base, &key, value, &config).await.unwrap();
        base = persist(&store, &result);
    }

    // Each writer works offline from the same base.
    let mut targets = Vec::new();
    let mut ops = 0;
    for w in 0..writers {
        let mut root = base;
        for o in 0..ops_per_writer {
            let key = random_key(&mut rng);
            let result = if rng.gen_bool(0.8) {
                let value = Link::of(format!("w{}o{}", w, o).as_bytes());
                put(&store, &root, &key, value, &config).await.unwrap()
            } else {
                scuttle_map::del(&store, &root, &key, &config).await.unwrap()
            };
            root = persist(&store, &result);
            ops += 1;
        }
        targets.push(root);
    }

    // A single fully-known target merges back to exactly itself.
    let roundtrip = merge(&store, &base, &targets[..1], &config).await.unwrap();
    assert_eq!(roundtrip.root, targets[0]);

    // Reconcile all writers.
    let result = merge(&store, &base, &targets, &config).await.unwrap();
    let root = persist(&store, &result);

    // The last target wins every key it changed relative to the base.
    let last = targets.last().unwrap();
    let last_diff = difference(&store, &base, last).await.unwrap();
    for change in &last_diff.keys {
        assert_eq!(get(&store, &root, &change.key).await.unwrap(), change.after);
    }

    let listed = entries(&store, &root).await.unwrap();

    WorkloadStats {
        writers,
        ops,
        keys_final: listed.len(),
        blocks_added: result.additions.len(),
        blocks_removed: result.removals.len(),
        head_size: 0,
        elapsed_ms: start.elapsed().as_millis(),
    }
}

/// Writers record events against a shared clock; every replica folds the
/// events in a different order and must land on the same head.
pub async fn clock_convergence(writers: usize, events_per_writer: usize, seed: u64) -> WorkloadStats {
    let start = Instant::now();
    let mut rng = StdRng::seed_from_u64(seed);
    let store = MemoryBlockstore::new();

    let origin = EventBlock::encode(Event::new("origin".to_string(), vec![]));
    store.put_block(&origin.as_block());

    // Each writer extends its own chain from the origin.
    let mut all_events = vec![origin.link];
    for w in 0..writers {
        let mut parent = origin.link;
        for e in 0..events_per_writer {
            let block = EventBlock::encode(Event::new(
                format!("writer-{}-event-{}", w, e),
                vec![parent],
            ));
            store.put_block(&block.as_block());
            parent = block.link;
            all_events.push(block.link);
        }
    }

    // Fold in several shuffled delivery orders.
    let mut heads = Vec::new();
    for _ in 0..4 {
        let mut order = all_events.clone();
        for i in (1..order.len()).rev() {
            let j = rng.gen_range(0..=i);
            order.swap(i, j);
        }
        let mut head = Vec::new();
        for link in &order {
            head = advance(&store, &head, *link).await.unwrap();
        }
        head.sort();
        heads.push(head);
    }
    for head in &heads[1..] {
        assert_eq!(head, &heads[0]);
    }

    // One concurrent tip per writer chain.
    assert_eq!(heads[0].len(), writers);

    // The replay pipeline: all paths lead back to the origin, and the span
    // between head and origin covers every event exactly once.
    let head = heads[0].clone();
    let ancestor = find_common_ancestor(&store, &head).await.unwrap().unwrap();
    assert_eq!(ancestor, origin.link);
    let span = find_sorted_events::<_, String>(&store, &head, &ancestor)
        .await
        .unwrap();
    assert_eq!(span.len(), all_events.len() - 1);

    WorkloadStats {
        writers,
        ops: all_events.len(),
        keys_final: 0,
        blocks_added: all_events.len(),
        blocks_removed: 0,
        head_size: heads[0].len(),
        elapsed_ms: start.elapsed().as_millis(),
    }
}
