//! Convergence tests for the Merkle-Clock.
//!
//! The head is a CRDT: applying the same set of events in any order, any
//! number of times, must land every replica on the same frontier.

use proptest::prelude::*;
use scuttle_block::{Link, MemoryBlockstore};
use scuttle_clock::{advance, Event, EventBlock};

/// A DAG script: event `i` takes its parents from the indices listed, all
/// of which are smaller than `i`.
fn dag_strategy() -> impl Strategy<Value = Vec<Vec<usize>>> {
    prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..3), 1..12)
        .prop_map(|raw| {
            raw.into_iter()
                .enumerate()
                .map(|(i, parents)| {
                    if i == 0 {
                        return Vec::new();
                    }
                    let mut links: Vec<usize> =
                        parents.into_iter().map(|p| p.index(i)).collect();
                    links.sort_unstable();
                    links.dedup();
                    links
                })
                .collect()
        })
}

/// Materialize the scripted DAG into a store, returning the event links.
fn build_dag(store: &MemoryBlockstore, script: &[Vec<usize>]) -> Vec<Link> {
    let mut links: Vec<Link> = Vec::with_capacity(script.len());
    for (i, parent_ids) in script.iter().enumerate() {
        let parents: Vec<Link> = parent_ids.iter().map(|p| links[*p]).collect();
        let block = EventBlock::encode(Event::new(format!("event-{}", i), parents));
        store.put_block(&block.as_block());
        links.push(block.link);
    }
    links
}

async fn fold(store: &MemoryBlockstore, order: &[Link]) -> Vec<Link> {
    let mut head = Vec::new();
    for link in order {
        head = advance(store, &head, *link).await.unwrap();
    }
    head.sort();
    head
}

/// Brute-force frontier: events that are no one's ancestor.
fn expected_frontier(script: &[Vec<usize>], links: &[Link]) -> Vec<Link> {
    let mut is_parent = vec![false; script.len()];
    for parent_ids in script {
        for p in parent_ids {
            is_parent[*p] = true;
        }
    }
    // Ancestry is transitive, but any non-tip is some event's parent here
    // because scripted parents always point at earlier events; an event
    // with no children is exactly a frontier tip.
    let mut frontier: Vec<Link> = links
        .iter()
        .enumerate()
        .filter(|(i, _)| !is_parent[*i])
        .map(|(_, link)| *link)
        .collect();
    frontier.sort();
    frontier
}

proptest! {
    #[test]
    fn head_converges_for_any_delivery_order(
        script in dag_strategy(),
        shuffle in any::<u64>(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = MemoryBlockstore::new();
            let links = build_dag(&store, &script);

            let in_order = fold(&store, &links).await;

            // A deterministic shuffle derived from the seed.
            let mut shuffled = links.clone();
            let mut state = shuffle | 1;
            for i in (1..shuffled.len()).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let j = (state >> 33) as usize % (i + 1);
                shuffled.swap(i, j);
            }
            let out_of_order = fold(&store, &shuffled).await;

            prop_assert_eq!(&in_order, &out_of_order);
            prop_assert_eq!(&in_order, &expected_frontier(&script, &links));
            Ok(())
        })?;
    }

    #[test]
    fn advance_is_idempotent_under_redelivery(
        script in dag_strategy(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = MemoryBlockstore::new();
            let links = build_dag(&store, &script);

            let once = fold(&store, &links).await;

            // Deliver everything twice, interleaved.
            let mut twice = Vec::new();
            for link in &links {
                twice.push(*link);
                twice.push(*link);
            }
            twice.extend(links.iter().copied());
            let redelivered = fold(&store, &twice).await;

            prop_assert_eq!(once, redelivered);
            Ok(())
        })?;
    }
}
