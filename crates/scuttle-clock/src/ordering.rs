//! Deterministic replay ordering over the event DAG.
//!
//! Given a head and a common ancestor, [`find_sorted_events`] produces the
//! events between them in an order every replica agrees on: events are
//! weighted by their depth below each tip (heavier means earlier), ties
//! break on the link itself. [`find_common_ancestor`] locates the first
//! event all paths from the head lead back to.

use crate::event::{ClockError, EventBlock, EventFetcher, Payload};
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use scuttle_block::{BlockFetcher, Link};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Find the common ancestor event of the head links, if one exists.
///
/// Each head element grows a chain of ancestor candidates; the first link
/// present in every chain wins. Disjoint histories (no shared genesis)
/// yield `None` once every chain stops producing new candidates.
pub async fn find_common_ancestor<S: BlockFetcher + ?Sized>(
    blocks: &S,
    head: &[Link],
) -> Result<Option<Link>, ClockError> {
    let events = EventFetcher::new(blocks);
    find_common_ancestor_inner(&events, head).await
}

async fn find_common_ancestor_inner<S: BlockFetcher + ?Sized>(
    events: &EventFetcher<'_, S>,
    head: &[Link],
) -> Result<Option<Link>, ClockError> {
    if head.is_empty() {
        return Ok(None);
    }
    let mut candidates: Vec<Vec<Link>> = head.iter().map(|link| vec![*link]).collect();
    loop {
        let mut changed = false;
        for chain in candidates.iter_mut() {
            let tail = *chain.last().expect("chains start non-empty");
            let Some(next) = ancestor_candidate(events, tail).await? else {
                continue;
            };
            // A candidate already in the chain adds no information; without
            // this check disjoint histories would spin on their genesis.
            if chain.contains(&next) {
                continue;
            }
            chain.push(next);
            changed = true;
        }
        if let Some(ancestor) = common_link(&candidates) {
            return Ok(Some(ancestor));
        }
        if !changed {
            return Ok(None);
        }
    }
}

/// The next ancestor candidate behind `link`: its single parent, itself for
/// a genesis event, or the common ancestor of its parents for a merge.
fn ancestor_candidate<'a, S: BlockFetcher + ?Sized>(
    events: &'a EventFetcher<'a, S>,
    link: Link,
) -> BoxFuture<'a, Result<Option<Link>, ClockError>> {
    async move {
        let parents = events.parents(&link).await?;
        match parents.len() {
            0 => Ok(Some(link)),
            1 => Ok(Some(parents[0])),
            _ => find_common_ancestor_inner(events, &parents).await,
        }
    }
    .boxed()
}

/// The first link that appears in every chain.
fn common_link(chains: &[Vec<Link>]) -> Option<Link> {
    for chain in chains {
        for link in chain {
            if chains.iter().all(|other| other.contains(link)) {
                return Some(*link);
            }
        }
    }
    None
}

/// Find the events between `head` and `tail` and sort them into the
/// deterministic replay order. The tail itself is excluded.
pub async fn find_sorted_events<S, T>(
    blocks: &S,
    head: &[Link],
    tail: &Link,
) -> Result<Vec<EventBlock<T>>, ClockError>
where
    S: BlockFetcher + ?Sized,
    T: Payload + Send,
{
    let events = EventFetcher::new(blocks);

    // Weigh events by depth below each tip; an event reachable from several
    // tips accumulates weight from each walk.
    let mut weights: HashMap<Link, (EventBlock<T>, u64)> = HashMap::new();
    let walks = try_join_all(
        head.iter()
            .map(|h| find_events(&events, *h, *tail, 0)),
    )
    .await?;
    for walk in walks {
        for (block, depth) in walk {
            match weights.entry(block.link) {
                Entry::Occupied(mut entry) => entry.get_mut().1 += depth,
                Entry::Vacant(entry) => {
                    entry.insert((block, depth));
                }
            }
        }
    }

    // Heavier events happened earlier; ties break on the link so every
    // replica agrees on the order.
    let mut sorted: Vec<(EventBlock<T>, u64)> = weights.into_values().collect();
    sorted.sort_by(|(a, aw), (b, bw)| bw.cmp(aw).then_with(|| a.link.cmp(&b.link)));
    Ok(sorted.into_iter().map(|(block, _)| block).collect())
}

/// Depth-first walk from `start` down to (but excluding) `end`.
fn find_events<'a, S, T>(
    events: &'a EventFetcher<'a, S>,
    start: Link,
    end: Link,
    depth: u64,
) -> BoxFuture<'a, Result<Vec<(EventBlock<T>, u64)>, ClockError>>
where
    S: BlockFetcher + ?Sized,
    T: Payload + Send,
{
    async move {
        if start == end {
            return Ok(Vec::new());
        }
        let block = events.get::<T>(&start).await?;
        let parents = block.event.parents.clone();
        let mut acc = vec![(block, depth)];
        if parents.len() == 1 && parents[0] == end {
            return Ok(acc);
        }
        let walks = try_join_all(
            parents
                .into_iter()
                .map(|p| find_events(events, p, end, depth + 1)),
        )
        .await?;
        for walk in walks {
            acc.extend(walk);
        }
        Ok(acc)
    }
    .boxed()
}
