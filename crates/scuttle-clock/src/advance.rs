//! Head maintenance for the causal DAG.
//!
//! The head is the minimal set of mutually-concurrent event links: no
//! element is an ancestor of any other. [`advance`] folds one event into a
//! head while preserving that invariant, and converges to the same head for
//! any delivery order of the same events.

use crate::event::{ClockError, EventFetcher};
use scuttle_block::{BlockFetcher, Link};
use std::collections::{HashSet, VecDeque};
use tracing::trace;

/// Advance a head with a new event, returning the new head.
///
/// An event already in the head, or already an ancestor of a head element,
/// leaves the head unchanged. An event that supersedes one or more head
/// elements replaces them (shrinking the head when the event merges several
/// tips). An event concurrent with every tip is appended.
pub async fn advance<S: BlockFetcher + ?Sized>(
    blocks: &S,
    head: &[Link],
    event: Link,
) -> Result<Vec<Link>, ClockError> {
    let events = EventFetcher::new(blocks);

    if head.contains(&event) {
        return Ok(head.to_vec());
    }

    // Does the event supersede any current tip?
    let mut new_head: Vec<Link> = head.to_vec();
    let mut changed = false;
    for h in head {
        if contains_event(&events, event, *h).await? {
            new_head.retain(|link| link != h);
            changed = true;
        }
    }
    if changed {
        new_head.push(event);
        trace!(event = %event.short(), tips = new_head.len(), "event replaced head tips");
        return Ok(new_head);
    }

    // Is the event stale information some tip already knows about?
    for h in head {
        if contains_event(&events, *h, event).await? {
            return Ok(head.to_vec());
        }
    }

    // Concurrent with every tip: the head grows.
    let mut grown = head.to_vec();
    grown.push(event);
    trace!(event = %event.short(), tips = grown.len(), "concurrent event grew head");
    Ok(grown)
}

/// Is `b` a causal ancestor of `a` (or equal to it)?
pub async fn contains<S: BlockFetcher + ?Sized>(
    blocks: &S,
    a: &Link,
    b: &Link,
) -> Result<bool, ClockError> {
    let events = EventFetcher::new(blocks);
    contains_event(&events, *a, *b).await
}

/// Breadth-first search from `a`'s parents looking for `b`.
///
/// Frontier links that appear among `b`'s own parents are not expanded:
/// anything below them is also below `b`, and a DAG has no cycles that
/// could put `b` under its own parent.
async fn contains_event<S: BlockFetcher + ?Sized>(
    events: &EventFetcher<'_, S>,
    a: Link,
    b: Link,
) -> Result<bool, ClockError> {
    if a == b {
        return Ok(true);
    }
    let (aparents, bparents) =
        futures::try_join!(events.parents(&a), events.parents(&b))?;
    let mut queue: VecDeque<Link> = aparents.into();
    let mut visited: HashSet<Link> = HashSet::new();
    while let Some(link) = queue.pop_front() {
        if link == b {
            return Ok(true);
        }
        if bparents.contains(&link) {
            continue;
        }
        if !visited.insert(link) {
            continue;
        }
        queue.extend(events.parents(&link).await?);
    }
    Ok(false)
}
