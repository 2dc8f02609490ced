//! Bounded concurrency for layer packing/upload (spec.md §5 "CPU-bound work
//! ... and I/O-bound work ... are interleaved freely").
//!
//! A plain bounded-concurrency map over futures, grounded in the teacher's
//! adaptive concurrency manager but stripped of its prediction/strategy
//! machinery — nothing here needs to learn anything, it just bounds how
//! many layers are packed and uploaded at once so a 94-layer image doesn't
//! open 94 concurrent file handles and backend connections.

use futures_util::stream::{self, StreamExt};
use std::future::Future;

/// Run `f` over every item in `items`, at most `limit` futures in flight
/// at once. Results are returned in completion order, not input order —
/// callers that need input order should carry an index through `f`.
pub async fn map_bounded<I, T, F, Fut, O>(items: I, limit: usize, f: F) -> Vec<O>
where
    I: IntoIterator<Item = T>,
    F: Fn(T) -> Fut,
    Fut: Future<Output = O>,
{
    stream::iter(items).map(f).buffer_unordered(limit.max(1)).collect().await
}
