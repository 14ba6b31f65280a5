//! Bounded-concurrency work pool
//!
//! The one scheduling engine in the crate: both the cache probe path and the
//! full download pipeline feed it. It keeps at most `limit` futures in
//! flight, refills from the input as slots free up, and yields results in
//! completion order.

use std::future::Future;

use futures::stream::{FuturesUnordered, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

struct PoolState<T, F, Fut> {
    pending: std::vec::IntoIter<T>,
    in_flight: FuturesUnordered<Fut>,
    limit: usize,
    cancel: CancellationToken,
    process: F,
}

/// Run `process` over `items` with at most `limit` concurrent invocations.
///
/// Each item is submitted exactly once; once the token is cancelled no new
/// work starts, but futures already in flight are driven to completion so
/// their results (typically abort errors) still come out of the stream.
pub fn concurrent_pool<T, R, F, Fut>(
    items: Vec<T>,
    limit: usize,
    cancel: CancellationToken,
    process: F,
) -> impl Stream<Item = R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let state = PoolState {
        pending: items.into_iter(),
        in_flight: FuturesUnordered::new(),
        limit: limit.max(1),
        cancel,
        process,
    };

    futures::stream::unfold(state, |mut state| async move {
        while state.in_flight.len() < state.limit && !state.cancel.is_cancelled() {
            match state.pending.next() {
                Some(item) => state.in_flight.push((state.process)(item)),
                None => break,
            }
        }

        let next = state.in_flight.next().await;
        next.map(|result| (result, state))
    })
}
