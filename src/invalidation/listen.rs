//! Reactive queries driven by table invalidations
//!
//! [`listen_for_invalidation`] turns a query function into a stream that
//! emits the query's result once up front and again after every relevant
//! invalidation batch.
//!
//! ## Conflation
//!
//! Batches published while a query runs are merged into the listener's
//! pending union. When the stream is polled again it reads that union and
//! re-runs the query once if it touches a watched table. N relevant batches
//! that arrive during one execution therefore produce a single re-run, and
//! batches that never touched a watched table produce none.
//!
//! ## Failures
//!
//! A failed query is emitted as an `Err` item and the stream keeps
//! listening; the next relevant invalidation runs the query again.

use std::future::Future;

use futures::stream::{self, BoxStream, StreamExt};
use tracing::trace;

use super::channel::InvalidationReceiver;
use super::scope::TableInvalidationScope;
use super::table::TableSet;

struct Listener<F> {
    query: F,
    watched: TableSet,
    receiver: InvalidationReceiver,
    primed: bool,
}

impl<F> Listener<F> {
    /// Wait until the pending union touches a watched table. Returns false
    /// once the scope is gone.
    async fn next_relevant(&mut self) -> bool {
        while let Some(batch) = self.receiver.recv().await {
            if batch.intersects(&self.watched) {
                trace!(batch = ?batch, "Relevant invalidation");
                return true;
            }
            trace!(batch = ?batch, "Invalidation ignored");
        }
        false
    }
}

/// Stream `query`'s result now and after each invalidation of any of `tables`.
///
/// The receiver is subscribed when this function is called, so no batch
/// published after it returns can be missed; the first query runs when the
/// stream is first polled. With an empty `tables` set the stream yields one
/// item and ends without subscribing.
pub fn listen_for_invalidation<T, E, F, Fut>(
    scope: &dyn TableInvalidationScope,
    tables: TableSet,
    mut query: F,
) -> BoxStream<'static, Result<T, E>>
where
    T: Send + 'static,
    E: Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    if tables.is_empty() {
        return stream::once(async move { query().await }).boxed();
    }

    let listener = Listener {
        query,
        watched: tables,
        receiver: scope.invalidations(),
        primed: false,
    };

    stream::unfold(listener, |mut listener| async move {
        if listener.primed {
            if !listener.next_relevant().await {
                return None;
            }
        } else {
            listener.primed = true;
        }
        let item = (listener.query)().await;
        Some((item, listener))
    })
    .boxed()
}
