//! Table invalidation scopes
//!
//! - [`InvalidationScope`]: the root scope owned by a driver; publishes
//!   every batch immediately to each receiver's coalescing slot.
//! - [`TransactionInvalidationScope`]: buffers a transaction's batches and
//!   flushes their union to the root on commit, or drops them on rollback.
//! - [`TrackOnlyInvalidationScope`]: only records, never publishes.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace};

use super::channel::{InvalidationChannel, InvalidationReceiver};
use super::table::TableSet;

/// A place tables can be invalidated and invalidations observed.
pub trait TableInvalidationScope: Send + Sync {
    /// Mark `tables` as changed, as one atomic batch. An empty set is a no-op.
    fn invalidate(&self, tables: TableSet);

    /// Receive every batch published after this call. Batches not yet read
    /// are merged, so a slow reader sees their union.
    fn invalidations(&self) -> InvalidationReceiver;
}

/// Root scope: every non-empty batch is published immediately.
#[derive(Clone)]
pub struct InvalidationScope {
    channel: InvalidationChannel,
}

impl InvalidationScope {
    pub fn new() -> Self {
        Self {
            channel: InvalidationChannel::new(),
        }
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.channel.receiver_count()
    }
}

impl Default for InvalidationScope {
    fn default() -> Self {
        Self::new()
    }
}

impl TableInvalidationScope for InvalidationScope {
    fn invalidate(&self, tables: TableSet) {
        if tables.is_empty() {
            trace!("Ignoring empty invalidation");
            return;
        }
        let receivers = self.channel.send(&tables);
        debug!(tables = ?tables, receivers, "Tables invalidated");
    }

    fn invalidations(&self) -> InvalidationReceiver {
        self.channel.subscribe()
    }
}

impl fmt::Debug for InvalidationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationScope")
            .field("receivers", &self.channel.receiver_count())
            .finish()
    }
}

/// Scope owned by one transaction.
///
/// `invalidate` accumulates; readers see the parent's stream, so they observe
/// externally committed changes but never this transaction's pending ones.
pub struct TransactionInvalidationScope {
    parent: Arc<dyn TableInvalidationScope>,
    pending: Mutex<TableSet>,
}

impl TransactionInvalidationScope {
    pub fn new(parent: Arc<dyn TableInvalidationScope>) -> Self {
        Self {
            parent,
            pending: Mutex::new(TableSet::new()),
        }
    }

    /// Tables invalidated so far and not yet flushed.
    pub fn pending(&self) -> TableSet {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forward the accumulated tables to the parent as a single batch and
    /// reset. Nothing is forwarded when nothing was invalidated.
    pub fn commit(&self) {
        let tables = std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        debug!(tables = ?tables, "Flushing transaction invalidations");
        self.parent.invalidate(tables);
    }

    /// Discard the accumulated tables without publishing.
    pub fn rollback(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(tables = ?*pending, "Discarding transaction invalidations");
        pending.clear();
    }
}

impl TableInvalidationScope for TransactionInvalidationScope {
    fn invalidate(&self, tables: TableSet) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .union_with(&tables);
    }

    fn invalidations(&self) -> InvalidationReceiver {
        self.parent.invalidations()
    }
}

impl fmt::Debug for TransactionInvalidationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionInvalidationScope")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Records invalidations without ever publishing them.
///
/// Useful for fake transactions and tests that only assert on what was
/// invalidated. Its stream never yields.
pub struct TrackOnlyInvalidationScope {
    invalidated: Mutex<TableSet>,
    // Never sent on: receivers stay open but silent.
    channel: InvalidationChannel,
}

impl TrackOnlyInvalidationScope {
    pub fn new() -> Self {
        Self {
            invalidated: Mutex::new(TableSet::new()),
            channel: InvalidationChannel::new(),
        }
    }

    pub fn invalidated(&self) -> TableSet {
        self.invalidated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.invalidated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for TrackOnlyInvalidationScope {
    fn default() -> Self {
        Self::new()
    }
}

impl TableInvalidationScope for TrackOnlyInvalidationScope {
    fn invalidate(&self, tables: TableSet) {
        self.invalidated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .union_with(&tables);
    }

    fn invalidations(&self) -> InvalidationReceiver {
        self.channel.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(names: &[&str]) -> TableSet {
        names.iter().copied().collect()
    }

    #[test]
    fn test_root_publishes_whole_batch() {
        let root = InvalidationScope::new();
        let mut rx = root.invalidations();

        root.invalidate(tables(&["users", "orders"]));
        assert_eq!(rx.try_recv(), Some(tables(&["users", "orders"])));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_root_ignores_empty_batch() {
        let root = InvalidationScope::new();
        let mut rx = root.invalidations();

        root.invalidate(TableSet::new());
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_root_without_receivers_does_not_block() {
        let root = InvalidationScope::new();
        for _ in 0..10 {
            root.invalidate(tables(&["users"]));
        }
        assert_eq!(root.receiver_count(), 0);
    }

    #[test]
    fn test_slow_receiver_reads_union() {
        let root = InvalidationScope::new();
        let mut rx = root.invalidations();

        root.invalidate(tables(&["a"]));
        root.invalidate(tables(&["b"]));
        root.invalidate(tables(&["c"]));

        assert_eq!(rx.try_recv(), Some(tables(&["a", "b", "c"])));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_wildcard_batch_reaches_receivers() {
        let root = InvalidationScope::new();
        let mut rx = root.invalidations();

        root.invalidate(TableSet::all());
        let batch = rx.try_recv().unwrap();
        assert!(batch.is_all());
        assert!(batch.intersects(&tables(&["payments"])));
    }

    #[test]
    fn test_transaction_commit_flushes_union_once() {
        let root = Arc::new(InvalidationScope::new());
        let mut rx = root.invalidations();
        let tx = TransactionInvalidationScope::new(root.clone());

        tx.invalidate(tables(&["users"]));
        tx.invalidate(tables(&["orders", "users"]));
        tx.invalidate(tables(&["audit"]));
        assert_eq!(rx.try_recv(), None);

        tx.commit();
        assert_eq!(rx.try_recv(), Some(tables(&["users", "orders", "audit"])));
        assert!(tx.pending().is_empty());

        // A second commit has nothing left to flush.
        tx.commit();
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_transaction_rollback_publishes_nothing() {
        let root = Arc::new(InvalidationScope::new());
        let mut rx = root.invalidations();
        let tx = TransactionInvalidationScope::new(root.clone());

        tx.invalidate(tables(&["users"]));
        tx.invalidate(tables(&["orders"]));
        tx.rollback();

        assert!(tx.pending().is_empty());
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_transaction_reads_proxy_to_parent() {
        let root = Arc::new(InvalidationScope::new());
        let tx = TransactionInvalidationScope::new(root.clone());
        let mut rx = tx.invalidations();

        root.invalidate(tables(&["payments"]));
        assert_eq!(rx.try_recv(), Some(tables(&["payments"])));

        tx.invalidate(tables(&["users"]));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_transaction_commit_into_track_only_parent() {
        let parent = Arc::new(TrackOnlyInvalidationScope::new());
        let tx = TransactionInvalidationScope::new(parent.clone());

        tx.invalidate(tables(&["users"]));
        tx.commit();
        assert_eq!(parent.invalidated(), tables(&["users"]));

        tx.invalidate(tables(&["orders"]));
        tx.rollback();
        assert_eq!(parent.invalidated(), tables(&["users"]));
    }

    #[test]
    fn test_track_only_never_publishes() {
        let scope = TrackOnlyInvalidationScope::new();
        let mut rx = scope.invalidations();

        scope.invalidate(tables(&["users"]));
        scope.invalidate(tables(&["orders"]));
        assert_eq!(scope.invalidated(), tables(&["users", "orders"]));
        assert_eq!(rx.try_recv(), None);

        scope.clear();
        assert!(scope.invalidated().is_empty());
    }
}
