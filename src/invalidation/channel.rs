//! Coalescing fan-out channel for invalidation batches
//!
//! Every receiver owns one slot holding the union of all batches published
//! since it last read. Publishing never blocks and never loses a table: a
//! receiver that falls behind reads one larger union instead of being told
//! it lagged. Receivers therefore always know exactly which tables changed.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::Notify;

use super::table::TableSet;

struct Slot {
    pending: Mutex<TableSet>,
    notify: Notify,
    closed: AtomicBool,
}

impl Slot {
    fn new() -> Self {
        Self {
            pending: Mutex::new(TableSet::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn merge(&self, tables: &TableSet) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .union_with(tables);
        // Stores a permit when nobody is waiting yet.
        self.notify.notify_one();
    }

    fn take(&self) -> Option<TableSet> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut *pending))
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

#[derive(Default)]
struct Shared {
    slots: Mutex<Vec<Weak<Slot>>>,
}

impl Shared {
    fn live_slots(&self) -> MutexGuard<'_, Vec<Weak<Slot>>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|slot| slot.strong_count() > 0);
        slots
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let slots = self.slots.get_mut().unwrap_or_else(PoisonError::into_inner);
        for slot in slots.drain(..).filter_map(|slot| slot.upgrade()) {
            slot.close();
        }
    }
}

/// Sending half. Clones share the same set of receivers; receivers see the
/// channel as closed once the last clone is dropped.
#[derive(Clone, Default)]
pub struct InvalidationChannel {
    shared: Arc<Shared>,
}

impl InvalidationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a receiver for every batch sent after this call.
    pub fn subscribe(&self) -> InvalidationReceiver {
        let slot = Arc::new(Slot::new());
        self.shared.live_slots().push(Arc::downgrade(&slot));
        InvalidationReceiver { slot }
    }

    /// Merge `tables` into every live receiver. Returns how many were reached.
    pub fn send(&self, tables: &TableSet) -> usize {
        let slots = self.shared.live_slots();
        let mut reached = 0;
        for slot in slots.iter().filter_map(Weak::upgrade) {
            slot.merge(tables);
            reached += 1;
        }
        reached
    }

    pub fn receiver_count(&self) -> usize {
        self.shared.live_slots().len()
    }
}

impl fmt::Debug for InvalidationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationChannel")
            .field("receivers", &self.receiver_count())
            .finish()
    }
}

/// Receiving half of an [`InvalidationChannel`].
pub struct InvalidationReceiver {
    slot: Arc<Slot>,
}

impl InvalidationReceiver {
    /// Wait for the union of every batch sent since the last read.
    ///
    /// Returns `None` once the channel is closed and nothing is pending.
    pub async fn recv(&mut self) -> Option<TableSet> {
        loop {
            if let Some(tables) = self.slot.take() {
                return Some(tables);
            }
            if self.slot.closed.load(Ordering::Acquire) {
                return None;
            }
            self.slot.notify.notified().await;
        }
    }

    /// The pending union, if any, without waiting.
    pub fn try_recv(&mut self) -> Option<TableSet> {
        self.slot.take()
    }

    pub fn is_closed(&self) -> bool {
        self.slot.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for InvalidationReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationReceiver")
            .field("closed", &self.is_closed())
            .finish()
    }
}
