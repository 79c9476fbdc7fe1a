//! Test helper factories
//!
//! Drivers over the in-memory backend, and a recorder for the kinds of
//! events a bus delivers.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future;

use crate::driver::{Driver, MockBackend};
use crate::hook::{EventBus, EventKind, EventToken, HookEvent, HookSettings, Subscription};

// ============================================================================
// Driver factories
// ============================================================================

/// A driver over an empty [`MockBackend`], hooks disabled.
pub fn mock_driver() -> Driver {
    Driver::new(MockBackend::new(), HookSettings::default())
}

/// A driver over an empty [`MockBackend`], plus a handle on that backend
/// for injecting failures and inspecting rows.
pub fn mock_driver_with(settings: HookSettings) -> (Driver, MockBackend) {
    let backend = MockBackend::new();
    (Driver::new(backend.clone(), settings), backend)
}

/// Like [`mock_driver_with`], but every backend statement takes `delay`.
pub fn delayed_mock_driver(delay: Duration) -> (Driver, MockBackend) {
    let backend = MockBackend::with_delay(delay);
    (Driver::new(backend.clone(), HookSettings::default()), backend)
}

// ============================================================================
// Event recording
// ============================================================================

/// Record the leaf kind of every event `bus` delivers for `tokens`, in
/// delivery order. The bus must be enabled.
pub fn record_kinds<I, T>(bus: &EventBus, tokens: I) -> (Arc<Mutex<Vec<EventKind>>>, Subscription)
where
    I: IntoIterator<Item = T>,
    T: Into<EventToken>,
{
    let kinds = Arc::new(Mutex::new(Vec::new()));
    let sink = kinds.clone();
    let subscription = bus
        .subscribe(tokens, move |event: Arc<HookEvent>| {
            sink.lock().unwrap().push(event.kind());
            future::ready(Ok(()))
        })
        .expect("bus must be enabled to record events");
    (kinds, subscription)
}
