//! Driver hook system
//!
//! This module provides:
//! - `EventKind` / `EventToken`: the hook type hierarchy and subscription tokens
//! - `HookEvent`: Before/After events emitted around every driver operation
//! - `EventBus`: hierarchical pub/sub with fail-fast concurrent fan-out
//! - `HookSettings`: the shared enable switch passed into every bus

mod bus;
mod error;
mod event;
mod kind;

pub use bus::{EventBus, HookHandler, HookSettings, Subscription, DEFAULT_MAX_CONCURRENT_HANDLERS};
pub use error::HookError;
pub use event::{CrudOp, HookEvent, HookSource};
pub use kind::{EventKind, EventTag, EventToken, KindSet, SourceKind};
