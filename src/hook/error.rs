//! Hook bus errors

/// Errors raised by the hook event bus.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// Subscribing while the bus switch is off would register a handler
    /// that can never fire.
    #[error("event bus is disabled; enable it through HookSettings before subscribing")]
    Disabled,

    #[error("a subscription must name at least one event type")]
    NoEventTypes,

    /// At least one handler failed during a publish. Sibling handlers of
    /// that publish were cancelled.
    #[error("hook execution failed: {0}")]
    ExecutionFailed(#[source] anyhow::Error),
}
