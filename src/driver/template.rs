//! The Before → operation → After wrapper shared by every public operation

use std::future::Future;

use crate::hook::{EventBus, HookEvent};

use super::error::{DriverError, SqlError};

/// Publish `before`, run `op`, publish `after` with the operation's result,
/// then hand that result back unchanged.
///
/// A failing `Before*` hook aborts before the backend is touched. A failing
/// `After*` hook is reported as [`SqlError::Hook`] even though the operation
/// itself completed.
pub(crate) async fn around<T, B, Op, A>(
    bus: &EventBus,
    before: B,
    op: Op,
    after: A,
) -> Result<T, SqlError>
where
    T: Clone,
    B: FnOnce() -> HookEvent,
    Op: Future<Output = Result<T, DriverError>>,
    A: FnOnce(Result<T, DriverError>) -> HookEvent,
{
    bus.publish(before).await?;
    let result = op.await;
    bus.publish(|| after(result.clone())).await?;
    Ok(result?)
}
