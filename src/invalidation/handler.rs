//! Wiring between driver hooks and invalidation scopes
//!
//! [`InvalidationHandler::install`] subscribes to a driver's bus and keeps
//! every executor's scope in step with its lifecycle:
//!
//! | Event | Effect |
//! |---|---|
//! | `AfterAcquire` (ok) | root scope attached to the new connection |
//! | `AfterBeginTransaction` (ok) | fresh transaction scope attached |
//! | `AfterCrudRepoStatement` | dependent tables invalidated on the source's scope |
//! | `AfterCommit` | transaction scope flushed (or discarded if the commit failed), then detached |
//! | `AfterRollback` | transaction scope discarded, then detached |
//! | `AfterClose` from a connection (ok) | scope detached |

use std::sync::Arc;

use futures::future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::driver::{Driver, QueryExecutor, SqlError};
use crate::hook::{EventKind, EventToken, HookEvent, HookSource, SourceKind, Subscription};

use super::scope::{InvalidationScope, TableInvalidationScope, TransactionInvalidationScope};

/// Keeps the invalidation subscriptions of one driver alive.
///
/// Dropping it unsubscribes; scopes already attached stay attached but stop
/// receiving new tables.
#[must_use = "dropping the handler uninstalls it"]
pub struct InvalidationHandler {
    scope: Arc<InvalidationScope>,
    subscriptions: Vec<Subscription>,
    bus_closed: CancellationToken,
}

impl InvalidationHandler {
    /// Enable the driver's hooks and start tracking invalidations.
    ///
    /// Connections and transactions created before this call have no scope;
    /// invalidation-dependent calls on them fail with
    /// [`SqlError::MissingInvalidationScope`].
    pub fn install(driver: &Driver) -> Result<Self, SqlError> {
        let bus = driver.hook();
        bus.settings().enable();
        let root = driver.root_invalidation();

        let attach_root: Arc<dyn TableInvalidationScope> = root.clone();
        let attach = bus.subscribe(
            [EventKind::AfterAcquire, EventKind::AfterBeginTransaction],
            move |event| future::ready(attach_scope(&event, &attach_root)),
        )?;

        let crud_root = root.clone();
        let crud = bus.subscribe([EventKind::AfterCrudRepoStatement], move |event| {
            future::ready(invalidate_tables(&event, &crud_root))
        })?;

        let teardown = bus.subscribe(
            [
                EventToken::new(EventKind::AfterCommit),
                EventToken::new(EventKind::AfterRollback),
                EventToken::new(EventKind::AfterClose).from_source(SourceKind::Connection),
            ],
            |event| future::ready(finish_scope(&event)),
        )?;

        info!(driver = %driver.id(), "Invalidation handler installed");
        Ok(Self {
            scope: root,
            subscriptions: vec![attach, crud, teardown],
            bus_closed: bus.closed(),
        })
    }

    /// The driver's root scope.
    pub fn scope(&self) -> &Arc<InvalidationScope> {
        &self.scope
    }

    /// Uninstall once `token` is cancelled, or once the driver's bus is
    /// gone, whichever comes first.
    pub fn cancel_on(self, token: CancellationToken) -> JoinHandle<()> {
        let bus_closed = self.bus_closed.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = bus_closed.cancelled() => {}
            }
            drop(self);
        })
    }

    pub fn uninstall(self) {
        debug!(subscriptions = self.subscriptions.len(), "Invalidation handler uninstalled");
    }
}

fn attach_scope(event: &HookEvent, root: &Arc<dyn TableInvalidationScope>) -> anyhow::Result<()> {
    match event {
        HookEvent::AfterAcquire {
            result: Ok(connection),
            ..
        } => connection.attach_invalidation(Arc::clone(root)),
        HookEvent::AfterBegin {
            result: Ok(transaction),
            ..
        } => transaction.attach_invalidation(Arc::new(TransactionInvalidationScope::new(
            Arc::clone(root),
        ))),
        _ => {}
    }
    Ok(())
}

/// CRUD writes invalidate whatever their result: a failed statement may
/// still have changed rows, and a spurious re-query is harmless.
fn invalidate_tables(event: &HookEvent, root: &InvalidationScope) -> anyhow::Result<()> {
    let HookEvent::AfterCrud {
        source,
        dependent_tables,
        ..
    } = event
    else {
        return Ok(());
    };

    match source {
        HookSource::Transaction(transaction) => {
            let scope = transaction.transaction_scope().ok_or_else(|| {
                warn!(transaction = %transaction.id(), "CRUD statement in a transaction without invalidation scope");
                SqlError::MissingInvalidationScope(SourceKind::Transaction.as_str())
            })?;
            scope.invalidate(dependent_tables.clone());
        }
        HookSource::Connection(connection) => match connection.invalidation() {
            Some(scope) => scope.invalidate(dependent_tables.clone()),
            None => root.invalidate(dependent_tables.clone()),
        },
        HookSource::Driver(_) => root.invalidate(dependent_tables.clone()),
    }
    Ok(())
}

fn finish_scope(event: &HookEvent) -> anyhow::Result<()> {
    match event {
        HookEvent::AfterCommit {
            source: HookSource::Transaction(transaction),
            result,
        } => {
            if let Some(scope) = transaction.detach_invalidation() {
                if result.is_ok() {
                    scope.commit();
                } else {
                    scope.rollback();
                }
            }
        }
        HookEvent::AfterRollback {
            source: HookSource::Transaction(transaction),
            ..
        } => {
            if let Some(scope) = transaction.detach_invalidation() {
                scope.rollback();
            }
        }
        HookEvent::AfterClose {
            source: HookSource::Connection(connection),
            result: Ok(()),
        } => {
            connection.detach_invalidation();
        }
        _ => {}
    }
    Ok(())
}
