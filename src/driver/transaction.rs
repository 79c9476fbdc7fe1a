//! Transaction handle

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::hook::{EventBus, HookEvent, HookSource};
use crate::invalidation::{TableInvalidationScope, TransactionInvalidationScope};

use super::backend::TransactionBackend;
use super::error::{DriverError, SqlError};
use super::executor::QueryExecutor;
use super::result_set::ResultSet;
use super::template::around;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Open,
    Closed,
}

struct TransactionInner {
    id: Uuid,
    backend: Box<dyn TransactionBackend>,
    hook: EventBus,
    closed: AtomicBool,
    invalidation: Mutex<Option<Arc<TransactionInvalidationScope>>>,
}

/// An open database transaction.
///
/// The first `commit` or `rollback` closes it, whatever the backend answers.
/// Later operations fail with [`DriverError::TransactionClosed`] after
/// emitting their hooks like any other call.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    pub(crate) fn new(backend: Box<dyn TransactionBackend>, hook: EventBus) -> Self {
        let id = Uuid::new_v4();
        debug!(transaction = %id, "Transaction opened");
        Self {
            inner: Arc::new(TransactionInner {
                id,
                backend,
                hook,
                closed: AtomicBool::new(false),
                invalidation: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn status(&self) -> TransactionStatus {
        if self.inner.closed.load(Ordering::Acquire) {
            TransactionStatus::Closed
        } else {
            TransactionStatus::Open
        }
    }

    pub fn is_open(&self) -> bool {
        self.status() == TransactionStatus::Open
    }

    pub fn assert_is_open(&self) -> Result<(), DriverError> {
        match self.status() {
            TransactionStatus::Open => Ok(()),
            TransactionStatus::Closed => Err(DriverError::TransactionClosed),
        }
    }

    pub fn attach_invalidation(&self, scope: Arc<TransactionInvalidationScope>) {
        debug!(transaction = %self.inner.id, "Transaction invalidation scope attached");
        *self.lock_invalidation() = Some(scope);
    }

    pub fn detach_invalidation(&self) -> Option<Arc<TransactionInvalidationScope>> {
        self.lock_invalidation().take()
    }

    /// The scope buffering this transaction's invalidations, if attached.
    pub fn transaction_scope(&self) -> Option<Arc<TransactionInvalidationScope>> {
        self.lock_invalidation().clone()
    }

    fn lock_invalidation(&self) -> MutexGuard<'_, Option<Arc<TransactionInvalidationScope>>> {
        self.inner
            .invalidation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark closed; fails if it already was.
    fn finish(&self) -> Result<(), DriverError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            Err(DriverError::TransactionClosed)
        } else {
            Ok(())
        }
    }

    pub async fn commit(&self) -> Result<(), SqlError> {
        let source = self.source();
        around(
            &self.inner.hook,
            || HookEvent::BeforeCommit {
                source: source.clone(),
            },
            async {
                self.finish()?;
                self.inner.backend.commit().await
            },
            |result| HookEvent::AfterCommit {
                source: source.clone(),
                result,
            },
        )
        .await
    }

    pub async fn rollback(&self) -> Result<(), SqlError> {
        let source = self.source();
        around(
            &self.inner.hook,
            || HookEvent::BeforeRollback {
                source: source.clone(),
            },
            async {
                self.finish()?;
                self.inner.backend.rollback().await
            },
            |result| HookEvent::AfterRollback {
                source: source.clone(),
                result,
            },
        )
        .await
    }
}

#[async_trait]
impl QueryExecutor for Transaction {
    fn hook(&self) -> &EventBus {
        &self.inner.hook
    }

    fn source(&self) -> HookSource {
        HookSource::Transaction(self.clone())
    }

    fn invalidation(&self) -> Option<Arc<dyn TableInvalidationScope>> {
        self.transaction_scope()
            .map(|scope| scope as Arc<dyn TableInvalidationScope>)
    }

    async fn execute(&self, sql: &str) -> Result<u64, SqlError> {
        let source = self.source();
        around(
            &self.inner.hook,
            || HookEvent::BeforeExecute {
                source: source.clone(),
                sql: sql.to_string(),
            },
            async {
                self.assert_is_open()?;
                self.inner.backend.execute(sql).await
            },
            |result| HookEvent::AfterExecute {
                source: source.clone(),
                sql: sql.to_string(),
                result,
            },
        )
        .await
    }

    async fn fetch_all(&self, sql: &str) -> Result<ResultSet, SqlError> {
        let source = self.source();
        around(
            &self.inner.hook,
            || HookEvent::BeforeFetchAll {
                source: source.clone(),
                sql: sql.to_string(),
            },
            async {
                self.assert_is_open()?;
                self.inner.backend.fetch_all(sql).await
            },
            |result| HookEvent::AfterFetchAll {
                source: source.clone(),
                sql: sql.to_string(),
                result,
            },
        )
        .await
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}
