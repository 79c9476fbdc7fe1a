//! Connection handle

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::hook::{EventBus, HookEvent, HookSource};
use crate::invalidation::TableInvalidationScope;

use super::backend::ConnectionBackend;
use super::error::{DriverError, SqlError};
use super::executor::QueryExecutor;
use super::result_set::ResultSet;
use super::template::around;
use super::transaction::Transaction;

struct ConnectionInner {
    id: Uuid,
    backend: Box<dyn ConnectionBackend>,
    hook: EventBus,
    closed: AtomicBool,
    invalidation: Mutex<Option<Arc<dyn TableInvalidationScope>>>,
}

/// A connection acquired from a [`Driver`](super::Driver).
///
/// Its bus is a child of the driver's bus. Operations after `close` fail
/// with [`DriverError::ConnectionClosed`], still through the hook path.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub(crate) fn new(backend: Box<dyn ConnectionBackend>, hook: EventBus) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id: Uuid::new_v4(),
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

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn attach_invalidation(&self, scope: Arc<dyn TableInvalidationScope>) {
        debug!(connection = %self.inner.id, "Invalidation scope attached");
        *self.lock_invalidation() = Some(scope);
    }

    pub fn detach_invalidation(&self) -> Option<Arc<dyn TableInvalidationScope>> {
        let scope = self.lock_invalidation().take();
        if scope.is_some() {
            debug!(connection = %self.inner.id, "Invalidation scope detached");
        }
        scope
    }

    fn lock_invalidation(
        &self,
    ) -> std::sync::MutexGuard<'_, Option<Arc<dyn TableInvalidationScope>>> {
        self.inner
            .invalidation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.is_closed() {
            Err(DriverError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    pub async fn begin(&self) -> Result<Transaction, SqlError> {
        let source = self.source();
        around(
            &self.inner.hook,
            || HookEvent::BeforeBegin {
                source: source.clone(),
            },
            async {
                self.ensure_open()?;
                let backend = self.inner.backend.begin().await?;
                Ok::<_, DriverError>(Transaction::new(backend, self.inner.hook.child()))
            },
            |result| HookEvent::AfterBegin {
                source: source.clone(),
                result,
            },
        )
        .await
    }

    /// Release the connection. A second close fails with
    /// [`DriverError::ConnectionClosed`].
    pub async fn close(&self) -> Result<(), SqlError> {
        let source = self.source();
        around(
            &self.inner.hook,
            || HookEvent::BeforeClose {
                source: source.clone(),
            },
            async {
                if self.inner.closed.swap(true, Ordering::AcqRel) {
                    return Err(DriverError::ConnectionClosed);
                }
                self.inner.backend.close().await
            },
            |result| HookEvent::AfterClose {
                source: source.clone(),
                result,
            },
        )
        .await
    }
}

#[async_trait]
impl QueryExecutor for Connection {
    fn hook(&self) -> &EventBus {
        &self.inner.hook
    }

    fn source(&self) -> HookSource {
        HookSource::Connection(self.clone())
    }

    fn invalidation(&self) -> Option<Arc<dyn TableInvalidationScope>> {
        self.lock_invalidation().clone()
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
                self.ensure_open()?;
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
                self.ensure_open()?;
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

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
