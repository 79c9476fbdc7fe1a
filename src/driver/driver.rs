//! Root executor handle

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use crate::hook::{EventBus, HookEvent, HookSettings, HookSource};
use crate::invalidation::{InvalidationScope, TableInvalidationScope};

use super::backend::DriverBackend;
use super::connection::Connection;
use super::error::{DriverError, SqlError};
use super::executor::QueryExecutor;
use super::result_set::ResultSet;
use super::template::around;
use super::transaction::Transaction;

struct DriverInner {
    id: Uuid,
    backend: Box<dyn DriverBackend>,
    hook: EventBus,
    closed: AtomicBool,
    invalidation: OnceLock<Arc<InvalidationScope>>,
}

/// A database driver wrapped with hook emission.
///
/// Owns the root [`EventBus`]; every connection and transaction it creates
/// publishes on a child bus that forwards here. Cloning shares the driver.
#[derive(Clone)]
pub struct Driver {
    inner: Arc<DriverInner>,
}

impl Driver {
    pub fn new(backend: impl DriverBackend, settings: HookSettings) -> Self {
        let id = Uuid::new_v4();
        info!(driver = %id, hooks_enabled = settings.is_enabled(), "Driver created");
        Self {
            inner: Arc::new(DriverInner {
                id,
                backend: Box::new(backend),
                hook: EventBus::new(settings),
                closed: AtomicBool::new(false),
                invalidation: OnceLock::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// The root invalidation scope, created on first call.
    pub(crate) fn root_invalidation(&self) -> Arc<InvalidationScope> {
        Arc::clone(
            self.inner
                .invalidation
                .get_or_init(|| Arc::new(InvalidationScope::new())),
        )
    }

    pub async fn acquire(&self) -> Result<Connection, SqlError> {
        let source = HookSource::Driver(self.clone());
        around(
            &self.inner.hook,
            || HookEvent::BeforeAcquire {
                source: source.clone(),
            },
            async {
                self.ensure_open()?;
                let backend = self.inner.backend.acquire().await?;
                let connection = Connection::new(backend, self.inner.hook.child());
                debug!(driver = %self.inner.id, connection = %connection.id(), "Connection acquired");
                Ok::<_, DriverError>(connection)
            },
            |result| HookEvent::AfterAcquire {
                source: source.clone(),
                result,
            },
        )
        .await
    }

    /// Begin a transaction on a backend-managed connection.
    pub async fn begin(&self) -> Result<Transaction, SqlError> {
        let source = HookSource::Driver(self.clone());
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

    pub async fn close(&self) -> Result<(), SqlError> {
        let source = HookSource::Driver(self.clone());
        around(
            &self.inner.hook,
            || HookEvent::BeforeClose {
                source: source.clone(),
            },
            async {
                if self.inner.closed.swap(true, Ordering::AcqRel) {
                    return Err(DriverError::DriverClosed);
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

    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.is_closed() {
            Err(DriverError::DriverClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl QueryExecutor for Driver {
    fn hook(&self) -> &EventBus {
        &self.inner.hook
    }

    fn source(&self) -> HookSource {
        HookSource::Driver(self.clone())
    }

    fn invalidation(&self) -> Option<Arc<dyn TableInvalidationScope>> {
        self.inner
            .invalidation
            .get()
            .map(|scope| Arc::clone(scope) as Arc<dyn TableInvalidationScope>)
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

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockBackend;
    use crate::hook::{EventKind, HookError};
    use crate::test_helpers::{mock_driver_with, record_kinds};

    #[tokio::test]
    async fn test_execute_emits_before_and_after() {
        let (driver, _backend) = mock_driver_with(HookSettings::new(true));
        let (kinds, _sub) = record_kinds(driver.hook(), [EventKind::Any]);

        let rows = driver.execute(r#"INSERT INTO users {"id": 1}"#).await.unwrap();
        assert_eq!(rows, 1);
        assert_eq!(
            *kinds.lock().unwrap(),
            vec![EventKind::BeforeExecute, EventKind::AfterExecute]
        );
    }

    #[tokio::test]
    async fn test_backend_failure_reaches_after_hook_and_caller() {
        let (driver, backend) = mock_driver_with(HookSettings::new(true));
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_in_hook = seen.clone();
        let _sub = driver
            .hook()
            .subscribe([EventKind::AfterExecute], move |event: Arc<HookEvent>| {
                *seen_in_hook.lock().unwrap() = event.error().cloned();
                futures::future::ready(Ok(()))
            })
            .unwrap();

        backend.fail_next(DriverError::Database("disk full".into()));
        let err = driver.execute("DELETE FROM users").await.unwrap_err();

        assert_eq!(err.as_driver(), Some(&DriverError::Database("disk full".into())));
        assert_eq!(
            *seen.lock().unwrap(),
            Some(DriverError::Database("disk full".into()))
        );
    }

    #[tokio::test]
    async fn test_before_hook_failure_skips_backend() {
        let (driver, backend) = mock_driver_with(HookSettings::new(true));
        let _sub = driver
            .hook()
            .subscribe([EventKind::BeforeExecute], |_| async {
                Err(anyhow::anyhow!("rejected"))
            })
            .unwrap();

        let err = driver.execute(r#"INSERT INTO users {"id": 1}"#).await.unwrap_err();
        assert!(matches!(err, SqlError::Hook(HookError::ExecutionFailed(_))));
        assert!(backend.statements().is_empty());
    }

    #[tokio::test]
    async fn test_after_hook_failure_is_distinct_from_backend_result() {
        let (driver, backend) = mock_driver_with(HookSettings::new(true));
        let _sub = driver
            .hook()
            .subscribe([EventKind::AfterExecute], |_| async {
                Err(anyhow::anyhow!("listener broke"))
            })
            .unwrap();

        let err = driver.execute(r#"INSERT INTO users {"id": 1}"#).await.unwrap_err();
        assert!(err.is_hook_failure());
        // The write itself went through.
        assert_eq!(backend.rows("users").len(), 1);
    }

    #[tokio::test]
    async fn test_connection_events_reach_driver_bus() {
        let (driver, _backend) = mock_driver_with(HookSettings::new(true));
        let (kinds, _sub) = record_kinds(driver.hook(), [EventKind::After]);

        let conn = driver.acquire().await.unwrap();
        conn.execute(r#"INSERT INTO users {"id": 1}"#).await.unwrap();
        conn.close().await.unwrap();

        assert_eq!(
            *kinds.lock().unwrap(),
            vec![EventKind::AfterAcquire, EventKind::AfterExecute, EventKind::AfterClose]
        );
    }

    #[tokio::test]
    async fn test_closed_driver_rejects_operations() {
        let (driver, _backend) = mock_driver_with(HookSettings::default());
        driver.close().await.unwrap();
        assert!(driver.is_closed());

        let err = driver.acquire().await.unwrap_err();
        assert_eq!(err.as_driver(), Some(&DriverError::DriverClosed));
        let err = driver.close().await.unwrap_err();
        assert_eq!(err.as_driver(), Some(&DriverError::DriverClosed));
    }

    #[tokio::test]
    async fn test_disabled_hooks_do_not_change_results() {
        let driver = Driver::new(MockBackend::new(), HookSettings::default());
        driver.execute(r#"INSERT INTO users {"id": 1}"#).await.unwrap();
        let rows = driver.fetch_all("SELECT * FROM users").await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_invalidation_absent_until_installed() {
        let (driver, _backend) = mock_driver_with(HookSettings::default());
        assert!(driver.invalidation().is_none());
        assert!(matches!(
            driver.invalidation_scope(),
            Err(SqlError::MissingInvalidationScope("driver"))
        ));
        let root = driver.root_invalidation();
        assert!(Arc::ptr_eq(&root, &driver.root_invalidation()));
        assert!(driver.invalidation().is_some());
    }
}
