//! Operations shared by drivers, connections and transactions

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::hook::{EventBus, HookSource};
use crate::invalidation::{self, TableInvalidationScope, TableSet};

use super::error::SqlError;
use super::result_set::ResultSet;

/// Anything that can run statements: [`Driver`](super::Driver),
/// [`Connection`](super::Connection) or [`Transaction`](super::Transaction).
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Bus this executor publishes on.
    fn hook(&self) -> &EventBus;

    /// This executor as an event source.
    fn source(&self) -> HookSource;

    /// The attached invalidation scope, if any.
    fn invalidation(&self) -> Option<Arc<dyn TableInvalidationScope>>;

    async fn execute(&self, sql: &str) -> Result<u64, SqlError>;

    async fn fetch_all(&self, sql: &str) -> Result<ResultSet, SqlError>;

    /// Like [`invalidation`](Self::invalidation), but a missing scope is an
    /// error: it means the invalidation handler was not installed before
    /// this executor was created.
    fn invalidation_scope(&self) -> Result<Arc<dyn TableInvalidationScope>, SqlError> {
        self.invalidation()
            .ok_or_else(|| SqlError::MissingInvalidationScope(self.source().kind().as_str()))
    }

    /// Run `query` now and again whenever one of `tables` is invalidated.
    ///
    /// See [`invalidation::listen_for_invalidation`] for the emission
    /// protocol. Fails immediately when no scope is attached.
    fn listen_for_invalidation<T, E, F, Fut>(
        &self,
        tables: TableSet,
        query: F,
    ) -> Result<BoxStream<'static, Result<T, E>>, SqlError>
    where
        Self: Sized,
        T: Send + 'static,
        E: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let scope = self.invalidation_scope()?;
        Ok(invalidation::listen_for_invalidation(
            scope.as_ref(),
            tables,
            query,
        ))
    }
}
