//! Backend primitives
//!
//! A concrete database integration implements these traits and nothing
//! else. [`Driver`](super::Driver), [`Connection`](super::Connection) and
//! [`Transaction`](super::Transaction) wrap every call with hook emission,
//! so backends never publish events themselves.

use async_trait::async_trait;

use super::error::DriverError;
use super::result_set::ResultSet;

#[async_trait]
pub trait DriverBackend: Send + Sync + 'static {
    async fn acquire(&self) -> Result<Box<dyn ConnectionBackend>, DriverError>;

    /// Run a statement outside any explicit connection, in autocommit mode.
    async fn execute(&self, sql: &str) -> Result<u64, DriverError>;

    async fn fetch_all(&self, sql: &str) -> Result<ResultSet, DriverError>;

    async fn begin(&self) -> Result<Box<dyn TransactionBackend>, DriverError>;

    async fn close(&self) -> Result<(), DriverError>;
}

#[async_trait]
pub trait ConnectionBackend: Send + Sync + 'static {
    async fn execute(&self, sql: &str) -> Result<u64, DriverError>;

    async fn fetch_all(&self, sql: &str) -> Result<ResultSet, DriverError>;

    async fn begin(&self) -> Result<Box<dyn TransactionBackend>, DriverError>;

    async fn close(&self) -> Result<(), DriverError>;
}

#[async_trait]
pub trait TransactionBackend: Send + Sync + 'static {
    async fn execute(&self, sql: &str) -> Result<u64, DriverError>;

    async fn fetch_all(&self, sql: &str) -> Result<ResultSet, DriverError>;

    async fn commit(&self) -> Result<(), DriverError>;

    async fn rollback(&self) -> Result<(), DriverError>;
}
