//! Hook-emitting driver, connection and transaction handles
//!
//! Backends implement the primitives in [`backend`]; the handles here wrap
//! each public operation as Before-hook → primitive → After-hook and return
//! the primitive's result unchanged.

pub mod backend;
mod connection;
#[allow(clippy::module_inception)]
mod driver;
mod error;
mod executor;
mod mock;
mod result_set;
mod template;
mod transaction;

pub use backend::{ConnectionBackend, DriverBackend, TransactionBackend};
pub use connection::Connection;
pub use driver::Driver;
pub use error::{DriverError, SqlError};
pub use executor::QueryExecutor;
pub use mock::MockBackend;
pub use result_set::ResultSet;
pub use transaction::{Transaction, TransactionStatus};
