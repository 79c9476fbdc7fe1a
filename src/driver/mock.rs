//! In-memory backend
//!
//! Understands a tiny statement language, one table per name, rows stored
//! as JSON objects:
//!
//! ```text
//! INSERT INTO users {"id": 1, "name": "ada"}
//! UPDATE users SET {"active": true}
//! DELETE FROM users
//! SELECT * FROM users
//! ```
//!
//! Transactions work on a private copy of every table and write it back on
//! commit. Used by the tests and the demo binary.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::trace;

use super::backend::{ConnectionBackend, DriverBackend, TransactionBackend};
use super::error::DriverError;
use super::result_set::ResultSet;

type Tables = BTreeMap<String, Vec<Value>>;

#[derive(Debug)]
enum Statement<'a> {
    Insert { table: &'a str, row: Value },
    Update { table: &'a str, patch: Map<String, Value> },
    Delete { table: &'a str },
    Select { table: &'a str },
}

impl<'a> Statement<'a> {
    fn parse(sql: &'a str) -> Result<Self, DriverError> {
        let malformed = || DriverError::MalformedStatement(sql.to_string());
        let (head, body) = match sql.find('{') {
            Some(i) => (&sql[..i], Some(&sql[i..])),
            None => (sql, None),
        };
        let words: Vec<&'a str> = head.split_whitespace().collect();

        match (words.as_slice(), body) {
            (&["INSERT", "INTO", table], Some(json)) => Ok(Statement::Insert {
                table,
                row: parse_json(json)?,
            }),
            (&["UPDATE", table, "SET"], Some(json)) => match parse_json(json)? {
                Value::Object(patch) => Ok(Statement::Update { table, patch }),
                _ => Err(malformed()),
            },
            (&["DELETE", "FROM", table], None) => Ok(Statement::Delete { table }),
            (&["SELECT", "*", "FROM", table], None) => Ok(Statement::Select { table }),
            _ => Err(malformed()),
        }
    }

    fn execute(self, tables: &mut Tables) -> Result<u64, DriverError> {
        match self {
            Statement::Insert { table, row } => {
                tables.entry(table.to_string()).or_default().push(row);
                Ok(1)
            }
            Statement::Update { table, patch } => {
                let rows = tables.entry(table.to_string()).or_default();
                for row in rows.iter_mut() {
                    if let Value::Object(fields) = row {
                        fields.extend(patch.clone());
                    }
                }
                Ok(rows.len() as u64)
            }
            Statement::Delete { table } => Ok(tables
                .remove(table)
                .map_or(0, |rows| rows.len() as u64)),
            Statement::Select { table } => Err(DriverError::MalformedStatement(format!(
                "SELECT * FROM {table} returns rows; use fetch_all"
            ))),
        }
    }

    fn fetch(self, tables: &Tables) -> Result<ResultSet, DriverError> {
        match self {
            Statement::Select { table } => Ok(tables.get(table).cloned().unwrap_or_default().into()),
            other => Err(DriverError::MalformedStatement(format!(
                "{other:?} does not return rows; use execute"
            ))),
        }
    }
}

fn parse_json(json: &str) -> Result<Value, DriverError> {
    serde_json::from_str(json).map_err(|e| DriverError::MalformedStatement(e.to_string()))
}

#[derive(Default)]
struct MockState {
    tables: Tables,
    statements: Vec<String>,
    fail_next: Option<DriverError>,
}

struct Shared {
    state: Mutex<MockState>,
    delay: Option<Duration>,
}

/// In-memory [`DriverBackend`]. Clones share the same tables.
#[derive(Clone)]
pub struct MockBackend {
    shared: Arc<Shared>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Every statement sleeps for `delay` before running.
    pub fn with_delay(delay: Duration) -> Self {
        Self::build(Some(delay))
    }

    fn build(delay: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MockState::default()),
                delay,
            }),
        }
    }

    /// Make the next statement, commit or rollback fail with `error`.
    pub fn fail_next(&self, error: DriverError) {
        self.state().fail_next = Some(error);
    }

    /// Statements run so far, in order, including failed ones.
    pub fn statements(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    /// Committed rows of `table`.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.state().tables.get(table).cloned().unwrap_or_default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Log `sql`, wait for the configured delay, and consume an injected
    /// failure if one is pending.
    async fn record(&self, sql: &str) -> Result<(), DriverError> {
        trace!(sql, "Mock statement");
        self.state().statements.push(sql.to_string());
        if let Some(delay) = self.shared.delay {
            tokio::time::sleep(delay).await;
        }
        match self.state().fail_next.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn run_execute(&self, sql: &str) -> Result<u64, DriverError> {
        self.record(sql).await?;
        Statement::parse(sql)?.execute(&mut self.state().tables)
    }

    async fn run_fetch(&self, sql: &str) -> Result<ResultSet, DriverError> {
        self.record(sql).await?;
        Statement::parse(sql)?.fetch(&self.state().tables)
    }

    fn open_transaction(&self) -> Box<dyn TransactionBackend> {
        let working = self.state().tables.clone();
        Box::new(MockTransaction {
            backend: self.clone(),
            working: Mutex::new(working),
        })
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DriverBackend for MockBackend {
    async fn acquire(&self) -> Result<Box<dyn ConnectionBackend>, DriverError> {
        Ok(Box::new(MockConnection {
            backend: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn execute(&self, sql: &str) -> Result<u64, DriverError> {
        self.run_execute(sql).await
    }

    async fn fetch_all(&self, sql: &str) -> Result<ResultSet, DriverError> {
        self.run_fetch(sql).await
    }

    async fn begin(&self) -> Result<Box<dyn TransactionBackend>, DriverError> {
        self.record("BEGIN").await?;
        Ok(self.open_transaction())
    }

    async fn close(&self) -> Result<(), DriverError> {
        Ok(())
    }
}

struct MockConnection {
    backend: MockBackend,
    closed: AtomicBool,
}

impl MockConnection {
    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.closed.load(Ordering::Acquire) {
            Err(DriverError::ConnectionClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConnectionBackend for MockConnection {
    async fn execute(&self, sql: &str) -> Result<u64, DriverError> {
        self.ensure_open()?;
        self.backend.run_execute(sql).await
    }

    async fn fetch_all(&self, sql: &str) -> Result<ResultSet, DriverError> {
        self.ensure_open()?;
        self.backend.run_fetch(sql).await
    }

    async fn begin(&self) -> Result<Box<dyn TransactionBackend>, DriverError> {
        self.ensure_open()?;
        self.backend.record("BEGIN").await?;
        Ok(self.backend.open_transaction())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

struct MockTransaction {
    backend: MockBackend,
    working: Mutex<Tables>,
}

impl MockTransaction {
    fn working(&self) -> MutexGuard<'_, Tables> {
        self.working.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TransactionBackend for MockTransaction {
    async fn execute(&self, sql: &str) -> Result<u64, DriverError> {
        self.backend.record(sql).await?;
        Statement::parse(sql)?.execute(&mut self.working())
    }

    async fn fetch_all(&self, sql: &str) -> Result<ResultSet, DriverError> {
        self.backend.record(sql).await?;
        Statement::parse(sql)?.fetch(&self.working())
    }

    /// Last writer wins: the working copy replaces the shared tables.
    async fn commit(&self) -> Result<(), DriverError> {
        self.backend.record("COMMIT").await?;
        let working = std::mem::take(&mut *self.working());
        self.backend.state().tables = working;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), DriverError> {
        self.backend.record("ROLLBACK").await?;
        self.working().clear();
        Ok(())
    }
}
