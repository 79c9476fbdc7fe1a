//! Repository statement reporting
//!
//! Generated repositories run their insert/update/delete/save statements
//! through [`execute_crud`], which brackets the statement with the CRUD
//! hooks and reports which tables it touched. [`Repository`] is a thin
//! per-table front end for it.

use tracing::debug;

use crate::driver::{QueryExecutor, SqlError};
use crate::hook::{CrudOp, HookEvent};
use crate::invalidation::{TableId, TableSet};

/// Run a repository statement on `executor`, emitting `Before*`/`After*`
/// CRUD hooks that carry `dependent_tables`.
///
/// The statement's own `BeforeExecute`/`AfterExecute` hooks fire in between.
/// The `After*` CRUD hook sees the statement's backend result, success or
/// failure; a hook failure on the statement itself is returned as is.
pub async fn execute_crud<E>(
    executor: &E,
    op: CrudOp,
    dependent_tables: TableSet,
    sql: &str,
) -> Result<u64, SqlError>
where
    E: QueryExecutor + ?Sized,
{
    let bus = executor.hook();
    let source = executor.source();

    bus.publish(|| HookEvent::BeforeCrud {
        source: source.clone(),
        op,
        dependent_tables: dependent_tables.clone(),
    })
    .await?;

    let result = match executor.execute(sql).await {
        Ok(rows) => Ok(rows),
        Err(SqlError::Driver(e)) => Err(e),
        Err(other) => return Err(other),
    };
    debug!(op = ?op, tables = ?dependent_tables, ok = result.is_ok(), "Repository statement executed");

    bus.publish(|| HookEvent::AfterCrud {
        source,
        op,
        dependent_tables,
        result: result.clone(),
    })
    .await?;

    Ok(result?)
}

/// Statements against one table and the tables its writes affect.
#[derive(Debug, Clone)]
pub struct Repository {
    table: TableId,
    dependent_tables: TableSet,
}

impl Repository {
    /// A repository whose writes only touch `table`.
    pub fn new(table: impl Into<TableId>) -> Self {
        let table = table.into();
        let dependent_tables = TableSet::from_iter([&table]);
        Self {
            table,
            dependent_tables,
        }
    }

    /// Also report `tables` on every write, e.g. tables kept in sync by
    /// triggers or cascades.
    pub fn with_dependent_tables<I, T>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TableId>,
    {
        self.dependent_tables.extend(tables);
        self
    }

    pub fn table(&self) -> &TableId {
        &self.table
    }

    pub fn dependent_tables(&self) -> &TableSet {
        &self.dependent_tables
    }

    pub async fn insert<E>(&self, executor: &E, sql: &str) -> Result<u64, SqlError>
    where
        E: QueryExecutor + ?Sized,
    {
        self.run(executor, CrudOp::Insert, sql).await
    }

    pub async fn update<E>(&self, executor: &E, sql: &str) -> Result<u64, SqlError>
    where
        E: QueryExecutor + ?Sized,
    {
        self.run(executor, CrudOp::Update, sql).await
    }

    pub async fn delete<E>(&self, executor: &E, sql: &str) -> Result<u64, SqlError>
    where
        E: QueryExecutor + ?Sized,
    {
        self.run(executor, CrudOp::Delete, sql).await
    }

    pub async fn save<E>(&self, executor: &E, sql: &str) -> Result<u64, SqlError>
    where
        E: QueryExecutor + ?Sized,
    {
        self.run(executor, CrudOp::Save, sql).await
    }

    async fn run<E>(&self, executor: &E, op: CrudOp, sql: &str) -> Result<u64, SqlError>
    where
        E: QueryExecutor + ?Sized,
    {
        execute_crud(executor, op, self.dependent_tables.clone(), sql).await
    }
}
