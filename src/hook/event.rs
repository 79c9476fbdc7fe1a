//! Concrete hook events emitted around driver operations

use crate::driver::{Connection, Driver, DriverError, ResultSet, Transaction};
use crate::invalidation::TableSet;

use super::kind::{EventKind, EventTag, SourceKind};

/// The executor instance that produced an event.
#[derive(Debug, Clone)]
pub enum HookSource {
    Driver(Driver),
    Connection(Connection),
    Transaction(Transaction),
}

impl HookSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            HookSource::Driver(_) => SourceKind::Driver,
            HookSource::Connection(_) => SourceKind::Connection,
            HookSource::Transaction(_) => SourceKind::Transaction,
        }
    }

    pub fn as_transaction(&self) -> Option<&Transaction> {
        match self {
            HookSource::Transaction(tx) => Some(tx),
            _ => None,
        }
    }
}

/// A generated repository statement kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrudOp {
    Insert,
    Update,
    Delete,
    Save,
}

impl CrudOp {
    fn before_kind(self) -> EventKind {
        match self {
            CrudOp::Insert => EventKind::BeforeInsert,
            CrudOp::Update => EventKind::BeforeUpdate,
            CrudOp::Delete => EventKind::BeforeDelete,
            CrudOp::Save => EventKind::BeforeSave,
        }
    }

    fn after_kind(self) -> EventKind {
        match self {
            CrudOp::Insert => EventKind::AfterInsert,
            CrudOp::Update => EventKind::AfterUpdate,
            CrudOp::Delete => EventKind::AfterDelete,
            CrudOp::Save => EventKind::AfterSave,
        }
    }
}

/// An immutable hook event.
///
/// `Before*` events carry the context needed to observe the operation
/// (SQL text, dependent tables). `After*` events additionally carry the
/// backend `Result` of the operation they mirror. Handlers only observe;
/// they cannot veto or alter the operation.
#[derive(Debug, Clone)]
pub enum HookEvent {
    BeforeAcquire {
        source: HookSource,
    },
    AfterAcquire {
        source: HookSource,
        result: Result<Connection, DriverError>,
    },
    BeforeClose {
        source: HookSource,
    },
    AfterClose {
        source: HookSource,
        result: Result<(), DriverError>,
    },
    BeforeBegin {
        source: HookSource,
    },
    AfterBegin {
        source: HookSource,
        result: Result<Transaction, DriverError>,
    },
    BeforeCommit {
        source: HookSource,
    },
    AfterCommit {
        source: HookSource,
        result: Result<(), DriverError>,
    },
    BeforeRollback {
        source: HookSource,
    },
    AfterRollback {
        source: HookSource,
        result: Result<(), DriverError>,
    },
    BeforeExecute {
        source: HookSource,
        sql: String,
    },
    AfterExecute {
        source: HookSource,
        sql: String,
        result: Result<u64, DriverError>,
    },
    BeforeFetchAll {
        source: HookSource,
        sql: String,
    },
    AfterFetchAll {
        source: HookSource,
        sql: String,
        result: Result<ResultSet, DriverError>,
    },
    BeforeCrud {
        source: HookSource,
        op: CrudOp,
        dependent_tables: TableSet,
    },
    AfterCrud {
        source: HookSource,
        op: CrudOp,
        dependent_tables: TableSet,
        result: Result<u64, DriverError>,
    },
}

impl HookEvent {
    /// Leaf kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            HookEvent::BeforeAcquire { .. } => EventKind::BeforeAcquire,
            HookEvent::AfterAcquire { .. } => EventKind::AfterAcquire,
            HookEvent::BeforeClose { .. } => EventKind::BeforeClose,
            HookEvent::AfterClose { .. } => EventKind::AfterClose,
            HookEvent::BeforeBegin { .. } => EventKind::BeforeBeginTransaction,
            HookEvent::AfterBegin { .. } => EventKind::AfterBeginTransaction,
            HookEvent::BeforeCommit { .. } => EventKind::BeforeCommit,
            HookEvent::AfterCommit { .. } => EventKind::AfterCommit,
            HookEvent::BeforeRollback { .. } => EventKind::BeforeRollback,
            HookEvent::AfterRollback { .. } => EventKind::AfterRollback,
            HookEvent::BeforeExecute { .. } => EventKind::BeforeExecute,
            HookEvent::AfterExecute { .. } => EventKind::AfterExecute,
            HookEvent::BeforeFetchAll { .. } => EventKind::BeforeFetchAll,
            HookEvent::AfterFetchAll { .. } => EventKind::AfterFetchAll,
            HookEvent::BeforeCrud { op, .. } => op.before_kind(),
            HookEvent::AfterCrud { op, .. } => op.after_kind(),
        }
    }

    pub fn source(&self) -> &HookSource {
        match self {
            HookEvent::BeforeAcquire { source }
            | HookEvent::AfterAcquire { source, .. }
            | HookEvent::BeforeClose { source }
            | HookEvent::AfterClose { source, .. }
            | HookEvent::BeforeBegin { source }
            | HookEvent::AfterBegin { source, .. }
            | HookEvent::BeforeCommit { source }
            | HookEvent::AfterCommit { source, .. }
            | HookEvent::BeforeRollback { source }
            | HookEvent::AfterRollback { source, .. }
            | HookEvent::BeforeExecute { source, .. }
            | HookEvent::AfterExecute { source, .. }
            | HookEvent::BeforeFetchAll { source, .. }
            | HookEvent::AfterFetchAll { source, .. }
            | HookEvent::BeforeCrud { source, .. }
            | HookEvent::AfterCrud { source, .. } => source,
        }
    }

    /// Runtime type used for dispatch.
    pub fn tag(&self) -> EventTag {
        EventTag {
            kind: self.kind(),
            source: self.source().kind(),
        }
    }

    /// SQL text of statement events.
    pub fn sql(&self) -> Option<&str> {
        match self {
            HookEvent::BeforeExecute { sql, .. }
            | HookEvent::AfterExecute { sql, .. }
            | HookEvent::BeforeFetchAll { sql, .. }
            | HookEvent::AfterFetchAll { sql, .. } => Some(sql),
            _ => None,
        }
    }

    /// Tables touched by a repository statement.
    pub fn dependent_tables(&self) -> Option<&TableSet> {
        match self {
            HookEvent::BeforeCrud {
                dependent_tables, ..
            }
            | HookEvent::AfterCrud {
                dependent_tables, ..
            } => Some(dependent_tables),
            _ => None,
        }
    }

    /// The backend error of a failed `After*` event.
    ///
    /// `None` for `Before*` events and for successful results.
    pub fn error(&self) -> Option<&DriverError> {
        match self {
            HookEvent::AfterAcquire { result, .. } => result.as_ref().err(),
            HookEvent::AfterBegin { result, .. } => result.as_ref().err(),
            HookEvent::AfterClose { result, .. }
            | HookEvent::AfterCommit { result, .. }
            | HookEvent::AfterRollback { result, .. } => result.as_ref().err(),
            HookEvent::AfterExecute { result, .. } | HookEvent::AfterCrud { result, .. } => {
                result.as_ref().err()
            }
            HookEvent::AfterFetchAll { result, .. } => result.as_ref().err(),
            _ => None,
        }
    }

    /// `Some(true)` for a successful `After*` event, `Some(false)` for a
    /// failed one, `None` for `Before*` events.
    pub fn succeeded(&self) -> Option<bool> {
        if self.kind().is_after() {
            Some(self.error().is_none())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::mock_driver;

    #[test]
    fn test_crud_kind_follows_op() {
        let driver = mock_driver();
        let event = HookEvent::AfterCrud {
            source: HookSource::Driver(driver),
            op: CrudOp::Delete,
            dependent_tables: TableSet::from_iter(["users"]),
            result: Ok(1),
        };
        assert_eq!(event.kind(), EventKind::AfterDelete);
        assert!(event.kind().is_a(EventKind::AfterCrudRepoStatement));
        assert_eq!(event.tag().source, SourceKind::Driver);
        assert_eq!(event.dependent_tables().map(|t| t.len()), Some(1));
    }

    #[test]
    fn test_succeeded_and_error() {
        let driver = mock_driver();
        let failed = HookEvent::AfterExecute {
            source: HookSource::Driver(driver.clone()),
            sql: "DELETE FROM users".into(),
            result: Err(DriverError::Database("boom".into())),
        };
        assert_eq!(failed.succeeded(), Some(false));
        assert_eq!(failed.error(), Some(&DriverError::Database("boom".into())));
        assert_eq!(failed.sql(), Some("DELETE FROM users"));

        let before = HookEvent::BeforeExecute {
            source: HookSource::Driver(driver),
            sql: "DELETE FROM users".into(),
        };
        assert_eq!(before.succeeded(), None);
        assert!(before.error().is_none());
    }
}
