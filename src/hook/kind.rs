//! Event type hierarchy for driver hooks
//!
//! Every concrete hook event has a leaf [`EventKind`]. Kinds form a tree
//! rooted at [`EventKind::Any`]; subscribing to an inner kind (e.g.
//! `AfterStatement`) matches every leaf below it (`AfterExecute`,
//! `AfterFetchAll`).
//!
//! The ancestor set of every kind is computed at compile time into a
//! bitmask table, so the "is-instance" test done per registered token on
//! publish is a single AND.

use std::fmt;

/// A node in the hook event hierarchy.
///
/// Declaration order is significant: the discriminant indexes the
/// ancestry table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Any,
    Before,
    After,

    BeforeAcquire,
    AfterAcquire,
    BeforeClose,
    AfterClose,
    BeforeBeginTransaction,
    AfterBeginTransaction,
    BeforeCommit,
    AfterCommit,
    BeforeRollback,
    AfterRollback,

    BeforeStatement,
    AfterStatement,
    BeforeExecute,
    AfterExecute,
    BeforeFetchAll,
    AfterFetchAll,

    BeforeRepoStatement,
    AfterRepoStatement,
    BeforeCrudRepoStatement,
    AfterCrudRepoStatement,
    BeforeInsert,
    AfterInsert,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    BeforeSave,
    AfterSave,
}

impl EventKind {
    /// All kinds, in discriminant order.
    pub const ALL: [EventKind; 31] = [
        EventKind::Any,
        EventKind::Before,
        EventKind::After,
        EventKind::BeforeAcquire,
        EventKind::AfterAcquire,
        EventKind::BeforeClose,
        EventKind::AfterClose,
        EventKind::BeforeBeginTransaction,
        EventKind::AfterBeginTransaction,
        EventKind::BeforeCommit,
        EventKind::AfterCommit,
        EventKind::BeforeRollback,
        EventKind::AfterRollback,
        EventKind::BeforeStatement,
        EventKind::AfterStatement,
        EventKind::BeforeExecute,
        EventKind::AfterExecute,
        EventKind::BeforeFetchAll,
        EventKind::AfterFetchAll,
        EventKind::BeforeRepoStatement,
        EventKind::AfterRepoStatement,
        EventKind::BeforeCrudRepoStatement,
        EventKind::AfterCrudRepoStatement,
        EventKind::BeforeInsert,
        EventKind::AfterInsert,
        EventKind::BeforeUpdate,
        EventKind::AfterUpdate,
        EventKind::BeforeDelete,
        EventKind::AfterDelete,
        EventKind::BeforeSave,
        EventKind::AfterSave,
    ];

    /// Direct supertypes of this kind.
    pub const fn parents(self) -> &'static [EventKind] {
        use EventKind::*;
        match self {
            Any => &[],
            Before | After => &[Any],

            BeforeAcquire | BeforeClose | BeforeBeginTransaction | BeforeCommit
            | BeforeRollback | BeforeStatement | BeforeRepoStatement => &[Before],
            AfterAcquire | AfterClose | AfterBeginTransaction | AfterCommit | AfterRollback
            | AfterStatement | AfterRepoStatement => &[After],

            BeforeExecute | BeforeFetchAll => &[BeforeStatement],
            AfterExecute | AfterFetchAll => &[AfterStatement],

            BeforeCrudRepoStatement => &[BeforeRepoStatement],
            AfterCrudRepoStatement => &[AfterRepoStatement],
            BeforeInsert | BeforeUpdate | BeforeDelete | BeforeSave => &[BeforeCrudRepoStatement],
            AfterInsert | AfterUpdate | AfterDelete | AfterSave => &[AfterCrudRepoStatement],
        }
    }

    /// This kind plus every transitive supertype.
    pub fn ancestry(self) -> KindSet {
        ANCESTRY[self as usize]
    }

    /// True if `self` is `other` or a (transitive) subtype of it.
    pub fn is_a(self, other: EventKind) -> bool {
        self.ancestry().contains(other)
    }

    /// True for the `After*` branch, whose events carry a result.
    pub fn is_after(self) -> bool {
        self.is_a(EventKind::After)
    }

    const fn bit(self) -> u64 {
        1u64 << (self as u32)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

const fn compute_ancestry(kind: EventKind) -> u64 {
    let mut bits = kind.bit();
    let parents = kind.parents();
    let mut i = 0;
    while i < parents.len() {
        bits |= compute_ancestry(parents[i]);
        i += 1;
    }
    bits
}

const ANCESTRY: [KindSet; EventKind::ALL.len()] = {
    let mut table = [KindSet(0); EventKind::ALL.len()];
    let mut i = 0;
    while i < EventKind::ALL.len() {
        table[i] = KindSet(compute_ancestry(EventKind::ALL[i]));
        i += 1;
    }
    table
};

/// A set of event kinds stored as a bitmask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KindSet(u64);

impl KindSet {
    pub fn contains(&self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = EventKind> + '_ {
        EventKind::ALL.into_iter().filter(|k| self.contains(*k))
    }
}

impl fmt::Debug for KindSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// The kind of executor that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Driver,
    Connection,
    Transaction,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Driver => "driver",
            SourceKind::Connection => "connection",
            SourceKind::Transaction => "transaction",
        }
    }
}

/// Runtime type of a concrete event: its leaf kind and its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventTag {
    pub kind: EventKind,
    pub source: SourceKind,
}

impl EventTag {
    pub fn ancestry(&self) -> KindSet {
        self.kind.ancestry()
    }
}

/// What a subscription listens for: a kind (matching all its subtypes),
/// optionally restricted to events produced by one kind of source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventToken {
    pub kind: EventKind,
    pub source: Option<SourceKind>,
}

impl EventToken {
    pub fn new(kind: EventKind) -> Self {
        Self { kind, source: None }
    }

    /// Restrict the token to events published by `source`.
    pub fn from_source(mut self, source: SourceKind) -> Self {
        self.source = Some(source);
        self
    }

    /// Whether an event with the given runtime tag is an instance of this token.
    pub fn accepts(&self, tag: EventTag) -> bool {
        tag.ancestry().contains(self.kind) && self.source.map_or(true, |s| s == tag.source)
    }
}

impl From<EventKind> for EventToken {
    fn from(kind: EventKind) -> Self {
        Self::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_is_in_discriminant_order() {
        for (i, kind) in EventKind::ALL.iter().enumerate() {
            assert_eq!(*kind as usize, i, "{kind} out of order");
        }
    }

    #[test]
    fn test_every_kind_descends_from_any() {
        for kind in EventKind::ALL {
            assert!(kind.is_a(EventKind::Any), "{kind} is not an Any");
            assert!(kind.is_a(kind));
        }
    }

    #[test]
    fn test_execute_ancestry() {
        let ancestry = EventKind::AfterExecute.ancestry();
        assert_eq!(ancestry.len(), 4);
        assert!(ancestry.contains(EventKind::AfterStatement));
        assert!(ancestry.contains(EventKind::After));
        assert!(ancestry.contains(EventKind::Any));
        assert!(!ancestry.contains(EventKind::BeforeStatement));
        assert!(!ancestry.contains(EventKind::AfterFetchAll));
    }

    #[test]
    fn test_crud_ancestry() {
        assert!(EventKind::AfterInsert.is_a(EventKind::AfterCrudRepoStatement));
        assert!(EventKind::AfterSave.is_a(EventKind::AfterRepoStatement));
        assert!(EventKind::BeforeDelete.is_a(EventKind::BeforeRepoStatement));
        assert!(!EventKind::AfterInsert.is_a(EventKind::AfterStatement));
        assert!(!EventKind::BeforeUpdate.is_after());
        assert!(EventKind::AfterCommit.is_after());
    }

    #[test]
    fn test_token_accepts_subtypes_only() {
        let token = EventToken::new(EventKind::AfterStatement);
        let execute = EventTag {
            kind: EventKind::AfterExecute,
            source: SourceKind::Driver,
        };
        let commit = EventTag {
            kind: EventKind::AfterCommit,
            source: SourceKind::Transaction,
        };
        assert!(token.accepts(execute));
        assert!(!token.accepts(commit));
    }

    #[test]
    fn test_token_source_restriction() {
        let token = EventToken::new(EventKind::AfterExecute).from_source(SourceKind::Transaction);
        let from_tx = EventTag {
            kind: EventKind::AfterExecute,
            source: SourceKind::Transaction,
        };
        let from_driver = EventTag {
            kind: EventKind::AfterExecute,
            source: SourceKind::Driver,
        };
        assert!(token.accepts(from_tx));
        assert!(!token.accepts(from_driver));
    }
}
