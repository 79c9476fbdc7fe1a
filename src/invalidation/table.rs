//! Table identifiers and batches

use std::collections::btree_set;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Name of a table whose changes can be tracked.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(Arc<str>);

impl TableId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TableId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TableId {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<&TableId> for TableId {
    fn from(id: &TableId) -> Self {
        id.clone()
    }
}

/// A batch of tables invalidated together.
///
/// Invalidations are always published as sets so that a listener watching
/// several tables touched by the same write re-queries once.
///
/// [`TableSet::all`] is the wildcard batch: it stands for every table, so it
/// intersects any non-empty set. Use it for writes whose affected tables are
/// unknown.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct TableSet {
    tables: BTreeSet<TableId>,
    // When set, `tables` is kept empty.
    all: bool,
}

impl TableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The wildcard set, matching every table.
    pub fn all() -> Self {
        Self {
            tables: BTreeSet::new(),
            all: true,
        }
    }

    pub fn is_all(&self) -> bool {
        self.all
    }

    pub fn insert(&mut self, table: impl Into<TableId>) -> bool {
        if self.all {
            return false;
        }
        self.tables.insert(table.into())
    }

    pub fn contains(&self, table: &TableId) -> bool {
        self.all || self.tables.contains(table)
    }

    /// True when at least one table is in both sets. Always false if either
    /// side is empty; always true if one side is the wildcard and the other
    /// is not empty.
    pub fn intersects(&self, other: &TableSet) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        if self.all || other.all {
            return true;
        }
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small.iter().any(|t| large.contains(t))
    }

    pub fn union_with(&mut self, other: &TableSet) {
        if self.all {
            return;
        }
        if other.all {
            *self = Self::all();
            return;
        }
        self.tables.extend(other.iter().cloned());
    }

    /// Number of named tables. The wildcard set names none.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.tables.is_empty()
    }

    pub fn clear(&mut self) {
        self.tables.clear();
        self.all = false;
    }

    /// Named tables, in order. Empty for the wildcard set.
    pub fn iter(&self) -> btree_set::Iter<'_, TableId> {
        self.tables.iter()
    }
}

impl fmt::Debug for TableSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.all {
            return f.write_str("{*}");
        }
        f.debug_set().entries(self.tables.iter()).finish()
    }
}

impl<T: Into<TableId>> FromIterator<T> for TableSet {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            tables: iter.into_iter().map(Into::into).collect(),
            all: false,
        }
    }
}

impl<T: Into<TableId>> Extend<T> for TableSet {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for table in iter {
            self.insert(table);
        }
    }
}

impl IntoIterator for TableSet {
    type Item = TableId;
    type IntoIter = btree_set::IntoIter<TableId>;

    fn into_iter(self) -> Self::IntoIter {
        self.tables.into_iter()
    }
}

impl<'a> IntoIterator for &'a TableSet {
    type Item = &'a TableId;
    type IntoIter = btree_set::Iter<'a, TableId>;

    fn into_iter(self) -> Self::IntoIter {
        self.tables.iter()
    }
}
