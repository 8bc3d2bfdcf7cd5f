//! Runtime table alias allocation
//!
//! One allocator backs the outer query of a plan; every EXISTS subquery gets its own
//! scoped allocator whose aliases carry the scope tag (`x0_p0`), so subquery tables
//! can never shadow the outer aliases they are correlated with.

use std::collections::{BTreeMap, HashSet};

use crate::error::{QueryError, Result};

const DEFAULT_PREFIX: char = 't';

#[derive(Debug, Default)]
pub struct AliasAllocator {
    scope: Option<String>,
    counters: BTreeMap<char, usize>,
    issued: HashSet<String>,
}

impl AliasAllocator {
    /// Allocator for the outer query
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocator for a subquery scope; aliases look like `{scope}_{prefix}{n}`
    pub fn scoped(scope: impl Into<String>) -> Self {
        Self {
            scope: Some(scope.into()),
            ..Self::default()
        }
    }

    /// Allocate the next alias for an object with the given alias hint
    pub fn alloc(&mut self, alias_hint: &str) -> Result<String> {
        let prefix = alias_prefix(alias_hint);
        let counter = self.counters.entry(prefix).or_insert(0);
        let alias = match &self.scope {
            Some(scope) => format!("{}_{}{}", scope, prefix, counter),
            None => format!("{}{}", prefix, counter),
        };
        *counter += 1;

        if !self.issued.insert(alias.clone()) {
            return Err(QueryError::AmbiguousAlias(alias));
        }
        Ok(alias)
    }

    pub fn issued_count(&self) -> usize {
        self.issued.len()
    }
}

/// First ASCII letter of the hint, lower-cased; `t` when there is none
pub fn alias_prefix(alias_hint: &str) -> char {
    alias_hint
        .chars()
        .find(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase())
        .unwrap_or(DEFAULT_PREFIX)
}
