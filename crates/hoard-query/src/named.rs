//! The named-search seam.
//!
//! `named:foo` resolves a stored expression by name and re-parses it as a
//! sub-query. Storage of named searches is the embedding's concern; the
//! parser only needs the lookup.

use std::collections::HashMap;

use thiserror::Error;

/// Error reported by a [`NamedGetter`] lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct NamedError(pub String);

/// Resolves a search name to its stored expression text.
pub trait NamedGetter {
    /// Returns the expression stored under `name`.
    fn get_named(&self, name: &str) -> Result<String, NamedError>;
}

/// A named-search registry backed by a fixed table.
#[derive(Debug, Clone, Default)]
pub struct StaticNamed {
    /// Search name to expression text.
    searches: HashMap<String, String>,
}

impl StaticNamed {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `expression` under `name`.
    pub fn insert(&mut self, name: impl Into<String>, expression: impl Into<String>) {
        self.searches.insert(name.into(), expression.into());
    }
}

impl NamedGetter for StaticNamed {
    fn get_named(&self, name: &str) -> Result<String, NamedError> {
        self.searches
            .get(name)
            .cloned()
            .ok_or_else(|| NamedError(format!("no search named {name:?}")))
    }
}
