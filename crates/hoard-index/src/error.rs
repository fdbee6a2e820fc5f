//! Error types for query planning and evaluation.

use hoard_query::{ExprError, InvalidConstraint};
use thiserror::Error;

/// Errors that can occur while planning or running a search.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The query expression failed to parse.
    #[error(transparent)]
    Expr(#[from] ExprError),

    /// The constraint tree or query shape failed validation.
    #[error(transparent)]
    Invalid(#[from] InvalidConstraint),

    /// An operation needs the in-memory corpus but only the plain index
    /// is available.
    #[error("operation requires the in-memory corpus: {0}")]
    CorpusRequired(&'static str),

    /// The continuation token is malformed or does not fit the query.
    #[error("invalid continue token {token:?}: {message}")]
    BadContinue {
        /// The offending token.
        token: String,
        /// What was wrong with it.
        message: String,
    },

    /// The query was cancelled before completion.
    #[error("query cancelled")]
    Cancelled,

    /// The underlying index failed.
    #[error("index error: {0}")]
    Index(String),
}
