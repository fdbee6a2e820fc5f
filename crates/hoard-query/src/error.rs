//! Error types for expression parsing and constraint validation.

use thiserror::Error;

/// Error produced while parsing a query expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    /// No registered keyword claimed the atom.
    #[error("unknown expression: {0:?}")]
    UnknownPredicate(String),

    /// A keyword claimed the atom but the argument count is wrong.
    #[error("predicate {predicate:?} expects {want} argument(s)")]
    ArgCount {
        /// The keyword that claimed the atom.
        predicate: &'static str,
        /// How many arguments it requires.
        want: usize,
    },

    /// A keyword claimed the atom but an argument is malformed.
    #[error("predicate {predicate:?}: {message}")]
    BadArgument {
        /// The keyword that claimed the atom.
        predicate: &'static str,
        /// What was wrong with the argument.
        message: String,
    },

    /// A double quote was opened but never closed.
    #[error("unclosed quote in expression")]
    UnclosedQuote,

    /// `loc:` was used but no geocoder is configured.
    #[error("no geocoder configured for loc: searches")]
    NoGeocoder,

    /// The geocoder failed or returned no results for the place.
    #[error("geocoding {place:?}: {message}")]
    Geocode {
        /// The place name that was looked up.
        place: String,
        /// The failure reported by the geocoder.
        message: String,
    },

    /// `named:` was used but no named-search registry is configured.
    #[error("no named-search registry configured for named: searches")]
    NoNamedRegistry,

    /// A named search could not be resolved.
    #[error("named search {name:?}: {message}")]
    Named {
        /// The requested search name.
        name: String,
        /// The failure reported by the registry.
        message: String,
    },

    /// Named searches referenced each other past the nesting limit.
    #[error("named search expansion too deep (cycle?)")]
    NamedTooDeep,
}

impl ExprError {
    /// Convenience constructor for [`ExprError::BadArgument`].
    pub(crate) fn bad_arg(predicate: &'static str, message: impl Into<String>) -> Self {
        Self::BadArgument {
            predicate,
            message: message.into(),
        }
    }
}

/// Error produced when a constraint tree fails validation.
///
/// Validation runs once per query, before any enumeration; the message
/// names the offending node or field combination.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid constraint: {message}")]
pub struct InvalidConstraint {
    /// Description of the violated invariant.
    message: String,
}

impl InvalidConstraint {
    /// Creates a validation error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
