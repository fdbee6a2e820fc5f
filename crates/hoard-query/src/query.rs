//! The top-level search query and its wire form.

use std::{fmt, str::FromStr};

use hoard_blob::BlobRef;
use serde::{Deserialize, Serialize};

use crate::{Constraint, error::InvalidConstraint};

/// Requested ordering of search results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortType {
    /// No ordering beyond what the candidate source happens to produce.
    #[default]
    #[serde(rename = "unsorted")]
    Unsorted,
    /// Most recently modified permanodes first.
    #[serde(rename = "-mod")]
    LastModifiedDesc,
    /// Least recently modified permanodes first.
    #[serde(rename = "mod")]
    LastModifiedAsc,
    /// Most recently created permanodes first.
    #[serde(rename = "-created")]
    CreatedDesc,
    /// Least recently created permanodes first.
    #[serde(rename = "created")]
    CreatedAsc,
    /// Lexicographic blob-ref order.
    #[serde(rename = "blobref")]
    BlobRefAsc,
    /// Geographically spread selection for map display.
    #[serde(rename = "map")]
    MapSort,
}

impl SortType {
    /// The wire name of this sort order.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unsorted => "unsorted",
            Self::LastModifiedDesc => "-mod",
            Self::LastModifiedAsc => "mod",
            Self::CreatedDesc => "-created",
            Self::CreatedAsc => "created",
            Self::BlobRefAsc => "blobref",
            Self::MapSort => "map",
        }
    }
}

impl fmt::Display for SortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unsorted" => Ok(Self::Unsorted),
            "-mod" => Ok(Self::LastModifiedDesc),
            "mod" => Ok(Self::LastModifiedAsc),
            "-created" => Ok(Self::CreatedDesc),
            "created" => Ok(Self::CreatedAsc),
            "blobref" => Ok(Self::BlobRefAsc),
            "map" => Ok(Self::MapSort),
            other => Err(format!("unknown sort order {other:?}")),
        }
    }
}

/// A search request: either a human expression or a pre-built constraint,
/// plus result shaping.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchQuery {
    /// Compact query expression; mutually exclusive with `constraint`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Pre-built constraint tree; mutually exclusive with `expression`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Constraint>,
    /// Maximum number of results; `0` means the default (200), negative
    /// means unlimited.
    #[serde(skip_serializing_if = "i64_is_zero")]
    pub limit: i64,
    /// Requested ordering; absent lets the planner pick a default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortType>,
    /// Centers the result window on this blob.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub around: Option<BlobRef>,
    /// Opaque continuation token from a previous response.
    #[serde(rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continuation: Option<String>,
}

/// skip_serializing_if helper for the zero limit.
fn i64_is_zero(v: &i64) -> bool {
    *v == 0
}

impl SearchQuery {
    /// A query for the given expression with default shaping.
    pub fn expression(expr: impl Into<String>) -> Self {
        Self {
            expression: Some(expr.into()),
            ..Self::default()
        }
    }

    /// A query for the given constraint with default shaping.
    pub fn constraint(constraint: Constraint) -> Self {
        Self {
            constraint: Some(constraint),
            ..Self::default()
        }
    }

    /// Checks the request-level invariants: expression/constraint
    /// exclusivity, continue/around exclusivity, and that neither
    /// combines with map sort.
    pub fn validate(&self) -> Result<(), InvalidConstraint> {
        if self.expression.is_some() && self.constraint.is_some() {
            return Err(InvalidConstraint::new(
                "query has both expression and constraint",
            ));
        }
        if self.continuation.is_some() && self.around.is_some() {
            return Err(InvalidConstraint::new(
                "continue and around are mutually exclusive",
            ));
        }
        if self.sort == Some(SortType::MapSort)
            && (self.continuation.is_some() || self.around.is_some())
        {
            return Err(InvalidConstraint::new(
                "map sort does not support continue or around",
            ));
        }
        Ok(())
    }
}
