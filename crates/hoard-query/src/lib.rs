//! Constraint AST and query-expression language for hoard search.
//!
//! A search is described by a [`SearchQuery`]: either a compact expression
//! (`tag:funny is:image after:2011`) or a hand-built [`Constraint`] tree,
//! plus sorting and windowing. This crate owns everything up to (but not
//! including) evaluation:
//!
//! - the recursive [`Constraint`] tree and its validation
//! - the scalar predicates ([`IntConstraint`], [`StringConstraint`],
//!   [`TimeConstraint`], ...)
//! - the expression parser ([`parse_expression`]) and its keyword registry
//! - the parse-time collaborator seams: [`Geocoder`] for `loc:` and
//!   [`NamedGetter`] for `named:`
//!
//! # Example
//!
//! ```
//! use hoard_query::{ParseContext, parse_expression};
//!
//! let query = parse_expression(&ParseContext::new(), "tag:funny after:2011").unwrap();
//! assert!(query.constraint.is_some());
//! ```

#![warn(missing_docs)]

mod constraint;
mod error;
mod expr;
mod geo;
mod keyword;
mod named;
mod primitive;
mod query;

pub use constraint::{
    Constraint, DirConstraint, FileConstraint, LocationConstraint, LogicalConstraint, LogicalOp,
    MediaTagConstraint, PermanodeConstraint, PermanodeContinueConstraint, RelationConstraint,
    RelationKind,
};
pub use error::{ExprError, InvalidConstraint};
pub use expr::{Atom, ParseContext, parse_expression, render};
pub use geo::{Area, GeocodeError, Geocoder, LatLong, Rect, StaticGeocoder};
pub use keyword::{Keyword, registry};
pub use named::{NamedError, NamedGetter, StaticNamed};
pub use primitive::{FloatConstraint, IntConstraint, StringConstraint, TimeConstraint};
pub use query::{SearchQuery, SortType};
