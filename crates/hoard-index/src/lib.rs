//! Query planning and evaluation for the hoard data store.
//!
//! This crate takes a [`SearchQuery`](hoard_query::SearchQuery) and runs
//! it against an index: it picks the cheapest candidate enumeration,
//! compiles the constraint tree into matchers, and assembles the result
//! window (sort, limit, around, continuation, map spread).
//!
//! The index is consumed through two traits: [`Index`] is the baseline
//! surface any backend can provide, and [`Corpus`] is the in-memory
//! surface with sorted enumerations and attribute-at-a-time state.
//! [`MemoryCorpus`] implements both.
//!
//! # Searching
//!
//! ```
//! use hoard_index::{MemoryCorpus, Searcher};
//! use hoard_query::SearchQuery;
//!
//! let corpus = MemoryCorpus::new("key-owner");
//! let searcher = Searcher::with_corpus(&corpus);
//! let response = searcher.query(SearchQuery::expression("tag:funny")).unwrap();
//! assert!(response.blobs.is_empty());
//! ```

#![warn(missing_docs)]

mod corpus;
mod error;
mod location;
mod mapsort;
mod matcher;
mod memory;
mod plan;
mod search;

pub use corpus::{Claim, ClaimCallback, ClaimKind, Corpus, FileInfo, ImageInfo, Index, MetaCallback};
pub use error::SearchError;
pub use memory::MemoryCorpus;
pub use search::{CancelToken, SearchResponse, SearchResultBlob, Searcher};
