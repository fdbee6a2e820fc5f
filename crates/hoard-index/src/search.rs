//! Search execution.
//!
//! [`Searcher`] ties the pieces together: it parses an expression if one
//! was given, validates and plans the query, streams candidates from the
//! chosen source through the compiled matcher, and assembles the response
//! (sort, limit, around window, continuation token, location area, map
//! spread).
//!
//! One query runs on one task: the candidate source produces, the matcher
//! consumes, and early termination travels back through the enumeration
//! callback's `ControlFlow`.

use std::{
    ops::ControlFlow,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::{DateTime, Utc};
use hoard_blob::{BlobMeta, BlobRef};
use hoard_query::{
    Area, Constraint, Geocoder, NamedGetter, ParseContext, PermanodeConstraint,
    PermanodeContinueConstraint, SearchQuery, SortType, parse_expression,
};
use serde::{Deserialize, Serialize};

use crate::{
    corpus::{Corpus, Index, MetaCallback},
    error::SearchError,
    mapsort::best_by_location,
    matcher::{MatchContext, SearchState, compile},
    plan::{CandidateSource, format_continue_token, parse_continue_token, pick_candidate_source},
};

/// Result cap applied when the query does not set one.
const DEFAULT_LIMIT: usize = 200;

/// One matched blob in a search response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResultBlob {
    /// The matched blob's ref.
    pub blob: BlobRef,
}

/// The result of running a [`SearchQuery`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    /// Matched blobs, in result order.
    pub blobs: Vec<SearchResultBlob>,
    /// Bounding box over every matched location, when any resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_area: Option<Area>,
    /// Token resuming the query after the last returned blob.
    #[serde(rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continuation: Option<String>,
}

/// Cooperative cancellation handle for a running query.
///
/// The enumeration observes the token between records. A token made with
/// [`CancelToken::new`] turns cancellation into
/// [`SearchError::Cancelled`]; one made with [`CancelToken::best_effort`]
/// lets the query return whatever it had collected.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    /// Shared flag plus the partial-results policy.
    inner: Arc<CancelInner>,
}

/// Shared state behind a [`CancelToken`].
#[derive(Debug, Default)]
struct CancelInner {
    /// Set once by [`CancelToken::cancel`].
    cancelled: AtomicBool,
    /// Whether partial results are acceptable.
    best_effort: bool,
}

impl CancelToken {
    /// A token whose cancellation aborts the query with an error.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token whose cancellation returns partial results instead.
    pub fn best_effort() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                best_effort: true,
            }),
        }
    }

    /// Requests cancellation; takes effect at the next record boundary.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Relaxed);
    }

    /// Reports whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Relaxed)
    }

    /// Whether partial results were requested on cancellation.
    fn is_best_effort(&self) -> bool {
        self.inner.best_effort
    }
}

/// Runs search queries against an index, optionally backed by the
/// in-memory corpus and the parse-time collaborators.
pub struct Searcher<'a> {
    /// The baseline index.
    index: &'a dyn Index,
    /// The in-memory corpus, when available.
    corpus: Option<&'a dyn Corpus>,
    /// Geocoder for `loc:` expressions.
    geocoder: Option<&'a dyn Geocoder>,
    /// Registry for `named:` expressions.
    named: Option<&'a dyn NamedGetter>,
}

impl<'a> Searcher<'a> {
    /// A searcher over a plain index, with no corpus-backed features.
    pub fn new(index: &'a dyn Index) -> Self {
        Self {
            index,
            corpus: None,
            geocoder: None,
            named: None,
        }
    }

    /// A searcher over an in-memory corpus, which also serves as the
    /// index.
    pub fn with_corpus(corpus: &'a dyn Corpus) -> Self {
        Self {
            index: corpus,
            corpus: Some(corpus),
            geocoder: None,
            named: None,
        }
    }

    /// Supplies a geocoder for `loc:` expressions.
    pub fn with_geocoder(mut self, geocoder: &'a dyn Geocoder) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    /// Supplies a named-search registry for `named:` expressions.
    pub fn with_named(mut self, named: &'a dyn NamedGetter) -> Self {
        self.named = Some(named);
        self
    }

    /// Runs a query to completion.
    pub fn query(&self, q: SearchQuery) -> Result<SearchResponse, SearchError> {
        self.query_with_cancel(q, &CancelToken::new())
    }

    /// Runs a query under a cancellation token.
    pub fn query_with_cancel(
        &self,
        q: SearchQuery,
        cancel: &CancelToken,
    ) -> Result<SearchResponse, SearchError> {
        q.validate()?;

        let constraint = match q.constraint {
            Some(c) => c,
            None => self.parse(q.expression.as_deref().unwrap_or(""))?,
        };
        constraint.validate()?;

        let sort = match q.sort {
            Some(sort) => sort,
            None if constraint.only_matches_permanode() => SortType::CreatedDesc,
            None => SortType::Unsorted,
        };
        if sort == SortType::MapSort && self.corpus.is_none() {
            return Err(SearchError::CorpusRequired("map sort"));
        }
        let limit: Option<usize> = match q.limit {
            0 => Some(DEFAULT_LIMIT),
            n if n < 0 => None,
            n => Some(n as usize),
        };

        let constraint = match &q.continuation {
            Some(token) => install_continuation(constraint, token, sort)?,
            None => constraint,
        };

        let source = pick_candidate_source(&constraint, sort, self.corpus.is_some());
        let sorted = source.sorted();
        let ctx = MatchContext {
            index: self.index,
            corpus: self.corpus,
            now: Utc::now(),
        };
        let matcher = compile(&constraint);
        let mut state = SearchState::default();

        let mut results: Vec<BlobRef> = Vec::new();
        let mut around_pos: Option<usize> = None;
        let mut limit_hit = false;
        let mut cancelled = false;
        let mut match_err: Option<SearchError> = None;

        self.enumerate(&source, &mut |bm: &BlobMeta| {
            if cancel.is_cancelled() {
                cancelled = true;
                return ControlFlow::Break(());
            }
            match matcher(&ctx, &mut state, bm) {
                Err(e) => {
                    match_err = Some(e);
                    return ControlFlow::Break(());
                }
                Ok(false) => return ControlFlow::Continue(()),
                Ok(true) => {}
            }
            results.push(bm.blob_ref.clone());
            if q.around.as_ref() == Some(&bm.blob_ref) {
                around_pos = Some(results.len() - 1);
            }
            if sort == SortType::MapSort || !sorted {
                return ControlFlow::Continue(());
            }
            let Some(limit) = limit else {
                return ControlFlow::Continue(());
            };
            if q.around.is_none() {
                if results.len() >= limit {
                    limit_hit = true;
                    return ControlFlow::Break(());
                }
            } else if let Some(pos) = around_pos
                && results.len() >= pos.saturating_sub(limit / 2) + limit
            {
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        })?;

        if let Some(e) = match_err {
            return Err(e);
        }
        if cancelled && !cancel.is_best_effort() {
            return Err(SearchError::Cancelled);
        }

        if !sorted && !matches!(sort, SortType::Unsorted | SortType::MapSort) {
            self.sort_results(&mut results, sort)?;
        }

        let mut area: Option<Area> = None;
        for blob in &results {
            if let Some(position) = state.locations.get(blob) {
                match &mut area {
                    Some(area) => area.expand(*position),
                    None => area = Some(Area::from_point(*position)),
                }
            }
        }

        if let Some(around) = &q.around {
            match results.iter().position(|r| r == around) {
                None => results.clear(),
                Some(pos) => {
                    if let Some(limit) = limit {
                        let start = pos.saturating_sub(limit / 2);
                        let end = (start + limit).min(results.len());
                        results.drain(end..);
                        results.drain(..start);
                    }
                }
            }
        } else if sort == SortType::MapSort {
            if let Some(limit) = limit {
                best_by_location(&mut results, &state.locations, area.as_ref(), limit);
            }
        } else if let Some(limit) = limit
            && results.len() > limit
        {
            results.truncate(limit);
        }

        let mut continuation = None;
        if sorted
            && limit_hit
            && q.around.is_none()
            && let Some(corpus) = self.corpus
            && let Some(last) = results.last()
        {
            let t = match sort {
                SortType::CreatedDesc => corpus.permanode_any_time(last),
                SortType::LastModifiedDesc => corpus.permanode_modtime(last),
                _ => None,
            };
            if let Some(t) = t {
                continuation = Some(format_continue_token(t, last));
            }
        }

        Ok(SearchResponse {
            blobs: results
                .into_iter()
                .map(|blob| SearchResultBlob { blob })
                .collect(),
            location_area: area,
            continuation,
        })
    }

    /// Parses an expression with this searcher's collaborators.
    fn parse(&self, expression: &str) -> Result<Constraint, SearchError> {
        let mut pctx = ParseContext::new();
        if let Some(geocoder) = self.geocoder {
            pctx = pctx.with_geocoder(geocoder);
        }
        if let Some(named) = self.named {
            pctx = pctx.with_named(named);
        }
        match parse_expression(&pctx, expression)?.constraint {
            Some(c) => Ok(c),
            None => unreachable!("the expression parser always yields a constraint"),
        }
    }

    /// Returns the corpus or a corpus-required error naming the feature.
    fn require_corpus(&self, what: &'static str) -> Result<&dyn Corpus, SearchError> {
        self.corpus.ok_or(SearchError::CorpusRequired(what))
    }

    /// Streams the chosen candidate source into `f`.
    fn enumerate(
        &self,
        source: &CandidateSource,
        f: &mut MetaCallback<'_>,
    ) -> Result<(), SearchError> {
        match source {
            CandidateSource::AllBlobs => self.index.enumerate_blob_meta(f),
            CandidateSource::PermanodesLastModified => {
                self.require_corpus("sorted permanode enumeration")?
                    .enumerate_permanodes_last_modified(f);
                Ok(())
            }
            CandidateSource::PermanodesCreatedDesc => {
                self.require_corpus("sorted permanode enumeration")?
                    .enumerate_permanodes_created(f, true);
                Ok(())
            }
            CandidateSource::PermanodesByNodeTypes(types) => {
                self.require_corpus("node-type enumeration")?
                    .enumerate_permanodes_by_node_types(f, types);
                Ok(())
            }
            CandidateSource::CamliBlobs(kind) => {
                self.require_corpus("camli-type enumeration")?
                    .enumerate_camli_blobs(*kind, f);
                Ok(())
            }
            CandidateSource::SingleBlob(br) => {
                self.require_corpus("single-blob lookup")?
                    .enumerate_single_blob(f, br);
                Ok(())
            }
        }
    }

    /// Sorts collected results when the source was not pre-sorted.
    fn sort_results(
        &self,
        results: &mut Vec<BlobRef>,
        sort: SortType,
    ) -> Result<(), SearchError> {
        match sort {
            SortType::BlobRefAsc => results.sort(),
            SortType::CreatedAsc
            | SortType::CreatedDesc
            | SortType::LastModifiedAsc
            | SortType::LastModifiedDesc => {
                let corpus = self
                    .corpus
                    .ok_or(SearchError::CorpusRequired("sorting by permanode time"))?;
                let by_created = matches!(sort, SortType::CreatedAsc | SortType::CreatedDesc);
                let mut keyed: Vec<(Option<DateTime<Utc>>, BlobRef)> = std::mem::take(results)
                    .into_iter()
                    .map(|blob| {
                        let t = if by_created {
                            corpus.permanode_any_time(&blob)
                        } else {
                            corpus.permanode_modtime(&blob)
                        };
                        (t, blob)
                    })
                    .collect();
                keyed.sort();
                if matches!(sort, SortType::CreatedDesc | SortType::LastModifiedDesc) {
                    keyed.reverse();
                }
                *results = keyed.into_iter().map(|(_, blob)| blob).collect();
            }
            SortType::Unsorted | SortType::MapSort => {}
        }
        Ok(())
    }
}

/// Wraps the constraint with the continuation cursor from `token`.
fn install_continuation(
    constraint: Constraint,
    token: &str,
    sort: SortType,
) -> Result<Constraint, SearchError> {
    if !constraint.only_matches_permanode()
        || !matches!(sort, SortType::CreatedDesc | SortType::LastModifiedDesc)
    {
        return Err(SearchError::BadContinue {
            token: token.to_string(),
            message: "continue requires a permanode query sorted by -created or -mod".to_string(),
        });
    }
    let (t, last) = parse_continue_token(token)?;
    let cursor = PermanodeConstraint {
        continuation: Some(PermanodeContinueConstraint {
            last_mod: (sort == SortType::LastModifiedDesc).then_some(t),
            last_created: (sort == SortType::CreatedDesc).then_some(t),
            last,
        }),
        ..PermanodeConstraint::default()
    };
    Ok(Constraint::and(
        Constraint::Permanode(Box::new(cursor)),
        constraint,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_flags() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        assert!(!token.is_best_effort());

        let clone = token.clone();
        assert!(clone.is_cancelled());

        assert!(CancelToken::best_effort().is_best_effort());
    }

    #[test]
    fn response_wire_form() {
        let blob: BlobRef = format!("sha224-{}", "ab".repeat(28)).parse().unwrap();
        let response = SearchResponse {
            blobs: vec![SearchResultBlob { blob: blob.clone() }],
            location_area: Some(Area {
                north: 1.0,
                south: -1.0,
                east: 2.0,
                west: -2.0,
            }),
            continuation: Some("pn:123:x".to_string()),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "blobs": [{"blob": blob.as_str()}],
                "locationArea": {"north": 1.0, "south": -1.0, "east": 2.0, "west": -2.0},
                "continue": "pn:123:x",
            })
        );

        let empty = SearchResponse::default();
        let json = serde_json::to_value(&empty).unwrap();
        assert_eq!(json, serde_json::json!({"blobs": []}));
    }

    #[test]
    fn continuation_install_rejects_wrong_queries() {
        let non_permanode = Constraint::Anything;
        assert!(matches!(
            install_continuation(non_permanode, "pn:1:x", SortType::CreatedDesc),
            Err(SearchError::BadContinue { .. })
        ));

        let permanode = Constraint::Permanode(Box::new(PermanodeConstraint::default()));
        assert!(matches!(
            install_continuation(permanode, "pn:1:x", SortType::BlobRefAsc),
            Err(SearchError::BadContinue { .. })
        ));
    }
}
