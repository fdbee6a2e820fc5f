//! Query planning: candidate-source selection and continuation tokens.
//!
//! The planner's job is to choose the cheapest enumeration that is
//! guaranteed to contain every possible match. Sorted permanode
//! enumerations additionally let the collection loop stop at the limit
//! and hand out continuation tokens.

use chrono::{DateTime, Utc};
use hoard_blob::{BlobRef, CamliKind};
use hoard_query::{Constraint, SortType};

use crate::error::SearchError;

/// The enumeration a query's candidates are drawn from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CandidateSource {
    /// Corpus permanodes by last-modified time, newest first.
    PermanodesLastModified,
    /// Corpus permanodes by creation time, newest first.
    PermanodesCreatedDesc,
    /// Corpus permanodes of specific node types, unordered.
    PermanodesByNodeTypes(Vec<String>),
    /// A single blob pinned by a complete ref.
    SingleBlob(BlobRef),
    /// Corpus schema blobs of one kind (`None` meaning any kind).
    CamliBlobs(Option<CamliKind>),
    /// The index's full blob-meta enumeration.
    AllBlobs,
}

impl CandidateSource {
    /// Whether the stream already arrives in the requested sort order.
    pub(crate) fn sorted(&self) -> bool {
        matches!(self, Self::PermanodesLastModified | Self::PermanodesCreatedDesc)
    }
}

/// Picks the candidate source for a constraint, in priority order. The
/// corpus-backed sources apply only when a corpus exists.
pub(crate) fn pick_candidate_source(
    constraint: &Constraint,
    sort: SortType,
    have_corpus: bool,
) -> CandidateSource {
    if !have_corpus {
        return CandidateSource::AllBlobs;
    }
    if constraint.only_matches_permanode() {
        match sort {
            SortType::LastModifiedDesc => return CandidateSource::PermanodesLastModified,
            SortType::CreatedDesc => return CandidateSource::PermanodesCreatedDesc,
            _ => {}
        }
        if let Some(types) = constraint.permanode_node_types() {
            return CandidateSource::PermanodesByNodeTypes(types);
        }
    }
    if let Some(br) = constraint.matches_at_most_one_blob() {
        return CandidateSource::SingleBlob(br);
    }
    if constraint.matches_file_by_whole_ref() {
        return CandidateSource::CamliBlobs(Some(CamliKind::File));
    }
    if let Some(kind) = constraint.camli_type_hint() {
        return CandidateSource::CamliBlobs(kind);
    }
    CandidateSource::AllBlobs
}

/// Parses a continuation token of the form `pn:<unixNano>:<blobRef>`.
pub(crate) fn parse_continue_token(
    token: &str,
) -> Result<(DateTime<Utc>, BlobRef), SearchError> {
    let bad = |message: &str| SearchError::BadContinue {
        token: token.to_string(),
        message: message.to_string(),
    };
    let mut parts = token.splitn(3, ':');
    if parts.next() != Some("pn") {
        return Err(bad("expected pn:<time>:<ref>"));
    }
    let (Some(nanos), Some(last)) = (parts.next(), parts.next()) else {
        return Err(bad("expected pn:<time>:<ref>"));
    };
    let nanos: i64 = nanos.parse().map_err(|_| bad("bad timestamp"))?;
    let last: BlobRef = last.parse().map_err(|_| bad("bad blob ref"))?;
    Ok((DateTime::from_timestamp_nanos(nanos), last))
}

/// Formats a continuation token; times past the representable range
/// clamp.
pub(crate) fn format_continue_token(t: DateTime<Utc>, last: &BlobRef) -> String {
    format!("pn:{}:{}", t.timestamp_nanos_opt().unwrap_or(i64::MAX), last)
}

#[cfg(test)]
mod tests {
    use hoard_query::{ParseContext, PermanodeConstraint, parse_expression};

    use super::*;

    /// A valid sha224 ref string.
    fn ref_str() -> String {
        format!("sha224-{}", "ab".repeat(28))
    }

    /// The constraint of a parsed expression.
    fn parsed(expr: &str) -> Constraint {
        parse_expression(&ParseContext::new(), expr)
            .unwrap()
            .constraint
            .unwrap()
    }

    #[test]
    fn permanode_sorted_sources() {
        let c = parsed("tag:funny");
        assert_eq!(
            pick_candidate_source(&c, SortType::CreatedDesc, true),
            CandidateSource::PermanodesCreatedDesc
        );
        assert_eq!(
            pick_candidate_source(&c, SortType::LastModifiedDesc, true),
            CandidateSource::PermanodesLastModified
        );
        assert!(pick_candidate_source(&c, SortType::CreatedDesc, true).sorted());
    }

    #[test]
    fn node_types_source() {
        let c = Constraint::and(
            Constraint::Permanode(Box::new(PermanodeConstraint::attr_equals(
                "camliNodeType",
                "event",
            ))),
            Constraint::Anything,
        );
        assert_eq!(
            pick_candidate_source(&c, SortType::Unsorted, true),
            CandidateSource::PermanodesByNodeTypes(vec!["event".to_string()])
        );
    }

    #[test]
    fn single_blob_source() {
        let c = parsed(&format!("ref:{}", ref_str()));
        assert_eq!(
            pick_candidate_source(&c, SortType::Unsorted, true),
            CandidateSource::SingleBlob(ref_str().parse().unwrap())
        );
    }

    #[test]
    fn camli_type_source() {
        let c = Constraint::CamliType(CamliKind::File);
        assert_eq!(
            pick_candidate_source(&c, SortType::Unsorted, true),
            CandidateSource::CamliBlobs(Some(CamliKind::File))
        );
        assert_eq!(
            pick_candidate_source(&Constraint::AnyCamliType, SortType::Unsorted, true),
            CandidateSource::CamliBlobs(None)
        );
    }

    #[test]
    fn no_corpus_always_scans() {
        let c = parsed("tag:funny");
        assert_eq!(
            pick_candidate_source(&c, SortType::CreatedDesc, false),
            CandidateSource::AllBlobs
        );
    }

    #[test]
    fn anything_scans_everything() {
        assert_eq!(
            pick_candidate_source(&Constraint::Anything, SortType::Unsorted, true),
            CandidateSource::AllBlobs
        );
    }

    #[test]
    fn continue_token_round_trips() {
        let last: BlobRef = ref_str().parse().unwrap();
        let t = DateTime::from_timestamp_nanos(1_700_000_000_123_456_789);
        let token = format_continue_token(t, &last);
        assert_eq!(token, format!("pn:1700000000123456789:{}", ref_str()));
        let (t2, last2) = parse_continue_token(&token).unwrap();
        assert_eq!(t2, t);
        assert_eq!(last2, last);
    }

    #[test]
    fn continue_token_rejects_junk() {
        for bad in ["", "pn:", "pn:abc:def", "xx:1:sha224-ab", "pn:123:notaref"] {
            assert!(parse_continue_token(bad).is_err(), "accepted {bad:?}");
        }
    }
}
