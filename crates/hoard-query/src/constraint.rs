//! The recursive constraint tree.
//!
//! A [`Constraint`] is a tagged tree: each node has exactly one primary
//! shape, and the permanode/file/dir shapes carry optional refinements
//! that AND together. Trees are built by the expression parser or
//! directly by callers, validated once, and then treated as immutable for
//! the duration of a query.

use chrono::{DateTime, Utc};
use hoard_blob::{BlobRef, CamliKind};
use serde::{Deserialize, Serialize};

use crate::{
    error::InvalidConstraint,
    primitive::{FloatConstraint, IntConstraint, StringConstraint, TimeConstraint},
};

/// A node in the constraint tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Constraint {
    /// Matches every blob.
    Anything,
    /// Matches blobs with the given structural type.
    CamliType(CamliKind),
    /// Matches any schema blob, of whatever type.
    AnyCamliType,
    /// Matches blobs whose ref string starts with the prefix.
    BlobRefPrefix(String),
    /// Matches on the blob's byte size.
    BlobSize(IntConstraint),
    /// Boolean combination of one or two sub-trees.
    Logical(Box<LogicalConstraint>),
    /// Matches permanodes.
    Permanode(Box<PermanodeConstraint>),
    /// Matches file blobs.
    File(Box<FileConstraint>),
    /// Matches directory blobs.
    Dir(Box<DirConstraint>),
}

/// The operator of a [`Constraint::Logical`] node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOp {
    /// Both children must match; `b` is not evaluated when `a` fails.
    And,
    /// At least one child must match; `b` is not evaluated when `a`
    /// matches.
    Or,
    /// Exactly one child must match; both are evaluated.
    Xor,
    /// Negates `a`; `b` must be absent.
    Not,
}

/// A Boolean combination of sub-constraints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalConstraint {
    /// The operator.
    pub op: LogicalOp,
    /// First operand.
    pub a: Constraint,
    /// Second operand; required for `and`/`or`/`xor`, absent for `not`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b: Option<Constraint>,
}

/// Matches a permanode, optionally constraining its attributes as of a
/// point in time, its claim times, relations, and location.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PermanodeConstraint {
    /// Attribute to inspect; requires at least one of the value
    /// refinements or `num_value`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attr: Option<String>,
    /// Point in time at which attribute values are resolved; defaults to
    /// the query's evaluation time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<DateTime<Utc>>,
    /// Requires some attribute value to equal this string exactly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Requires some attribute value to satisfy this string constraint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_matches: Option<StringConstraint>,
    /// Requires some attribute value to parse as an integer satisfying
    /// this constraint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_matches_int: Option<IntConstraint>,
    /// Requires some attribute value to parse as a float satisfying this
    /// constraint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_matches_float: Option<FloatConstraint>,
    /// Requires some attribute value to be a blob ref whose blob matches
    /// the sub-constraint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_in_set: Option<Box<Constraint>>,
    /// Requires every attribute value (and at least one) to satisfy the
    /// value refinements, not just one.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub value_all: bool,
    /// Constrains how many values the attribute has.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_value: Option<IntConstraint>,
    /// Excludes permanodes marked hidden (`camliDefVis` = `hide`).
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skip_hidden: bool,
    /// Constrains the time of the last claim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mod_time: Option<TimeConstraint>,
    /// Constrains the permanode's own time (first claim, or explicit).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<TimeConstraint>,
    /// Constrains related permanodes one hop away.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<Box<RelationConstraint>>,
    /// Constrains the permanode's resolved location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationConstraint>,
    /// Pagination cursor installed by the planner; never part of the wire
    /// form.
    #[serde(skip)]
    pub continuation: Option<PermanodeContinueConstraint>,
}

impl PermanodeConstraint {
    /// A constraint requiring attribute `attr` to have some value equal
    /// to `value`.
    pub fn attr_equals(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attr: Some(attr.into()),
            value: Some(value.into()),
            ..Self::default()
        }
    }

    /// Reports whether any per-value refinement is present (`num_value`
    /// alone does not count; it constrains the value list, not a value).
    pub fn has_value_refinement(&self) -> bool {
        // Exhaustive destructure: adding a field forces a decision here.
        let Self {
            attr: _,
            at: _,
            value,
            value_matches,
            value_matches_int,
            value_matches_float,
            value_in_set,
            value_all: _,
            num_value: _,
            skip_hidden: _,
            mod_time: _,
            time: _,
            relation: _,
            location: _,
            continuation: _,
        } = self;
        value.is_some()
            || value_matches.is_some()
            || value_matches_int.is_some()
            || value_matches_float.is_some()
            || value_in_set.is_some()
    }

    /// Reports whether the node carries any refinement at all. A node
    /// with none matches nothing; `at` and the value companions are
    /// modifiers of `attr`, not refinements in their own right.
    pub fn has_refinement(&self) -> bool {
        // Exhaustive destructure: adding a field forces a decision here.
        let Self {
            attr,
            at: _,
            value: _,
            value_matches: _,
            value_matches_int: _,
            value_matches_float: _,
            value_in_set: _,
            value_all: _,
            num_value: _,
            skip_hidden,
            mod_time,
            time,
            relation,
            location,
            continuation,
        } = self;
        attr.is_some()
            || *skip_hidden
            || mod_time.is_some()
            || time.is_some()
            || relation.is_some()
            || location.is_some()
            || continuation.is_some()
    }

    /// Validates this node and its sub-constraints.
    fn validate(&self) -> Result<(), InvalidConstraint> {
        if self.attr.is_some() && !self.has_value_refinement() && self.num_value.is_none() {
            return Err(InvalidConstraint::new(
                "permanode attr constraint has no value predicate",
            ));
        }
        if self.value_all && !self.has_value_refinement() {
            return Err(InvalidConstraint::new(
                "valueAll set without a value predicate",
            ));
        }
        if let Some(ic) = &self.value_matches_int {
            ic.validate()?;
        }
        if let Some(fc) = &self.value_matches_float {
            fc.validate()?;
        }
        if let Some(sc) = &self.value_matches {
            sc.validate()?;
        }
        if let Some(ic) = &self.num_value {
            ic.validate()?;
        }
        if let Some(sub) = &self.value_in_set {
            sub.validate()?;
        }
        if let Some(rc) = &self.relation {
            rc.validate()?;
        }
        Ok(())
    }
}

/// Pagination cursor for permanode queries on a time-sorted stream.
///
/// Accepts only blobs strictly earlier than the cursor time, or at the
/// same time with a ref strictly less than the cursor ref.
#[derive(Clone, Debug, PartialEq)]
pub struct PermanodeContinueConstraint {
    /// Cursor on the last-modified stream.
    pub last_mod: Option<DateTime<Utc>>,
    /// Cursor on the created stream.
    pub last_created: Option<DateTime<Utc>>,
    /// Tie-breaking ref at the cursor time.
    pub last: BlobRef,
}

/// Matches a file blob through its index record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileConstraint {
    /// Constrains the file size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<IntConstraint>,
    /// Requires an image MIME type (`image/*`).
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_image: bool,
    /// Constrains the file name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<StringConstraint>,
    /// Constrains the MIME type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<StringConstraint>,
    /// Constrains the EXIF capture time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<TimeConstraint>,
    /// Constrains the file modification time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mod_time: Option<TimeConstraint>,
    /// Requires some parent directory to match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_dir: Option<Box<DirConstraint>>,
    /// Requires the hash of the reassembled content to equal this ref.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whole_ref: Option<BlobRef>,
    /// Constrains the image width in pixels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<IntConstraint>,
    /// Constrains the image height in pixels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<IntConstraint>,
    /// Constrains the width/height ratio.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wh_ratio: Option<FloatConstraint>,
    /// Constrains the file's GPS position.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationConstraint>,
    /// Constrains embedded media tags (ID3 and friends).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_tag: Option<MediaTagConstraint>,
}

impl FileConstraint {
    /// Reports whether the node carries any refinement at all. A node
    /// with none matches nothing.
    pub fn has_refinement(&self) -> bool {
        // Exhaustive destructure: adding a field forces a decision here.
        let Self {
            file_size,
            is_image,
            file_name,
            mime_type,
            time,
            mod_time,
            parent_dir,
            whole_ref,
            width,
            height,
            wh_ratio,
            location,
            media_tag,
        } = self;
        file_size.is_some()
            || *is_image
            || file_name.is_some()
            || mime_type.is_some()
            || time.is_some()
            || mod_time.is_some()
            || parent_dir.is_some()
            || whole_ref.is_some()
            || width.is_some()
            || height.is_some()
            || wh_ratio.is_some()
            || location.is_some()
            || media_tag.is_some()
    }

    /// Validates this node and its sub-constraints.
    fn validate(&self) -> Result<(), InvalidConstraint> {
        for ic in [&self.file_size, &self.width, &self.height].into_iter().flatten() {
            ic.validate()?;
        }
        if let Some(fc) = &self.wh_ratio {
            fc.validate()?;
        }
        for sc in [&self.file_name, &self.mime_type].into_iter().flatten() {
            sc.validate()?;
        }
        if let Some(dc) = &self.parent_dir {
            dc.validate()?;
        }
        if let Some(mt) = &self.media_tag {
            if let Some(sc) = &mt.string {
                sc.validate()?;
            }
            if let Some(ic) = &mt.int {
                ic.validate()?;
            }
        }
        Ok(())
    }
}

/// Matches a value in a file's media-tag map.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaTagConstraint {
    /// Tag to inspect (e.g. `artist`); all tags are searched when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// String constraint on the tag value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub string: Option<StringConstraint>,
    /// Integer constraint on the tag value, after decimal parse.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub int: Option<IntConstraint>,
}

/// Matches a directory blob.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirConstraint {
    /// Also requires the directory's own ref to start with this prefix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_ref_prefix: Option<String>,
    /// Constrains the directory's name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<StringConstraint>,
    /// Requires some parent directory to match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_dir: Option<Box<DirConstraint>>,
    /// Constrains the number of files directly in the directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_file_count: Option<IntConstraint>,
    /// Requires some direct child to match; exclusive with
    /// `recursive_contains`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contains: Option<Box<Constraint>>,
    /// Like `contains`, but descends into child directories when no
    /// direct child matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recursive_contains: Option<Box<Constraint>>,
}

impl DirConstraint {
    /// Reports whether the node carries any refinement at all. A node
    /// with none matches nothing.
    pub fn has_refinement(&self) -> bool {
        // Exhaustive destructure: adding a field forces a decision here.
        let Self {
            blob_ref_prefix,
            file_name,
            parent_dir,
            top_file_count,
            contains,
            recursive_contains,
        } = self;
        blob_ref_prefix.is_some()
            || file_name.is_some()
            || parent_dir.is_some()
            || top_file_count.is_some()
            || contains.is_some()
            || recursive_contains.is_some()
    }

    /// Validates this node and its sub-constraints.
    fn validate(&self) -> Result<(), InvalidConstraint> {
        if self.contains.is_some() && self.recursive_contains.is_some() {
            return Err(InvalidConstraint::new(
                "dir contains and recursiveContains are mutually exclusive",
            ));
        }
        if let Some(sc) = &self.file_name {
            sc.validate()?;
        }
        if let Some(ic) = &self.top_file_count {
            ic.validate()?;
        }
        if let Some(dc) = &self.parent_dir {
            dc.validate()?;
        }
        for sub in [&self.contains, &self.recursive_contains].into_iter().flatten() {
            sub.validate()?;
        }
        Ok(())
    }
}

/// Which permanodes one hop away are inspected by a
/// [`RelationConstraint`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    /// The candidate's parents (claims pointing at it).
    Parent,
    /// The candidate's children (its own member/path claims).
    Child,
    /// Reserved; not implemented.
    Progeny,
    /// Reserved; not implemented.
    Ancestor,
}

/// Constrains permanodes related to the candidate by member/path claims.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationConstraint {
    /// Which side of the relation to walk.
    pub relation: RelationKind,
    /// Claim attribute that forms the edge; defaults to `camliMember`
    /// plus any `camliPath:*`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_type: Option<String>,
    /// At least one related permanode must match; exclusive with `all`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any: Option<Box<Constraint>>,
    /// Every related permanode must match, and at least one must exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all: Option<Box<Constraint>>,
}

/// Matches a resolved latitude/longitude against a rectangle, or merely
/// requires that a location exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationConstraint {
    /// Matches any location at all; the rectangle is ignored.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub any: bool,
    /// Northern latitude bound.
    #[serde(skip_serializing_if = "f64_is_zero")]
    pub north: f64,
    /// Southern latitude bound.
    #[serde(skip_serializing_if = "f64_is_zero")]
    pub south: f64,
    /// Eastern longitude bound.
    #[serde(skip_serializing_if = "f64_is_zero")]
    pub east: f64,
    /// Western longitude bound.
    #[serde(skip_serializing_if = "f64_is_zero")]
    pub west: f64,
}

/// skip_serializing_if helper for zero coordinates.
fn f64_is_zero(v: &f64) -> bool {
    *v == 0.0
}

impl LocationConstraint {
    /// Reports whether the point is inside the rectangle. The longitude
    /// span wraps across the 180th meridian when `west > east`.
    pub fn matches_point(&self, latitude: f64, longitude: f64) -> bool {
        if self.any {
            return true;
        }
        if latitude < self.south || latitude > self.north {
            return false;
        }
        if self.west <= self.east {
            longitude >= self.west && longitude <= self.east
        } else {
            longitude >= self.west || longitude <= self.east
        }
    }
}

impl Constraint {
    /// `a AND b`.
    pub fn and(a: Self, b: Self) -> Self {
        Self::Logical(Box::new(LogicalConstraint {
            op: LogicalOp::And,
            a,
            b: Some(b),
        }))
    }

    /// `a OR b`.
    pub fn or(a: Self, b: Self) -> Self {
        Self::Logical(Box::new(LogicalConstraint {
            op: LogicalOp::Or,
            a,
            b: Some(b),
        }))
    }

    /// `NOT a`.
    pub fn not(a: Self) -> Self {
        Self::Logical(Box::new(LogicalConstraint {
            op: LogicalOp::Not,
            a,
            b: None,
        }))
    }

    /// Validates the whole tree against the structural invariants.
    pub fn validate(&self) -> Result<(), InvalidConstraint> {
        match self {
            Self::Anything | Self::CamliType(_) | Self::AnyCamliType => Ok(()),
            Self::BlobRefPrefix(p) => {
                if p.is_empty() {
                    return Err(InvalidConstraint::new("empty blobRefPrefix"));
                }
                Ok(())
            }
            Self::BlobSize(ic) => ic.validate(),
            Self::Logical(lc) => {
                lc.a.validate()?;
                match (lc.op, &lc.b) {
                    (LogicalOp::Not, None) => Ok(()),
                    (LogicalOp::Not, Some(_)) => {
                        Err(InvalidConstraint::new("logical \"not\" takes no second operand"))
                    }
                    (_, Some(b)) => b.validate(),
                    (op, None) => Err(InvalidConstraint::new(format!(
                        "logical {:?} requires two operands",
                        op
                    ))),
                }
            }
            Self::Permanode(pc) => pc.validate(),
            Self::File(fc) => fc.validate(),
            Self::Dir(dc) => dc.validate(),
        }
    }

    /// Reports whether the tree can only ever match permanodes: a
    /// permanode node, a permanode camli-type node, or an `and` where
    /// either side qualifies.
    pub fn only_matches_permanode(&self) -> bool {
        match self {
            Self::Permanode(_) => true,
            Self::CamliType(CamliKind::Permanode) => true,
            Self::Logical(lc) if lc.op == LogicalOp::And => {
                lc.a.only_matches_permanode()
                    || lc.b.as_ref().is_some_and(Self::only_matches_permanode)
            }
            _ => false,
        }
    }

    /// If the tree can match at most one specific blob (a blob-ref prefix
    /// that is a complete hash, possibly under an `and`), returns it.
    pub fn matches_at_most_one_blob(&self) -> Option<BlobRef> {
        match self {
            Self::BlobRefPrefix(p) => p.parse().ok(),
            Self::Logical(lc) if lc.op == LogicalOp::And => lc
                .a
                .matches_at_most_one_blob()
                .or_else(|| lc.b.as_ref().and_then(Self::matches_at_most_one_blob)),
            _ => None,
        }
    }

    /// Reports whether the tree pins a file's whole-ref, possibly under
    /// an `and`.
    pub fn matches_file_by_whole_ref(&self) -> bool {
        match self {
            Self::File(fc) => fc.whole_ref.is_some(),
            Self::Logical(lc) if lc.op == LogicalOp::And => {
                lc.a.matches_file_by_whole_ref()
                    || lc.b.as_ref().is_some_and(Self::matches_file_by_whole_ref)
            }
            _ => false,
        }
    }

    /// If the tree pins the permanode node type (`camliNodeType` attr) to
    /// a known set, returns the set: a direct equality, an `and` where
    /// either side deduces one, or an `or` where both sides do.
    pub fn permanode_node_types(&self) -> Option<Vec<String>> {
        match self {
            Self::Permanode(pc) => {
                if pc.attr.as_deref() == Some("camliNodeType")
                    && let Some(v) = &pc.value
                {
                    return Some(vec![v.clone()]);
                }
                None
            }
            Self::Logical(lc) => match lc.op {
                LogicalOp::And => lc
                    .a
                    .permanode_node_types()
                    .or_else(|| lc.b.as_ref().and_then(Self::permanode_node_types)),
                LogicalOp::Or => {
                    let mut types = lc.a.permanode_node_types()?;
                    types.extend(lc.b.as_ref().and_then(Self::permanode_node_types)?);
                    Some(types)
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// If this node is a camli-type constraint, returns the enumerable
    /// kind (`None` inner meaning "any schema blob").
    pub fn camli_type_hint(&self) -> Option<Option<CamliKind>> {
        match self {
            Self::CamliType(kind) => Some(Some(*kind)),
            Self::AnyCamliType => Some(None),
            _ => None,
        }
    }
}

impl RelationConstraint {
    /// Validates the relation kind and the any/all exclusivity.
    fn validate(&self) -> Result<(), InvalidConstraint> {
        match self.relation {
            RelationKind::Parent | RelationKind::Child => {}
            RelationKind::Progeny | RelationKind::Ancestor => {
                return Err(InvalidConstraint::new(
                    "relation progeny/ancestor is reserved but not implemented",
                ));
            }
        }
        match (&self.any, &self.all) {
            (Some(any), None) => any.validate(),
            (None, Some(all)) => all.validate(),
            _ => Err(InvalidConstraint::new(
                "relation requires exactly one of any or all",
            )),
        }
    }

    /// Reports whether a claim attribute forms an edge for this relation.
    pub fn matches_edge_attr(&self, attr: &str) -> bool {
        match &self.edge_type {
            Some(edge) => attr == edge,
            None => attr == "camliMember" || attr.starts_with("camliPath:"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A valid sha224 ref string for fixtures.
    fn ref_str(fill: &str) -> String {
        format!("sha224-{}", fill.repeat(28))
    }

    #[test]
    fn logical_arity_is_validated() {
        let not_two = Constraint::Logical(Box::new(LogicalConstraint {
            op: LogicalOp::Not,
            a: Constraint::Anything,
            b: Some(Constraint::Anything),
        }));
        assert!(not_two.validate().is_err());

        let and_one = Constraint::Logical(Box::new(LogicalConstraint {
            op: LogicalOp::And,
            a: Constraint::Anything,
            b: None,
        }));
        assert!(and_one.validate().is_err());

        assert!(Constraint::not(Constraint::Anything).validate().is_ok());
        assert!(Constraint::and(Constraint::Anything, Constraint::AnyCamliType)
            .validate()
            .is_ok());
    }

    #[test]
    fn permanode_attr_needs_value_predicate() {
        let bare = Constraint::Permanode(Box::new(PermanodeConstraint {
            attr: Some("tag".to_string()),
            ..PermanodeConstraint::default()
        }));
        assert!(bare.validate().is_err());

        let with_value = Constraint::Permanode(Box::new(PermanodeConstraint::attr_equals(
            "tag", "funny",
        )));
        assert!(with_value.validate().is_ok());

        let with_count = Constraint::Permanode(Box::new(PermanodeConstraint {
            attr: Some("tag".to_string()),
            num_value: Some(IntConstraint::exact(2)),
            ..PermanodeConstraint::default()
        }));
        assert!(with_count.validate().is_ok());
    }

    #[test]
    fn refinement_detection() {
        assert!(!PermanodeConstraint::default().has_refinement());
        assert!(
            PermanodeConstraint {
                skip_hidden: true,
                ..PermanodeConstraint::default()
            }
            .has_refinement()
        );
        assert!(PermanodeConstraint::attr_equals("tag", "x").has_refinement());

        assert!(!FileConstraint::default().has_refinement());
        assert!(
            FileConstraint {
                is_image: true,
                ..FileConstraint::default()
            }
            .has_refinement()
        );

        assert!(!DirConstraint::default().has_refinement());
        assert!(
            DirConstraint {
                blob_ref_prefix: Some("sha224-".to_string()),
                ..DirConstraint::default()
            }
            .has_refinement()
        );
    }

    #[test]
    fn dir_contains_exclusivity() {
        let both = Constraint::Dir(Box::new(DirConstraint {
            contains: Some(Box::new(Constraint::Anything)),
            recursive_contains: Some(Box::new(Constraint::Anything)),
            ..DirConstraint::default()
        }));
        assert!(both.validate().is_err());
    }

    #[test]
    fn relation_requires_exactly_one_side() {
        let neither = RelationConstraint {
            relation: RelationKind::Parent,
            edge_type: None,
            any: None,
            all: None,
        };
        assert!(neither.validate().is_err());

        let both = RelationConstraint {
            relation: RelationKind::Parent,
            edge_type: None,
            any: Some(Box::new(Constraint::Anything)),
            all: Some(Box::new(Constraint::Anything)),
        };
        assert!(both.validate().is_err());
    }

    #[test]
    fn reserved_relations_are_rejected() {
        for kind in [RelationKind::Progeny, RelationKind::Ancestor] {
            let rc = RelationConstraint {
                relation: kind,
                edge_type: None,
                any: Some(Box::new(Constraint::Anything)),
                all: None,
            };
            assert!(rc.validate().is_err());
        }
    }

    #[test]
    fn only_matches_permanode_through_and() {
        let pn = Constraint::Permanode(Box::new(PermanodeConstraint::default()));
        assert!(pn.only_matches_permanode());
        assert!(Constraint::CamliType(CamliKind::Permanode).only_matches_permanode());
        assert!(Constraint::and(Constraint::Anything, pn.clone()).only_matches_permanode());
        assert!(!Constraint::or(Constraint::Anything, pn).only_matches_permanode());
        assert!(!Constraint::Anything.only_matches_permanode());
    }

    #[test]
    fn at_most_one_blob_needs_complete_hash() {
        let full = Constraint::BlobRefPrefix(ref_str("ab"));
        assert!(full.matches_at_most_one_blob().is_some());

        let partial = Constraint::BlobRefPrefix("sha224-ab".to_string());
        assert!(partial.matches_at_most_one_blob().is_none());

        let under_and = Constraint::and(Constraint::Anything, Constraint::BlobRefPrefix(ref_str("cd")));
        assert_eq!(
            under_and.matches_at_most_one_blob().unwrap().as_str(),
            ref_str("cd")
        );
    }

    #[test]
    fn node_types_deduced_through_logic() {
        let person = Constraint::Permanode(Box::new(PermanodeConstraint::attr_equals(
            "camliNodeType",
            "contact",
        )));
        let event = Constraint::Permanode(Box::new(PermanodeConstraint::attr_equals(
            "camliNodeType",
            "event",
        )));
        assert_eq!(person.permanode_node_types().unwrap(), vec!["contact"]);

        let either = Constraint::or(person.clone(), event);
        assert_eq!(
            either.permanode_node_types().unwrap(),
            vec!["contact", "event"]
        );

        let mixed = Constraint::or(person, Constraint::Anything);
        assert!(mixed.permanode_node_types().is_none());
    }

    #[test]
    fn location_rect_handles_dateline() {
        let rect = LocationConstraint {
            north: 10.0,
            south: -10.0,
            west: 170.0,
            east: -170.0,
            ..LocationConstraint::default()
        };
        assert!(rect.matches_point(0.0, 175.0));
        assert!(rect.matches_point(0.0, -175.0));
        assert!(!rect.matches_point(0.0, 0.0));
        assert!(!rect.matches_point(20.0, 175.0));

        let any = LocationConstraint {
            any: true,
            ..LocationConstraint::default()
        };
        assert!(any.matches_point(89.0, 17.0));
    }

    #[test]
    fn constraint_wire_form() {
        let c = Constraint::and(
            Constraint::Permanode(Box::new(PermanodeConstraint::attr_equals("tag", "funny"))),
            Constraint::CamliType(CamliKind::File),
        );
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "logical": {
                    "op": "and",
                    "a": {"permanode": {"attr": "tag", "value": "funny"}},
                    "b": {"camliType": "file"},
                }
            })
        );
        let back: Constraint = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn continuation_never_serializes() {
        let pc = PermanodeConstraint {
            continuation: Some(PermanodeContinueConstraint {
                last_mod: None,
                last_created: None,
                last: ref_str("ab").parse().unwrap(),
            }),
            ..PermanodeConstraint::default()
        };
        let json = serde_json::to_value(&pc).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }
}
