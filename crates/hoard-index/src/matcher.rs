//! Compiling constraint trees into matchers.
//!
//! [`compile`] walks the tree once and turns every node into a boxed
//! closure; evaluation then runs without re-dispatching on node shapes.
//! The closures borrow the constraint tree, so a compiled matcher cannot
//! outlive the query that owns it. Logical nodes short-circuit and are
//! never evaluated in parallel: the scratch state has a single writer.

use std::{
    collections::{HashMap, HashSet},
    ops::ControlFlow,
};

use chrono::{DateTime, Utc};
use hoard_blob::{BlobMeta, BlobRef, CamliKind};
use hoard_query::{
    Constraint, DirConstraint, FileConstraint, InvalidConstraint, LatLong, LogicalOp,
    PermanodeConstraint, RelationConstraint, RelationKind,
};

use crate::{
    corpus::{Claim, ClaimKind, Corpus, Index},
    error::SearchError,
    location::permanode_location,
};

/// Immutable evaluation context shared by every matcher in a query.
pub(crate) struct MatchContext<'s> {
    /// The baseline index.
    pub(crate) index: &'s dyn Index,
    /// The in-memory corpus, when available.
    pub(crate) corpus: Option<&'s dyn Corpus>,
    /// Evaluation time, captured once per query.
    pub(crate) now: DateTime<Utc>,
}

impl MatchContext<'_> {
    /// Returns the corpus or a corpus-required error naming the feature.
    fn require_corpus(&self, what: &'static str) -> Result<&dyn Corpus, SearchError> {
        self.corpus.ok_or(SearchError::CorpusRequired(what))
    }
}

/// Mutable per-query scratch owned by the single consumer task.
#[derive(Default)]
pub(crate) struct SearchState {
    /// Reused buffer for attribute-value resolution.
    attr_scratch: Vec<String>,
    /// Locations resolved for matched blobs, keyed by ref.
    pub(crate) locations: HashMap<BlobRef, LatLong>,
}

/// A compiled matcher over one constraint node.
pub(crate) type MatchFn<'q> =
    Box<dyn Fn(&MatchContext<'_>, &mut SearchState, &BlobMeta) -> Result<bool, SearchError> + 'q>;

/// Compiles `c` into a matcher. Each node is visited exactly once; the
/// result borrows the tree.
pub(crate) fn compile<'q>(c: &'q Constraint) -> MatchFn<'q> {
    match c {
        Constraint::Anything => Box::new(|_, _, _| Ok(true)),
        Constraint::CamliType(kind) => {
            Box::new(move |_, _, bm| Ok(bm.camli_type == Some(*kind)))
        }
        Constraint::AnyCamliType => Box::new(|_, _, bm| Ok(bm.camli_type.is_some())),
        Constraint::BlobRefPrefix(prefix) => {
            Box::new(move |_, _, bm| Ok(bm.blob_ref.has_prefix(prefix)))
        }
        Constraint::BlobSize(ic) => Box::new(move |_, _, bm| Ok(ic.matches(i64::from(bm.size)))),
        Constraint::Logical(lc) => {
            let a = compile(&lc.a);
            let b = lc.b.as_ref().map(compile);
            let op = lc.op;
            Box::new(move |ctx, state, bm| logical_matches(op, &a, b.as_ref(), ctx, state, bm))
        }
        Constraint::Permanode(pc) => {
            let pre = PermanodePre {
                value_in_set: pc.value_in_set.as_deref().map(compile),
                relation_any: pc
                    .relation
                    .as_deref()
                    .and_then(|rc| rc.any.as_deref())
                    .map(compile),
                relation_all: pc
                    .relation
                    .as_deref()
                    .and_then(|rc| rc.all.as_deref())
                    .map(compile),
            };
            Box::new(move |ctx, state, bm| permanode_matches(ctx, state, pc, &pre, bm))
        }
        Constraint::File(fc) => {
            let parent_dir = fc.parent_dir.as_deref().map(compile_dir);
            Box::new(move |ctx, state, bm| file_matches(ctx, state, fc, parent_dir.as_ref(), bm))
        }
        Constraint::Dir(dc) => {
            let pre = compile_dir(dc);
            Box::new(move |ctx, state, bm| dir_matches(ctx, state, &pre, bm))
        }
    }
}

/// Evaluates a logical node with short-circuiting.
fn logical_matches(
    op: LogicalOp,
    a: &MatchFn<'_>,
    b: Option<&MatchFn<'_>>,
    ctx: &MatchContext<'_>,
    state: &mut SearchState,
    bm: &BlobMeta,
) -> Result<bool, SearchError> {
    /// The operand error validation normally rules out.
    fn missing(op: LogicalOp) -> SearchError {
        InvalidConstraint::new(format!("logical {op:?} requires two operands")).into()
    }

    match op {
        LogicalOp::And => {
            if !a(ctx, state, bm)? {
                return Ok(false);
            }
            b.ok_or_else(|| missing(op))?(ctx, state, bm)
        }
        LogicalOp::Or => {
            if a(ctx, state, bm)? {
                return Ok(true);
            }
            b.ok_or_else(|| missing(op))?(ctx, state, bm)
        }
        LogicalOp::Xor => {
            let left = a(ctx, state, bm)?;
            let right = b.ok_or_else(|| missing(op))?(ctx, state, bm)?;
            Ok(left != right)
        }
        LogicalOp::Not => Ok(!a(ctx, state, bm)?),
    }
}

/// Pre-compiled sub-matchers of a permanode node.
struct PermanodePre<'q> {
    /// Matcher behind `value_in_set`.
    value_in_set: Option<MatchFn<'q>>,
    /// Matcher behind `relation.any`.
    relation_any: Option<MatchFn<'q>>,
    /// Matcher behind `relation.all`.
    relation_all: Option<MatchFn<'q>>,
}

/// Evaluates a permanode node against a candidate blob.
fn permanode_matches(
    ctx: &MatchContext<'_>,
    state: &mut SearchState,
    pc: &PermanodeConstraint,
    pre: &PermanodePre<'_>,
    bm: &BlobMeta,
) -> Result<bool, SearchError> {
    // A node with no refinements matches nothing, not everything.
    if !pc.has_refinement() {
        return Ok(false);
    }
    if bm.camli_type != Some(CamliKind::Permanode) {
        return Ok(false);
    }
    let pn = &bm.blob_ref;
    let at = pc.at;

    if let Some(attr) = &pc.attr {
        let corpus = ctx.require_corpus("attribute lookup at a point in time")?;
        let mut vals = std::mem::take(&mut state.attr_scratch);
        vals.clear();
        corpus.append_permanode_attr_values(&mut vals, pn, attr, at, None);
        let matched = attr_vals_match(ctx, state, pc, pre, &vals);
        state.attr_scratch = vals;
        if !matched? {
            return Ok(false);
        }
    }

    if pc.skip_hidden {
        let corpus = ctx.require_corpus("skipHidden")?;
        if corpus
            .permanode_attr_value(pn, "camliDefVis", at, None)
            .as_deref()
            == Some("hide")
        {
            return Ok(false);
        }
        // Leftover demo filter, kept for compatibility: venue check-in
        // targets never surface in default searches.
        if corpus
            .permanode_attr_value(pn, "camliNodeType", at, None)
            .as_deref()
            == Some("foursquare.com:venue")
        {
            return Ok(false);
        }
    }

    if let Some(tc) = &pc.mod_time {
        let corpus = ctx.require_corpus("modTime filter")?;
        if !tc.matches(corpus.permanode_modtime(pn), ctx.now) {
            return Ok(false);
        }
    }

    if let Some(tc) = &pc.time {
        let corpus = ctx.require_corpus("time filter")?;
        if !tc.matches(corpus.permanode_any_time(pn), ctx.now) {
            return Ok(false);
        }
    }

    if let Some(rc) = &pc.relation
        && !relation_matches(ctx, state, rc, pre, pn, at)?
    {
        return Ok(false);
    }

    if ctx.corpus.is_some() {
        match permanode_location(ctx, pn, at)? {
            Some(position) => {
                if let Some(lc) = &pc.location
                    && !lc.matches_point(position.latitude, position.longitude)
                {
                    return Ok(false);
                }
                state.locations.insert(pn.clone(), position);
            }
            None => {
                if pc.location.is_some() {
                    return Ok(false);
                }
            }
        }
    } else if pc.location.is_some() {
        return Err(SearchError::CorpusRequired("permanode location"));
    }

    if let Some(cont) = &pc.continuation {
        let corpus = ctx.require_corpus("continue token")?;
        let (pn_time, cursor) = if let Some(last_mod) = cont.last_mod {
            (corpus.permanode_modtime(pn), last_mod)
        } else if let Some(last_created) = cont.last_created {
            (corpus.permanode_any_time(pn), last_created)
        } else {
            return Ok(false);
        };
        let Some(t) = pn_time else {
            return Ok(false);
        };
        if t > cursor || (t == cursor && *pn >= cont.last) {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Applies the value refinements of `pc` to the resolved attribute
/// values.
fn attr_vals_match(
    ctx: &MatchContext<'_>,
    state: &mut SearchState,
    pc: &PermanodeConstraint,
    pre: &PermanodePre<'_>,
    vals: &[String],
) -> Result<bool, SearchError> {
    if let Some(nv) = &pc.num_value
        && !nv.matches(vals.len() as i64)
    {
        return Ok(false);
    }
    if !pc.has_value_refinement() {
        return Ok(true);
    }
    let mut matched = 0usize;
    for val in vals {
        let ok = attr_value_matches(ctx, state, pc, pre, val)?;
        if ok && !pc.value_all {
            return Ok(true);
        }
        if !ok && pc.value_all {
            return Ok(false);
        }
        if ok {
            matched += 1;
        }
    }
    Ok(pc.value_all && matched > 0)
}

/// Applies every value refinement to a single attribute value.
fn attr_value_matches(
    ctx: &MatchContext<'_>,
    state: &mut SearchState,
    pc: &PermanodeConstraint,
    pre: &PermanodePre<'_>,
    val: &str,
) -> Result<bool, SearchError> {
    if let Some(want) = &pc.value
        && val != want
    {
        return Ok(false);
    }
    if let Some(sc) = &pc.value_matches
        && !sc.matches(val)
    {
        return Ok(false);
    }
    if let Some(ic) = &pc.value_matches_int {
        match val.parse::<i64>() {
            Ok(n) if ic.matches(n) => {}
            _ => return Ok(false),
        }
    }
    if let Some(fc) = &pc.value_matches_float {
        match val.parse::<f64>() {
            Ok(n) if fc.matches(n) => {}
            _ => return Ok(false),
        }
    }
    if let Some(sub) = &pre.value_in_set {
        let Ok(target) = val.parse::<BlobRef>() else {
            return Ok(false);
        };
        let Some(meta) = ctx.index.get_blob_meta(&target)? else {
            return Ok(false);
        };
        if !sub(ctx, state, &meta)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Evaluates a relation constraint: one hop along member/path claims.
fn relation_matches(
    ctx: &MatchContext<'_>,
    state: &mut SearchState,
    rc: &RelationConstraint,
    pre: &PermanodePre<'_>,
    pn: &BlobRef,
    at: Option<DateTime<Utc>>,
) -> Result<bool, SearchError> {
    let corpus = ctx.require_corpus("relation")?;
    let (want_any, sub) = match (&pre.relation_any, &pre.relation_all) {
        (Some(sub), None) => (true, sub),
        (None, Some(sub)) => (false, sub),
        _ => {
            return Err(
                InvalidConstraint::new("relation requires exactly one of any or all").into(),
            );
        }
    };

    let mut seen: HashSet<BlobRef> = HashSet::new();
    let mut matched = false;
    let mut failed = false;
    let mut err: Option<SearchError> = None;
    let mut visit = |related: BlobRef| -> ControlFlow<()> {
        if !seen.insert(related.clone()) {
            return ControlFlow::Continue(());
        }
        let meta = match ctx.index.get_blob_meta(&related) {
            Ok(Some(meta)) => meta,
            Ok(None) => return ControlFlow::Continue(()),
            Err(e) => {
                err = Some(e);
                return ControlFlow::Break(());
            }
        };
        match sub(ctx, state, &meta) {
            Ok(true) => {
                matched = true;
                if want_any {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            }
            Ok(false) => {
                if want_any {
                    ControlFlow::Continue(())
                } else {
                    failed = true;
                    ControlFlow::Break(())
                }
            }
            Err(e) => {
                err = Some(e);
                ControlFlow::Break(())
            }
        }
    };

    match rc.relation {
        RelationKind::Child => {
            corpus.for_each_claim(pn, at, &mut |claim: &Claim| {
                if claim.kind == ClaimKind::DelAttribute || !rc.matches_edge_attr(&claim.attr) {
                    return ControlFlow::Continue(());
                }
                let Ok(target) = claim.value.parse::<BlobRef>() else {
                    return ControlFlow::Continue(());
                };
                // Skip claims that later claims superseded.
                if !corpus.permanode_has_attr_value(pn, at, &claim.attr, &claim.value) {
                    return ControlFlow::Continue(());
                }
                visit(target)
            });
        }
        RelationKind::Parent => {
            corpus.for_each_claim_back(pn, at, &mut |claim: &Claim| {
                if claim.kind == ClaimKind::DelAttribute || !rc.matches_edge_attr(&claim.attr) {
                    return ControlFlow::Continue(());
                }
                if !corpus.permanode_has_attr_value(&claim.permanode, at, &claim.attr, pn.as_str())
                {
                    return ControlFlow::Continue(());
                }
                visit(claim.permanode.clone())
            });
        }
        RelationKind::Progeny | RelationKind::Ancestor => {
            return Err(
                InvalidConstraint::new("relation progeny/ancestor is reserved but not implemented")
                    .into(),
            );
        }
    }

    if let Some(e) = err {
        return Err(e);
    }
    Ok(if want_any { matched } else { matched && !failed })
}

/// Evaluates a file node against a candidate blob.
fn file_matches(
    ctx: &MatchContext<'_>,
    state: &mut SearchState,
    fc: &FileConstraint,
    parent_dir: Option<&DirPre<'_>>,
    bm: &BlobMeta,
) -> Result<bool, SearchError> {
    // A node with no refinements matches nothing, not everything.
    if !fc.has_refinement() {
        return Ok(false);
    }
    if bm.camli_type != Some(CamliKind::File) {
        return Ok(false);
    }
    let br = &bm.blob_ref;
    let Some(info) = ctx.index.get_file_info(br)? else {
        return Ok(false);
    };
    if let Some(ic) = &fc.file_size
        && !ic.matches(info.size)
    {
        return Ok(false);
    }
    if fc.is_image && !info.is_image() {
        return Ok(false);
    }
    if let Some(sc) = &fc.file_name
        && !sc.matches(&info.file_name)
    {
        return Ok(false);
    }
    if let Some(sc) = &fc.mime_type
        && !sc.matches(&info.mime_type)
    {
        return Ok(false);
    }
    if let Some(tc) = &fc.time
        && !tc.matches(info.time, ctx.now)
    {
        return Ok(false);
    }
    if let Some(tc) = &fc.mod_time
        && !tc.matches(info.mod_time, ctx.now)
    {
        return Ok(false);
    }
    if let Some(dir_pre) = parent_dir
        && !any_parent_matches(ctx, state, dir_pre, br)?
    {
        return Ok(false);
    }
    if let Some(want) = &fc.whole_ref {
        let corpus = ctx.require_corpus("wholeRef")?;
        match corpus.get_whole_ref(br)? {
            Some(whole) if whole == *want => {}
            _ => return Ok(false),
        }
    }
    if fc.width.is_some() || fc.height.is_some() || fc.wh_ratio.is_some() {
        ctx.require_corpus("image dimensions")?;
        let Some(image) = ctx.index.get_image_info(br)? else {
            return Ok(false);
        };
        if let Some(ic) = &fc.width
            && !ic.matches(i64::from(image.width))
        {
            return Ok(false);
        }
        if let Some(ic) = &fc.height
            && !ic.matches(i64::from(image.height))
        {
            return Ok(false);
        }
        if let Some(ratio) = &fc.wh_ratio {
            if image.height == 0 {
                return Ok(false);
            }
            if !ratio.matches(f64::from(image.width) / f64::from(image.height)) {
                return Ok(false);
            }
        }
    }
    if let Some(lc) = &fc.location {
        let Some(position) = ctx.index.file_lat_long(br)? else {
            return Ok(false);
        };
        if !lc.matches_point(position.latitude, position.longitude) {
            return Ok(false);
        }
        state.locations.insert(br.clone(), position);
    }
    if let Some(mt) = &fc.media_tag {
        let Some(tags) = ctx.index.get_media_tags(br)? else {
            return Ok(false);
        };
        let value_ok = |val: &str| {
            if let Some(sc) = &mt.string
                && !sc.matches(val)
            {
                return false;
            }
            if let Some(ic) = &mt.int {
                match val.parse::<i64>() {
                    Ok(n) if ic.matches(n) => {}
                    _ => return false,
                }
            }
            true
        };
        let found = match &mt.tag {
            Some(tag) => tags.get(tag).is_some_and(|v| value_ok(v)),
            None => tags.values().any(|v| value_ok(v)),
        };
        if !found {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Pre-compiled form of a directory constraint.
struct DirPre<'q> {
    /// The source node.
    dc: &'q DirConstraint,
    /// Parent-directory sub-constraint.
    parent_dir: Option<Box<DirPre<'q>>>,
    /// Matcher behind `contains`.
    contains: Option<MatchFn<'q>>,
    /// Matcher behind `recursive_contains`.
    recursive_contains: Option<MatchFn<'q>>,
}

/// Compiles a directory constraint and its sub-matchers.
fn compile_dir<'q>(dc: &'q DirConstraint) -> DirPre<'q> {
    DirPre {
        dc,
        parent_dir: dc.parent_dir.as_deref().map(|p| Box::new(compile_dir(p))),
        contains: dc.contains.as_deref().map(compile),
        recursive_contains: dc.recursive_contains.as_deref().map(compile),
    }
}

/// Evaluates a directory node against a candidate blob.
fn dir_matches(
    ctx: &MatchContext<'_>,
    state: &mut SearchState,
    pre: &DirPre<'_>,
    bm: &BlobMeta,
) -> Result<bool, SearchError> {
    // A node with no refinements matches nothing, not everything.
    if !pre.dc.has_refinement() {
        return Ok(false);
    }
    if bm.camli_type != Some(CamliKind::Directory) {
        return Ok(false);
    }
    let br = &bm.blob_ref;
    let dc = pre.dc;
    if let Some(prefix) = &dc.blob_ref_prefix
        && !br.has_prefix(prefix)
    {
        return Ok(false);
    }
    if let Some(sc) = &dc.file_name {
        let Some(info) = ctx.index.get_file_info(br)? else {
            return Ok(false);
        };
        if !sc.matches(&info.file_name) {
            return Ok(false);
        }
    }
    if let Some(parent) = &pre.parent_dir
        && !any_parent_matches(ctx, state, parent, br)?
    {
        return Ok(false);
    }
    if let Some(ic) = &dc.top_file_count {
        let Some(children) = ctx.index.get_dir_children(br)? else {
            return Ok(false);
        };
        let mut files = 0i64;
        for child in &children {
            if ctx
                .index
                .get_blob_meta(child)?
                .is_some_and(|m| m.camli_type == Some(CamliKind::File))
            {
                files += 1;
            }
        }
        if !ic.matches(files) {
            return Ok(false);
        }
    }
    if let Some(sub) = &pre.contains {
        let Some(children) = ctx.index.get_dir_children(br)? else {
            return Ok(false);
        };
        let mut any = false;
        for child in &children {
            if let Some(meta) = ctx.index.get_blob_meta(child)?
                && sub(ctx, state, &meta)?
            {
                any = true;
                break;
            }
        }
        if !any {
            return Ok(false);
        }
    }
    if let Some(sub) = &pre.recursive_contains {
        let mut visited = HashSet::new();
        if !dir_contains_recursive(ctx, state, sub, br, &mut visited)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Walks a directory tree: direct children first, then each child
/// directory, until the sub-matcher accepts something.
fn dir_contains_recursive(
    ctx: &MatchContext<'_>,
    state: &mut SearchState,
    sub: &MatchFn<'_>,
    dir: &BlobRef,
    visited: &mut HashSet<BlobRef>,
) -> Result<bool, SearchError> {
    if !visited.insert(dir.clone()) {
        return Ok(false);
    }
    let mut members: Vec<BlobRef> = Vec::new();
    let known = ctx.index.get_dir_members(dir, 0, &mut |r| {
        members.push(r.clone());
        ControlFlow::Continue(())
    })?;
    if !known {
        return Ok(false);
    }
    let mut subdirs = Vec::new();
    for member in members {
        let Some(meta) = ctx.index.get_blob_meta(&member)? else {
            continue;
        };
        if sub(ctx, state, &meta)? {
            return Ok(true);
        }
        if meta.camli_type == Some(CamliKind::Directory) {
            subdirs.push(member);
        }
    }
    for subdir in subdirs {
        if dir_contains_recursive(ctx, state, sub, &subdir, visited)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Reports whether any directory containing `br` satisfies `pre`.
fn any_parent_matches(
    ctx: &MatchContext<'_>,
    state: &mut SearchState,
    pre: &DirPre<'_>,
    br: &BlobRef,
) -> Result<bool, SearchError> {
    for parent in ctx.index.get_parent_dirs(br)? {
        if let Some(meta) = ctx.index.get_blob_meta(&parent)?
            && dir_matches(ctx, state, pre, &meta)?
        {
            return Ok(true);
        }
    }
    Ok(false)
}
