//! The query-expression parser.
//!
//! An expression is a whitespace-separated list of atoms such as
//! `tag:funny is:image after:2011 loc:"new york"`. Double-quoted segments
//! are atomic: whitespace and colons inside quotes neither split atoms nor
//! arguments. Each atom is dispatched through the keyword registry and the
//! resulting sub-constraints are AND-folded onto a base constraint that
//! selects non-hidden permanodes.

use crate::{
    constraint::{Constraint, FileConstraint, LogicalOp, PermanodeConstraint, RelationKind},
    error::ExprError,
    geo::Geocoder,
    keyword::registry,
    named::NamedGetter,
    primitive::{FloatConstraint, IntConstraint, StringConstraint},
    query::SearchQuery,
};

/// How deep `named:` expansion may nest before the parse is abandoned.
const MAX_NAMED_DEPTH: u32 = 10;

/// A lexed atom: the predicate name and its colon-separated arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    /// Everything before the first unquoted colon.
    pub predicate: String,
    /// The remaining colon-separated, unquoted parts.
    pub args: Vec<String>,
}

/// Parse-time collaborators: the geocoder behind `loc:` and the registry
/// behind `named:`. Both are optional; the corresponding predicates fail
/// with a specific error when unavailable.
#[derive(Clone, Copy, Default)]
pub struct ParseContext<'a> {
    /// Resolves `loc:` place names.
    pub(crate) geocoder: Option<&'a dyn Geocoder>,
    /// Resolves `named:` searches.
    pub(crate) named: Option<&'a dyn NamedGetter>,
    /// Current `named:` nesting depth.
    depth: u32,
}

impl<'a> ParseContext<'a> {
    /// A context with no collaborators.
    pub fn new() -> Self {
        Self::default()
    }

    /// Supplies a geocoder for `loc:` atoms.
    pub fn with_geocoder(mut self, geocoder: &'a dyn Geocoder) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    /// Supplies a named-search registry for `named:` atoms.
    pub fn with_named(mut self, named: &'a dyn NamedGetter) -> Self {
        self.named = Some(named);
        self
    }

    /// Parses a nested expression (from `named:` expansion), guarding
    /// against unbounded recursion.
    pub(crate) fn parse_nested(&self, expression: &str) -> Result<Constraint, ExprError> {
        if self.depth >= MAX_NAMED_DEPTH {
            return Err(ExprError::NamedTooDeep);
        }
        let nested = Self {
            depth: self.depth + 1,
            ..*self
        };
        parse_constraint(&nested, expression)
    }
}

/// The synthetic base every parsed expression is conjoined with:
/// non-hidden permanodes.
pub(crate) fn skip_hidden_base() -> Constraint {
    Constraint::Permanode(Box::new(PermanodeConstraint {
        skip_hidden: true,
        ..PermanodeConstraint::default()
    }))
}

/// Parses `input` into a search query whose constraint is the AND-fold of
/// the base and each atom's sub-constraint. Empty and whitespace-only
/// input yield just the base.
pub fn parse_expression(ctx: &ParseContext<'_>, input: &str) -> Result<SearchQuery, ExprError> {
    Ok(SearchQuery::constraint(parse_constraint(ctx, input)?))
}

/// The constraint-level worker behind [`parse_expression`].
fn parse_constraint(ctx: &ParseContext<'_>, input: &str) -> Result<Constraint, ExprError> {
    let mut tree = skip_hidden_base();
    for raw in split_atoms(input)? {
        let atom = parse_atom(&raw);
        let sub = match_keywords(ctx, &atom, &raw)?;
        tree = Constraint::and(tree, sub);
    }
    Ok(tree)
}

/// Offers `atom` to each registered keyword and returns the first claim.
fn match_keywords(
    ctx: &ParseContext<'_>,
    atom: &Atom,
    raw: &str,
) -> Result<Constraint, ExprError> {
    for keyword in registry() {
        if keyword.match_atom(atom)? {
            return keyword.predicate(ctx, &atom.args);
        }
    }
    Err(ExprError::UnknownPredicate(raw.to_string()))
}

/// Splits the input on whitespace, keeping double-quoted segments intact
/// (quotes are preserved for the argument splitter to strip).
fn split_atoms(input: &str) -> Result<Vec<String>, ExprError> {
    let mut atoms = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in input.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    atoms.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if in_quotes {
        return Err(ExprError::UnclosedQuote);
    }
    if !current.is_empty() {
        atoms.push(current);
    }
    Ok(atoms)
}

/// Splits a raw atom into predicate and arguments on unquoted colons,
/// stripping the quotes themselves.
fn parse_atom(raw: &str) -> Atom {
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in raw.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => parts.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    parts.push(current);
    let mut iter = parts.into_iter();
    let predicate = iter.next().unwrap_or_default();
    Atom {
        predicate,
        args: iter.collect(),
    }
}

/// Renders a parser-produced constraint tree back to expression text.
///
/// Best-effort inverse of [`parse_expression`]: returns `None` for trees
/// the expression language cannot express (including anything built by
/// hand rather than by the parser). When `Some(text)` is returned,
/// re-parsing `text` yields an equivalent tree; every rendered atom is
/// verified by re-parsing it.
pub fn render(constraint: &Constraint) -> Option<String> {
    let mut nodes = Vec::new();
    flatten_and(constraint, &mut nodes);
    let (first, atoms) = nodes.split_first()?;
    if **first != skip_hidden_base() {
        return None;
    }
    let ctx = ParseContext::new();
    let mut parts = Vec::with_capacity(atoms.len());
    for node in atoms {
        let text = render_atom(node)?;
        let reparsed = match_keywords(&ctx, &parse_atom(&text), &text).ok()?;
        if reparsed != **node {
            return None;
        }
        parts.push(text);
    }
    Some(parts.join(" "))
}

/// Collects the leaves of a left-leaning AND chain, in order.
fn flatten_and<'c>(c: &'c Constraint, out: &mut Vec<&'c Constraint>) {
    if let Constraint::Logical(lc) = c
        && lc.op == LogicalOp::And
        && let Some(b) = &lc.b
    {
        flatten_and(&lc.a, out);
        flatten_and(b, out);
    } else {
        out.push(c);
    }
}

/// Renders one atom-level constraint, or `None` if no keyword produces
/// this shape.
fn render_atom(c: &Constraint) -> Option<String> {
    match c {
        Constraint::BlobRefPrefix(p) => Some(format!("ref:{p}")),
        Constraint::Permanode(pc) => render_permanode(pc),
        _ => None,
    }
}

/// Renders a permanode-shaped atom.
fn render_permanode(pc: &PermanodeConstraint) -> Option<String> {
    if let Some(tc) = &pc.time {
        if let Some(before) = tc.before {
            return render_time("before", before);
        }
        if let Some(after) = tc.after {
            return render_time("after", after);
        }
        return None;
    }
    if let Some(loc) = &pc.location {
        if loc.any {
            return Some("has:location".to_string());
        }
        return Some(format!(
            "locrect:{},{},{},{}",
            loc.north, loc.west, loc.south, loc.east
        ));
    }
    if let Some(rel) = &pc.relation {
        let keyword = match rel.relation {
            RelationKind::Parent => "childrenof",
            RelationKind::Child => "parentof",
            _ => return None,
        };
        if let Some(any) = &rel.any
            && let Constraint::BlobRefPrefix(prefix) = any.as_ref()
        {
            return Some(format!("{keyword}:{prefix}"));
        }
        return None;
    }
    match pc.attr.as_deref() {
        Some("tag") if pc.skip_hidden => Some(format!("tag:{}", quote_arg(pc.value.as_deref()?))),
        Some("title") if pc.skip_hidden => {
            let contains = pc.value_matches.as_ref()?.contains.as_deref()?;
            Some(format!("title:{}", quote_arg(contains)))
        }
        Some("camliContent") if pc.value_in_set.is_some() => {
            if let Constraint::File(fc) = pc.value_in_set.as_deref()? {
                render_file(fc)
            } else {
                None
            }
        }
        Some(attr) => {
            if let Some(value) = &pc.value {
                Some(format!("attr:{}:{}", quote_arg(attr), quote_arg(value)))
            } else if let Some(contains) = pc
                .value_matches
                .as_ref()
                .and_then(|sc| sc.contains.as_deref())
            {
                Some(format!("attr:{}:~{}", quote_arg(attr), contains))
            } else {
                None
            }
        }
        None => None,
    }
}

/// Renders a file-shaped atom reached through `camliContent`.
fn render_file(fc: &FileConstraint) -> Option<String> {
    if let Some(width) = &fc.width {
        return Some(format!("width:{}", render_range(width)));
    }
    if let Some(height) = &fc.height {
        return Some(format!("height:{}", render_range(height)));
    }
    if let Some(ratio) = &fc.wh_ratio {
        let name = if *ratio == FloatConstraint::at_least(1.0) {
            "is:landscape"
        } else if *ratio == FloatConstraint::at_most(1.0) {
            "is:portrait"
        } else if *ratio == FloatConstraint::at_least(2.0) {
            "is:pano"
        } else {
            return None;
        };
        return Some(name.to_string());
    }
    if let Some(name) = &fc.file_name {
        return render_name_glob(name).map(|g| format!("filename:{g}"));
    }
    if let Some(mime) = fc.mime_type.as_ref().and_then(|sc| sc.equals.as_deref()) {
        let short = match mime {
            "image/jpeg" => "jpg",
            "image/gif" => "gif",
            "image/png" => "png",
            "application/pdf" => "pdf",
            verbatim => verbatim,
        };
        return Some(format!("format:{short}"));
    }
    if fc.is_image {
        return Some("is:image".to_string());
    }
    None
}

/// Renders a file-name string constraint back to its glob form.
fn render_name_glob(sc: &StringConstraint) -> Option<String> {
    if let Some(equals) = &sc.equals {
        Some(quote_arg(equals))
    } else if let Some(suffix) = &sc.has_suffix {
        Some(quote_arg(&format!("*{suffix}")))
    } else if let Some(prefix) = &sc.has_prefix {
        Some(quote_arg(&format!("{prefix}*")))
    } else {
        sc.contains.as_deref().map(|c| quote_arg(&format!("*{c}*")))
    }
}

/// Renders an integer range in `width:`/`height:` form.
fn render_range(ic: &IntConstraint) -> String {
    let has_min = ic.zero_min || ic.min != 0;
    let has_max = ic.zero_max || ic.max != 0;
    match (has_min, has_max) {
        (true, true) if ic.min == ic.max => format!("{}", ic.min),
        (true, true) => format!("{}-{}", ic.min, ic.max),
        (true, false) => format!("{}-", ic.min),
        (false, true) => format!("-{}", ic.max),
        (false, false) => String::new(),
    }
}

/// Renders a `before:`/`after:` bound; only midnight UTC times are
/// expressible without colons.
fn render_time(keyword: &str, t: chrono::DateTime<chrono::Utc>) -> Option<String> {
    use chrono::Timelike;
    if t.num_seconds_from_midnight() != 0 || t.nanosecond() != 0 {
        return None;
    }
    Some(format!("{keyword}:{}", t.format("%Y-%m-%d")))
}

/// Quotes an argument when it contains characters the lexer would split
/// on.
fn quote_arg(s: &str) -> String {
    if s.chars().any(|c| c.is_whitespace() || c == ':') {
        format!("\"{s}\"")
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::{
        constraint::LocationConstraint,
        geo::{LatLong, Rect, StaticGeocoder},
        keyword::{perm_attr_contains, perm_attr_equals, perm_of_file, perm_of_image},
        named::StaticNamed,
        primitive::TimeConstraint,
    };

    /// Parses with an empty context.
    fn parse(input: &str) -> Result<Constraint, ExprError> {
        parse_constraint(&ParseContext::new(), input)
    }

    /// RFC 3339 shorthand.
    fn t(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn empty_input_yields_base() {
        assert_eq!(parse("").unwrap(), skip_hidden_base());
        assert_eq!(parse("   \n").unwrap(), skip_hidden_base());
    }

    #[test]
    fn atom_lexing() {
        assert_eq!(
            split_atoms("tag:funny is:image").unwrap(),
            vec!["tag:funny", "is:image"]
        );
        assert_eq!(
            split_atoms("loc:\"new york\" tag:x").unwrap(),
            vec!["loc:\"new york\"", "tag:x"]
        );
        assert!(split_atoms("loc:\"new york").is_err());
    }

    #[test]
    fn atom_argument_splitting() {
        let atom = parse_atom("attr:color:~red");
        assert_eq!(atom.predicate, "attr");
        assert_eq!(atom.args, vec!["color", "~red"]);

        let atom = parse_atom("loc:\"new york\"");
        assert_eq!(atom.predicate, "loc");
        assert_eq!(atom.args, vec!["new york"]);

        let atom = parse_atom("tag:\"a:b\"");
        assert_eq!(atom.args, vec!["a:b"]);
    }

    #[test]
    fn tag_expression() {
        // AND(base, Permanode{attr: tag, value: funny, skipHidden})
        let got = parse("tag:funny").unwrap();
        let want = Constraint::and(skip_hidden_base(), perm_attr_equals("tag", "funny", true));
        assert_eq!(got, want);
    }

    #[test]
    fn image_with_width_range() {
        let got = parse("is:image width:640-1024").unwrap();
        let want = Constraint::and(
            Constraint::and(skip_hidden_base(), perm_of_image(None)),
            perm_of_file(FileConstraint {
                is_image: true,
                width: Some(IntConstraint::between(640, 1024)),
                ..FileConstraint::default()
            }),
        );
        assert_eq!(got, want);
    }

    #[test]
    fn before_pads_partial_time() {
        let got = parse("before:2012-06").unwrap();
        let want = Constraint::and(
            skip_hidden_base(),
            Constraint::Permanode(Box::new(PermanodeConstraint {
                time: Some(TimeConstraint::before(t("2012-06-01T00:00:00Z"))),
                ..PermanodeConstraint::default()
            })),
        );
        assert_eq!(got, want);
    }

    #[test]
    fn after_year_only() {
        let got = parse("after:2011").unwrap();
        let want = Constraint::and(
            skip_hidden_base(),
            Constraint::Permanode(Box::new(PermanodeConstraint {
                time: Some(TimeConstraint::after(t("2011-01-01T00:00:00Z"))),
                ..PermanodeConstraint::default()
            })),
        );
        assert_eq!(got, want);
    }

    #[test]
    fn fuzzy_attr_match() {
        let got = parse("attr:color:~red").unwrap();
        let want = Constraint::and(skip_hidden_base(), perm_attr_contains("color", "red", false));
        assert_eq!(got, want);
    }

    #[test]
    fn locrect_reassembles_coordinates() {
        let got = parse("locrect:10,20,30,40").unwrap();
        let want = Constraint::and(
            skip_hidden_base(),
            Constraint::Permanode(Box::new(PermanodeConstraint {
                location: Some(LocationConstraint {
                    north: 10.0,
                    west: 20.0,
                    south: 30.0,
                    east: 40.0,
                    ..LocationConstraint::default()
                }),
                ..PermanodeConstraint::default()
            })),
        );
        assert_eq!(got, want);
    }

    #[test]
    fn unknown_predicate_fails() {
        assert!(matches!(
            parse("frobnicate:yes"),
            Err(ExprError::UnknownPredicate(a)) if a == "frobnicate:yes"
        ));
        assert!(matches!(
            parse("is:sideways"),
            Err(ExprError::UnknownPredicate(_))
        ));
    }

    #[test]
    fn wrong_arity_names_the_predicate() {
        assert!(matches!(
            parse("attr:only-one"),
            Err(ExprError::ArgCount { predicate: "attr", want: 2 })
        ));
        assert!(matches!(
            parse("tag:a:b"),
            Err(ExprError::ArgCount { predicate: "tag", want: 1 })
        ));
    }

    #[test]
    fn bad_glob_fails() {
        assert!(parse("filename:**").is_err());
    }

    #[test]
    fn loc_resolves_through_geocoder() {
        let mut geo = StaticGeocoder::new();
        geo.insert(
            "new york",
            vec![Rect {
                north_east: LatLong {
                    latitude: 41.0,
                    longitude: -73.0,
                },
                south_west: LatLong {
                    latitude: 40.0,
                    longitude: -75.0,
                },
            }],
        );
        let ctx = ParseContext::new().with_geocoder(&geo);
        let got = parse_constraint(&ctx, "loc:\"new york\"").unwrap();
        let want = Constraint::and(
            skip_hidden_base(),
            Constraint::Permanode(Box::new(PermanodeConstraint {
                location: Some(LocationConstraint {
                    north: 41.0,
                    south: 40.0,
                    east: -73.0,
                    west: -75.0,
                    ..LocationConstraint::default()
                }),
                ..PermanodeConstraint::default()
            })),
        );
        assert_eq!(got, want);

        assert!(matches!(
            parse_constraint(&ctx, "loc:atlantis"),
            Err(ExprError::Geocode { .. })
        ));
        assert!(matches!(parse("loc:anywhere"), Err(ExprError::NoGeocoder)));
    }

    #[test]
    fn named_expands_recursively() {
        let mut named = StaticNamed::new();
        named.insert("funny", "tag:funny");
        named.insert("indirect", "named:funny");
        let ctx = ParseContext::new().with_named(&named);

        let direct = parse_constraint(&ctx, "named:funny").unwrap();
        let expected_inner = Constraint::and(skip_hidden_base(), perm_attr_equals("tag", "funny", true));
        assert_eq!(
            direct,
            Constraint::and(skip_hidden_base(), expected_inner.clone())
        );

        let indirect = parse_constraint(&ctx, "named:indirect").unwrap();
        assert_eq!(
            indirect,
            Constraint::and(
                skip_hidden_base(),
                Constraint::and(skip_hidden_base(), expected_inner)
            )
        );

        assert!(matches!(
            parse_constraint(&ctx, "named:nope"),
            Err(ExprError::Named { .. })
        ));
    }

    #[test]
    fn named_cycle_is_cut_off() {
        let mut named = StaticNamed::new();
        named.insert("a", "named:b");
        named.insert("b", "named:a");
        let ctx = ParseContext::new().with_named(&named);
        assert!(matches!(
            parse_constraint(&ctx, "named:a"),
            Err(ExprError::NamedTooDeep)
        ));
    }

    #[test]
    fn render_round_trips() {
        let exprs = [
            "",
            "tag:funny",
            "tag:\"new york\"",
            "attr:color:red",
            "attr:color:~red",
            "attr:tag:funny",
            "title:vacation",
            "before:2012-06-01",
            "after:2011-01-01",
            "locrect:10,20,30,40",
            "has:location",
            "is:image",
            "is:landscape",
            "is:portrait",
            "is:pano",
            "width:640-1024",
            "height:480",
            "width:0",
            "filename:*.jpg",
            "filename:cat.jpg",
            "format:jpg",
            "format:application/epub+zip",
            "tag:funny is:image width:640-",
        ];
        for expr in exprs {
            let tree = parse(expr).unwrap();
            let rendered = render(&tree).unwrap_or_else(|| panic!("render failed for {expr:?}"));
            let reparsed = parse(&rendered).unwrap();
            assert_eq!(reparsed, tree, "round trip of {expr:?} via {rendered:?}");
        }
    }

    #[test]
    fn render_rejects_foreign_trees() {
        assert!(render(&Constraint::Anything).is_none());
        let no_base = perm_attr_equals("tag", "funny", true);
        assert!(render(&no_base).is_none());
    }
}
