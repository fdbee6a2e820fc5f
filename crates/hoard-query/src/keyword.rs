//! The keyword registry.
//!
//! Each atom in a query expression is offered to every registered
//! [`Keyword`] in turn. A keyword either declines, claims the atom and
//! produces a sub-constraint, or claims it and reports a malformed
//! argument. The registry is built once at startup and never mutated;
//! keywords are disjoint, so registration order does not matter.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use hoard_blob::BlobRef;

use crate::{
    constraint::{
        Constraint, FileConstraint, LocationConstraint, PermanodeConstraint, RelationConstraint,
        RelationKind,
    },
    error::ExprError,
    expr::{Atom, ParseContext},
    primitive::{FloatConstraint, IntConstraint, StringConstraint, TimeConstraint},
};

/// A handler for one predicate in the expression language.
pub trait Keyword: Send + Sync {
    /// The predicate name, as typed before the first colon.
    fn name(&self) -> &'static str;

    /// One-line description for help output.
    fn description(&self) -> &'static str;

    /// Decides whether this keyword claims `atom`. Returning an error
    /// means the atom is this keyword's but malformed (wrong argument
    /// count); the parse fails rather than trying further keywords.
    fn match_atom(&self, atom: &Atom) -> Result<bool, ExprError>;

    /// Produces the sub-constraint for a claimed atom.
    fn predicate(&self, ctx: &ParseContext<'_>, args: &[String]) -> Result<Constraint, ExprError>;
}

/// The registered keywords.
static KEYWORDS: LazyLock<Vec<Box<dyn Keyword>>> = LazyLock::new(|| {
    vec![
        Box::new(Tag),
        Box::new(Title),
        Box::new(Attr),
        Box::new(Ref),
        Box::new(FileName),
        Box::new(Format),
        Box::new(Before),
        Box::new(After),
        Box::new(IsImage),
        Box::new(IsLandscape),
        Box::new(IsPortrait),
        Box::new(IsPano),
        Box::new(Width),
        Box::new(Height),
        Box::new(Loc),
        Box::new(LocRect),
        Box::new(HasLocation),
        Box::new(ChildrenOf),
        Box::new(ParentOf),
        Box::new(With),
        Box::new(Named),
    ]
});

/// Returns the keyword registry.
pub fn registry() -> &'static [Box<dyn Keyword>] {
    &KEYWORDS
}

/// Claims atoms whose predicate is `name` and checks the argument count.
fn match_prefix(name: &'static str, want: usize, atom: &Atom) -> Result<bool, ExprError> {
    if atom.predicate != name {
        return Ok(false);
    }
    if atom.args.len() != want {
        return Err(ExprError::ArgCount {
            predicate: name,
            want,
        });
    }
    Ok(true)
}

/// Claims only the exact atom `predicate:arg`.
fn match_exact(predicate: &str, arg: &str, atom: &Atom) -> bool {
    atom.predicate == predicate && atom.args.len() == 1 && atom.args[0] == arg
}

/// A permanode whose `attr` has some value equal to `value`.
pub(crate) fn perm_attr_equals(attr: &str, value: &str, skip_hidden: bool) -> Constraint {
    Constraint::Permanode(Box::new(PermanodeConstraint {
        skip_hidden,
        ..PermanodeConstraint::attr_equals(attr, value)
    }))
}

/// A permanode whose `attr` has some value containing `value`,
/// case-insensitively.
pub(crate) fn perm_attr_contains(attr: &str, value: &str, skip_hidden: bool) -> Constraint {
    Constraint::Permanode(Box::new(PermanodeConstraint {
        attr: Some(attr.to_string()),
        value_matches: Some(StringConstraint::contains_fold(value)),
        skip_hidden,
        ..PermanodeConstraint::default()
    }))
}

/// A permanode whose `camliContent` points at a file matching `fc`.
pub(crate) fn perm_of_file(fc: FileConstraint) -> Constraint {
    Constraint::Permanode(Box::new(PermanodeConstraint {
        attr: Some("camliContent".to_string()),
        value_in_set: Some(Box::new(Constraint::File(Box::new(fc)))),
        ..PermanodeConstraint::default()
    }))
}

/// A permanode pointing at an image file, optionally bounding the
/// width/height ratio.
pub(crate) fn perm_of_image(wh_ratio: Option<FloatConstraint>) -> Constraint {
    perm_of_file(FileConstraint {
        is_image: true,
        wh_ratio,
        ..FileConstraint::default()
    })
}

/// `tag:VALUE`
struct Tag;

impl Keyword for Tag {
    fn name(&self) -> &'static str {
        "tag"
    }

    fn description(&self) -> &'static str {
        "permanodes with the given tag attribute value"
    }

    fn match_atom(&self, atom: &Atom) -> Result<bool, ExprError> {
        match_prefix("tag", 1, atom)
    }

    fn predicate(&self, _ctx: &ParseContext<'_>, args: &[String]) -> Result<Constraint, ExprError> {
        Ok(perm_attr_equals("tag", &args[0], true))
    }
}

/// `title:SUBSTRING`
struct Title;

impl Keyword for Title {
    fn name(&self) -> &'static str {
        "title"
    }

    fn description(&self) -> &'static str {
        "permanodes whose title contains the value, case-insensitively"
    }

    fn match_atom(&self, atom: &Atom) -> Result<bool, ExprError> {
        match_prefix("title", 1, atom)
    }

    fn predicate(&self, _ctx: &ParseContext<'_>, args: &[String]) -> Result<Constraint, ExprError> {
        Ok(perm_attr_contains("title", &args[0], true))
    }
}

/// `attr:NAME:VALUE`, with `~VALUE` meaning case-insensitive containment.
struct Attr;

impl Keyword for Attr {
    fn name(&self) -> &'static str {
        "attr"
    }

    fn description(&self) -> &'static str {
        "permanodes with the given attribute value; prefix the value with ~ for fuzzy match"
    }

    fn match_atom(&self, atom: &Atom) -> Result<bool, ExprError> {
        match_prefix("attr", 2, atom)
    }

    fn predicate(&self, _ctx: &ParseContext<'_>, args: &[String]) -> Result<Constraint, ExprError> {
        let (attr, value) = (&args[0], &args[1]);
        Ok(match value.strip_prefix('~') {
            Some(rest) => perm_attr_contains(attr, rest, false),
            None => perm_attr_equals(attr, value, false),
        })
    }
}

/// `ref:BLOBREF_PREFIX`
struct Ref;

impl Keyword for Ref {
    fn name(&self) -> &'static str {
        "ref"
    }

    fn description(&self) -> &'static str {
        "blobs whose ref starts with the given prefix"
    }

    fn match_atom(&self, atom: &Atom) -> Result<bool, ExprError> {
        match_prefix("ref", 1, atom)
    }

    fn predicate(&self, _ctx: &ParseContext<'_>, args: &[String]) -> Result<Constraint, ExprError> {
        if !BlobRef::is_ref_prefix(&args[0]) {
            return Err(ExprError::bad_arg(
                "ref",
                format!("{:?} is not a valid blob ref prefix", args[0]),
            ));
        }
        Ok(Constraint::BlobRefPrefix(args[0].clone()))
    }
}

/// `filename:GLOB` with at most a leading and/or trailing `*`.
struct FileName;

impl Keyword for FileName {
    fn name(&self) -> &'static str {
        "filename"
    }

    fn description(&self) -> &'static str {
        "files by name; * is allowed at the start and/or end"
    }

    fn match_atom(&self, atom: &Atom) -> Result<bool, ExprError> {
        match_prefix("filename", 1, atom)
    }

    fn predicate(&self, _ctx: &ParseContext<'_>, args: &[String]) -> Result<Constraint, ExprError> {
        let sc = parse_name_glob(&args[0])?;
        Ok(perm_of_file(FileConstraint {
            file_name: Some(sc),
            ..FileConstraint::default()
        }))
    }
}

/// Turns a `filename:` glob into a string constraint.
fn parse_name_glob(glob: &str) -> Result<StringConstraint, ExprError> {
    let stars = glob.matches('*').count();
    if stars == 0 {
        return Ok(StringConstraint::equals(glob));
    }
    let inner = glob.trim_matches('*');
    if inner.contains('*') {
        return Err(ExprError::bad_arg(
            "filename",
            format!("unsupported glob {glob:?}"),
        ));
    }
    let (starts, ends) = (glob.starts_with('*'), glob.ends_with('*'));
    Ok(match (starts, ends) {
        (true, true) if stars == 2 && !inner.is_empty() => StringConstraint {
            contains: Some(inner.to_string()),
            ..StringConstraint::default()
        },
        (true, false) if stars == 1 => StringConstraint {
            has_suffix: Some(inner.to_string()),
            ..StringConstraint::default()
        },
        (false, true) if stars == 1 => StringConstraint {
            has_prefix: Some(inner.to_string()),
            ..StringConstraint::default()
        },
        _ => {
            return Err(ExprError::bad_arg(
                "filename",
                format!("unsupported glob {glob:?}"),
            ));
        }
    })
}

/// `format:TYPE` with a short list of known names, or a verbatim MIME.
struct Format;

impl Keyword for Format {
    fn name(&self) -> &'static str {
        "format"
    }

    fn description(&self) -> &'static str {
        "files of the given format: jpg, jpeg, gif, png, pdf, or a full MIME type"
    }

    fn match_atom(&self, atom: &Atom) -> Result<bool, ExprError> {
        match_prefix("format", 1, atom)
    }

    fn predicate(&self, _ctx: &ParseContext<'_>, args: &[String]) -> Result<Constraint, ExprError> {
        let mime = match args[0].as_str() {
            "jpg" | "jpeg" => "image/jpeg".to_string(),
            "gif" => "image/gif".to_string(),
            "png" => "image/png".to_string(),
            "pdf" => "application/pdf".to_string(),
            verbatim if verbatim.contains('/') => verbatim.to_string(),
            other => {
                return Err(ExprError::bad_arg(
                    "format",
                    format!("unknown format {other:?}"),
                ));
            }
        };
        Ok(perm_of_file(FileConstraint {
            mime_type: Some(StringConstraint::equals(mime)),
            ..FileConstraint::default()
        }))
    }
}

/// The template every `before:`/`after:` argument is padded against.
const TIME_TEMPLATE: &str = "0000-01-01T00:00:00Z";

/// Parses an RFC 3339 prefix, right-padding from [`TIME_TEMPLATE`].
pub(crate) fn parse_time_prefix(
    predicate: &'static str,
    arg: &str,
) -> Result<DateTime<Utc>, ExprError> {
    let padded = if arg.len() < TIME_TEMPLATE.len() {
        format!("{arg}{}", &TIME_TEMPLATE[arg.len()..])
    } else {
        arg.to_string()
    };
    DateTime::parse_from_rfc3339(&padded)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ExprError::bad_arg(predicate, format!("bad time {arg:?}: {e}")))
}

/// `before:TIME_PREFIX`
struct Before;

impl Keyword for Before {
    fn name(&self) -> &'static str {
        "before"
    }

    fn description(&self) -> &'static str {
        "permanodes from strictly before the given time"
    }

    fn match_atom(&self, atom: &Atom) -> Result<bool, ExprError> {
        match_prefix("before", 1, atom)
    }

    fn predicate(&self, _ctx: &ParseContext<'_>, args: &[String]) -> Result<Constraint, ExprError> {
        let t = parse_time_prefix("before", &args[0])?;
        Ok(Constraint::Permanode(Box::new(PermanodeConstraint {
            time: Some(TimeConstraint::before(t)),
            ..PermanodeConstraint::default()
        })))
    }
}

/// `after:TIME_PREFIX`
struct After;

impl Keyword for After {
    fn name(&self) -> &'static str {
        "after"
    }

    fn description(&self) -> &'static str {
        "permanodes from the given time onwards"
    }

    fn match_atom(&self, atom: &Atom) -> Result<bool, ExprError> {
        match_prefix("after", 1, atom)
    }

    fn predicate(&self, _ctx: &ParseContext<'_>, args: &[String]) -> Result<Constraint, ExprError> {
        let t = parse_time_prefix("after", &args[0])?;
        Ok(Constraint::Permanode(Box::new(PermanodeConstraint {
            time: Some(TimeConstraint::after(t)),
            ..PermanodeConstraint::default()
        })))
    }
}

/// `is:image`
struct IsImage;

impl Keyword for IsImage {
    fn name(&self) -> &'static str {
        "is:image"
    }

    fn description(&self) -> &'static str {
        "permanodes whose content is an image"
    }

    fn match_atom(&self, atom: &Atom) -> Result<bool, ExprError> {
        Ok(match_exact("is", "image", atom))
    }

    fn predicate(&self, _ctx: &ParseContext<'_>, _args: &[String]) -> Result<Constraint, ExprError> {
        Ok(perm_of_image(None))
    }
}

/// `is:landscape`
struct IsLandscape;

impl Keyword for IsLandscape {
    fn name(&self) -> &'static str {
        "is:landscape"
    }

    fn description(&self) -> &'static str {
        "image permanodes at least as wide as tall"
    }

    fn match_atom(&self, atom: &Atom) -> Result<bool, ExprError> {
        Ok(match_exact("is", "landscape", atom))
    }

    fn predicate(&self, _ctx: &ParseContext<'_>, _args: &[String]) -> Result<Constraint, ExprError> {
        Ok(perm_of_image(Some(FloatConstraint::at_least(1.0))))
    }
}

/// `is:portrait`
struct IsPortrait;

impl Keyword for IsPortrait {
    fn name(&self) -> &'static str {
        "is:portrait"
    }

    fn description(&self) -> &'static str {
        "image permanodes at least as tall as wide"
    }

    fn match_atom(&self, atom: &Atom) -> Result<bool, ExprError> {
        Ok(match_exact("is", "portrait", atom))
    }

    fn predicate(&self, _ctx: &ParseContext<'_>, _args: &[String]) -> Result<Constraint, ExprError> {
        Ok(perm_of_image(Some(FloatConstraint::at_most(1.0))))
    }
}

/// `is:pano`
struct IsPano;

impl Keyword for IsPano {
    fn name(&self) -> &'static str {
        "is:pano"
    }

    fn description(&self) -> &'static str {
        "image permanodes at least twice as wide as tall"
    }

    fn match_atom(&self, atom: &Atom) -> Result<bool, ExprError> {
        Ok(match_exact("is", "pano", atom))
    }

    fn predicate(&self, _ctx: &ParseContext<'_>, _args: &[String]) -> Result<Constraint, ExprError> {
        Ok(perm_of_image(Some(FloatConstraint::at_least(2.0))))
    }
}

/// Parses a `width:`/`height:` range: `N`, `MIN-`, `-MAX`, or `MIN-MAX`.
pub(crate) fn parse_dimension(
    predicate: &'static str,
    arg: &str,
) -> Result<IntConstraint, ExprError> {
    /// Parses one side of the range: up to ten decimal digits.
    fn side(predicate: &'static str, s: &str) -> Result<i64, ExprError> {
        if s.is_empty() || s.len() > 10 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ExprError::bad_arg(
                predicate,
                format!("bad dimension {s:?}"),
            ));
        }
        s.parse()
            .map_err(|e| ExprError::bad_arg(predicate, format!("bad dimension {s:?}: {e}")))
    }

    match arg.split_once('-') {
        None => Ok(IntConstraint::exact(side(predicate, arg)?)),
        Some(("", "")) => Err(ExprError::bad_arg(predicate, "empty range")),
        Some((min, "")) => Ok(IntConstraint::at_least(side(predicate, min)?)),
        Some(("", max)) => Ok(IntConstraint::at_most(side(predicate, max)?)),
        Some((min, max)) => Ok(IntConstraint::between(
            side(predicate, min)?,
            side(predicate, max)?,
        )),
    }
}

/// `width:N`, `width:MIN-MAX`, …
struct Width;

impl Keyword for Width {
    fn name(&self) -> &'static str {
        "width"
    }

    fn description(&self) -> &'static str {
        "image permanodes by pixel width: N, MIN-, -MAX, or MIN-MAX"
    }

    fn match_atom(&self, atom: &Atom) -> Result<bool, ExprError> {
        match_prefix("width", 1, atom)
    }

    fn predicate(&self, _ctx: &ParseContext<'_>, args: &[String]) -> Result<Constraint, ExprError> {
        Ok(perm_of_file(FileConstraint {
            is_image: true,
            width: Some(parse_dimension("width", &args[0])?),
            ..FileConstraint::default()
        }))
    }
}

/// `height:N`, `height:MIN-MAX`, …
struct Height;

impl Keyword for Height {
    fn name(&self) -> &'static str {
        "height"
    }

    fn description(&self) -> &'static str {
        "image permanodes by pixel height: N, MIN-, -MAX, or MIN-MAX"
    }

    fn match_atom(&self, atom: &Atom) -> Result<bool, ExprError> {
        match_prefix("height", 1, atom)
    }

    fn predicate(&self, _ctx: &ParseContext<'_>, args: &[String]) -> Result<Constraint, ExprError> {
        Ok(perm_of_file(FileConstraint {
            is_image: true,
            height: Some(parse_dimension("height", &args[0])?),
            ..FileConstraint::default()
        }))
    }
}

/// `loc:"PLACE NAME"`, resolved through the geocoder.
struct Loc;

impl Keyword for Loc {
    fn name(&self) -> &'static str {
        "loc"
    }

    fn description(&self) -> &'static str {
        "permanodes located in the named place"
    }

    fn match_atom(&self, atom: &Atom) -> Result<bool, ExprError> {
        match_prefix("loc", 1, atom)
    }

    fn predicate(&self, ctx: &ParseContext<'_>, args: &[String]) -> Result<Constraint, ExprError> {
        let place = &args[0];
        let geocoder = ctx.geocoder.ok_or(ExprError::NoGeocoder)?;
        let rects = geocoder.lookup(place).map_err(|e| ExprError::Geocode {
            place: place.clone(),
            message: e.to_string(),
        })?;
        let per_rect: Vec<Constraint> = rects
            .iter()
            .map(|r| {
                Constraint::Permanode(Box::new(PermanodeConstraint {
                    location: Some(LocationConstraint {
                        north: r.north_east.latitude,
                        south: r.south_west.latitude,
                        east: r.north_east.longitude,
                        west: r.south_west.longitude,
                        ..LocationConstraint::default()
                    }),
                    ..PermanodeConstraint::default()
                }))
            })
            .collect();
        let mut iter = per_rect.into_iter();
        let Some(first) = iter.next() else {
            return Err(ExprError::Geocode {
                place: place.clone(),
                message: "no results".to_string(),
            });
        };
        Ok(iter.fold(first, Constraint::or))
    }
}

/// `locrect:N,W,S,E`
struct LocRect;

impl Keyword for LocRect {
    fn name(&self) -> &'static str {
        "locrect"
    }

    fn description(&self) -> &'static str {
        "permanodes located in the rectangle north,west,south,east"
    }

    fn match_atom(&self, atom: &Atom) -> Result<bool, ExprError> {
        match_prefix("locrect", 1, atom)
    }

    fn predicate(&self, _ctx: &ParseContext<'_>, args: &[String]) -> Result<Constraint, ExprError> {
        /// Parses one coordinate.
        fn coord(s: &str) -> Result<f64, ExprError> {
            s.trim()
                .parse()
                .map_err(|e| ExprError::bad_arg("locrect", format!("bad coordinate {s:?}: {e}")))
        }

        let parts: Vec<&str> = args[0].split(',').collect();
        let [north, west, south, east] = parts.as_slice() else {
            return Err(ExprError::bad_arg(
                "locrect",
                "expected four comma-separated coordinates",
            ));
        };
        Ok(Constraint::Permanode(Box::new(PermanodeConstraint {
            location: Some(LocationConstraint {
                north: coord(north)?,
                west: coord(west)?,
                south: coord(south)?,
                east: coord(east)?,
                ..LocationConstraint::default()
            }),
            ..PermanodeConstraint::default()
        })))
    }
}

/// `has:location`
struct HasLocation;

impl Keyword for HasLocation {
    fn name(&self) -> &'static str {
        "has:location"
    }

    fn description(&self) -> &'static str {
        "permanodes with any resolvable location"
    }

    fn match_atom(&self, atom: &Atom) -> Result<bool, ExprError> {
        Ok(match_exact("has", "location", atom))
    }

    fn predicate(&self, _ctx: &ParseContext<'_>, _args: &[String]) -> Result<Constraint, ExprError> {
        Ok(Constraint::Permanode(Box::new(PermanodeConstraint {
            location: Some(LocationConstraint {
                any: true,
                ..LocationConstraint::default()
            }),
            ..PermanodeConstraint::default()
        })))
    }
}

/// Builds the relation constraint shared by `childrenof:`/`parentof:`.
fn relation_to_prefix(
    predicate: &'static str,
    relation: RelationKind,
    prefix: &str,
) -> Result<Constraint, ExprError> {
    if !BlobRef::is_ref_prefix(prefix) {
        return Err(ExprError::bad_arg(
            predicate,
            format!("{prefix:?} is not a valid blob ref prefix"),
        ));
    }
    Ok(Constraint::Permanode(Box::new(PermanodeConstraint {
        relation: Some(Box::new(RelationConstraint {
            relation,
            edge_type: None,
            any: Some(Box::new(Constraint::BlobRefPrefix(prefix.to_string()))),
            all: None,
        })),
        ..PermanodeConstraint::default()
    })))
}

/// `childrenof:PARENT_REF_PREFIX`
struct ChildrenOf;

impl Keyword for ChildrenOf {
    fn name(&self) -> &'static str {
        "childrenof"
    }

    fn description(&self) -> &'static str {
        "permanodes that are members of the given parent"
    }

    fn match_atom(&self, atom: &Atom) -> Result<bool, ExprError> {
        match_prefix("childrenof", 1, atom)
    }

    fn predicate(&self, _ctx: &ParseContext<'_>, args: &[String]) -> Result<Constraint, ExprError> {
        relation_to_prefix("childrenof", RelationKind::Parent, &args[0])
    }
}

/// `parentof:CHILD_REF_PREFIX`
struct ParentOf;

impl Keyword for ParentOf {
    fn name(&self) -> &'static str {
        "parentof"
    }

    fn description(&self) -> &'static str {
        "permanodes that have the given permanode as a member"
    }

    fn match_atom(&self, atom: &Atom) -> Result<bool, ExprError> {
        match_prefix("parentof", 1, atom)
    }

    fn predicate(&self, _ctx: &ParseContext<'_>, args: &[String]) -> Result<Constraint, ExprError> {
        relation_to_prefix("parentof", RelationKind::Child, &args[0])
    }
}

/// `with:NAME`: permanodes whose `with` attribute points at a person
/// permanode whose given or family name contains the argument.
struct With;

impl Keyword for With {
    fn name(&self) -> &'static str {
        "with"
    }

    fn description(&self) -> &'static str {
        "permanodes shared with the named person"
    }

    fn match_atom(&self, atom: &Atom) -> Result<bool, ExprError> {
        match_prefix("with", 1, atom)
    }

    fn predicate(&self, _ctx: &ParseContext<'_>, args: &[String]) -> Result<Constraint, ExprError> {
        let name = &args[0];
        let person = Constraint::and(
            perm_attr_equals("camliNodeType", "foursquare.com:person", false),
            Constraint::or(
                perm_attr_contains("givenName", name, false),
                perm_attr_contains("familyName", name, false),
            ),
        );
        Ok(Constraint::Permanode(Box::new(PermanodeConstraint {
            attr: Some("with".to_string()),
            value_in_set: Some(Box::new(person)),
            ..PermanodeConstraint::default()
        })))
    }
}

/// `named:NAME`: expands a stored expression and evaluates it in place.
struct Named;

impl Keyword for Named {
    fn name(&self) -> &'static str {
        "named"
    }

    fn description(&self) -> &'static str {
        "evaluates the stored search expression of the given name"
    }

    fn match_atom(&self, atom: &Atom) -> Result<bool, ExprError> {
        match_prefix("named", 1, atom)
    }

    fn predicate(&self, ctx: &ParseContext<'_>, args: &[String]) -> Result<Constraint, ExprError> {
        let name = &args[0];
        let registry = ctx.named.ok_or(ExprError::NoNamedRegistry)?;
        let expression = registry.get_named(name).map_err(|e| ExprError::Named {
            name: name.clone(),
            message: e.to_string(),
        })?;
        ctx.parse_nested(&expression)
    }
}
