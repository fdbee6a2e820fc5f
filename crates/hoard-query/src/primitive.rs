//! Scalar constraint primitives: integer, float, string, and time
//! predicates with well-defined matching semantics.
//!
//! All four are plain data with a `matches` method; `Int` and `Float`
//! distinguish an explicit zero bound from an absent one via the
//! `zero_min`/`zero_max` flags, so `width:0` is not the same as `width:`
//! left unbounded.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InvalidConstraint;

/// skip_serializing_if helper for zero integers.
fn i64_is_zero(v: &i64) -> bool {
    *v == 0
}

/// skip_serializing_if helper for zero floats.
fn f64_is_zero(v: &f64) -> bool {
    *v == 0.0
}

/// Matches an integer against an inclusive range.
///
/// A bound of zero is ambiguous between "unset" and "exactly zero"; the
/// `zero_min`/`zero_max` flags resolve it. Setting a flag together with a
/// nonzero value is a validation error.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntConstraint {
    /// Inclusive lower bound; meaningful when nonzero or `zero_min`.
    #[serde(skip_serializing_if = "i64_is_zero")]
    pub min: i64,
    /// Inclusive upper bound; meaningful when nonzero or `zero_max`.
    #[serde(skip_serializing_if = "i64_is_zero")]
    pub max: i64,
    /// Marks an explicit lower bound of zero.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub zero_min: bool,
    /// Marks an explicit upper bound of zero.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub zero_max: bool,
}

impl IntConstraint {
    /// A constraint matching exactly `n`.
    pub fn exact(n: i64) -> Self {
        Self {
            min: n,
            max: n,
            zero_min: n == 0,
            zero_max: n == 0,
        }
    }

    /// A constraint matching any value `>= n`.
    pub fn at_least(n: i64) -> Self {
        Self {
            min: n,
            zero_min: n == 0,
            ..Self::default()
        }
    }

    /// A constraint matching any value `<= n`.
    pub fn at_most(n: i64) -> Self {
        Self {
            max: n,
            zero_max: n == 0,
            ..Self::default()
        }
    }

    /// A constraint matching `min <= v <= max`.
    pub fn between(min: i64, max: i64) -> Self {
        Self {
            min,
            max,
            zero_min: min == 0,
            zero_max: max == 0,
        }
    }

    /// Whether a lower bound is in effect.
    fn has_min(&self) -> bool {
        self.zero_min || self.min != 0
    }

    /// Whether an upper bound is in effect.
    fn has_max(&self) -> bool {
        self.zero_max || self.max != 0
    }

    /// Reports whether `v` satisfies the bounds.
    pub fn matches(&self, v: i64) -> bool {
        (!self.has_min() || v >= self.min) && (!self.has_max() || v <= self.max)
    }

    /// Checks the flag/value and range invariants.
    pub fn validate(&self) -> Result<(), InvalidConstraint> {
        if self.zero_min && self.min != 0 {
            return Err(InvalidConstraint::new("int: both zeroMin and min set"));
        }
        if self.zero_max && self.max != 0 {
            return Err(InvalidConstraint::new("int: both zeroMax and max set"));
        }
        if self.has_min() && self.has_max() && self.min > self.max {
            return Err(InvalidConstraint::new("int: min is greater than max"));
        }
        Ok(())
    }
}

/// Matches a float against an inclusive range; same zero-bound rules as
/// [`IntConstraint`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FloatConstraint {
    /// Inclusive lower bound; meaningful when nonzero or `zero_min`.
    #[serde(skip_serializing_if = "f64_is_zero")]
    pub min: f64,
    /// Inclusive upper bound; meaningful when nonzero or `zero_max`.
    #[serde(skip_serializing_if = "f64_is_zero")]
    pub max: f64,
    /// Marks an explicit lower bound of zero.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub zero_min: bool,
    /// Marks an explicit upper bound of zero.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub zero_max: bool,
}

impl FloatConstraint {
    /// A constraint matching any value `>= n`.
    pub fn at_least(n: f64) -> Self {
        Self {
            min: n,
            zero_min: n == 0.0,
            ..Self::default()
        }
    }

    /// A constraint matching any value `<= n`.
    pub fn at_most(n: f64) -> Self {
        Self {
            max: n,
            zero_max: n == 0.0,
            ..Self::default()
        }
    }

    /// Whether a lower bound is in effect.
    fn has_min(&self) -> bool {
        self.zero_min || self.min != 0.0
    }

    /// Whether an upper bound is in effect.
    fn has_max(&self) -> bool {
        self.zero_max || self.max != 0.0
    }

    /// Reports whether `v` satisfies the bounds.
    pub fn matches(&self, v: f64) -> bool {
        (!self.has_min() || v >= self.min) && (!self.has_max() || v <= self.max)
    }

    /// Checks the flag/value and range invariants.
    pub fn validate(&self) -> Result<(), InvalidConstraint> {
        if self.zero_min && self.min != 0.0 {
            return Err(InvalidConstraint::new("float: both zeroMin and min set"));
        }
        if self.zero_max && self.max != 0.0 {
            return Err(InvalidConstraint::new("float: both zeroMax and max set"));
        }
        if self.has_min() && self.has_max() && self.min > self.max {
            return Err(InvalidConstraint::new("float: min is greater than max"));
        }
        Ok(())
    }
}

/// Matches a string; every set field must hold.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StringConstraint {
    /// Requires the string to be empty.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub empty: bool,
    /// Exact equality.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equals: Option<String>,
    /// Substring containment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    /// Prefix match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_prefix: Option<String>,
    /// Suffix match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_suffix: Option<String>,
    /// Constrains the byte length of the string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub byte_length: Option<IntConstraint>,
    /// Applies Unicode case folding to equals/contains/prefix/suffix.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub case_insensitive: bool,
}

impl StringConstraint {
    /// A case-insensitive containment constraint.
    pub fn contains_fold(s: impl Into<String>) -> Self {
        Self {
            contains: Some(s.into()),
            case_insensitive: true,
            ..Self::default()
        }
    }

    /// An exact-equality constraint.
    pub fn equals(s: impl Into<String>) -> Self {
        Self {
            equals: Some(s.into()),
            ..Self::default()
        }
    }

    /// Reports whether `s` satisfies every set field.
    pub fn matches(&self, s: &str) -> bool {
        if self.empty && !s.is_empty() {
            return false;
        }
        if let Some(bl) = &self.byte_length
            && !bl.matches(s.len() as i64)
        {
            return false;
        }
        if self.case_insensitive {
            let folded = s.to_lowercase();
            self.text_matches(&folded, str::to_lowercase)
        } else {
            self.text_matches(s, |t| t.to_string())
        }
    }

    /// Applies the four text predicates to `s`, mapping each needle
    /// through `fold` first.
    fn text_matches(&self, s: &str, fold: impl Fn(&str) -> String) -> bool {
        if let Some(eq) = &self.equals
            && s != fold(eq)
        {
            return false;
        }
        if let Some(sub) = &self.contains
            && !s.contains(&fold(sub))
        {
            return false;
        }
        if let Some(prefix) = &self.has_prefix
            && !s.starts_with(&fold(prefix))
        {
            return false;
        }
        if let Some(suffix) = &self.has_suffix
            && !s.ends_with(&fold(suffix))
        {
            return false;
        }
        true
    }

    /// Validates the nested byte-length constraint.
    pub fn validate(&self) -> Result<(), InvalidConstraint> {
        if let Some(bl) = &self.byte_length {
            bl.validate()?;
        }
        Ok(())
    }
}

/// Matches a point in time against an optional window.
///
/// `before` is strict; `after` is inclusive. `in_last` supplies a lower
/// bound of `now - in_last` when `after` is unset. An absent input time
/// never matches.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeConstraint {
    /// Strict upper bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<DateTime<Utc>>,
    /// Inclusive lower bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<DateTime<Utc>>,
    /// Sliding lower bound relative to evaluation time; ignored when
    /// `after` is set.
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub in_last: Option<Duration>,
}

impl TimeConstraint {
    /// A constraint matching times strictly before `t`.
    pub fn before(t: DateTime<Utc>) -> Self {
        Self {
            before: Some(t),
            ..Self::default()
        }
    }

    /// A constraint matching times at or after `t`.
    pub fn after(t: DateTime<Utc>) -> Self {
        Self {
            after: Some(t),
            ..Self::default()
        }
    }

    /// Reports whether `t` falls in the window, evaluated at `now`.
    pub fn matches(&self, t: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(t) = t else {
            return false;
        };
        if let Some(before) = self.before
            && t >= before
        {
            return false;
        }
        if let Some(after) = self.after {
            if t < after {
                return false;
            }
        } else if let Some(in_last) = self.in_last {
            // A duration too large for the calendar imposes no lower bound.
            let lower = chrono::Duration::from_std(in_last)
                .ok()
                .and_then(|d| now.checked_sub_signed(d));
            if let Some(lower) = lower
                && t < lower
            {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Shorthand RFC 3339 parse for test fixtures.
    fn t(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn int_unbounded_matches_everything() {
        let c = IntConstraint::default();
        for v in [i64::MIN, -1, 0, 1, i64::MAX] {
            assert!(c.matches(v));
        }
    }

    #[test]
    fn int_range_round_trip() {
        let c = IntConstraint::between(3, 7);
        for v in -2..12 {
            assert_eq!(c.matches(v), (3..=7).contains(&v), "v={v}");
        }
    }

    #[test]
    fn int_zero_bound_is_distinct_from_unset() {
        let exact_zero = IntConstraint::exact(0);
        assert!(exact_zero.matches(0));
        assert!(!exact_zero.matches(1));
        assert!(!exact_zero.matches(-1));

        let at_least_zero = IntConstraint::at_least(0);
        assert!(at_least_zero.matches(0));
        assert!(at_least_zero.matches(5));
        assert!(!at_least_zero.matches(-5));
    }

    #[test]
    fn int_validation_rejects_conflicts() {
        let c = IntConstraint {
            min: 3,
            zero_min: true,
            ..IntConstraint::default()
        };
        assert!(c.validate().is_err());

        let inverted = IntConstraint::between(7, 3);
        assert!(inverted.validate().is_err());

        assert!(IntConstraint::between(3, 7).validate().is_ok());
        assert!(IntConstraint::default().validate().is_ok());
    }

    #[test]
    fn float_ratio_bounds() {
        let landscape = FloatConstraint::at_least(1.0);
        assert!(landscape.matches(1.0));
        assert!(landscape.matches(1.8));
        assert!(!landscape.matches(0.7));

        let portrait = FloatConstraint::at_most(1.0);
        assert!(portrait.matches(0.7));
        assert!(!portrait.matches(1.5));
    }

    #[test]
    fn string_equals_and_contains() {
        let c = StringConstraint::equals("funny");
        assert!(c.matches("funny"));
        assert!(!c.matches("Funny"));
        assert!(!c.matches("fun"));

        let c = StringConstraint::contains_fold("Red");
        assert!(c.matches("dark red"));
        assert!(c.matches("RED"));
        assert!(!c.matches("blue"));
    }

    #[test]
    fn string_case_insensitive_equals_folds() {
        let c = StringConstraint {
            equals: Some("Straße".to_string()),
            case_insensitive: true,
            ..StringConstraint::default()
        };
        assert!(c.matches("STRASSE"));
    }

    #[test]
    fn string_prefix_suffix_and_length() {
        let c = StringConstraint {
            has_prefix: Some("IMG_".to_string()),
            has_suffix: Some(".jpg".to_string()),
            byte_length: Some(IntConstraint::between(5, 20)),
            ..StringConstraint::default()
        };
        assert!(c.matches("IMG_0001.jpg"));
        assert!(!c.matches("IMG_0001.png"));
        assert!(!c.matches("DSC_0001.jpg"));
    }

    #[test]
    fn string_empty_flag() {
        let c = StringConstraint {
            empty: true,
            ..StringConstraint::default()
        };
        assert!(c.matches(""));
        assert!(!c.matches("x"));
    }

    #[test]
    fn time_before_is_strict() {
        let c = TimeConstraint::before(t("2012-06-01T00:00:00Z"));
        let now = t("2020-01-01T00:00:00Z");
        assert!(c.matches(Some(t("2012-05-31T23:59:59Z")), now));
        assert!(!c.matches(Some(t("2012-06-01T00:00:00Z")), now));
    }

    #[test]
    fn time_after_is_inclusive() {
        let c = TimeConstraint::after(t("2011-01-01T00:00:00Z"));
        let now = t("2020-01-01T00:00:00Z");
        assert!(c.matches(Some(t("2011-01-01T00:00:00Z")), now));
        assert!(!c.matches(Some(t("2010-12-31T23:59:59Z")), now));
    }

    #[test]
    fn time_in_last_is_relative_to_now() {
        let c = TimeConstraint {
            in_last: Some(Duration::from_secs(3600)),
            ..TimeConstraint::default()
        };
        let now = t("2020-01-01T12:00:00Z");
        assert!(c.matches(Some(t("2020-01-01T11:30:00Z")), now));
        assert!(c.matches(Some(t("2020-01-01T11:00:00Z")), now));
        assert!(!c.matches(Some(t("2020-01-01T10:59:59Z")), now));
    }

    #[test]
    fn time_after_takes_precedence_over_in_last() {
        let c = TimeConstraint {
            after: Some(t("2019-01-01T00:00:00Z")),
            in_last: Some(Duration::from_secs(60)),
            ..TimeConstraint::default()
        };
        let now = t("2020-01-01T00:00:00Z");
        assert!(c.matches(Some(t("2019-06-01T00:00:00Z")), now));
    }

    #[test]
    fn absent_time_never_matches() {
        let c = TimeConstraint::before(t("2030-01-01T00:00:00Z"));
        assert!(!c.matches(None, t("2020-01-01T00:00:00Z")));
        assert!(!TimeConstraint::default().matches(None, t("2020-01-01T00:00:00Z")));
    }

    #[test]
    fn int_wire_form_keeps_zero_flags() {
        let c = IntConstraint::exact(0);
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"zeroMin": true, "zeroMax": true})
        );
        let back: IntConstraint = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
    }
}
