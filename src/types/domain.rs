// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The discrete-domain and occurrence-range facets.
//!
//! [`Domain`] restricts a simple type to an enumerated set of values;
//! [`CountRange`] restricts how many elements a list may hold. Both are
//! [`Monotonic`]: combining an inherited value with a local one can only
//! narrow, so a subtype can never widen what its ancestors allow.

use super::dynamic::Monotonic;
use crate::values::{Simple, SimpleValue};
use std::fmt;

/// An enumerated set of allowed simple values, ordered and deduplicated by
/// key.
///
/// Intersection keeps the *base* order, so the effective domain of a subtype
/// lists values in the order the ancestor declared them.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct Domain {
    values: Vec<Simple>,
}

impl Domain {
    pub fn new<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Simple>,
    {
        let mut out: Vec<Simple> = Vec::new();
        for v in values {
            let v = v.into();
            if !out.iter().any(|have| have.key() == v.key()) {
                out.push(v);
            }
        }
        Self { values: out }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.iter().any(|v| v.key() == key)
    }

    pub fn contains(&self, value: &SimpleValue) -> bool {
        self.contains_key(&value.key())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Simple> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Monotonic for Domain {
    fn combine(base: &Self, local: &Self) -> Self {
        Self {
            values: base
                .values
                .iter()
                .filter(|v| local.contains_key(&v.key()))
                .cloned()
                .collect(),
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, "}}")
    }
}

/// How many occurrences (list elements) are allowed: `min..=max`, with
/// `max == None` meaning unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct CountRange {
    pub min: usize,
    pub max: Option<usize>,
}

impl CountRange {
    pub fn new(min: usize, max: Option<usize>) -> Self {
        Self { min, max }
    }

    pub fn at_least(min: usize) -> Self {
        Self { min, max: None }
    }

    pub fn at_most(max: usize) -> Self {
        Self { min: 0, max: Some(max) }
    }

    pub fn contains(&self, count: usize) -> bool {
        count >= self.min && self.max.is_none_or(|max| count <= max)
    }
}

impl Default for CountRange {
    fn default() -> Self {
        Self { min: 0, max: None }
    }
}

impl Monotonic for CountRange {
    fn combine(base: &Self, local: &Self) -> Self {
        // Range intersection. The result may be empty (min > max); validation
        // then rejects every count, which is the narrowest possible range.
        Self {
            min: base.min.max(local.min),
            max: match (base.max, local.max) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            },
        }
    }
}

impl fmt::Display for CountRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "{}..={max}", self.min),
            None => write!(f, "{}..", self.min),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain_of(keys: &[&str]) -> Domain {
        Domain::new(keys.iter().copied())
    }

    #[test]
    fn construction_deduplicates_by_key() {
        let d = domain_of(&["a", "b", "a"]);
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn intersection_keeps_base_order() {
        let base = domain_of(&["a", "b", "c"]);
        let local = domain_of(&["c", "a"]);
        let eff = Domain::combine(&base, &local);
        let keys: Vec<_> = eff.iter().map(Simple::key).collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn superset_local_leaves_base_unchanged() {
        let base = domain_of(&["a", "b"]);
        let local = domain_of(&["a", "b", "c", "d"]);
        assert_eq!(Domain::combine(&base, &local), base);
    }

    #[test]
    fn mixed_payload_kinds_key_independently() {
        let d = Domain::new([SimpleValue::from(1i64), SimpleValue::from("one")]);
        assert!(d.contains(&SimpleValue::from(1i64)));
        assert!(d.contains(&SimpleValue::from("one")));
        assert!(!d.contains(&SimpleValue::from("two")));
    }

    #[quickcheck]
    fn combine_never_adds(base: Vec<String>, local: Vec<String>) -> bool {
        let base = Domain::new(base);
        let local = Domain::new(local);
        Domain::combine(&base, &local)
            .iter()
            .all(|v| base.contains_key(&v.key()))
    }

    #[quickcheck]
    fn combine_is_intersection(base: Vec<String>, local: Vec<String>) -> bool {
        let base = Domain::new(base);
        let local = Domain::new(local);
        let eff = Domain::combine(&base, &local);
        base.iter().all(|v| {
            let in_both = local.contains_key(&v.key());
            eff.contains_key(&v.key()) == in_both
        })
    }

    #[quickcheck]
    fn count_range_combine_never_widens(
        base_min: u8,
        base_max: Option<u8>,
        local_min: u8,
        local_max: Option<u8>,
    ) -> bool {
        let base = CountRange::new(base_min as usize, base_max.map(usize::from));
        let local = CountRange::new(local_min as usize, local_max.map(usize::from));
        let eff = CountRange::combine(&base, &local);
        (0usize..=512).all(|n| !eff.contains(n) || base.contains(n))
    }

    #[test]
    fn count_range_combine_tightens_both_ends() {
        let base = CountRange::new(1, Some(10));
        let local = CountRange::new(3, Some(7));
        assert_eq!(CountRange::combine(&base, &local), CountRange::new(3, Some(7)));

        let wider = CountRange::new(0, None);
        assert_eq!(CountRange::combine(&base, &wider), base);
    }
}
