//! Index bounds: per-field interval lists and their construction from
//! predicates.
//!
//! Interval lists are built in ascending value order. Alignment to
//! descending key fields and backward scans happens once the whole
//! bounds are assembled, see [`IndexBounds::align`].

use std::cmp::Ordering;
use std::fmt;

use bson::oid::ObjectId;
use bson::{Bson, DateTime, Document, Timestamp};
use slate_query::{
    CmpOp, MatchExpression, MatchKind, apply_collation, as_f64, canonical_type, compare_values,
    is_descending,
};

use crate::index::IndexEntry;

/// How faithfully bounds represent the predicate that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BoundsTightness {
    /// Bounds match exactly the documents the predicate matches.
    Exact,
    /// Superset; the predicate can be re-checked against index keys.
    InexactCovered,
    /// Superset; the predicate needs the full document.
    InexactFetch,
}

fn cmp(a: &Bson, b: &Bson) -> Ordering {
    compare_values(a, b, None)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    pub start: Bson,
    pub end: Bson,
    pub start_inclusive: bool,
    pub end_inclusive: bool,
}

impl Interval {
    pub fn new(start: Bson, end: Bson, start_inclusive: bool, end_inclusive: bool) -> Self {
        Self {
            start,
            end,
            start_inclusive,
            end_inclusive,
        }
    }

    pub fn point(value: Bson) -> Self {
        Self::new(value.clone(), value, true, true)
    }

    /// `[MinKey, MaxKey]`.
    pub fn all_values() -> Self {
        Self::new(Bson::MinKey, Bson::MaxKey, true, true)
    }

    pub fn is_point(&self) -> bool {
        self.start_inclusive && self.end_inclusive && cmp(&self.start, &self.end) == Ordering::Equal
    }

    pub fn is_empty(&self) -> bool {
        match cmp(&self.start, &self.end) {
            Ordering::Greater => true,
            Ordering::Equal => !(self.start_inclusive && self.end_inclusive),
            Ordering::Less => false,
        }
    }

    pub fn is_all_values(&self) -> bool {
        let (lo, hi) = if cmp(&self.start, &self.end) == Ordering::Greater {
            (&self.end, &self.start)
        } else {
            (&self.start, &self.end)
        };
        matches!(lo, Bson::MinKey)
            && matches!(hi, Bson::MaxKey)
            && self.start_inclusive
            && self.end_inclusive
    }

    pub fn reversed(&self) -> Self {
        Self::new(
            self.end.clone(),
            self.start.clone(),
            self.end_inclusive,
            self.start_inclusive,
        )
    }

    /// Whether string keys may fall inside this interval.
    pub fn may_contain_strings(&self) -> bool {
        let (lo, hi) = (canonical_type(&self.start), canonical_type(&self.end));
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        lo <= 15 && hi >= 15
    }

    /// Overlap of two ascending intervals.
    fn intersect(&self, other: &Interval) -> Option<Interval> {
        let (start, start_inclusive) = match cmp(&self.start, &other.start) {
            Ordering::Less => (other.start.clone(), other.start_inclusive),
            Ordering::Greater => (self.start.clone(), self.start_inclusive),
            Ordering::Equal => (
                self.start.clone(),
                self.start_inclusive && other.start_inclusive,
            ),
        };
        let (end, end_inclusive) = match cmp(&self.end, &other.end) {
            Ordering::Less => (self.end.clone(), self.end_inclusive),
            Ordering::Greater => (other.end.clone(), other.end_inclusive),
            Ordering::Equal => (self.end.clone(), self.end_inclusive && other.end_inclusive),
        };
        let out = Interval::new(start, end, start_inclusive, end_inclusive);
        (!out.is_empty()).then_some(out)
    }
}

/// Intervals over one key field, ordered in scan order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedIntervalList {
    pub name: String,
    pub intervals: Vec<Interval>,
}

impl OrderedIntervalList {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            intervals: Vec::new(),
        }
    }

    pub fn all_values(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            intervals: vec![Interval::all_values()],
        }
    }

    fn from_intervals(name: &str, intervals: Vec<Interval>) -> Self {
        Self {
            name: name.to_string(),
            intervals: intervals.into_iter().filter(|i| !i.is_empty()).collect(),
        }
    }

    pub fn is_all_values(&self) -> bool {
        self.intervals.len() == 1 && self.intervals[0].is_all_values()
    }

    /// A single point interval: the field is pinned by equality.
    pub fn is_single_point(&self) -> bool {
        self.intervals.len() == 1 && self.intervals[0].is_point()
    }

    pub fn may_contain_strings(&self) -> bool {
        self.intervals.iter().any(Interval::may_contain_strings)
    }

    pub fn reverse(&mut self) {
        self.intervals.reverse();
        for interval in &mut self.intervals {
            *interval = interval.reversed();
        }
    }

    /// Intersection of two ascending lists.
    pub fn intersect(&self, other: &OrderedIntervalList) -> OrderedIntervalList {
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.intervals.len() && j < other.intervals.len() {
            let (a, b) = (&self.intervals[i], &other.intervals[j]);
            if let Some(overlap) = a.intersect(b) {
                out.push(overlap);
            }
            match cmp(&a.end, &b.end) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => {
                    if a.end_inclusive && !b.end_inclusive {
                        j += 1;
                    } else if b.end_inclusive && !a.end_inclusive {
                        i += 1;
                    } else {
                        i += 1;
                        j += 1;
                    }
                }
            }
        }
        OrderedIntervalList::from_intervals(&self.name, out)
    }

    /// Union of two ascending lists.
    pub fn union(&self, other: &OrderedIntervalList) -> OrderedIntervalList {
        let mut all = self.intervals.clone();
        all.extend(other.intervals.iter().cloned());
        OrderedIntervalList::unite(&self.name, all)
    }

    /// Sort and merge overlapping or touching intervals.
    fn unite(name: &str, mut intervals: Vec<Interval>) -> OrderedIntervalList {
        intervals.retain(|i| !i.is_empty());
        intervals.sort_by(|a, b| {
            cmp(&a.start, &b.start).then_with(|| b.start_inclusive.cmp(&a.start_inclusive))
        });

        let mut out: Vec<Interval> = Vec::with_capacity(intervals.len());
        for next in intervals {
            if let Some(cur) = out.last_mut() {
                let touches = match cmp(&next.start, &cur.end) {
                    Ordering::Less => true,
                    Ordering::Equal => cur.end_inclusive || next.start_inclusive,
                    Ordering::Greater => false,
                };
                if touches {
                    match cmp(&next.end, &cur.end) {
                        Ordering::Greater => {
                            cur.end = next.end;
                            cur.end_inclusive = next.end_inclusive;
                        }
                        Ordering::Equal => cur.end_inclusive |= next.end_inclusive,
                        Ordering::Less => {}
                    }
                    continue;
                }
            }
            out.push(next);
        }
        OrderedIntervalList {
            name: name.to_string(),
            intervals: out,
        }
    }

    /// Everything in `[MinKey, MaxKey]` not covered by this ascending list.
    pub fn complement(&self) -> OrderedIntervalList {
        let mut out = Vec::new();
        let mut start = Bson::MinKey;
        let mut start_inclusive = true;
        for interval in &self.intervals {
            out.push(Interval::new(
                start,
                interval.start.clone(),
                start_inclusive,
                !interval.start_inclusive,
            ));
            start = interval.end.clone();
            start_inclusive = !interval.end_inclusive;
        }
        out.push(Interval::new(start, Bson::MaxKey, start_inclusive, true));
        OrderedIntervalList::from_intervals(&self.name, out)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexBounds {
    /// One interval list per key field, in key pattern order.
    Fields(Vec<OrderedIntervalList>),
    /// A single key range, as produced by min/max queries.
    SimpleRange {
        start_key: Vec<Bson>,
        end_key: Vec<Bson>,
        end_inclusive: bool,
    },
}

impl IndexBounds {
    /// Unbounded on every field of `key_pattern`, ascending.
    pub fn all_values_for(key_pattern: &Document) -> IndexBounds {
        IndexBounds::Fields(
            key_pattern
                .keys()
                .map(|k| OrderedIntervalList::all_values(k.clone()))
                .collect(),
        )
    }

    pub fn fields(&self) -> &[OrderedIntervalList] {
        match self {
            IndexBounds::Fields(f) => f,
            IndexBounds::SimpleRange { .. } => &[],
        }
    }

    pub fn is_simple_range(&self) -> bool {
        matches!(self, IndexBounds::SimpleRange { .. })
    }

    /// Orient ascending bounds to the key pattern's per-field direction,
    /// then to a backward scan when `direction` is negative.
    pub fn align(&mut self, key_pattern: &Document, direction: i32) {
        if let IndexBounds::Fields(fields) = self {
            for (oil, value) in fields.iter_mut().zip(key_pattern.values()) {
                if is_descending(value) {
                    oil.reverse();
                }
            }
        }
        if direction < 0 {
            self.reverse();
        }
    }

    /// Flip for scanning in the opposite direction.
    pub fn reverse(&mut self) {
        match self {
            IndexBounds::Fields(fields) => fields.iter_mut().for_each(OrderedIntervalList::reverse),
            IndexBounds::SimpleRange {
                start_key, end_key, ..
            } => std::mem::swap(start_key, end_key),
        }
    }
}

// ── Formatting ─────────────────────────────────────────────────

fn fmt_value(value: &Bson) -> String {
    match value {
        Bson::String(s) => format!("'{s}'"),
        Bson::Int32(i) => i.to_string(),
        Bson::Int64(i) => i.to_string(),
        Bson::Double(d) if d.is_nan() => "NaN".into(),
        Bson::Double(d) if d.is_infinite() => {
            if *d > 0.0 { "Infinity".into() } else { "-Infinity".into() }
        }
        Bson::Double(d) if d.fract() == 0.0 && d.abs() < 1e15 => format!("{}", *d as i64),
        Bson::Double(d) => d.to_string(),
        Bson::MinKey => "MinKey".into(),
        Bson::MaxKey => "MaxKey".into(),
        Bson::Null => "null".into(),
        Bson::Boolean(b) => b.to_string(),
        Bson::Document(d) if d.is_empty() => "{}".into(),
        Bson::Array(a) if a.is_empty() => "[]".into(),
        other => other.to_string(),
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            fmt_value(&self.start),
            fmt_value(&self.end),
            self.start_inclusive,
            self.end_inclusive
        )
    }
}

impl fmt::Display for OrderedIntervalList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: [", self.name)?;
        for (i, interval) in self.intervals.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{interval}")?;
        }
        write!(f, "]")
    }
}

impl fmt::Display for IndexBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexBounds::Fields(fields) => {
                write!(f, "{{")?;
                for (i, oil) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{oil}")?;
                }
                write!(f, "}}")
            }
            IndexBounds::SimpleRange {
                start_key,
                end_key,
                end_inclusive,
            } => {
                let keys = |k: &[Bson]| k.iter().map(fmt_value).collect::<Vec<_>>().join(", ");
                write!(
                    f,
                    "{{start: [{}], end: [{}], endInclusive: {end_inclusive}}}",
                    keys(start_key),
                    keys(end_key)
                )
            }
        }
    }
}

// ── Translation ────────────────────────────────────────────────

/// Smallest and largest values of `value`'s type bracket, with their
/// inclusivity.
fn type_bracket(value: &Bson) -> Option<(Bson, bool, Bson, bool)> {
    let bracket = match value {
        Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_) | Bson::Decimal128(_) => (
            Bson::Double(f64::NEG_INFINITY),
            true,
            Bson::Double(f64::INFINITY),
            true,
        ),
        Bson::String(_) | Bson::Symbol(_) => (
            Bson::String(String::new()),
            true,
            Bson::Document(Document::new()),
            false,
        ),
        Bson::Document(_) => (
            Bson::Document(Document::new()),
            true,
            Bson::Array(Vec::new()),
            false,
        ),
        Bson::Boolean(_) => (Bson::Boolean(false), true, Bson::Boolean(true), true),
        Bson::DateTime(_) => (
            Bson::DateTime(DateTime::MIN),
            true,
            Bson::DateTime(DateTime::MAX),
            true,
        ),
        Bson::ObjectId(_) => (
            Bson::ObjectId(ObjectId::from_bytes([0; 12])),
            true,
            Bson::ObjectId(ObjectId::from_bytes([0xff; 12])),
            true,
        ),
        Bson::Timestamp(_) => (
            Bson::Timestamp(Timestamp { time: 0, increment: 0 }),
            true,
            Bson::Timestamp(Timestamp {
                time: u32::MAX,
                increment: u32::MAX,
            }),
            true,
        ),
        Bson::Null => (Bson::Null, true, Bson::Null, true),
        Bson::MinKey | Bson::MaxKey => (Bson::MinKey, true, Bson::MaxKey, true),
        _ => return None,
    };
    Some(bracket)
}

/// FNV-1a over a type-tagged encoding; numerically equal values hash alike.
pub fn hash_key(value: &Bson) -> Bson {
    let bytes: Vec<u8> = match value {
        v @ (Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_) | Bson::Decimal128(_)) => {
            let n = as_f64(v).unwrap_or(0.0) as i64;
            let mut b = vec![b'n'];
            b.extend_from_slice(&n.to_le_bytes());
            b
        }
        Bson::String(s) => {
            let mut b = vec![b's'];
            b.extend_from_slice(s.as_bytes());
            b
        }
        other => {
            let mut b = vec![b'o'];
            b.extend_from_slice(format!("{other:?}").as_bytes());
            b
        }
    };

    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    Bson::Int64(hash as i64)
}

/// Literal prefix of an anchored regex, when one exists.
pub fn simple_regex_prefix(pattern: &str, options: &str) -> Option<String> {
    if options.contains('i') || options.contains('m') || options.contains('x') {
        return None;
    }
    let rest = pattern.strip_prefix('^').or_else(|| pattern.strip_prefix("\\A"))?;
    let prefix: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == ' ' || *c == '_' || *c == '-')
        .collect();
    (!prefix.is_empty()).then_some(prefix)
}

fn prefix_successor(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    let last = chars.pop()?;
    let next = char::from_u32(u32::from(last) + 1)?;
    chars.push(next);
    Some(chars.into_iter().collect())
}

fn full(name: &str) -> OrderedIntervalList {
    OrderedIntervalList::all_values(name)
}

fn comparison_interval(op: CmpOp, value: &Bson) -> Option<Interval> {
    if let Bson::Double(d) = value {
        if d.is_nan() {
            // NaN only compares equal to itself.
            return match op {
                CmpOp::Eq | CmpOp::Lte | CmpOp::Gte => Some(Interval::point(value.clone())),
                CmpOp::Lt | CmpOp::Gt => Some(Interval::new(value.clone(), value.clone(), false, false)),
            };
        }
    }

    let (lo, lo_incl, hi, hi_incl) = type_bracket(value)?;
    let v = value.clone();
    Some(match op {
        CmpOp::Eq => Interval::point(v),
        CmpOp::Lt => Interval::new(lo, v, lo_incl, false),
        CmpOp::Lte => Interval::new(lo, v, lo_incl, true),
        CmpOp::Gt => Interval::new(v, hi, false, hi_incl),
        CmpOp::Gte => Interval::new(v, hi, true, hi_incl),
    })
}

/// Ascending bounds on key field `field` for the leaf `node`.
pub fn translate(
    node: &MatchExpression,
    field: &str,
    key_value: &Bson,
    index: &IndexEntry,
) -> (OrderedIntervalList, BoundsTightness) {
    let collator = index.collator.as_ref();

    if matches!(key_value, Bson::String(s) if s == "hashed") {
        return translate_hashed(node, field);
    }

    match &node.kind {
        MatchKind::Compare { op, value, .. } => {
            if let Bson::Array(items) = value {
                if *op != CmpOp::Eq {
                    return (full(field), BoundsTightness::InexactFetch);
                }
                // An array matches either as a whole or through its first
                // element on a multikey index.
                let first = items.first().cloned().unwrap_or(Bson::Undefined);
                let points = vec![
                    Interval::point(apply_collation(&first, collator)),
                    Interval::point(apply_collation(value, collator)),
                ];
                return (
                    OrderedIntervalList::unite(field, points),
                    BoundsTightness::InexactFetch,
                );
            }

            let keyed = apply_collation(value, collator);
            match comparison_interval(*op, &keyed) {
                Some(interval) => {
                    let tightness = if matches!(value, Bson::Null) {
                        BoundsTightness::InexactFetch
                    } else {
                        BoundsTightness::Exact
                    };
                    (OrderedIntervalList::from_intervals(field, vec![interval]), tightness)
                }
                None => (full(field), BoundsTightness::InexactFetch),
            }
        }
        MatchKind::In { values, .. } => {
            let points = values
                .iter()
                .map(|v| Interval::point(apply_collation(v, collator)))
                .collect();
            let inexact = values
                .iter()
                .any(|v| matches!(v, Bson::Null | Bson::Array(_)));
            (
                OrderedIntervalList::unite(field, points),
                if inexact {
                    BoundsTightness::InexactFetch
                } else {
                    BoundsTightness::Exact
                },
            )
        }
        MatchKind::Exists { .. } => (
            full(field),
            if index.sparse {
                BoundsTightness::Exact
            } else {
                BoundsTightness::InexactFetch
            },
        ),
        MatchKind::Regex { regex, .. } => {
            let strings = Interval::new(
                Bson::String(String::new()),
                Bson::Document(Document::new()),
                true,
                false,
            );
            if collator.is_some() {
                return (
                    OrderedIntervalList::from_intervals(field, vec![strings]),
                    BoundsTightness::InexactFetch,
                );
            }
            let interval = simple_regex_prefix(&regex.pattern, &regex.options)
                .and_then(|p| {
                    let next = prefix_successor(&p)?;
                    Some(Interval::new(Bson::String(p), Bson::String(next), true, false))
                })
                .unwrap_or(strings);
            (
                OrderedIntervalList::from_intervals(field, vec![interval]),
                BoundsTightness::InexactCovered,
            )
        }
        MatchKind::Not(child) => {
            let (oil, tightness) = translate(child, field, key_value, index);
            if tightness != BoundsTightness::Exact {
                return (full(field), BoundsTightness::InexactFetch);
            }
            (
                oil.complement(),
                if index.multikey {
                    BoundsTightness::InexactFetch
                } else {
                    BoundsTightness::Exact
                },
            )
        }
        _ => (full(field), BoundsTightness::InexactFetch),
    }
}

fn translate_hashed(node: &MatchExpression, field: &str) -> (OrderedIntervalList, BoundsTightness) {
    let points = match &node.kind {
        MatchKind::Compare {
            op: CmpOp::Eq,
            value,
            ..
        } => vec![Interval::point(hash_key(value))],
        MatchKind::In { values, .. } => values.iter().map(|v| Interval::point(hash_key(v))).collect(),
        _ => return (full(field), BoundsTightness::InexactFetch),
    };
    (
        OrderedIntervalList::unite(field, points),
        BoundsTightness::InexactFetch,
    )
}
