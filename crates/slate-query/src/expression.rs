use std::fmt;

use bson::Bson;
use regex::Regex;

/// Stable identity of a node within one predicate tree.
///
/// Ids are assigned in pre-order by [`MatchExpression::assign_ids`] and are
/// the key under which the planner hangs its side-table annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CmpOp {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CmpOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Eq => "$eq",
            CmpOp::Lt => "$lt",
            CmpOp::Lte => "$lte",
            CmpOp::Gt => "$gt",
            CmpOp::Gte => "$gte",
        }
    }
}

/// Geometry referenced by `$geoWithin` / `$geoIntersects`.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoShape {
    /// Legacy `$box`: bottom-left and top-right corners.
    Box { min: [f64; 2], max: [f64; 2] },
    /// Legacy `$polygon`.
    Polygon(Vec<[f64; 2]>),
    /// Legacy `$center`: flat circle, radius in coordinate units.
    Center { center: [f64; 2], radius: f64 },
    /// Legacy `$centerSphere`: spherical cap, radius in radians.
    CenterSphere { center: [f64; 2], radius: f64 },
    /// GeoJSON `$geometry`.
    GeoJson { kind: String, coordinates: Bson },
}

impl GeoShape {
    /// Flat shapes can be answered by a `2d` index.
    pub fn is_flat(&self) -> bool {
        matches!(
            self,
            GeoShape::Box { .. } | GeoShape::Polygon(_) | GeoShape::Center { .. }
        )
    }

    /// Spherical shapes can be answered by a `2dsphere` index.
    pub fn is_spherical(&self) -> bool {
        matches!(self, GeoShape::GeoJson { .. } | GeoShape::CenterSphere { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoPredicate {
    Within,
    Intersects,
}

/// Coordinate reference system of a `$near` query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    Flat,
    Sphere,
}

/// A regular expression predicate. Compared by source pattern.
#[derive(Debug, Clone)]
pub struct RegexPredicate {
    pub pattern: String,
    pub options: String,
    pub compiled: Regex,
}

impl PartialEq for RegexPredicate {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.options == other.options
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchKind {
    And(Vec<MatchExpression>),
    Or(Vec<MatchExpression>),
    Nor(Vec<MatchExpression>),
    Not(Box<MatchExpression>),
    Compare {
        op: CmpOp,
        path: String,
        value: Bson,
    },
    In {
        path: String,
        values: Vec<Bson>,
    },
    Exists {
        path: String,
        exists: bool,
    },
    Regex {
        path: String,
        regex: RegexPredicate,
    },
    Geo {
        path: String,
        predicate: GeoPredicate,
        shape: GeoShape,
    },
    GeoNear {
        path: String,
        point: [f64; 2],
        crs: Crs,
        max_distance: Option<f64>,
    },
    Text {
        query: String,
        language: Option<String>,
    },
}

/// Path of the synthetic field `$text` predicates are indexed under.
pub const TEXT_PATH: &str = "_fts";

/// A node of the predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchExpression {
    pub id: NodeId,
    pub kind: MatchKind,
}

impl MatchExpression {
    pub fn new(kind: MatchKind) -> Self {
        Self {
            id: NodeId::default(),
            kind,
        }
    }

    pub fn and(children: Vec<MatchExpression>) -> Self {
        Self::new(MatchKind::And(children))
    }

    pub fn or(children: Vec<MatchExpression>) -> Self {
        Self::new(MatchKind::Or(children))
    }

    pub fn compare(op: CmpOp, path: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::new(MatchKind::Compare {
            op,
            path: path.into(),
            value: value.into(),
        })
    }

    /// Field path this node predicates on. Logical nodes have none.
    pub fn path(&self) -> Option<&str> {
        match &self.kind {
            MatchKind::Compare { path, .. }
            | MatchKind::In { path, .. }
            | MatchKind::Exists { path, .. }
            | MatchKind::Regex { path, .. }
            | MatchKind::Geo { path, .. }
            | MatchKind::GeoNear { path, .. } => Some(path),
            MatchKind::Text { .. } => Some(TEXT_PATH),
            _ => None,
        }
    }

    pub fn children(&self) -> &[MatchExpression] {
        match &self.kind {
            MatchKind::And(c) | MatchKind::Or(c) | MatchKind::Nor(c) => c,
            MatchKind::Not(child) => std::slice::from_ref(child.as_ref()),
            _ => &[],
        }
    }

    pub fn children_mut(&mut self) -> &mut [MatchExpression] {
        match &mut self.kind {
            MatchKind::And(c) | MatchKind::Or(c) | MatchKind::Nor(c) => c,
            MatchKind::Not(child) => std::slice::from_mut(child.as_mut()),
            _ => &mut [],
        }
    }

    pub fn is_and(&self) -> bool {
        matches!(self.kind, MatchKind::And(_))
    }

    pub fn is_or(&self) -> bool {
        matches!(self.kind, MatchKind::Or(_))
    }

    /// AND / OR: nodes whose children the planner can index independently.
    pub fn is_logical(&self) -> bool {
        matches!(self.kind, MatchKind::And(_) | MatchKind::Or(_))
    }

    pub fn is_text(&self) -> bool {
        matches!(self.kind, MatchKind::Text { .. })
    }

    pub fn is_geo_near(&self) -> bool {
        matches!(self.kind, MatchKind::GeoNear { .. })
    }

    /// The empty conjunction, i.e. a filter matching everything.
    pub fn is_trivially_true(&self) -> bool {
        matches!(&self.kind, MatchKind::And(c) if c.is_empty())
    }

    /// Leaves that can generate index bounds on their own path.
    pub fn is_bounds_generating(&self) -> bool {
        match &self.kind {
            MatchKind::Compare { .. }
            | MatchKind::In { .. }
            | MatchKind::Regex { .. }
            | MatchKind::Geo { .. }
            | MatchKind::GeoNear { .. }
            | MatchKind::Text { .. } => true,
            MatchKind::Exists { exists, .. } => *exists,
            MatchKind::Not(child) => child.is_bounds_generating_under_not(),
            _ => false,
        }
    }

    fn is_bounds_generating_under_not(&self) -> bool {
        matches!(
            self.kind,
            MatchKind::Compare { .. } | MatchKind::In { .. } | MatchKind::Regex { .. }
        )
    }

    /// Pre-order search for the first node satisfying `pred`.
    pub fn find(&self, pred: &impl Fn(&MatchExpression) -> bool) -> Option<&MatchExpression> {
        if pred(self) {
            return Some(self);
        }
        self.children().iter().find_map(|c| c.find(pred))
    }

    pub fn find_by_id(&self, id: NodeId) -> Option<&MatchExpression> {
        self.find(&|n| n.id == id)
    }

    pub fn count(&self, pred: &impl Fn(&MatchExpression) -> bool) -> usize {
        let own = usize::from(pred(self));
        own + self.children().iter().map(|c| c.count(pred)).sum::<usize>()
    }

    /// Renumber the whole tree in pre-order starting at zero.
    pub fn assign_ids(&mut self) {
        let mut next = 0;
        self.assign_ids_from(&mut next);
    }

    /// Renumber this subtree in pre-order, starting at `*next`.
    pub fn assign_ids_from(&mut self, next: &mut usize) {
        self.id = NodeId(*next);
        *next += 1;
        for child in self.children_mut() {
            child.assign_ids_from(next);
        }
    }

    /// Largest id in this subtree.
    pub fn max_id(&self) -> NodeId {
        self.children()
            .iter()
            .map(MatchExpression::max_id)
            .fold(self.id, std::cmp::max)
    }

    /// Ordering rank used to sort children into canonical order.
    fn kind_rank(&self) -> u8 {
        match &self.kind {
            MatchKind::Compare { op, .. } => match op {
                CmpOp::Eq => 0,
                CmpOp::Lt => 1,
                CmpOp::Lte => 2,
                CmpOp::Gt => 3,
                CmpOp::Gte => 4,
            },
            MatchKind::Regex { .. } => 5,
            MatchKind::Exists { .. } => 6,
            MatchKind::In { .. } => 7,
            MatchKind::Geo { .. } => 8,
            MatchKind::GeoNear { .. } => 9,
            MatchKind::Text { .. } => 10,
            MatchKind::Not(_) => 11,
            MatchKind::And(_) => 12,
            MatchKind::Or(_) => 13,
            MatchKind::Nor(_) => 14,
        }
    }

    /// Flatten nested logical nodes, collapse single-child AND/OR, and sort
    /// children by (kind, path) so equivalent filters share one shape.
    pub fn normalize(mut self) -> Self {
        self.kind = match self.kind {
            MatchKind::And(children) => flatten(children, MatchExpression::is_and, MatchKind::And),
            MatchKind::Or(children) => flatten(children, MatchExpression::is_or, MatchKind::Or),
            MatchKind::Nor(children) => {
                MatchKind::Nor(children.into_iter().map(MatchExpression::normalize).collect())
            }
            MatchKind::Not(child) => MatchKind::Not(Box::new(child.normalize())),
            leaf => leaf,
        };

        match self.kind {
            MatchKind::And(mut children) | MatchKind::Or(mut children) if children.len() == 1 => {
                children.remove(0)
            }
            kind => MatchExpression { id: self.id, kind },
        }
    }
}

fn flatten(
    children: Vec<MatchExpression>,
    same: fn(&MatchExpression) -> bool,
    make: fn(Vec<MatchExpression>) -> MatchKind,
) -> MatchKind {
    let mut out = Vec::with_capacity(children.len());
    for child in children {
        let child = child.normalize();
        if same(&child) {
            if let MatchKind::And(grand) | MatchKind::Or(grand) = child.kind {
                out.extend(grand);
            }
        } else {
            out.push(child);
        }
    }
    out.sort_by(|a, b| {
        a.kind_rank()
            .cmp(&b.kind_rank())
            .then_with(|| a.path().cmp(&b.path()))
    });
    make(out)
}

impl fmt::Display for MatchExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, name: &str, c: &[MatchExpression]) -> fmt::Result {
            write!(f, "{name}(")?;
            for (i, child) in c.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{child}")?;
            }
            write!(f, ")")
        }

        match &self.kind {
            MatchKind::And(c) => list(f, "$and", c),
            MatchKind::Or(c) => list(f, "$or", c),
            MatchKind::Nor(c) => list(f, "$nor", c),
            MatchKind::Not(child) => write!(f, "$not({child})"),
            MatchKind::Compare { op, path, value } => write!(f, "{path} {} {value}", op.as_str()),
            MatchKind::In { path, values } => {
                write!(f, "{path} $in [")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            MatchKind::Exists { path, exists } => write!(f, "{path} $exists {exists}"),
            MatchKind::Regex { path, regex } => {
                write!(f, "{path} $regex /{}/{}", regex.pattern, regex.options)
            }
            MatchKind::Geo {
                path, predicate, ..
            } => match predicate {
                GeoPredicate::Within => write!(f, "{path} $geoWithin"),
                GeoPredicate::Intersects => write!(f, "{path} $geoIntersects"),
            },
            MatchKind::GeoNear { path, point, .. } => {
                write!(f, "{path} $near [{}, {}]", point[0], point[1])
            }
            MatchKind::Text { query, .. } => write!(f, "$text {query:?}"),
        }
    }
}
