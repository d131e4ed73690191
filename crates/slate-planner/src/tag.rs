//! Per-node planning annotations, kept in a side table keyed by `NodeId`.

use std::collections::BTreeMap;
use std::fmt;

use slate_query::{MatchExpression, NodeId};

/// Which relevant indices could serve a predicate.
///
/// Index numbers are positions in the relevant-index list of the current
/// plan call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelevantTag {
    /// Full path of the predicate.
    pub path: String,
    /// Indices whose first key field is `path`.
    pub first: Vec<usize>,
    /// Indices with `path` at a later key position.
    pub not_first: Vec<usize>,
}

/// The index (and key position) chosen for a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexTag {
    pub index: usize,
    pub pos: usize,
    /// Whether this predicate's bounds may be intersected with those of
    /// other predicates on the same position.
    pub can_combine_bounds: bool,
}

impl IndexTag {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            pos: 0,
            can_combine_bounds: true,
        }
    }
}

/// Where a copy of a predicate must be pushed inside a sibling OR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Child indices leading from the parent AND to the target node.
    pub route: Vec<usize>,
    pub tag: IndexTag,
}

/// A predicate that is copied into OR branches so those branches can use a
/// compound index whose leading field the predicate covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrPushdownTag {
    pub destinations: Vec<Destination>,
    /// The predicate's own assignment outside the OR, if any.
    pub index_tag: Option<IndexTag>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    Relevant(RelevantTag),
    Index(IndexTag),
    OrPushdown(OrPushdownTag),
}

impl Tag {
    /// The index assignment this tag implies for its own node.
    pub fn index_tag(&self) -> Option<&IndexTag> {
        match self {
            Tag::Index(t) => Some(t),
            Tag::OrPushdown(t) => t.index_tag.as_ref(),
            Tag::Relevant(_) => None,
        }
    }
}

/// Tags for one predicate tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagMap {
    tags: BTreeMap<NodeId, Tag>,
}

impl TagMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: NodeId) -> Option<&Tag> {
        self.tags.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Tag> {
        self.tags.get_mut(&id)
    }

    pub fn insert(&mut self, id: NodeId, tag: Tag) -> Option<Tag> {
        self.tags.insert(id, tag)
    }

    pub fn remove(&mut self, id: NodeId) -> Option<Tag> {
        self.tags.remove(&id)
    }

    pub fn relevant(&self, id: NodeId) -> Option<&RelevantTag> {
        match self.tags.get(&id) {
            Some(Tag::Relevant(t)) => Some(t),
            _ => None,
        }
    }

    pub fn relevant_mut(&mut self, id: NodeId) -> Option<&mut RelevantTag> {
        match self.tags.get_mut(&id) {
            Some(Tag::Relevant(t)) => Some(t),
            _ => None,
        }
    }

    pub fn index_tag(&self, id: NodeId) -> Option<&IndexTag> {
        self.tags.get(&id).and_then(Tag::index_tag)
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Tag)> {
        self.tags.iter()
    }

    /// Whether `node` or any descendant carries an index assignment.
    pub fn has_index_tag_in(&self, node: &MatchExpression) -> bool {
        self.index_tag(node.id).is_some()
            || self.tags.get(&node.id).is_some_and(|t| matches!(t, Tag::OrPushdown(_)))
            || node.children().iter().any(|c| self.has_index_tag_in(c))
    }
}

impl fmt::Display for TagMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, tag) in &self.tags {
            match tag {
                Tag::Relevant(t) => writeln!(
                    f,
                    "{id} relevant path={} first={:?} notFirst={:?}",
                    t.path, t.first, t.not_first
                )?,
                Tag::Index(t) => writeln!(
                    f,
                    "{id} index={} pos={} combine={}",
                    t.index, t.pos, t.can_combine_bounds
                )?,
                Tag::OrPushdown(t) => {
                    write!(f, "{id} pushdown")?;
                    if let Some(own) = &t.index_tag {
                        write!(f, " index={} pos={}", own.index, own.pos)?;
                    }
                    for d in &t.destinations {
                        write!(f, " -> {:?} index={} pos={}", d.route, d.tag.index, d.tag.pos)?;
                    }
                    writeln!(f)?;
                }
            }
        }
        Ok(())
    }
}
