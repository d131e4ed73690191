//! Enumeration of index assignments over a rated predicate tree.
//!
//! The enumerator builds a memo with one entry per indexable node: a
//! predicate leaf chooses one of its indices, an OR indexes every child,
//! and an AND chooses among single-index assignments, indexed subtrees
//! and (optionally) index intersections. Iteration walks the memo like an
//! odometer: the leftmost counter spins fastest, carries propagate up the
//! tree, and enumeration ends when the root carries.

use std::collections::BTreeSet;

use slate_query::{MatchExpression, MatchKind, NodeId};
use tracing::trace;

use crate::index::IndexRef;
use crate::params::QueryPlannerParams;
use crate::tag::{Destination, IndexTag, OrPushdownTag, Tag, TagMap};

/// One candidate: a copy of the predicate tree plus its index tags.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedTree {
    pub root: MatchExpression,
    pub tags: TagMap,
}

type MemoId = usize;

#[derive(Debug, Clone)]
struct PushdownAssignment {
    /// The predicate that is copied into the OR branch.
    outside: NodeId,
    route: Vec<usize>,
    tag: IndexTag,
}

/// Predicates (and pushed-down copies) served by one index.
#[derive(Debug, Clone)]
struct OneIndexAssignment {
    index: usize,
    preds: Vec<(NodeId, IndexTag)>,
    pushdowns: Vec<PushdownAssignment>,
}

#[derive(Debug, Clone, Default)]
struct AndChoice {
    assignments: Vec<OneIndexAssignment>,
    subnodes: Vec<MemoId>,
}

#[derive(Debug)]
enum Assignment {
    Pred { choices: Vec<OneIndexAssignment> },
    Or { subnodes: Vec<MemoId> },
    And { choices: Vec<AndChoice> },
}

#[derive(Debug)]
struct NodeAssignment {
    assignment: Assignment,
    counter: usize,
}

/// A predicate of an enclosing AND that may be pushed into an OR below it.
#[derive(Debug, Clone)]
struct OutsidePred {
    node: NodeId,
    first: Vec<usize>,
    /// Child indices from the predicate's parent AND to the current node.
    route: Vec<usize>,
}

fn extend_routes(outside: &[OutsidePred], child: usize) -> Vec<OutsidePred> {
    outside
        .iter()
        .map(|op| {
            let mut op = op.clone();
            op.route.push(child);
            op
        })
        .collect()
}

pub struct PlanEnumerator<'a> {
    root: &'a MatchExpression,
    indices: &'a [IndexRef<'a>],
    rated: &'a TagMap,
    intersect: bool,
    max_solutions: usize,
    memo: Vec<NodeAssignment>,
    root_memo: Option<MemoId>,
    produced: usize,
    done: bool,
}

impl<'a> PlanEnumerator<'a> {
    /// `rated` holds the relevant-index tags produced by index selection.
    /// Index numbers refer to `indices`.
    pub fn new(
        root: &'a MatchExpression,
        indices: &'a [IndexRef<'a>],
        rated: &'a TagMap,
        params: &QueryPlannerParams,
    ) -> Self {
        let mut enumerator = Self {
            root,
            indices,
            rated,
            intersect: params.options.index_intersection,
            max_solutions: params.max_indexed_solutions,
            memo: Vec::new(),
            root_memo: None,
            produced: 0,
            done: false,
        };
        enumerator.root_memo = enumerator.prep_memo(root, &[]);
        trace!(memo_entries = enumerator.memo.len(), indexable = enumerator.root_memo.is_some(), "memo built");
        enumerator
    }

    fn alloc(&mut self, assignment: Assignment) -> MemoId {
        self.memo.push(NodeAssignment {
            assignment,
            counter: 0,
        });
        self.memo.len() - 1
    }

    fn key_position(&self, index: usize, path: &str) -> usize {
        self.indices[index].entry.position_of(path).unwrap_or(0)
    }

    // ── Memo construction ──────────────────────────────────────

    fn prep_memo(&mut self, node: &MatchExpression, outside: &[OutsidePred]) -> Option<MemoId> {
        match &node.kind {
            MatchKind::Or(children) => {
                let mut subnodes = Vec::with_capacity(children.len());
                for (i, child) in children.iter().enumerate() {
                    subnodes.push(self.prep_memo(child, &extend_routes(outside, i))?);
                }
                Some(self.alloc(Assignment::Or { subnodes }))
            }
            MatchKind::And(children) => self.prep_and(children, outside),
            _ => self.prep_pred(node, outside),
        }
    }

    fn prep_pred(&mut self, node: &MatchExpression, outside: &[OutsidePred]) -> Option<MemoId> {
        let rated = self.rated;
        let rt = rated.relevant(node.id)?;
        let mut choices = Vec::new();

        for &index in &rt.first {
            choices.push(OneIndexAssignment {
                index,
                preds: vec![(node.id, IndexTag::new(index))],
                pushdowns: Vec::new(),
            });
        }

        // $near may use an index whose geo field is not first.
        if node.is_geo_near() {
            for &index in &rt.not_first {
                let pos = self.key_position(index, &rt.path);
                choices.push(OneIndexAssignment {
                    index,
                    preds: vec![(node.id, IndexTag { index, pos, can_combine_bounds: true })],
                    pushdowns: Vec::new(),
                });
            }
        }

        for &index in &rt.not_first {
            let Some(op) = outside.iter().find(|op| op.first.contains(&index)) else {
                continue;
            };
            let pos = self.key_position(index, &rt.path);
            choices.push(OneIndexAssignment {
                index,
                preds: vec![(node.id, IndexTag { index, pos, can_combine_bounds: true })],
                pushdowns: vec![PushdownAssignment {
                    outside: op.node,
                    route: op.route.clone(),
                    tag: IndexTag::new(index),
                }],
            });
        }

        if choices.is_empty() {
            return None;
        }
        Some(self.alloc(Assignment::Pred { choices }))
    }

    /// Assign every predicate of `indexed` that index `index` can serve,
    /// compounding later key positions.
    fn assign_index(
        &self,
        index: usize,
        indexed: &[&MatchExpression],
        pushdown: Option<PushdownAssignment>,
    ) -> OneIndexAssignment {
        let entry = self.indices[index].entry;
        let mut used = BTreeSet::new();
        let mut assignment = OneIndexAssignment {
            index,
            preds: Vec::new(),
            pushdowns: Vec::new(),
        };
        if let Some(p) = pushdown {
            used.insert(p.tag.pos);
            assignment.pushdowns.push(p);
        }

        for child in indexed {
            let Some(rt) = self.rated.relevant(child.id) else {
                continue;
            };
            let pos = if rt.first.contains(&index) {
                0
            } else if rt.not_first.contains(&index) {
                self.key_position(index, &rt.path)
            } else {
                continue;
            };
            // Bounds on one position of a multikey index cannot be intersected.
            let can_combine_bounds = !(entry.multikey && used.contains(&pos));
            used.insert(pos);
            assignment.preds.push((child.id, IndexTag { index, pos, can_combine_bounds }));
        }
        assignment
    }

    fn prep_and(&mut self, children: &[MatchExpression], outside: &[OutsidePred]) -> Option<MemoId> {
        let rated = self.rated;
        let own: Vec<OutsidePred> = children
            .iter()
            .filter(|c| !c.is_text() && !c.is_geo_near())
            .filter_map(|c| {
                let rt = rated.relevant(c.id)?;
                (!rt.first.is_empty()).then(|| OutsidePred {
                    node: c.id,
                    first: rt.first.clone(),
                    route: Vec::new(),
                })
            })
            .collect();

        let mut indexed: Vec<&MatchExpression> = Vec::new();
        let mut mandatory_leaf: Option<&MatchExpression> = None;
        let mut subnodes = Vec::new();
        let mut mandatory_subnode = None;

        for (i, child) in children.iter().enumerate() {
            if self.rated.relevant(child.id).is_some() {
                indexed.push(child);
                if child.is_text() || child.is_geo_near() {
                    mandatory_leaf = Some(child);
                }
            } else if child.is_logical() {
                let mut child_outside = extend_routes(outside, i);
                child_outside.extend(extend_routes(&own, i));
                let mandatory_inside = child
                    .find(&|n: &MatchExpression| n.is_text() || n.is_geo_near())
                    .is_some();
                match self.prep_memo(child, &child_outside) {
                    Some(id) => {
                        subnodes.push(id);
                        if mandatory_inside {
                            mandatory_subnode = Some(id);
                        }
                    }
                    None if mandatory_inside => return None,
                    None => {}
                }
            }
        }

        if let Some(id) = mandatory_subnode {
            return Some(self.alloc(Assignment::And {
                choices: vec![AndChoice {
                    assignments: Vec::new(),
                    subnodes: vec![id],
                }],
            }));
        }

        if let Some(mandatory) = mandatory_leaf {
            let rt = rated.relevant(mandatory.id)?;
            let candidates: BTreeSet<usize> =
                rt.first.iter().chain(&rt.not_first).copied().collect();
            let choices: Vec<AndChoice> = candidates
                .into_iter()
                .map(|index| self.assign_index(index, &indexed, None))
                .filter(|a| a.preds.iter().any(|(id, _)| *id == mandatory.id))
                .map(|a| AndChoice {
                    assignments: vec![a],
                    subnodes: Vec::new(),
                })
                .collect();
            if choices.is_empty() {
                return None;
            }
            return Some(self.alloc(Assignment::And { choices }));
        }

        let first_indices: BTreeSet<usize> = indexed
            .iter()
            .filter_map(|c| self.rated.relevant(c.id))
            .flat_map(|rt| rt.first.iter().copied())
            .collect();

        let mut assignments: Vec<OneIndexAssignment> = first_indices
            .iter()
            .map(|&index| self.assign_index(index, &indexed, None))
            .collect();

        // Indices whose leading field is predicated outside this AND.
        let mut pushed = BTreeSet::new();
        for op in outside {
            for &index in &op.first {
                if first_indices.contains(&index) || pushed.contains(&index) {
                    continue;
                }
                let usable = indexed.iter().any(|c| {
                    self.rated
                        .relevant(c.id)
                        .is_some_and(|rt| rt.not_first.contains(&index))
                });
                if !usable {
                    continue;
                }
                pushed.insert(index);
                let pushdown = PushdownAssignment {
                    outside: op.node,
                    route: op.route.clone(),
                    tag: IndexTag::new(index),
                };
                assignments.push(self.assign_index(index, &indexed, Some(pushdown)));
            }
        }

        let mut choices: Vec<AndChoice> = assignments
            .iter()
            .map(|a| AndChoice {
                assignments: vec![a.clone()],
                subnodes: Vec::new(),
            })
            .collect();
        for &id in &subnodes {
            choices.push(AndChoice {
                assignments: Vec::new(),
                subnodes: vec![id],
            });
        }

        if self.intersect {
            let plain: Vec<&OneIndexAssignment> =
                assignments.iter().filter(|a| a.pushdowns.is_empty()).collect();
            for (i, lhs) in plain.iter().enumerate() {
                for rhs in &plain[i + 1..] {
                    let overlap = lhs
                        .preds
                        .iter()
                        .any(|(id, _)| rhs.preds.iter().any(|(other, _)| other == id));
                    if lhs.index == rhs.index || overlap {
                        continue;
                    }
                    choices.push(AndChoice {
                        assignments: vec![(*lhs).clone(), (*rhs).clone()],
                        subnodes: Vec::new(),
                    });
                }
            }
            for a in &plain {
                for &id in &subnodes {
                    choices.push(AndChoice {
                        assignments: vec![(*a).clone()],
                        subnodes: vec![id],
                    });
                }
            }
        }

        if choices.is_empty() {
            return None;
        }
        Some(self.alloc(Assignment::And { choices }))
    }

    // ── Tagging ────────────────────────────────────────────────

    fn tag_memo(&self, id: MemoId, tags: &mut TagMap) {
        let entry = &self.memo[id];
        match &entry.assignment {
            Assignment::Pred { choices } => apply_assignment(&choices[entry.counter], tags),
            Assignment::Or { subnodes } => {
                for &sub in subnodes {
                    self.tag_memo(sub, tags);
                }
            }
            Assignment::And { choices } => {
                let choice = &choices[entry.counter];
                for a in &choice.assignments {
                    apply_assignment(a, tags);
                }
                for &sub in &choice.subnodes {
                    self.tag_memo(sub, tags);
                }
            }
        }
    }

    /// Advance the odometer below `id`. Returns `true` on carry.
    fn next_memo(&mut self, id: MemoId) -> bool {
        let counter = self.memo[id].counter;
        let (subnodes, len) = match &self.memo[id].assignment {
            Assignment::Pred { choices } => (Vec::new(), choices.len()),
            Assignment::Or { subnodes } => (subnodes.clone(), 0),
            Assignment::And { choices } => (choices[counter].subnodes.clone(), choices.len()),
        };

        for sub in subnodes {
            if !self.next_memo(sub) {
                return false;
            }
        }
        if len == 0 {
            return true;
        }

        let entry = &mut self.memo[id];
        entry.counter += 1;
        if entry.counter >= len {
            entry.counter = 0;
            return true;
        }
        false
    }
}

fn set_index_tag(tags: &mut TagMap, id: NodeId, tag: IndexTag) {
    let merged = match tags.remove(id) {
        Some(Tag::OrPushdown(mut t)) => {
            t.index_tag = Some(tag);
            Tag::OrPushdown(t)
        }
        _ => Tag::Index(tag),
    };
    tags.insert(id, merged);
}

fn add_destination(tags: &mut TagMap, id: NodeId, dest: Destination) {
    let merged = match tags.remove(id) {
        Some(Tag::OrPushdown(mut t)) => {
            t.destinations.push(dest);
            t
        }
        Some(Tag::Index(own)) => OrPushdownTag {
            destinations: vec![dest],
            index_tag: Some(own),
        },
        _ => OrPushdownTag {
            destinations: vec![dest],
            index_tag: None,
        },
    };
    tags.insert(id, Tag::OrPushdown(merged));
}

fn apply_assignment(a: &OneIndexAssignment, tags: &mut TagMap) {
    for (id, tag) in &a.preds {
        set_index_tag(tags, *id, *tag);
    }
    for p in &a.pushdowns {
        add_destination(
            tags,
            p.outside,
            Destination {
                route: p.route.clone(),
                tag: p.tag,
            },
        );
    }
}

impl Iterator for PlanEnumerator<'_> {
    type Item = TaggedTree;

    fn next(&mut self) -> Option<TaggedTree> {
        if self.done {
            return None;
        }
        let Some(root_memo) = self.root_memo else {
            self.done = true;
            return None;
        };
        if self.produced >= self.max_solutions {
            trace!(max = self.max_solutions, "enumeration capped");
            self.done = true;
            return None;
        }

        let mut tags = TagMap::new();
        self.tag_memo(root_memo, &mut tags);
        self.produced += 1;
        if self.next_memo(root_memo) {
            self.done = true;
        }

        trace!(n = self.produced, tags = %tags, "enumerated tagged tree");
        Some(TaggedTree {
            root: self.root.clone(),
            tags,
        })
    }
}
