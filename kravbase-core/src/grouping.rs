//! Pure grouping and ordering of entity lists.
//!
//! Partitions a flat entity list into topic-keyed groups and establishes a
//! deterministic total order across groups and within each group, matching
//! the server-side view semantics. No cache access, no transport: every
//! function here is a pure computation so grouped views can be re-derived
//! from any mutated list.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::models::{Emne, Entity, Group};

/// How members inside a group are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupingMode {
    /// Homogeneous list: plain id/title/uid member order.
    SingleKind,
    /// Heterogeneous list: requirements in document order, each immediately
    /// followed by the measures related to it, orphan measures last.
    Combined,
}

/// Partitions `items` by topic and orders groups and members.
///
/// Entities with no topic, or a non-positive topic id, land in the synthetic
/// "No Topic" group. A positive topic id missing from `topics` keeps its own
/// group under a placeholder topic. Groups that end up empty are dropped.
/// Entities without an id never abort grouping; they sort last within their
/// tie-break level.
pub fn regroup_by_topic(items: &[Entity], topics: &[Emne], mode: GroupingMode) -> Vec<Group> {
    let index: HashMap<i64, &Emne> = topics.iter().map(|t| (t.id, t)).collect();

    // Partition. Keys are normalized topic ids; None is the no-topic bucket.
    let mut buckets: HashMap<Option<i64>, Vec<Entity>> = HashMap::new();
    for item in items {
        let key = item.topic_id.filter(|id| *id > 0);
        buckets.entry(key).or_default().push(item.clone());
    }

    let mut groups: Vec<Group> = buckets
        .into_iter()
        .filter(|(_, members)| !members.is_empty())
        .map(|(key, mut members)| {
            let topic = key.map(|id| match index.get(&id) {
                Some(topic) => (*topic).clone(),
                None => Emne::unresolved(id),
            });
            order_members(&mut members, mode);
            Group { topic, members }
        })
        .collect();

    groups.sort_by(compare_groups);
    groups
}

/// Orders group members in place according to `mode`.
pub fn order_members(members: &mut Vec<Entity>, mode: GroupingMode) {
    match mode {
        GroupingMode::SingleKind => members.sort_by(compare_members),
        GroupingMode::Combined => *members = interleave_combined(members),
    }
}

/// Member order: id ascending (missing id last), then case-insensitive
/// title, then uid.
pub fn compare_members(a: &Entity, b: &Entity) -> Ordering {
    compare_optional_ids(a.id, b.id)
        .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
        .then_with(|| compare_optional_uids(a.uid.as_deref(), b.uid.as_deref()))
}

/// Group order: defined positive sort order first (ascending), then topic id
/// ascending with the id-less "No Topic" group last, then case-insensitive
/// title with the "No Topic" label last among ties.
pub fn compare_groups(a: &Group, b: &Group) -> Ordering {
    sort_order_rank(a.topic.as_ref())
        .cmp(&sort_order_rank(b.topic.as_ref()))
        .then_with(|| {
            compare_optional_ids(a.topic.as_ref().map(|t| t.id), b.topic.as_ref().map(|t| t.id))
        })
        .then_with(|| compare_group_titles(a, b))
}

/// Hierarchical interleaving for combined lists: requirements in member
/// order, each immediately followed by its related measures, then orphan
/// measures. A measure related to several displayed requirements appears
/// under the first of them.
fn interleave_combined(members: &[Entity]) -> Vec<Entity> {
    let mut requirements: Vec<&Entity> = members.iter().filter(|e| e.kind.is_requirement()).collect();
    let mut measures: Vec<&Entity> = members.iter().filter(|e| e.kind.is_measure()).collect();
    requirements.sort_by(|a, b| compare_members(a, b));
    measures.sort_by(|a, b| compare_members(a, b));

    let mut ordered = Vec::with_capacity(members.len());
    let mut placed: HashSet<usize> = HashSet::new();

    for requirement in &requirements {
        ordered.push((*requirement).clone());
        let Some(requirement_id) = requirement.id else {
            continue;
        };
        for (index, measure) in measures.iter().enumerate() {
            if !placed.contains(&index) && measure.linked_entity_ids.contains(&requirement_id) {
                placed.insert(index);
                ordered.push((*measure).clone());
            }
        }
    }

    for (index, measure) in measures.iter().enumerate() {
        if !placed.contains(&index) {
            ordered.push((*measure).clone());
        }
    }

    ordered
}

/// Primary group key. Ordered topics rank before unordered ones; the
/// no-topic group is unordered by definition.
fn sort_order_rank(topic: Option<&Emne>) -> (u8, i64) {
    match topic {
        Some(t) if t.is_ordered() => (0, t.sort_order.unwrap_or(0)),
        _ => (1, 0),
    }
}

fn compare_optional_ids(a: Option<i64>, b: Option<i64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_optional_uids(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_group_titles(a: &Group, b: &Group) -> Ordering {
    a.title()
        .to_lowercase()
        .cmp(&b.title().to_lowercase())
        // The placeholder label loses every title tie.
        .then_with(|| a.topic.is_none().cmp(&b.topic.is_none()))
}
