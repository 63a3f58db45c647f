//! Comparison of two snapshots of object sets, grouped by namespace.

use std::collections::BTreeMap;

use skiff_core::{ResourceId, ResourceObject};

use crate::compare::{CompareResult, Comparer};

/// Changes between two snapshots of one namespace.
///
/// `modified` is keyed by the namespace-less id, since the namespace is the
/// grouping key already.
#[derive(Debug, Clone, Default)]
pub struct SetDiff {
    pub added: Vec<ResourceObject>,
    pub removed: Vec<ResourceObject>,
    pub modified: BTreeMap<ResourceId, CompareResult>,
}

impl SetDiff {
    pub fn is_empty(&self) -> bool { self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty() }
}

fn unnamespaced(id: &ResourceId) -> ResourceId { ResourceId::new(id.kind.as_str(), id.name.as_str(), None) }

/// Group `objects` by namespace (`None` for cluster-scoped), keyed by unnamespaced id.
fn by_namespace(objects: &[ResourceObject]) -> BTreeMap<Option<String>, BTreeMap<ResourceId, &ResourceObject>> {
    let mut out: BTreeMap<Option<String>, BTreeMap<ResourceId, &ResourceObject>> = BTreeMap::new();
    for o in objects {
        out.entry(o.namespace().map(str::to_string)).or_default().insert(unnamespaced(o.id()), o);
    }
    out
}

/// What changed going from `before` to `after`, per namespace.
///
/// Every namespace present in either snapshot gets an entry, even when nothing
/// changed in it.
pub fn compare_object_sets(before: &[ResourceObject], after: &[ResourceObject]) -> BTreeMap<Option<String>, SetDiff> {
    compare_object_sets_with(&Comparer::default(), before, after)
}

pub fn compare_object_sets_with(
    comparer: &Comparer,
    before: &[ResourceObject],
    after: &[ResourceObject],
) -> BTreeMap<Option<String>, SetDiff> {
    let before = by_namespace(before);
    let after = by_namespace(after);
    let mut out: BTreeMap<Option<String>, SetDiff> = BTreeMap::new();
    for ns in before.keys().chain(after.keys()) {
        if out.contains_key(ns) { continue; }
        let empty = BTreeMap::new();
        let b = before.get(ns).unwrap_or(&empty);
        let a = after.get(ns).unwrap_or(&empty);
        let mut diff = SetDiff::default();
        for (id, obj) in a {
            match b.get(id) {
                None => diff.added.push((*obj).clone()),
                Some(prev) => {
                    let r = comparer.determine_update_action(obj, prev);
                    if !r.no_action_needed() { diff.modified.insert(id.clone(), r); }
                }
            }
        }
        diff.removed.extend(b.iter().filter(|(id, _)| !a.contains_key(*id)).map(|(_, o)| (*o).clone()));
        out.insert(ns.clone(), diff);
    }
    out
}
