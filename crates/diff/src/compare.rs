//! Structural comparison of desired vs existing documents.

use std::hash::{Hash, Hasher};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use skiff_core::ResourceObject;

use crate::path::{Path, PathElem};
use crate::quantity::Quantity;

/// Fields the API server stamps on every object; never a reason to act.
const IGNORED_PATHS: &[&str] = &[
    "metadata,creationTimestamp",
    "metadata,finalizers",
    "metadata,generation",
    "metadata,labels,kubernetes.io/metadata.name",
    "metadata,annotations,deployment.kubernetes.io/revision",
    "metadata,managedFields",
    "metadata,resourceVersion",
    "metadata,uid",
    "metadata,selfLink",
    "spec,finalizers",
    "status",
];

/// Server-applied defaults: ignored only when the desired side leaves them unset.
const DEFAULTED_PATHS: &[&str] = &[
    "spec,storageClassName",
    "spec,volumeMode",
    "spec,template,spec,dnsPolicy",
    "spec,template,spec,restartPolicy",
    "spec,template,spec,schedulerName",
    "spec,template,spec,securityContext",
    "spec,template,spec,terminationGracePeriodSeconds",
    "spec,template,spec,containers,name:*,imagePullPolicy",
    "spec,template,spec,containers,name:*,terminationMessagePath",
    "spec,template,spec,containers,name:*,terminationMessagePolicy",
    "spec,template,spec,containers,name:*,resources",
    "spec,template,spec,containers,name:*,ports,name:*,protocol",
    "spec,template,spec,containers,name:*,ports,containerPort:*,protocol",
    // Deployment, StatefulSet, DaemonSet
    "spec,replicas",
    "spec,progressDeadlineSeconds",
    "spec,revisionHistoryLimit",
    "spec,strategy",
    "spec,updateStrategy",
    "spec,podManagementPolicy",
    "spec,persistentVolumeClaimRetentionPolicy",
    // Job
    "spec,selector",
    "spec,backoffLimit",
    "spec,completionMode",
    "spec,completions",
    "spec,parallelism",
    "spec,suspend",
    "spec,podReplacementPolicy",
    "spec,template,metadata,labels,controller-uid",
    "spec,template,metadata,labels,job-name",
    "spec,template,metadata,labels,batch.kubernetes.io/controller-uid",
    "spec,template,metadata,labels,batch.kubernetes.io/job-name",
    // Service
    "spec,type",
    "spec,clusterIP",
    "spec,clusterIPs",
    "spec,sessionAffinity",
    "spec,ipFamilies",
    "spec,ipFamilyPolicy",
    "spec,internalTrafficPolicy",
    "spec,ports,name:*,protocol",
    "spec,ports,name:*,targetPort",
    "spec,ports,port:*,protocol",
    "spec,ports,port:*,targetPort",
];

/// Changing anything at or below these paths needs a full replacement.
const IMMUTABLE_PATHS: &[&str] = &["spec,selector", "spec,template", "spec,completions"];

/// Top-level keys that are never part of a spec comparison.
const NON_SPEC_KEYS: &[&str] = &["status", "events"];

/// Leaf keys holding resource quantities.
const QUANTITY_KEYS: &[&str] = &["memory", "cpu", "ephemeral-storage", "storage"];

/// Fields used to identify list entries, tried in order.
const IDENTITY_FIELDS: &[&str] = &["name", "containerPort", "port"];

/// Identity of a list entry: string values as is, integers in decimal.
fn identity_of(entry: &Json, field: &str) -> Option<String> {
    match entry.get(field)? {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// Identity fields whose values are integers.
const NUMERIC_IDENTITY_FIELDS: &[&str] = &["containerPort", "port"];

/// Inverse of [`identity_of`] for a rebuilt patch entry.
fn identity_value(field: &str, value: &str) -> Json {
    match value.parse::<i64>() {
        Ok(n) if NUMERIC_IDENTITY_FIELDS.contains(&field) => Json::from(n),
        _ => Json::String(value.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateAction {
    Equals,
    NeedsPatch,
    NeedsReplacement,
}

/// A path together with both sides' values there. Absent and `null` are both `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathComparison {
    pub path: Path,
    pub existing: Option<Json>,
    pub desired: Option<Json>,
}

impl PathComparison {
    pub fn new(path: Path, existing: Option<Json>, desired: Option<Json>) -> Self {
        Self { path, existing: existing.filter(|v| !v.is_null()), desired: desired.filter(|v| !v.is_null()) }
    }
}

impl Hash for PathComparison {
    fn hash<H: Hasher>(&self, state: &mut H) { self.path.hash(state); }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Differences {
    /// Real, actionable differences.
    pub considered: Vec<PathComparison>,
    /// Server bookkeeping; never triggers an action.
    pub ignored: Vec<PathComparison>,
    /// Present only on the existing side and known to be server defaults.
    pub defaults: Vec<PathComparison>,
}

impl Differences {
    pub fn extend(&mut self, other: Differences) {
        self.considered.extend(other.considered);
        self.ignored.extend(other.ignored);
        self.defaults.extend(other.defaults);
    }

    pub fn is_empty(&self) -> bool { self.considered.is_empty() }
}

/// Counts of considered differences, by direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary { pub adds: usize, pub updates: usize, pub removes: usize }

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompareResult {
    pub action: UpdateAction,
    pub differences: Differences,
}

impl CompareResult {
    pub fn no_action_needed(&self) -> bool { self.action == UpdateAction::Equals }
    pub fn needs_patch(&self) -> bool { self.action == UpdateAction::NeedsPatch }
    pub fn needs_replacement(&self) -> bool { self.action == UpdateAction::NeedsReplacement }

    /// Minimal document holding only the considered differences at their paths.
    ///
    /// List entries are rebuilt as single-entry lists carrying the identity field
    /// plus the changed fields, so unrelated entries are left alone by a
    /// strategic merge. Values missing on the desired side become `null`, and
    /// a list entry missing on the desired side becomes a `$patch: delete` entry.
    pub fn patch_document(&self) -> Json {
        let mut patch = Json::Object(Map::new());
        for diff in &self.differences.considered {
            insert_at(&mut patch, diff.path.elems(), diff.desired.as_ref());
        }
        patch
    }

    /// Patch for plain JSON merge patch, which replaces lists wholesale: a
    /// difference inside a list entry sends the whole desired list instead.
    pub fn merge_patch_document(&self, desired: &Json) -> Json {
        let mut patch = Json::Object(Map::new());
        for diff in &self.differences.considered {
            let elems = diff.path.elems();
            match elems.iter().position(|e| matches!(e, PathElem::ListId { .. })) {
                Some(i) => insert_at(&mut patch, &elems[..i], lookup(desired, &elems[..i])),
                None => insert_at(&mut patch, elems, diff.desired.as_ref()),
            }
        }
        patch
    }

    pub fn summary(&self) -> DiffSummary {
        let mut s = DiffSummary::default();
        for d in &self.differences.considered {
            match (&d.existing, &d.desired) {
                (None, Some(_)) => s.adds += 1,
                (Some(_), None) => s.removes += 1,
                _ => s.updates += 1,
            }
        }
        s
    }
}

fn lookup<'a>(doc: &'a Json, elems: &[PathElem]) -> Option<&'a Json> {
    let mut cur = doc;
    for e in elems {
        cur = cur.get(e.as_key()?)?;
    }
    Some(cur).filter(|v| !v.is_null())
}

fn insert_at(target: &mut Json, elems: &[PathElem], desired: Option<&Json>) {
    let Some((head, rest)) = elems.split_first() else { return };
    match head {
        PathElem::Key(k) => {
            if !target.is_object() { *target = Json::Object(Map::new()); }
            let Some(obj) = target.as_object_mut() else { return };
            if rest.is_empty() {
                obj.insert(k.clone(), desired.cloned().unwrap_or(Json::Null));
                return;
            }
            let child = obj.entry(k.clone()).or_insert_with(|| Json::Object(Map::new()));
            insert_at(child, rest, desired);
        }
        PathElem::ListId { field, value } => {
            if !target.is_array() { *target = Json::Array(Vec::new()); }
            let Some(list) = target.as_array_mut() else { return };
            let pos = list.iter().position(|e| identity_of(e, field).as_deref() == Some(value.as_str()));
            let idx = match pos {
                Some(i) => i,
                None => {
                    let mut entry = Map::new();
                    entry.insert(field.clone(), identity_value(field, value));
                    list.push(Json::Object(entry));
                    list.len() - 1
                }
            };
            let entry = &mut list[idx];
            if rest.is_empty() {
                if let Some(entry) = entry.as_object_mut() {
                    match desired {
                        Some(Json::Object(m)) => { for (k, v) in m { entry.insert(k.clone(), v.clone()); } }
                        _ => { entry.insert("$patch".into(), Json::String("delete".into())); }
                    }
                }
                return;
            }
            insert_at(entry, rest, desired);
        }
        // Comparisons only ever produce concrete paths.
        PathElem::AnyKey | PathElem::AnyListId { .. } => {}
    }
}

/// Rule tables driving a comparison.
#[derive(Debug, Clone)]
pub struct Comparer {
    ignored: Vec<Path>,
    defaulted: Vec<Path>,
    immutable: Vec<Path>,
    quantity_keys: Vec<String>,
    identity_fields: Vec<String>,
}

static DEFAULT_COMPARER: Lazy<Comparer> = Lazy::new(Comparer::kubernetes);

impl Default for Comparer {
    fn default() -> Self { DEFAULT_COMPARER.clone() }
}

fn paths(list: &[&str]) -> Vec<Path> { list.iter().map(|p| Path::parse(p)).collect() }

fn strings(list: &[&str]) -> Vec<String> { list.iter().map(|s| s.to_string()).collect() }

impl Comparer {
    /// Rules for the Kubernetes API server.
    pub fn kubernetes() -> Self {
        Self {
            ignored: paths(IGNORED_PATHS),
            defaulted: paths(DEFAULTED_PATHS),
            immutable: paths(IMMUTABLE_PATHS),
            quantity_keys: strings(QUANTITY_KEYS),
            identity_fields: strings(IDENTITY_FIELDS),
        }
    }

    pub fn with_ignored(mut self, path: Path) -> Self { self.ignored.push(path); self }
    pub fn with_defaulted(mut self, path: Path) -> Self { self.defaulted.push(path); self }
    pub fn with_immutable(mut self, path: Path) -> Self { self.immutable.push(path); self }

    pub fn is_ignored(&self, path: &Path) -> bool { self.ignored.iter().any(|p| path.starts_with(p)) }

    fn is_defaulted(&self, pc: &PathComparison) -> bool {
        pc.desired.is_none() && pc.existing.is_some() && self.defaulted.iter().any(|p| p == &pc.path)
    }

    fn values_equal(&self, pc: &PathComparison) -> bool {
        if pc.existing == pc.desired { return true; }
        let is_quantity = pc.path.last().and_then(|e| e.as_key()).map(|k| self.quantity_keys.iter().any(|q| q == k)).unwrap_or(false);
        if is_quantity {
            if let (Some(e), Some(d)) = (&pc.existing, &pc.desired) {
                if let (Some(qe), Some(qd)) = (Quantity::from_json(e), Quantity::from_json(d)) {
                    return qe == qd;
                }
            }
        }
        false
    }

    /// Identity field shared by every entry of both lists, with unique values.
    fn list_identity(&self, desired: &[Json], existing: &[Json]) -> Option<String> {
        if desired.is_empty() && existing.is_empty() { return None; }
        self.identity_fields.iter().find(|field| {
            [desired, existing].iter().all(|list| {
                let mut seen: Vec<String> = Vec::with_capacity(list.len());
                list.iter().all(|e| match identity_of(e, field) {
                    Some(id) if !seen.contains(&id) => { seen.push(id); true }
                    _ => false,
                })
            })
        }).cloned()
    }

    fn classify(&self, pc: PathComparison, out: &mut Differences) {
        if self.is_ignored(&pc.path) {
            out.ignored.push(pc);
        } else if self.is_defaulted(&pc) {
            out.defaults.push(pc);
        } else {
            out.extend(self.compare_values(pc));
        }
    }

    fn compare_values(&self, pc: PathComparison) -> Differences {
        if self.values_equal(&pc) { return Differences::default(); }
        let is_map_or_absent = |v: &Option<Json>| v.as_ref().map(|v| v.is_object()).unwrap_or(true);
        let list_entry = matches!(pc.path.last(), Some(PathElem::ListId { .. }));
        let one_side_missing = pc.desired.is_none() || pc.existing.is_none();
        if is_map_or_absent(&pc.desired) && is_map_or_absent(&pc.existing) && !(list_entry && one_side_missing) {
            return self.find_differences(pc.desired.as_ref(), pc.existing.as_ref(), &pc.path);
        }
        if let (Some(Json::Array(d)), Some(Json::Array(e))) = (&pc.desired, &pc.existing) {
            if let Some(field) = self.list_identity(d, e) {
                return self.compare_keyed_lists(&field, d, e, &pc.path);
            }
        }
        Differences { considered: vec![pc], ..Default::default() }
    }

    fn compare_keyed_lists(&self, field: &str, desired: &[Json], existing: &[Json], prefix: &Path) -> Differences {
        let id_of = |e: &Json| identity_of(e, field).unwrap_or_default();
        let mut ids: Vec<String> = desired.iter().map(id_of).collect();
        for e in existing {
            let id = id_of(e);
            if !ids.contains(&id) { ids.push(id); }
        }
        let mut out = Differences::default();
        for id in ids {
            let find = |list: &[Json]| list.iter().find(|e| id_of(e) == id).cloned();
            let pc = PathComparison::new(prefix.push(PathElem::list_id(field, id.as_str())), find(existing), find(desired));
            self.classify(pc, &mut out);
        }
        out
    }

    /// Differences between two documents over the union of their keys.
    ///
    /// Keys are visited in the desired document's order, then keys only present
    /// on the existing side.
    pub fn find_differences(&self, desired: Option<&Json>, existing: Option<&Json>, prefix: &Path) -> Differences {
        let empty = Map::new();
        let d = desired.and_then(|v| v.as_object()).unwrap_or(&empty);
        let e = existing.and_then(|v| v.as_object()).unwrap_or(&empty);
        let mut out = Differences::default();
        let keys = d.keys().chain(e.keys().filter(|k| !d.contains_key(k.as_str())));
        for key in keys {
            let pc = PathComparison::new(prefix.push(PathElem::key(key.as_str())), e.get(key).cloned(), d.get(key).cloned());
            self.classify(pc, &mut out);
        }
        out
    }

    pub fn requires_replacement(&self, kind: &str, pc: &PathComparison) -> bool {
        if self.immutable.iter().any(|p| pc.path.starts_with(p)) {
            return true;
        }
        // Claim spec is immutable after creation except resources.requests.
        if kind == "PersistentVolumeClaim" && pc.path.key_at(0) == Some("spec") && pc.desired.is_some() {
            return pc.path.len() > 1 && pc.path.key_at(1) != Some("resources");
        }
        false
    }

    /// Compare two full documents of the given kind and decide the update action.
    pub fn compare_documents(&self, kind: &str, desired: &Json, existing: &Json) -> CompareResult {
        let desired = filter_spec(desired);
        let existing = filter_spec(existing);
        let differences = self.find_differences(Some(&desired), Some(&existing), &Path::root());
        let action = if differences.considered.iter().any(|pc| self.requires_replacement(kind, pc)) {
            UpdateAction::NeedsReplacement
        } else if !differences.considered.is_empty() {
            UpdateAction::NeedsPatch
        } else {
            UpdateAction::Equals
        };
        tracing::trace!(kind, considered = differences.considered.len(), ignored = differences.ignored.len(), ?action, "compared documents");
        CompareResult { action, differences }
    }

    pub fn determine_update_action(&self, desired: &ResourceObject, existing: &ResourceObject) -> CompareResult {
        self.compare_documents(desired.kind(), desired.document(), existing.document())
    }

    /// Copy of `doc` without ignored bookkeeping fields, safe to send as a write body.
    pub fn strip_ignored(&self, doc: &Json) -> Json {
        let mut out = filter_spec(doc);
        for p in self.ignored.iter().filter(|p| !p.has_wildcard()) {
            remove_path(&mut out, p.elems());
        }
        out
    }
}

fn filter_spec(doc: &Json) -> Json {
    match doc {
        Json::Object(m) => Json::Object(m.iter().filter(|(k, _)| !NON_SPEC_KEYS.contains(&k.as_str())).map(|(k, v)| (k.clone(), v.clone())).collect()),
        other => other.clone(),
    }
}

fn remove_path(doc: &mut Json, elems: &[PathElem]) {
    let Some((PathElem::Key(k), rest)) = elems.split_first() else { return };
    let Some(obj) = doc.as_object_mut() else { return };
    if rest.is_empty() {
        obj.remove(k);
    } else if let Some(child) = obj.get_mut(k) {
        remove_path(child, rest);
    }
}

pub fn find_differences(desired: Option<&Json>, existing: Option<&Json>, prefix: &Path) -> Differences {
    DEFAULT_COMPARER.find_differences(desired, existing, prefix)
}

pub fn determine_update_action(desired: &ResourceObject, existing: &ResourceObject) -> CompareResult {
    DEFAULT_COMPARER.determine_update_action(desired, existing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn diff(desired: Json, existing: Json) -> Differences {
        find_differences(Some(&desired), Some(&existing), &Path::root())
    }

    fn pc(path: &str, existing: Option<Json>, desired: Option<Json>) -> PathComparison {
        PathComparison::new(Path::parse(path), existing, desired)
    }

    #[test]
    fn no_changes() {
        assert!(diff(json!({"key1": "value1", "key2": "value2"}), json!({"key1": "value1", "key2": "value2"})).considered.is_empty());
    }

    #[test]
    fn scalar_and_nested_changes() {
        let d = diff(json!({"key1": "new_value", "key2": "value2"}), json!({"key1": "value1", "key2": "value2"}));
        assert_eq!(d.considered, vec![pc("key1", Some(json!("value1")), Some(json!("new_value")))]);

        let d = diff(json!({"key1": {"nested_key": "new_value"}}), json!({"key1": {"nested_key": "old_value"}}));
        assert_eq!(d.considered, vec![pc("key1,nested_key", Some(json!("old_value")), Some(json!("new_value")))]);
    }

    #[test]
    fn null_vs_string_is_considered() {
        let d = diff(json!({"key": null}), json!({"key": "existing_value"}));
        assert_eq!(d.considered, vec![pc("key", Some(json!("existing_value")), None)]);
        assert!(d.ignored.is_empty());
    }

    #[test]
    fn bookkeeping_fields_are_ignored() {
        let desired = json!({
            "metadata": {
                "creationTimestamp": null, "resourceVersion": "123456", "uid": "new-uid",
                "labels": {"kubernetes.io/metadata.name": "new-name"}, "managedFields": []
            },
            "key": "value"
        });
        let existing = json!({
            "metadata": {
                "creationTimestamp": "2020-01-01T00:00:00Z", "resourceVersion": "654321", "uid": "old-uid",
                "labels": {"kubernetes.io/metadata.name": "old-name"}, "managedFields": ["someFields"]
            },
            "key": "value"
        });
        let d = diff(desired, existing);
        assert!(d.considered.is_empty());
        assert_eq!(d.ignored.len(), 5);
    }

    #[test]
    fn ignored_paths_reached_through_null_parents() {
        let d = diff(
            json!({"metadata": {"labels": null}, "spec": null}),
            json!({"metadata": {"labels": {"kubernetes.io/metadata.name": "example-namespace"}}, "spec": {"finalizers": ["kubernetes"]}}),
        );
        assert!(d.considered.is_empty());
        assert_eq!(d.ignored, vec![
            pc("metadata,labels,kubernetes.io/metadata.name", Some(json!("example-namespace")), None),
            pc("spec,finalizers", Some(json!(["kubernetes"])), None),
        ]);
    }

    #[test]
    fn defaults_only_when_desired_absent() {
        let d = diff(json!({"spec": {}}), json!({"spec": {"volumeMode": "Filesystem"}}));
        assert_eq!(d.defaults, vec![pc("spec,volumeMode", Some(json!("Filesystem")), None)]);
        assert!(d.considered.is_empty());

        let d = diff(json!({"spec": {"volumeMode": "Block"}}), json!({"spec": {"volumeMode": "Filesystem"}}));
        assert!(d.defaults.is_empty());
        assert_eq!(d.considered.len(), 1);
    }

    #[test]
    fn container_defaults_match_through_wildcard() {
        let d = diff(
            json!({"spec": {"template": {"spec": {"containers": [{"name": "app", "image": "a"}]}}}}),
            json!({"spec": {"template": {"spec": {"containers": [{"name": "app", "image": "a", "imagePullPolicy": "IfNotPresent"}]}}}}),
        );
        assert!(d.considered.is_empty());
        assert_eq!(d.defaults, vec![pc("spec,template,spec,containers,name:app,imagePullPolicy", Some(json!("IfNotPresent")), None)]);
    }

    #[test]
    fn quantities_compare_by_magnitude() {
        let d = diff(json!({"requests": {"storage": "0.1Gi", "cpu": "1"}}), json!({"requests": {"storage": "107374182400m", "cpu": "1000m"}}));
        assert!(d.considered.is_empty());
        let d = diff(json!({"requests": {"label": "0.1Gi"}}), json!({"requests": {"label": "107374182400m"}}));
        assert_eq!(d.considered.len(), 1);
    }

    #[test]
    fn keyed_lists_ignore_order() {
        let d = diff(
            json!({"containers": [{"name": "a", "image": "x"}, {"name": "b", "image": "y"}]}),
            json!({"containers": [{"name": "b", "image": "y"}, {"name": "a", "image": "x"}]}),
        );
        assert!(d.considered.is_empty());
    }

    #[test]
    fn unkeyed_lists_compare_whole() {
        let d = diff(json!({"args": ["a", "b"]}), json!({"args": ["b", "a"]}));
        assert_eq!(d.considered, vec![pc("args", Some(json!(["b", "a"])), Some(json!(["a", "b"])))]);
    }

    #[test]
    fn added_and_removed_list_entries() {
        let result = CompareResult {
            action: UpdateAction::NeedsPatch,
            differences: diff(
                json!({"env": [{"name": "A", "value": "1"}, {"name": "C", "value": "3"}]}),
                json!({"env": [{"name": "A", "value": "1"}, {"name": "B", "value": "2"}]}),
            ),
        };
        assert_eq!(result.differences.considered.len(), 2);
        assert_eq!(result.patch_document(), json!({"env": [
            {"name": "C", "value": "3"},
            {"name": "B", "$patch": "delete"},
        ]}));
        assert_eq!(result.summary(), DiffSummary { adds: 1, updates: 0, removes: 1 });
    }

    #[test]
    fn numeric_identities_key_port_lists() {
        let desired = json!({"ports": [{"containerPort": 8080}, {"containerPort": 9090, "name": "metrics"}]});
        let existing = json!({"ports": [{"containerPort": 9090, "name": "metrics", "protocol": "TCP"}, {"containerPort": 8080, "protocol": "UDP"}]});
        let result = CompareResult { action: UpdateAction::NeedsPatch, differences: diff(desired, existing) };
        assert_eq!(result.differences.considered.len(), 2);
        assert_eq!(result.differences.considered[0].path, Path::parse("ports,containerPort:8080,protocol"));
        assert_eq!(result.patch_document(), json!({"ports": [
            {"containerPort": 8080, "protocol": null},
            {"containerPort": 9090, "protocol": null},
        ]}));
    }

    #[test]
    fn merge_patch_sends_whole_lists() {
        let desired = json!({"spec": {"size": 2, "items": [{"name": "a", "v": 2, "x": 1}, {"name": "b"}]}});
        let existing = json!({"spec": {"size": 1, "items": [{"name": "a", "v": 1, "x": 1}, {"name": "b"}]}});
        let result = Comparer::default().compare_documents("Widget", &desired, &existing);
        assert_eq!(result.patch_document(), json!({"spec": {"size": 2, "items": [{"name": "a", "v": 2}]}}));
        assert_eq!(
            result.merge_patch_document(&desired),
            json!({"spec": {"size": 2, "items": [{"name": "a", "v": 2, "x": 1}, {"name": "b"}]}})
        );

        let removed = Comparer::default().compare_documents("Widget", &json!({"spec": {}}), &json!({"spec": {"items": [{"name": "a"}]}}));
        assert_eq!(removed.merge_patch_document(&json!({"spec": {}})), json!({"spec": {"items": null}}));
    }

    #[test]
    fn update_actions() {
        let c = Comparer::default();
        assert_eq!(c.compare_documents("anyKind", &json!({"key": "value"}), &json!({"key": "value"})).action, UpdateAction::Equals);
        assert_eq!(c.compare_documents("anyKind", &json!({"key": "new"}), &json!({"key": "old"})).action, UpdateAction::NeedsPatch);
        assert_eq!(
            c.compare_documents("anyKind", &json!({"spec": {"selector": "new"}}), &json!({"spec": {"selector": "old"}})).action,
            UpdateAction::NeedsReplacement
        );
    }

    #[test]
    fn selector_change_wins_over_patchable_changes() {
        let c = Comparer::default();
        let r = c.compare_documents(
            "Deployment",
            &json!({"spec": {"replicas": 3, "selector": {"matchLabels": {"app": "b"}}}}),
            &json!({"spec": {"replicas": 2, "selector": {"matchLabels": {"app": "a"}}}}),
        );
        assert_eq!(r.differences.considered.len(), 2);
        assert!(r.needs_replacement());
    }

    #[test]
    fn status_and_events_are_not_compared() {
        let c = Comparer::default();
        let r = c.compare_documents("Pod", &json!({"a": 1}), &json!({"a": 1, "status": {"phase": "Running"}, "events": [1]}));
        assert!(r.no_action_needed());
        assert!(r.differences.ignored.is_empty());
    }

    #[test]
    fn replacement_prefixes() {
        let c = Comparer::default();
        assert!(c.requires_replacement("AnyKind", &pc("spec,template,metadata,labels", None, None)));
        assert!(!c.requires_replacement("AnyKind", &pc("spec,containers,image", None, None)));
        assert!(!c.requires_replacement("AnyKind", &pc("metadata,spec,selector", None, None)));
        assert!(c.requires_replacement("AnyKind", &pc("spec,selector", None, None)));
    }

    #[test]
    fn claim_spec_is_immutable_except_resources() {
        let c = Comparer::default();
        let kind = "PersistentVolumeClaim";
        assert!(!c.requires_replacement(kind, &pc("spec,resources,requests,storage", None, None)));
        assert!(!c.requires_replacement(kind, &pc("spec,resources,requests,whatever", None, None)));
        assert!(c.requires_replacement(kind, &pc("spec,other", None, Some(json!("NewValue")))));
        assert!(!c.requires_replacement(kind, &pc("spec,other", None, None)));
    }

    #[test]
    fn strip_ignored_removes_bookkeeping() {
        let c = Comparer::default();
        let v = json!({
            "apiVersion": "v1", "kind": "ConfigMap",
            "metadata": {"name": "x", "managedFields": [{"foo": "bar"}], "resourceVersion": "1", "uid": "u", "creationTimestamp": "t"},
            "status": {"obs": true},
            "data": {"k": "v"}
        });
        assert_eq!(c.strip_ignored(&v), json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "x"}, "data": {"k": "v"}}));
    }
}
