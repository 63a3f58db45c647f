//! In-memory [`ClusterApi`] used by tests across the workspace.
//!
//! Writes stamp `metadata.uid` and a monotonically increasing
//! `metadata.resourceVersion`; patches merge the way the API server does for
//! maps and for lists keyed by `name` (including `$patch: delete`).

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{Map, Value as Json};
use skiff_core::{ApiError, Reason};

use crate::cluster::{ClusterApi, Target};
use crate::kinds::{Probe, Readiness, Verb};

type Key = (String, Option<String>, String);

fn key(t: &Target) -> Key { (t.spec.kind.to_string(), t.namespace.clone(), t.name.clone()) }

#[derive(Debug, Clone)]
struct Fault {
    verb: Verb,
    kind: String,
    name: String,
    error: ApiError,
    remaining: usize,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<Key, Json>,
    faults: Vec<Fault>,
    calls: Vec<String>,
    revision: u64,
}

#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: Mutex<State>,
}

impl MemoryCluster {
    pub fn new() -> Self { Self::default() }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Store `doc` as if it already existed in the cluster.
    pub fn seed(&self, kind: &str, namespace: Option<&str>, name: &str, doc: Json) {
        self.with(|s| {
            s.revision += 1;
            let stamped = stamp(doc, s.revision);
            s.objects.insert((kind.to_string(), namespace.map(str::to_string), name.to_string()), stamped);
        });
    }

    /// Fail the next `times` calls of `verb` on `kind`/`name` with `error`.
    /// Waits are matched with [`Verb::Watch`].
    pub fn fail(&self, verb: Verb, kind: &str, name: &str, error: ApiError, times: usize) {
        self.with(|s| s.faults.push(Fault { verb, kind: kind.into(), name: name.into(), error, remaining: times }));
    }

    pub fn object(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<Json> {
        self.with(|s| s.objects.get(&(kind.to_string(), namespace.map(str::to_string), name.to_string())).cloned())
    }

    pub fn len(&self) -> usize { self.with(|s| s.objects.len()) }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Calls seen so far, as `"<verb> <target>"`.
    pub fn calls(&self) -> Vec<String> { self.with(|s| s.calls.clone()) }

    fn enter(&self, verb: Verb, t: &Target) -> Result<(), ApiError> {
        self.with(|s| {
            s.calls.push(format!("{:?} {}", verb, t).to_lowercase());
            let hit = s.faults.iter_mut().find(|f| f.verb == verb && f.kind == t.spec.kind && f.name == t.name && f.remaining > 0);
            match hit {
                Some(f) => {
                    f.remaining -= 1;
                    Err(f.error.clone())
                }
                None => Ok(()),
            }
        })
    }
}

fn not_found(t: &Target) -> ApiError { ApiError::not_found(format!("{} \"{}\" not found", t.spec.plural, t.name)) }

fn stamp(mut doc: Json, revision: u64) -> Json {
    if let Some(meta) = doc.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.entry("uid").or_insert_with(|| Json::String(format!("uid-{}", revision)));
        meta.insert("resourceVersion".into(), Json::String(revision.to_string()));
    }
    doc
}

/// Field that keys every entry of both lists, as the strategic merge of the
/// built-in kinds does for containers, env, volumes and ports.
fn list_key(target: &[Json], patch: &[Json]) -> Option<&'static str> {
    ["name", "containerPort", "port"].into_iter().find(|field| target.iter().chain(patch).all(|e| e.get(*field).is_some_and(|v| !v.is_null())))
}

/// Merge `patch` into `target`: maps recurse, `null` removes, other values
/// replace. With `strategic`, keyed lists merge per entry and honour
/// `$patch: delete`; otherwise lists replace wholesale like a JSON merge patch.
pub fn merge_patch(target: &mut Json, patch: &Json, strategic: bool) {
    match (target, patch) {
        (Json::Object(t), Json::Object(p)) => {
            for (k, v) in p {
                if v.is_null() {
                    t.remove(k);
                } else {
                    merge_patch(t.entry(k.clone()).or_insert(Json::Null), v, strategic);
                }
            }
        }
        (Json::Array(t), Json::Array(p)) if strategic && !p.is_empty() => match list_key(t.as_slice(), p) {
            Some(field) => {
                for entry in p {
                    let id = entry.get(field).cloned();
                    let pos = t.iter().position(|e| e.get(field) == id.as_ref());
                    let delete = entry.get("$patch").and_then(|v| v.as_str()) == Some("delete");
                    match (pos, delete) {
                        (Some(i), true) => { t.remove(i); }
                        (None, true) => {}
                        (Some(i), false) => merge_patch(&mut t[i], entry, strategic),
                        (None, false) => t.push(entry.clone()),
                    }
                }
            }
            None => *t = p.clone(),
        },
        (t, p) => {
            *t = match p {
                Json::Object(m) => {
                    let mut fresh = Json::Object(Map::new());
                    merge_patch(&mut fresh, &Json::Object(m.clone()), strategic);
                    fresh
                }
                other => other.clone(),
            };
        }
    }
}

#[async_trait::async_trait]
impl ClusterApi for MemoryCluster {
    async fn get(&self, target: &Target) -> Result<Json, ApiError> {
        self.enter(Verb::Read, target)?;
        self.with(|s| s.objects.get(&key(target)).cloned()).ok_or_else(|| not_found(target))
    }

    async fn create(&self, target: &Target, body: &Json) -> Result<Json, ApiError> {
        self.enter(Verb::Create, target)?;
        self.with(|s| {
            let k = key(target);
            if s.objects.contains_key(&k) {
                return Err(ApiError::already_exists(format!("{} \"{}\" already exists", target.spec.plural, target.name)));
            }
            s.revision += 1;
            let doc = stamp(body.clone(), s.revision);
            s.objects.insert(k, doc.clone());
            Ok(doc)
        })
    }

    async fn patch(&self, target: &Target, patch: &Json) -> Result<Json, ApiError> {
        self.enter(Verb::Patch, target)?;
        self.with(|s| {
            s.revision += 1;
            let revision = s.revision;
            let obj = s.objects.get_mut(&key(target)).ok_or_else(|| not_found(target))?;
            merge_patch(obj, patch, target.spec.builtin);
            *obj = stamp(obj.take(), revision);
            Ok(obj.clone())
        })
    }

    async fn replace(&self, target: &Target, body: &Json) -> Result<Json, ApiError> {
        self.enter(Verb::Replace, target)?;
        self.with(|s| {
            let k = key(target);
            let live = s.objects.get(&k).ok_or_else(|| not_found(target))?;
            let live_rv = live.pointer("/metadata/resourceVersion");
            if let Some(rv) = body.pointer("/metadata/resourceVersion") {
                if Some(rv) != live_rv {
                    return Err(ApiError::new(409, Reason::Conflict, format!("{}: resourceVersion mismatch", target)));
                }
            }
            let uid = live.pointer("/metadata/uid").cloned();
            let mut body = body.clone();
            if let (Some(uid), Some(meta)) = (uid, body.get_mut("metadata").and_then(|m| m.as_object_mut())) {
                meta.insert("uid".into(), uid);
            }
            s.revision += 1;
            let doc = stamp(body, s.revision);
            s.objects.insert(k, doc.clone());
            Ok(doc)
        })
    }

    async fn delete(&self, target: &Target) -> Result<(), ApiError> {
        self.enter(Verb::Delete, target)?;
        self.with(|s| s.objects.remove(&key(target)).map(|_| ()).ok_or_else(|| not_found(target)))
    }

    async fn wait_for(&self, target: &Target, readiness: Readiness, _timeout: Duration) -> Result<(), ApiError> {
        self.enter(Verb::Watch, target)?;
        let doc = self.with(|s| s.objects.get(&key(target)).cloned()).ok_or_else(|| not_found(target))?;
        // Stored objects carry no controller status; only terminal failures are reported.
        match readiness.probe(&doc) {
            Probe::Failed(msg) => Err(ApiError::new(422, Reason::Invalid, format!("{} will not become ready: {}", target, msg))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_patch_handles_keyed_lists_and_nulls() {
        let mut doc = json!({
            "spec": {
                "schedule": "*/5 * * * *",
                "suspend": false,
                "containers": [{"name": "a", "image": "x"}, {"name": "b", "image": "y"}]
            }
        });
        merge_patch(&mut doc, &json!({
            "spec": {
                "schedule": "*/10 * * * *",
                "suspend": null,
                "containers": [{"name": "a", "image": "z"}, {"name": "b", "$patch": "delete"}, {"name": "c", "image": "w"}]
            }
        }), true);
        assert_eq!(doc, json!({
            "spec": {
                "schedule": "*/10 * * * *",
                "containers": [{"name": "a", "image": "z"}, {"name": "c", "image": "w"}]
            }
        }));
    }

    #[test]
    fn merge_patch_replaces_plain_lists() {
        let mut doc = json!({"args": ["a", "b"]});
        merge_patch(&mut doc, &json!({"args": ["c"]}), true);
        assert_eq!(doc, json!({"args": ["c"]}));
    }

    #[test]
    fn merge_patch_keys_port_lists_by_number() {
        let mut doc = json!({"ports": [{"containerPort": 8080, "protocol": "TCP"}, {"containerPort": 9090}]});
        merge_patch(&mut doc, &json!({"ports": [{"containerPort": 9090, "protocol": "UDP"}]}), true);
        assert_eq!(doc, json!({"ports": [{"containerPort": 8080, "protocol": "TCP"}, {"containerPort": 9090, "protocol": "UDP"}]}));
    }

    #[test]
    fn plain_merge_replaces_keyed_lists() {
        let mut doc = json!({"spec": {"items": [{"name": "a", "v": 1, "x": 1}, {"name": "b"}], "size": 1}});
        merge_patch(&mut doc, &json!({"spec": {"items": [{"name": "a", "v": 2}], "size": null}}), false);
        assert_eq!(doc, json!({"spec": {"items": [{"name": "a", "v": 2}]}}));
    }
}
