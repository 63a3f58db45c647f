//! Static per-kind capability table.

use std::borrow::Cow;
use std::collections::HashMap;

use kube::core::{ApiResource, GroupVersionKind};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value as Json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Verb {
    Create,
    Read,
    Patch,
    Replace,
    Delete,
    List,
    Watch,
}

const ALL_VERBS: &[Verb] = &[Verb::Create, Verb::Read, Verb::Patch, Verb::Replace, Verb::Delete, Verb::List, Verb::Watch];
/// Namespaces cannot be replaced: their spec only carries finalizers.
const NAMESPACE_VERBS: &[Verb] = &[Verb::Create, Verb::Read, Verb::Patch, Verb::Delete, Verb::List, Verb::Watch];

/// What "ready" means after a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Readiness {
    /// Readable is ready.
    Exists,
    /// `status.phase == Active`.
    NamespaceActive,
    /// Any claim phase other than `Lost`.
    ClaimPhase,
    /// Workload rollout observed and all replicas updated and available.
    Rollout,
    /// `Complete` condition true; `Failed` condition true is terminal.
    JobComplete,
}

/// How a replacement is carried out when the comparison asks for one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReplacePolicy {
    /// PUT over the live object, carrying its `resourceVersion`.
    InPlace,
    /// Delete, wait until gone, create.
    Recreate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindSpec {
    pub kind: Cow<'static, str>,
    pub plural: Cow<'static, str>,
    pub namespaced: bool,
    /// Built into the API server: strategic merge patch is understood.
    pub builtin: bool,
    pub verbs: &'static [Verb],
    pub readiness: Readiness,
    pub replace: ReplacePolicy,
}

impl KindSpec {
    /// Best guess for a kind missing from the table (CRDs, newer built-ins).
    pub fn inferred(kind: &str) -> Self {
        Self {
            kind: Cow::Owned(kind.to_string()),
            plural: Cow::Owned(naive_plural(kind)),
            namespaced: true,
            builtin: false,
            verbs: ALL_VERBS,
            readiness: Readiness::Exists,
            replace: ReplacePolicy::InPlace,
        }
    }

    pub fn supports(&self, verb: Verb) -> bool { self.verbs.contains(&verb) }

    pub fn api_resource(&self, group: &str, version: &str) -> ApiResource {
        let gvk = GroupVersionKind::gvk(group, version, &self.kind);
        ApiResource::from_gvk_with_plural(&gvk, &self.plural)
    }
}

fn naive_plural(kind: &str) -> String {
    let lower = kind.to_ascii_lowercase();
    if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") && !lower.ends_with("oy") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

fn builtin(kind: &'static str, plural: &'static str, namespaced: bool, readiness: Readiness, replace: ReplacePolicy) -> (&'static str, KindSpec) {
    let spec = KindSpec {
        kind: Cow::Borrowed(kind),
        plural: Cow::Borrowed(plural),
        namespaced,
        builtin: true,
        verbs: ALL_VERBS,
        readiness,
        replace,
    };
    (kind, spec)
}

static KINDS: Lazy<HashMap<&'static str, KindSpec>> = Lazy::new(|| {
    use Readiness::*;
    use ReplacePolicy::*;
    let mut namespace = builtin("Namespace", "namespaces", false, NamespaceActive, Recreate);
    namespace.1.verbs = NAMESPACE_VERBS;
    HashMap::from([
        namespace,
        builtin("Role", "roles", true, Exists, InPlace),
        builtin("ClusterRole", "clusterroles", false, Exists, InPlace),
        builtin("ServiceAccount", "serviceaccounts", true, Exists, InPlace),
        builtin("RoleBinding", "rolebindings", true, Exists, Recreate),
        builtin("ClusterRoleBinding", "clusterrolebindings", false, Exists, Recreate),
        builtin("Secret", "secrets", true, Exists, InPlace),
        builtin("ConfigMap", "configmaps", true, Exists, InPlace),
        builtin("StorageClass", "storageclasses", false, Exists, Recreate),
        builtin("PersistentVolume", "persistentvolumes", false, Exists, Recreate),
        builtin("PersistentVolumeClaim", "persistentvolumeclaims", true, ClaimPhase, Recreate),
        builtin("Deployment", "deployments", true, Rollout, Recreate),
        builtin("StatefulSet", "statefulsets", true, Rollout, Recreate),
        builtin("DaemonSet", "daemonsets", true, Rollout, Recreate),
        builtin("Job", "jobs", true, JobComplete, Recreate),
        builtin("CronJob", "cronjobs", true, Exists, InPlace),
        builtin("Service", "services", true, Exists, Recreate),
        builtin("HorizontalPodAutoscaler", "horizontalpodautoscalers", true, Exists, InPlace),
        builtin("Ingress", "ingresses", true, Exists, InPlace),
        builtin("PodDisruptionBudget", "poddisruptionbudgets", true, Exists, InPlace),
    ])
});

/// Table entry for `kind`, or an inferred namespaced spec for unknown kinds.
pub fn kind_spec(kind: &str) -> KindSpec {
    KINDS.get(kind).cloned().unwrap_or_else(|| KindSpec::inferred(kind))
}

pub fn is_known(kind: &str) -> bool { KINDS.contains_key(kind) }

/// Result of probing a live document against a [`Readiness`] rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Ready,
    Pending,
    /// Will never become ready without another change.
    Failed(String),
}

fn int_at(doc: &Json, ptr: &str) -> Option<i64> { doc.pointer(ptr).and_then(|v| v.as_i64()) }

fn str_at<'a>(doc: &'a Json, ptr: &str) -> Option<&'a str> { doc.pointer(ptr).and_then(|v| v.as_str()) }

fn condition_true(doc: &Json, ty: &str) -> Option<String> {
    doc.pointer("/status/conditions")?.as_array()?.iter().find_map(|c| {
        let matches = c.get("type").and_then(|v| v.as_str()) == Some(ty) && c.get("status").and_then(|v| v.as_str()) == Some("True");
        matches.then(|| c.get("message").and_then(|v| v.as_str()).unwrap_or_default().to_string())
    })
}

fn rollout(doc: &Json) -> Probe {
    let generation = int_at(doc, "/metadata/generation").unwrap_or(0);
    let observed = int_at(doc, "/status/observedGeneration").unwrap_or(0);
    if observed < generation { return Probe::Pending; }
    let done = match str_at(doc, "/kind") {
        Some("DaemonSet") => {
            let desired = int_at(doc, "/status/desiredNumberScheduled").unwrap_or(0);
            int_at(doc, "/status/updatedNumberScheduled").unwrap_or(0) >= desired && int_at(doc, "/status/numberAvailable").unwrap_or(0) >= desired
        }
        Some("StatefulSet") => {
            let replicas = int_at(doc, "/spec/replicas").unwrap_or(1);
            int_at(doc, "/status/readyReplicas").unwrap_or(0) >= replicas && int_at(doc, "/status/updatedReplicas").unwrap_or(0) >= replicas
        }
        _ => {
            let replicas = int_at(doc, "/spec/replicas").unwrap_or(1);
            int_at(doc, "/status/updatedReplicas").unwrap_or(0) >= replicas && int_at(doc, "/status/availableReplicas").unwrap_or(0) >= replicas
        }
    };
    if done { Probe::Ready } else { Probe::Pending }
}

impl Readiness {
    pub fn probe(self, doc: &Json) -> Probe {
        match self {
            Readiness::Exists => Probe::Ready,
            Readiness::NamespaceActive => match str_at(doc, "/status/phase") {
                Some("Active") => Probe::Ready,
                _ => Probe::Pending,
            },
            Readiness::ClaimPhase => match str_at(doc, "/status/phase") {
                Some("Lost") => Probe::Failed("claim lost its volume".into()),
                _ => Probe::Ready,
            },
            Readiness::Rollout => rollout(doc),
            Readiness::JobComplete => {
                if condition_true(doc, "Complete").is_some() {
                    Probe::Ready
                } else if let Some(msg) = condition_true(doc, "Failed") {
                    Probe::Failed(if msg.is_empty() { "job failed".into() } else { msg })
                } else {
                    Probe::Pending
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn table_covers_level_kinds() {
        for k in ["Namespace", "Role", "ClusterRole", "ServiceAccount", "RoleBinding", "ClusterRoleBinding", "Secret", "ConfigMap",
            "StorageClass", "PersistentVolume", "PersistentVolumeClaim", "Deployment", "StatefulSet", "DaemonSet", "Job", "CronJob",
            "Service", "HorizontalPodAutoscaler", "Ingress", "PodDisruptionBudget"] {
            assert!(is_known(k), "{}", k);
        }
        assert!(!kind_spec("Namespace").namespaced);
        assert!(!kind_spec("Namespace").supports(Verb::Replace));
        assert!(kind_spec("ConfigMap").supports(Verb::Replace));
        assert_eq!(kind_spec("Job").replace, ReplacePolicy::Recreate);
    }

    #[test]
    fn unknown_kinds_are_inferred() {
        let s = kind_spec("Certificate");
        assert!(!s.builtin && s.namespaced);
        assert_eq!(s.plural, "certificates");
        assert_eq!(kind_spec("NetworkPolicy").plural, "networkpolicies");
        assert_eq!(kind_spec("Gateway").plural, "gateways");
        assert_eq!(kind_spec("IngressClass").plural, "ingressclasses");
        let ar = s.api_resource("cert-manager.io", "v1");
        assert_eq!(ar.api_version, "cert-manager.io/v1");
        assert_eq!(ar.plural, "certificates");
    }

    #[test]
    fn readiness_probes() {
        assert_eq!(Readiness::NamespaceActive.probe(&json!({"status": {"phase": "Terminating"}})), Probe::Pending);
        assert_eq!(Readiness::NamespaceActive.probe(&json!({"status": {"phase": "Active"}})), Probe::Ready);
        assert_eq!(Readiness::ClaimPhase.probe(&json!({"status": {"phase": "Pending"}})), Probe::Ready);
        assert!(matches!(Readiness::ClaimPhase.probe(&json!({"status": {"phase": "Lost"}})), Probe::Failed(_)));

        let job = json!({"status": {"conditions": [{"type": "Failed", "status": "True", "message": "BackoffLimitExceeded"}]}});
        assert_eq!(Readiness::JobComplete.probe(&job), Probe::Failed("BackoffLimitExceeded".into()));
        let job = json!({"status": {"conditions": [{"type": "Complete", "status": "True"}]}});
        assert_eq!(Readiness::JobComplete.probe(&job), Probe::Ready);
        assert_eq!(Readiness::JobComplete.probe(&json!({})), Probe::Pending);
    }

    #[test]
    fn rollout_probe_waits_for_observed_generation() {
        let dep = json!({
            "kind": "Deployment",
            "metadata": {"generation": 3},
            "spec": {"replicas": 2},
            "status": {"observedGeneration": 2, "updatedReplicas": 2, "availableReplicas": 2}
        });
        assert_eq!(Readiness::Rollout.probe(&dep), Probe::Pending);
        let mut dep = dep;
        dep["status"]["observedGeneration"] = json!(3);
        assert_eq!(Readiness::Rollout.probe(&dep), Probe::Ready);
        let ds = json!({"kind": "DaemonSet", "status": {"desiredNumberScheduled": 3, "updatedNumberScheduled": 3, "numberAvailable": 1}});
        assert_eq!(Readiness::Rollout.probe(&ds), Probe::Pending);
    }
}
