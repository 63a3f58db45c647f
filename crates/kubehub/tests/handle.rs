#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use skiff_core::{ApiError, Origin, Reason, ResourceObject};
use skiff_kubehub::{HandleConfig, MemoryCluster, ResourceHandle, Verb};

fn config() -> HandleConfig {
    HandleConfig {
        create_retries: 2,
        retry_delay: Duration::from_millis(1),
        delete_timeout: Duration::from_millis(50),
        wait_timeout: Duration::from_secs(1),
        poll_interval: Duration::from_millis(1),
        default_namespace: "fallback".into(),
    }
}

fn object(doc: Value) -> ResourceObject { ResourceObject::from_document(doc, Origin::Inline).unwrap() }

fn configmap(ns: Option<&str>, data: Value) -> ResourceObject {
    let mut meta = json!({"name": "settings"});
    if let Some(ns) = ns { meta["namespace"] = json!(ns); }
    object(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": meta, "data": data}))
}

fn handle(cluster: &Arc<MemoryCluster>, obj: ResourceObject) -> ResourceHandle {
    ResourceHandle::new(obj, cluster.clone(), config())
}

#[test]
fn namespace_resolution_order() {
    let cluster = Arc::new(MemoryCluster::new());
    let explicit = handle(&cluster, configmap(Some("mine"), json!({})));
    assert_eq!(explicit.namespace(Some("caller")).as_deref(), Some("mine"));
    let implicit = handle(&cluster, configmap(None, json!({})));
    assert_eq!(implicit.namespace(Some("caller")).as_deref(), Some("caller"));
    assert_eq!(implicit.namespace(None).as_deref(), Some("fallback"));
    let ns = handle(&cluster, object(json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "x"}})));
    assert_eq!(ns.namespace(Some("caller")), None);
}

#[test]
fn body_is_sanitised_and_namespaced() {
    let cluster = Arc::new(MemoryCluster::new());
    let obj = object(json!({
        "apiVersion": "v1", "kind": "ConfigMap",
        "metadata": {"name": "settings", "uid": "u", "resourceVersion": "9", "managedFields": []},
        "status": {},
        "data": {"a": "1"}
    }));
    let body = handle(&cluster, obj).body(Some("team"));
    assert_eq!(body, json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "settings", "namespace": "team"}, "data": {"a": "1"}}));
}

#[tokio::test]
async fn read_missing_is_not_found_then_create_and_read() {
    let cluster = Arc::new(MemoryCluster::new());
    let h = handle(&cluster, configmap(None, json!({"a": "1"})));
    let err = h.read(Some("team")).await.unwrap_err();
    assert!(err.is_not_found());

    h.create(Some("team")).await.unwrap();
    let live = h.read(Some("team")).await.unwrap();
    assert_eq!(live.origin(), &Origin::Cluster);
    assert_eq!(live.document()["data"], json!({"a": "1"}));
    assert_eq!(live.document()["metadata"]["namespace"], json!("team"));
}

#[tokio::test]
async fn create_is_idempotent_on_plain_already_exists() {
    let cluster = Arc::new(MemoryCluster::new());
    let h = handle(&cluster, configmap(Some("team"), json!({})));
    h.create(None).await.unwrap();
    h.create(None).await.unwrap();
    assert_eq!(cluster.len(), 1);
}

#[tokio::test]
async fn create_retries_while_previous_instance_is_deleted() {
    let cluster = Arc::new(MemoryCluster::new());
    let being_deleted = ApiError::already_exists("object is being deleted: configmaps \"settings\" already exists");
    cluster.fail(Verb::Create, "ConfigMap", "settings", being_deleted.clone(), 2);
    let h = handle(&cluster, configmap(Some("team"), json!({})));
    h.create(None).await.unwrap();
    assert_eq!(cluster.calls().iter().filter(|c| c.starts_with("create")).count(), 3);

    let other = Arc::new(MemoryCluster::new());
    other.fail(Verb::Create, "ConfigMap", "settings", being_deleted, 5);
    let err = handle(&other, configmap(Some("team"), json!({}))).create(None).await.unwrap_err();
    assert!(err.is_being_deleted());
    assert!(other.is_empty());
}

#[tokio::test]
async fn create_surfaces_other_errors() {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.fail(Verb::Create, "ConfigMap", "settings", ApiError::new(403, Reason::Forbidden, "nope"), 1);
    let err = handle(&cluster, configmap(Some("team"), json!({}))).create(None).await.unwrap_err();
    assert_eq!(err.reason, Reason::Forbidden);
}

#[tokio::test]
async fn delete_missing_object_is_ok() {
    let cluster = Arc::new(MemoryCluster::new());
    handle(&cluster, configmap(Some("team"), json!({}))).delete(None).await.unwrap();
}

#[tokio::test]
async fn patch_merges_into_live_object() {
    let cluster = Arc::new(MemoryCluster::new());
    let h = handle(&cluster, configmap(Some("team"), json!({"a": "1", "b": "2"})));
    h.create(None).await.unwrap();
    h.patch(None, &json!({"data": {"a": "9", "b": null}})).await.unwrap();
    let live = cluster.object("ConfigMap", Some("team"), "settings").unwrap();
    assert_eq!(live["data"], json!({"a": "9"}));
}

#[tokio::test]
async fn in_place_replace_carries_resource_version() {
    let cluster = Arc::new(MemoryCluster::new());
    handle(&cluster, configmap(Some("team"), json!({"a": "1"}))).create(None).await.unwrap();
    let uid = cluster.object("ConfigMap", Some("team"), "settings").unwrap()["metadata"]["uid"].clone();

    handle(&cluster, configmap(Some("team"), json!({"a": "2"}))).replace(None).await.unwrap();
    let live = cluster.object("ConfigMap", Some("team"), "settings").unwrap();
    assert_eq!(live["data"], json!({"a": "2"}));
    assert!(!cluster.calls().iter().any(|c| c.starts_with("delete")));
    assert_eq!(live["metadata"]["uid"], uid);
}

#[tokio::test]
async fn recreate_replace_deletes_then_creates() {
    let cluster = Arc::new(MemoryCluster::new());
    let job = |image: &str| object(json!({
        "apiVersion": "batch/v1", "kind": "Job",
        "metadata": {"name": "migrate", "namespace": "team"},
        "spec": {"template": {"spec": {"containers": [{"name": "m", "image": image}], "restartPolicy": "Never"}}}
    }));
    handle(&cluster, job("v1")).create(None).await.unwrap();
    handle(&cluster, job("v2")).replace(None).await.unwrap();

    let live = cluster.object("Job", Some("team"), "migrate").unwrap();
    assert_eq!(live["spec"]["template"]["spec"]["containers"][0]["image"], json!("v2"));
    let calls = cluster.calls();
    let delete = calls.iter().position(|c| c.starts_with("delete")).unwrap();
    let create = calls.iter().rposition(|c| c.starts_with("create")).unwrap();
    assert!(delete < create);
}

#[tokio::test]
async fn recreate_times_out_when_object_lingers() {
    let cluster = Arc::new(MemoryCluster::new());
    let svc = object(json!({"apiVersion": "v1", "kind": "Service", "metadata": {"name": "web", "namespace": "team"}, "spec": {}}));
    handle(&cluster, svc.clone()).create(None).await.unwrap();
    // Deletion is accepted but the object never goes away.
    cluster.fail(Verb::Delete, "Service", "web", ApiError::not_found("gone"), 1);
    let err = handle(&cluster, svc).replace(None).await.unwrap_err();
    assert_eq!(err.reason, Reason::Timeout);
}

#[tokio::test]
async fn wait_reports_terminal_failures() {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.seed("Job", Some("team"), "migrate", json!({
        "apiVersion": "batch/v1", "kind": "Job",
        "metadata": {"name": "migrate", "namespace": "team"},
        "status": {"conditions": [{"type": "Failed", "status": "True", "message": "BackoffLimitExceeded"}]}
    }));
    let h = handle(&cluster, object(json!({"apiVersion": "batch/v1", "kind": "Job", "metadata": {"name": "migrate", "namespace": "team"}})));
    let err = h.wait(None).await.unwrap_err();
    assert!(err.message.contains("BackoffLimitExceeded"));
}
