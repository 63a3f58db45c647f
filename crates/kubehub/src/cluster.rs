//! Cluster backend seam and its kube-rs implementation.

use std::time::Duration;

use futures::TryStreamExt;
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    core::DynamicObject,
    runtime::watcher::{self, Event},
    Client,
};
use serde_json::Value as Json;
use skiff_core::{ApiError, Reason};
use tracing::{debug, info};

use crate::kinds::{KindSpec, Probe, Readiness};

/// Fully resolved address of one object in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub group: String,
    pub version: String,
    pub spec: KindSpec,
    pub name: String,
    /// `None` for cluster-scoped kinds.
    pub namespace: Option<String>,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.spec.kind, ns, self.name),
            None => write!(f, "{}/{}", self.spec.kind, self.name),
        }
    }
}

/// Everything the reconciler needs from a cluster. Every failure is an [`ApiError`].
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get(&self, target: &Target) -> Result<Json, ApiError>;
    async fn create(&self, target: &Target, body: &Json) -> Result<Json, ApiError>;
    /// Strategic merge patch for built-in kinds, JSON merge patch otherwise.
    async fn patch(&self, target: &Target, patch: &Json) -> Result<Json, ApiError>;
    async fn replace(&self, target: &Target, body: &Json) -> Result<Json, ApiError>;
    async fn delete(&self, target: &Target) -> Result<(), ApiError>;
    /// Resolve once the object satisfies `readiness`; `Timeout` after `timeout`.
    async fn wait_for(&self, target: &Target, readiness: Readiness, timeout: Duration) -> Result<(), ApiError>;
}

/// [`ClusterApi`] over kube-rs dynamic objects.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self { Self { client } }

    /// Client from the ambient kubeconfig or in-cluster environment.
    pub async fn try_default() -> Result<Self, ApiError> {
        let client = Client::try_default().await?;
        Ok(Self { client })
    }

    fn api(&self, t: &Target) -> Api<DynamicObject> {
        let ar = t.spec.api_resource(&t.group, &t.version);
        match (&t.namespace, t.spec.namespaced) {
            (Some(ns), true) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }
}

fn to_dynamic(body: &Json) -> Result<DynamicObject, ApiError> {
    serde_json::from_value(body.clone()).map_err(|e| ApiError::transport(format!("invalid object body: {}", e)))
}

fn to_json(obj: DynamicObject) -> Result<Json, ApiError> {
    serde_json::to_value(obj).map_err(|e| ApiError::transport(format!("serializing object: {}", e)))
}

fn timeout_error(target: &Target, timeout: Duration) -> ApiError {
    ApiError::new(504, Reason::Timeout, format!("{} not ready after {}s", target, timeout.as_secs()))
}

#[async_trait::async_trait]
impl ClusterApi for KubeCluster {
    async fn get(&self, target: &Target) -> Result<Json, ApiError> {
        to_json(self.api(target).get(&target.name).await?)
    }

    async fn create(&self, target: &Target, body: &Json) -> Result<Json, ApiError> {
        let obj = to_dynamic(body)?;
        to_json(self.api(target).create(&PostParams::default(), &obj).await?)
    }

    async fn patch(&self, target: &Target, patch: &Json) -> Result<Json, ApiError> {
        let pp = PatchParams::default();
        let api = self.api(target);
        let out = if target.spec.builtin {
            api.patch(&target.name, &pp, &Patch::Strategic(patch)).await?
        } else {
            api.patch(&target.name, &pp, &Patch::Merge(patch)).await?
        };
        to_json(out)
    }

    async fn replace(&self, target: &Target, body: &Json) -> Result<Json, ApiError> {
        let obj = to_dynamic(body)?;
        to_json(self.api(target).replace(&target.name, &PostParams::default(), &obj).await?)
    }

    async fn delete(&self, target: &Target) -> Result<(), ApiError> {
        let _ = self.api(target).delete(&target.name, &DeleteParams::background()).await?;
        Ok(())
    }

    async fn wait_for(&self, target: &Target, readiness: Readiness, timeout: Duration) -> Result<(), ApiError> {
        let cfg = watcher::Config::default().fields(&format!("metadata.name={}", target.name));
        let stream = watcher::watcher(self.api(target), cfg);
        let wait = async move {
            futures::pin_mut!(stream);
            debug!(target = %target, ?readiness, "waiting for readiness");
            while let Some(ev) = stream.try_next().await.map_err(|e| ApiError::transport(e.to_string()))? {
                let candidates = match ev {
                    Event::Applied(o) => vec![o],
                    Event::Restarted(list) => list,
                    Event::Deleted(_) => continue,
                };
                for o in candidates {
                    match readiness.probe(&to_json(o)?) {
                        Probe::Ready => return Ok(()),
                        Probe::Pending => {}
                        Probe::Failed(msg) => {
                            return Err(ApiError::new(422, Reason::Invalid, format!("{} will not become ready: {}", target, msg)));
                        }
                    }
                }
            }
            Err(ApiError::transport(format!("watch on {} ended", target)))
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(res) => {
                if res.is_ok() { info!(target = %target, "ready"); }
                res
            }
            Err(_) => Err(timeout_error(target, timeout)),
        }
    }
}
