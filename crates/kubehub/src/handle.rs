//! Per-object operations: namespace resolution, create retries, idempotent
//! delete, replacement by policy and readiness waits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value as Json;
use skiff_core::{ApiError, Origin, Reason, ResourceObject};
use skiff_diff::Comparer;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterApi, Target};
use crate::kinds::{kind_spec, KindSpec, ReplacePolicy, Verb};

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

/// Tunables for [`ResourceHandle`] operations.
#[derive(Debug, Clone)]
pub struct HandleConfig {
    /// Extra create attempts when the previous instance is still being deleted.
    pub create_retries: u32,
    pub retry_delay: Duration,
    /// How long a recreate waits for the old object to disappear.
    pub delete_timeout: Duration,
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    pub default_namespace: String,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            create_retries: 1,
            retry_delay: Duration::from_millis(1000),
            delete_timeout: Duration::from_secs(120),
            wait_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(500),
            default_namespace: "default".into(),
        }
    }
}

impl HandleConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            create_retries: env_or("SKIFF_CREATE_RETRIES", d.create_retries),
            retry_delay: Duration::from_millis(env_or("SKIFF_RETRY_DELAY_MS", d.retry_delay.as_millis() as u64)),
            delete_timeout: Duration::from_secs(env_or("SKIFF_DELETE_TIMEOUT_SECS", d.delete_timeout.as_secs())),
            wait_timeout: Duration::from_secs(env_or("SKIFF_WAIT_TIMEOUT_SECS", d.wait_timeout.as_secs())),
            poll_interval: Duration::from_millis(env_or("SKIFF_POLL_INTERVAL_MS", d.poll_interval.as_millis() as u64)),
            default_namespace: std::env::var("SKIFF_DEFAULT_NAMESPACE").unwrap_or(d.default_namespace),
        }
    }
}

/// One declared object bound to a cluster backend.
#[derive(Clone)]
pub struct ResourceHandle {
    object: ResourceObject,
    spec: KindSpec,
    cluster: Arc<dyn ClusterApi>,
    config: HandleConfig,
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle").field("id", self.object.id()).field("spec", &self.spec).finish()
    }
}

impl ResourceHandle {
    pub fn new(object: ResourceObject, cluster: Arc<dyn ClusterApi>, config: HandleConfig) -> Self {
        let spec = kind_spec(object.kind());
        Self { object, spec, cluster, config }
    }

    pub fn object(&self) -> &ResourceObject { &self.object }
    pub fn spec(&self) -> &KindSpec { &self.spec }

    /// Effective namespace: `None` for cluster-scoped kinds, else the object's
    /// own namespace, then the caller's, then the configured default.
    pub fn namespace(&self, caller: Option<&str>) -> Option<String> {
        if !self.spec.namespaced {
            return None;
        }
        Some(self.object.namespace().or(caller).unwrap_or(&self.config.default_namespace).to_string())
    }

    pub fn target(&self, caller: Option<&str>) -> Target {
        let (group, version) = self.object.group_version();
        Target {
            group: group.to_string(),
            version: version.to_string(),
            spec: self.spec.clone(),
            name: self.object.name().to_string(),
            namespace: self.namespace(caller),
        }
    }

    /// Write body: bookkeeping and status stripped, effective namespace stamped.
    pub fn body(&self, caller: Option<&str>) -> Json {
        let mut body = Comparer::default().strip_ignored(self.object.document());
        if let (Some(ns), Some(meta)) = (self.namespace(caller), body.get_mut("metadata").and_then(|m| m.as_object_mut())) {
            meta.insert("namespace".into(), Json::String(ns));
        }
        body
    }

    fn ensure(&self, verb: Verb) -> Result<(), ApiError> {
        if self.spec.supports(verb) {
            return Ok(());
        }
        Err(ApiError::new(405, Reason::Unknown("MethodNotAllowed".into()), format!("{:?} is not supported for {}", verb, self.spec.kind)))
    }

    /// Live object; a missing one surfaces as a NotFound [`ApiError`].
    pub async fn read(&self, caller: Option<&str>) -> Result<ResourceObject, ApiError> {
        self.ensure(Verb::Read)?;
        let doc = self.cluster.get(&self.target(caller)).await?;
        Ok(self.object.with_document(doc, Origin::Cluster))
    }

    pub async fn create(&self, caller: Option<&str>) -> Result<(), ApiError> {
        self.ensure(Verb::Create)?;
        let target = self.target(caller);
        let body = self.body(caller);
        let mut attempt = 0u32;
        loop {
            match self.cluster.create(&target, &body).await {
                Ok(_) => {
                    info!(target = %target, "created");
                    return Ok(());
                }
                Err(e) if e.is_already_exists() && e.is_being_deleted() && attempt < self.config.create_retries => {
                    attempt += 1;
                    metrics::counter!("cluster_create_retries", 1u64);
                    warn!(target = %target, attempt, "previous instance still being deleted; retrying create");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) if e.is_already_exists() && !e.is_being_deleted() => {
                    debug!(target = %target, "already exists");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn patch(&self, caller: Option<&str>, patch: &Json) -> Result<(), ApiError> {
        self.ensure(Verb::Patch)?;
        let target = self.target(caller);
        self.cluster.patch(&target, patch).await?;
        info!(target = %target, "patched");
        Ok(())
    }

    /// Replace the live object with the declared one, following the kind's [`ReplacePolicy`].
    pub async fn replace(&self, caller: Option<&str>) -> Result<(), ApiError> {
        match self.spec.replace {
            ReplacePolicy::InPlace if self.spec.supports(Verb::Replace) => {
                let target = self.target(caller);
                let live = self.cluster.get(&target).await?;
                let mut body = self.body(caller);
                if let (Some(rv), Some(meta)) = (live.pointer("/metadata/resourceVersion").cloned(), body.get_mut("metadata").and_then(|m| m.as_object_mut())) {
                    meta.insert("resourceVersion".into(), rv);
                }
                self.cluster.replace(&target, &body).await?;
                info!(target = %target, "replaced in place");
                Ok(())
            }
            _ => self.recreate(caller).await,
        }
    }

    async fn recreate(&self, caller: Option<&str>) -> Result<(), ApiError> {
        self.ensure(Verb::Delete)?;
        let target = self.target(caller);
        self.delete(caller).await?;
        self.wait_gone(&target).await?;
        self.create(caller).await?;
        info!(target = %target, "recreated");
        Ok(())
    }

    async fn wait_gone(&self, target: &Target) -> Result<(), ApiError> {
        let deadline = Instant::now() + self.config.delete_timeout;
        loop {
            match self.cluster.get(target).await {
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
                Ok(_) if Instant::now() >= deadline => {
                    return Err(ApiError::new(
                        504,
                        Reason::Timeout,
                        format!("{} still present after {}s", target, self.config.delete_timeout.as_secs()),
                    ));
                }
                Ok(_) => tokio::time::sleep(self.config.poll_interval).await,
            }
        }
    }

    /// Delete; an object that is already gone counts as deleted.
    pub async fn delete(&self, caller: Option<&str>) -> Result<(), ApiError> {
        self.ensure(Verb::Delete)?;
        let target = self.target(caller);
        match self.cluster.delete(&target).await {
            Ok(()) => {
                info!(target = %target, "deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(target = %target, "already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Block until the kind's readiness rule holds.
    pub async fn wait(&self, caller: Option<&str>) -> Result<(), ApiError> {
        self.cluster.wait_for(&self.target(caller), self.spec.readiness, self.config.wait_timeout).await
    }
}
