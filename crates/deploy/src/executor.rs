//! Level-by-level execution of a deployment graph with compensating rollback.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use metrics::{counter, histogram};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use serde_json::Value as Json;
use skiff_core::{ApiError, Origin, ResourceId, ResourceObject};
use skiff_diff::{CompareResult, Comparer, UpdateAction};
use skiff_kubehub::{ClusterApi, HandleConfig, ResourceHandle};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::graph::{DeploymentGraph, DeploymentStatus, GraphError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionStatus {
    Pending,
    Done,
    Failed,
    RolledBack,
    /// Rollback ran but some compensations failed: the cluster may be in a mixed state.
    RollbackFailed,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound on concurrent node operations within a level.
    pub max_parallel: usize,
    pub handle: HandleConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self { Self { max_parallel: 16, handle: HandleConfig::default() } }
}

impl ExecutorConfig {
    pub fn from_env() -> Self {
        let max_parallel = std::env::var("SKIFF_MAX_PARALLEL").ok().and_then(|s| s.parse().ok()).filter(|n| *n > 0).unwrap_or(16);
        Self { max_parallel, handle: HandleConfig::from_env() }
    }
}

/// What applying a node will do against the live state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Action {
    Create,
    /// Minimal patch document.
    Patch(Json),
    Replace,
    NoAction,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Patch(_) => "patch",
            Action::Replace => "replace",
            Action::NoAction => "none",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannedNode {
    pub id: ResourceId,
    pub action: Action,
    /// Absent when the object does not exist yet.
    pub comparison: Option<CompareResult>,
}

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("{id}: {source}")]
    NodeFailed { id: ResourceId, source: ApiError },
    #[error("rollback failed for {} node(s)", .failures.len())]
    RollbackFailed { failures: Vec<(ResourceId, ApiError)> },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Mode {
    Forward,
    Rollback,
}

struct Decision {
    action: Action,
    live: Option<ResourceObject>,
    comparison: Option<CompareResult>,
}

/// Result of one node operation, folded into the graph after the level joins.
struct NodeOutcome {
    id: ResourceId,
    status: DeploymentStatus,
    previous: Option<Option<ResourceObject>>,
    /// A write was sent, so the live object may have changed even on failure.
    written: bool,
    error: Option<ApiError>,
}

impl NodeOutcome {
    fn status(id: &ResourceId, status: DeploymentStatus) -> Self { Self { id: id.clone(), status, previous: None, written: false, error: None } }

    fn failed(id: &ResourceId, error: ApiError) -> Self {
        Self { id: id.clone(), status: DeploymentStatus::Failed, previous: None, written: false, error: Some(error) }
    }
}

type WaitCell = Arc<OnceCell<Result<(), ApiError>>>;

pub struct Executor {
    graph: DeploymentGraph,
    cluster: Arc<dyn ClusterApi>,
    config: ExecutorConfig,
    comparer: Comparer,
    deployed: Vec<Vec<ResourceId>>,
    /// Nodes a write was sent for during the current run.
    written: FxHashSet<ResourceId>,
    waited: Mutex<FxHashMap<ResourceId, WaitCell>>,
    status: ExecutionStatus,
}

impl Executor {
    pub fn new(graph: DeploymentGraph, cluster: Arc<dyn ClusterApi>, config: ExecutorConfig) -> Self {
        Self {
            graph,
            cluster,
            config,
            comparer: Comparer::default(),
            deployed: Vec::new(),
            written: FxHashSet::default(),
            waited: Mutex::new(FxHashMap::default()),
            status: ExecutionStatus::Pending,
        }
    }

    pub fn status(&self) -> ExecutionStatus { self.status }
    pub fn is_done(&self) -> bool { self.status == ExecutionStatus::Done }
    pub fn graph(&self) -> &DeploymentGraph { &self.graph }
    /// Levels that were attempted, in order.
    pub fn deployed_levels(&self) -> &[Vec<ResourceId>] { &self.deployed }
    pub fn node_status(&self, id: &ResourceId) -> Option<DeploymentStatus> { self.graph.node(id).map(|n| n.status) }

    fn handle(&self, object: ResourceObject) -> ResourceHandle {
        ResourceHandle::new(object, self.cluster.clone(), self.config.handle.clone())
    }

    /// Read live state and decide the action for `object`, without writing.
    async fn decide(&self, handle: &ResourceHandle, namespace: Option<&str>) -> Result<Decision, ApiError> {
        let live = match handle.read(namespace).await {
            Ok(live) => live,
            Err(e) if e.is_not_found() => return Ok(Decision { action: Action::Create, live: None, comparison: None }),
            Err(e) => return Err(e),
        };
        let r = self.comparer.determine_update_action(handle.object(), &live);
        let action = match r.action {
            UpdateAction::Equals => Action::NoAction,
            UpdateAction::NeedsPatch if handle.spec().builtin => Action::Patch(r.patch_document()),
            UpdateAction::NeedsPatch => Action::Patch(r.merge_patch_document(handle.object().document())),
            UpdateAction::NeedsReplacement => Action::Replace,
        };
        Ok(Decision { action, live: Some(live), comparison: Some(r) })
    }

    async fn execute(&self, handle: &ResourceHandle, namespace: Option<&str>, action: &Action) -> Result<(), ApiError> {
        match action {
            Action::Create => handle.create(namespace).await,
            Action::Patch(doc) => handle.patch(namespace, doc).await,
            Action::Replace => handle.replace(namespace).await,
            Action::NoAction => Ok(()),
        }
    }

    /// Planned action per node, level by level. Nothing is written.
    pub async fn plan(&self, namespace: Option<&str>) -> Result<Vec<Vec<PlannedNode>>, DeployError> {
        let levels = self.graph.traverse_graph()?;
        let mut out = Vec::with_capacity(levels.len());
        for level in levels {
            let planned: Vec<Result<PlannedNode, DeployError>> = stream::iter(level.into_iter().map(|id| async move {
                let node = self.graph.node(&id).ok_or_else(|| GraphError::UnknownNode(id.clone()))?;
                let d = self.decide(&self.handle(node.object.clone()), namespace).await.map_err(|source| DeployError::NodeFailed { id: id.clone(), source })?;
                Ok::<_, DeployError>(PlannedNode { id, action: d.action, comparison: d.comparison })
            }))
            .buffered(self.config.max_parallel.max(1))
            .collect()
            .await;
            out.push(planned.into_iter().collect::<Result<Vec<_>, _>>()?);
        }
        Ok(out)
    }

    /// Wait for `id` to be ready, after its own dependencies. Each id is waited
    /// at most once until the memo is reset.
    fn wait_node<'a>(&'a self, id: &'a ResourceId, namespace: Option<&'a str>, mode: Mode) -> BoxFuture<'a, Result<(), ApiError>> {
        async move {
            let cell = {
                let mut waited = self.waited.lock().unwrap_or_else(|e| e.into_inner());
                waited.entry(id.clone()).or_default().clone()
            };
            cell.get_or_init(|| async move {
                let Some(node) = self.graph.node(id) else { return Ok(()) };
                let object = match mode {
                    Mode::Forward => node.object.clone(),
                    Mode::Rollback => match (&node.previous, node.status) {
                        (Some(prev), DeploymentStatus::RolledBack) => prev.clone(),
                        _ => return Ok(()),
                    },
                };
                for dep in &node.dependencies {
                    self.wait_node(dep, namespace, mode).await?;
                }
                debug!(id = %id, ?mode, "waiting");
                self.handle(object).wait(namespace).await
            })
            .await
            .clone()
        }
        .boxed()
    }

    async fn wait_dependencies(&self, id: &ResourceId, namespace: Option<&str>, mode: Mode) -> Result<(), ApiError> {
        let Some(node) = self.graph.node(id) else { return Ok(()) };
        future::try_join_all(node.dependencies.iter().map(|dep| self.wait_node(dep, namespace, mode))).await?;
        Ok(())
    }

    async fn apply_node(&self, id: &ResourceId, namespace: Option<&str>) -> NodeOutcome {
        let Some(node) = self.graph.node(id) else {
            return NodeOutcome::failed(id, ApiError::not_found(format!("{} is not in the graph", id)));
        };
        if let Err(e) = self.wait_dependencies(id, namespace, Mode::Forward).await {
            return NodeOutcome::failed(id, e);
        }
        let handle = self.handle(node.object.clone());
        let decision = match self.decide(&handle, namespace).await {
            Ok(d) => d,
            Err(e) => return NodeOutcome::failed(id, e),
        };
        // Without an explicit prior state, the live object is what rollback restores.
        let previous = match (&node.previous, decision.live) {
            (None, Some(live)) => {
                let doc = self.comparer.strip_ignored(live.document());
                Some(Some(live.with_document(doc, Origin::Cluster)))
            }
            _ => None,
        };
        let result = self.execute(&handle, namespace, &decision.action).await;
        let status = match (&result, &decision.action) {
            (Err(_), _) => DeploymentStatus::Failed,
            (Ok(()), Action::NoAction) => DeploymentStatus::NoActionNeeded,
            (Ok(()), _) => DeploymentStatus::Done,
        };
        match &result {
            Ok(()) => {
                counter!("deploy_nodes_applied", 1u64, "action" => decision.action.name());
                info!(id = %id, action = decision.action.name(), "applied");
            }
            Err(e) => {
                counter!("deploy_nodes_failed", 1u64);
                warn!(id = %id, action = decision.action.name(), error = %e, "apply failed");
                if e.is_immutable_field_violation() {
                    warn!(id = %id, fields = ?e.immutable_fields(), "fields need replacement");
                }
            }
        }
        let written = !matches!(decision.action, Action::NoAction);
        NodeOutcome { id: id.clone(), status, previous, written, error: result.err() }
    }

    async fn rollback_node(&self, id: &ResourceId, namespace: Option<&str>) -> NodeOutcome {
        let Some(node) = self.graph.node(id) else { return NodeOutcome::status(id, DeploymentStatus::Pending) };
        // A failed write may have left a partial change, e.g. a recreate whose
        // delete succeeded and create did not. Failures before any write are left alone.
        match node.status {
            DeploymentStatus::Done => {}
            DeploymentStatus::Failed if self.written.contains(id) => {}
            DeploymentStatus::Pending | DeploymentStatus::NoActionNeeded | DeploymentStatus::Failed | DeploymentStatus::RolledBack => {
                return NodeOutcome::status(id, node.status);
            }
        }
        let result = match &node.previous {
            None => self.handle(node.object.clone()).delete(namespace).await,
            Some(prev) => {
                let restore = async {
                    self.wait_dependencies(id, namespace, Mode::Rollback).await?;
                    let handle = self.handle(prev.clone());
                    let decision = self.decide(&handle, namespace).await?;
                    self.execute(&handle, namespace, &decision.action).await
                };
                restore.await
            }
        };
        match result {
            Ok(()) => {
                info!(id = %id, restored = node.previous.is_some(), "rolled back");
                NodeOutcome::status(id, DeploymentStatus::RolledBack)
            }
            Err(e) => {
                error!(id = %id, error = %e, "rollback failed");
                NodeOutcome::failed(id, e)
            }
        }
    }

    fn record(&mut self, outcome: &mut NodeOutcome) {
        self.graph.set_status(&outcome.id, outcome.status);
        if outcome.written {
            self.written.insert(outcome.id.clone());
        }
        if let Some(prev) = outcome.previous.take() {
            self.graph.set_previous(&outcome.id, prev);
        }
    }

    /// Apply every level in dependency order. On the first failing level the
    /// run is rolled back and the node error is returned.
    pub async fn deploy(&mut self, namespace: Option<&str>) -> Result<(), DeployError> {
        self.graph.validate()?;
        let levels = self.graph.traverse_graph()?;
        info!(levels = levels.len(), nodes = self.graph.len(), ns = ?namespace, "deploy starting");
        for (idx, level) in levels.into_iter().enumerate() {
            let started = Instant::now();
            let outcomes: Vec<NodeOutcome> = stream::iter(level.iter().map(|id| self.apply_node(id, namespace)))
                .buffer_unordered(self.config.max_parallel.max(1))
                .collect()
                .await;
            histogram!("deploy_level_ms", started.elapsed().as_secs_f64() * 1000.0);
            debug!(level = idx, nodes = level.len(), "level finished");

            let mut failure: Option<(ResourceId, ApiError)> = None;
            for mut o in outcomes {
                self.record(&mut o);
                if let (Some(e), None) = (o.error.take(), &failure) {
                    failure = Some((o.id.clone(), e));
                }
            }
            self.deployed.push(level);

            if let Some((id, source)) = failure {
                self.status = ExecutionStatus::Failed;
                error!(id = %id, level = idx, error = %source, "deployment failed; rolling back");
                if let Err(e) = self.rollback(namespace).await {
                    error!(error = %e, "rollback incomplete");
                }
                return Err(DeployError::NodeFailed { id, source });
            }
        }
        self.status = ExecutionStatus::Done;
        info!("deploy done");
        Ok(())
    }

    /// Wait until every applied node is ready, dependencies first.
    pub async fn wait_for_all(&self, namespace: Option<&str>) -> Result<(), DeployError> {
        for level in &self.deployed {
            let ids = level.iter().filter(|id| matches!(self.node_status(id), Some(DeploymentStatus::Done | DeploymentStatus::NoActionNeeded)));
            let results = future::join_all(ids.map(|id| async move { (id, self.wait_node(id, namespace, Mode::Forward).await) })).await;
            if let Some((id, Err(source))) = results.into_iter().find(|(_, r)| r.is_err()) {
                return Err(DeployError::NodeFailed { id: id.clone(), source });
            }
        }
        Ok(())
    }

    /// Compensate every applied node: delete what was created, restore what
    /// was changed. Levels run in deploy order, nodes of a level concurrently.
    pub async fn rollback(&mut self, namespace: Option<&str>) -> Result<(), DeployError> {
        counter!("deploy_rollbacks", 1u64);
        self.waited.lock().unwrap_or_else(|e| e.into_inner()).clear();
        let levels = self.deployed.clone();
        let mut failures = Vec::new();
        for level in &levels {
            let outcomes: Vec<NodeOutcome> = stream::iter(level.iter().map(|id| self.rollback_node(id, namespace)))
                .buffer_unordered(self.config.max_parallel.max(1))
                .collect()
                .await;
            for mut o in outcomes {
                self.record(&mut o);
                if let Some(e) = o.error.take() {
                    failures.push((o.id.clone(), e));
                }
            }
        }
        if failures.is_empty() {
            self.status = ExecutionStatus::RolledBack;
            info!("rollback done");
            Ok(())
        } else {
            self.status = ExecutionStatus::RollbackFailed;
            for (id, e) in &failures {
                error!(id = %id, error = %e, "compensation failed");
            }
            Err(DeployError::RollbackFailed { failures })
        }
    }
}
