//! Automatic dependency wiring by kind level.

use std::collections::BTreeMap;

use skiff_core::{ResourceId, ResourceObject};
use tracing::debug;

use crate::graph::{DeploymentGraph, GraphError};

/// Level assigned to kinds missing from the table: after everything known.
pub const UNKNOWN_LEVEL: u8 = 8;

const LEVELS: &[(u8, &[&str])] = &[
    (0, &["Namespace"]),
    (1, &["Role", "ClusterRole", "StorageClass"]),
    (2, &["ServiceAccount", "RoleBinding", "ClusterRoleBinding"]),
    (3, &["Secret", "ConfigMap"]),
    (4, &["PersistentVolume"]),
    (5, &["PersistentVolumeClaim"]),
    (6, &["Deployment", "StatefulSet", "DaemonSet", "Job", "CronJob"]),
    (7, &["Service", "HorizontalPodAutoscaler", "Ingress", "PodDisruptionBudget"]),
];

pub fn level_of(kind: &str) -> u8 {
    LEVELS.iter().find(|(_, kinds)| kinds.contains(&kind)).map(|(l, _)| *l).unwrap_or(UNKNOWN_LEVEL)
}

/// Group objects by level, keeping input order inside a level.
pub fn classify_by_level(objects: &[ResourceObject]) -> BTreeMap<u8, Vec<ResourceObject>> {
    let mut out: BTreeMap<u8, Vec<ResourceObject>> = BTreeMap::new();
    for o in objects {
        out.entry(level_of(o.kind())).or_default().push(o.clone());
    }
    out
}

/// Turns a flat list of declared objects into a dependency graph.
pub trait Strategy {
    fn build_deployment_graph(&self, objects: Vec<ResourceObject>) -> Result<DeploymentGraph, GraphError>;
}

/// Every object depends on every object of a strictly lower level.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrategyAuto;

impl Strategy for StrategyAuto {
    fn build_deployment_graph(&self, objects: Vec<ResourceObject>) -> Result<DeploymentGraph, GraphError> {
        let levels = classify_by_level(&objects);
        let mut graph = DeploymentGraph::new();
        for o in objects {
            graph.add_node(o, None)?;
        }
        let mut lower: Vec<ResourceId> = Vec::new();
        for (level, objs) in &levels {
            let ids: Vec<ResourceId> = objs.iter().map(|o| o.id().clone()).collect();
            debug!(level, count = ids.len(), depends_on = lower.len(), "wiring level");
            graph.add_dependencies(&ids, &lower)?;
            lower.extend(ids);
        }
        Ok(graph)
    }
}
