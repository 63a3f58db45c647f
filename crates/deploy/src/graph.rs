//! Dependency graph of declared objects.
//!
//! The graph owns every node in a map keyed by [`ResourceId`]; edges are id
//! sets on the dependent node, never references between nodes.

use std::collections::BTreeSet;
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use skiff_core::{ResourceId, ResourceObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeploymentStatus {
    Pending,
    Done,
    NoActionNeeded,
    Failed,
    RolledBack,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Done => "done",
            DeploymentStatus::NoActionNeeded => "no_action_needed",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ObjectNode {
    pub object: ResourceObject,
    /// State to restore on rollback; `None` means the object is deleted instead.
    pub previous: Option<ResourceObject>,
    /// Ids this node waits for.
    pub dependencies: BTreeSet<ResourceId>,
    pub status: DeploymentStatus,
}

impl ObjectNode {
    pub fn new(object: ResourceObject, previous: Option<ResourceObject>) -> Self {
        Self { object, previous, dependencies: BTreeSet::new(), status: DeploymentStatus::Pending }
    }

    pub fn id(&self) -> &ResourceId { self.object.id() }
}

fn render_cycle(cycle: &[ResourceId]) -> String {
    cycle.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(" -> ")
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("Cycle detected: {}", render_cycle(.cycle))]
    Cycle { cycle: Vec<ResourceId> },
    #[error("duplicate node {0}")]
    DuplicateNode(ResourceId),
    #[error("unknown node {0}")]
    UnknownNode(ResourceId),
}

#[derive(Debug, Clone, Default)]
pub struct DeploymentGraph {
    nodes: FxHashMap<ResourceId, ObjectNode>,
    order: Vec<ResourceId>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl DeploymentGraph {
    pub fn new() -> Self { Self::default() }

    pub fn add_node(&mut self, object: ResourceObject, previous: Option<ResourceObject>) -> Result<(), GraphError> {
        let id = object.id().clone();
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode(id));
        }
        self.nodes.insert(id.clone(), ObjectNode::new(object, previous));
        self.order.push(id);
        Ok(())
    }

    /// Record that `from` depends on `to`.
    pub fn add_dependency(&mut self, from: &ResourceId, to: &ResourceId) -> Result<(), GraphError> {
        if !self.nodes.contains_key(to) {
            return Err(GraphError::UnknownNode(to.clone()));
        }
        let node = self.nodes.get_mut(from).ok_or_else(|| GraphError::UnknownNode(from.clone()))?;
        node.dependencies.insert(to.clone());
        Ok(())
    }

    /// Every id in `froms` depends on every id in `tos`.
    pub fn add_dependencies(&mut self, froms: &[ResourceId], tos: &[ResourceId]) -> Result<(), GraphError> {
        for from in froms {
            for to in tos {
                self.add_dependency(from, to)?;
            }
        }
        Ok(())
    }

    pub fn node(&self, id: &ResourceId) -> Option<&ObjectNode> { self.nodes.get(id) }
    pub fn contains(&self, id: &ResourceId) -> bool { self.nodes.contains_key(id) }
    pub fn len(&self) -> usize { self.order.len() }
    pub fn is_empty(&self) -> bool { self.order.is_empty() }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &ObjectNode> + '_ {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn set_status(&mut self, id: &ResourceId, status: DeploymentStatus) {
        if let Some(n) = self.nodes.get_mut(id) { n.status = status; }
    }

    pub fn set_previous(&mut self, id: &ResourceId, previous: Option<ResourceObject>) {
        if let Some(n) = self.nodes.get_mut(id) { n.previous = previous; }
    }

    /// Fail on the first dependency cycle found by depth-first search.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut marks: FxHashMap<&ResourceId, Mark> = FxHashMap::default();
        let mut stack: Vec<&ResourceId> = Vec::new();
        for id in &self.order {
            if !marks.contains_key(id) {
                self.visit(id, &mut marks, &mut stack)?;
            }
        }
        Ok(())
    }

    fn visit<'a>(&'a self, id: &'a ResourceId, marks: &mut FxHashMap<&'a ResourceId, Mark>, stack: &mut Vec<&'a ResourceId>) -> Result<(), GraphError> {
        marks.insert(id, Mark::Visiting);
        stack.push(id);
        if let Some(node) = self.nodes.get(id) {
            for dep in &node.dependencies {
                match marks.get(dep) {
                    Some(Mark::Done) => {}
                    Some(Mark::Visiting) => {
                        let start = stack.iter().position(|s| *s == dep).unwrap_or(0);
                        let mut cycle: Vec<ResourceId> = stack[start..].iter().map(|s| (*s).clone()).collect();
                        cycle.push(dep.clone());
                        return Err(GraphError::Cycle { cycle });
                    }
                    None => self.visit(dep, marks, stack)?,
                }
            }
        }
        stack.pop();
        marks.insert(id, Mark::Done);
        Ok(())
    }

    /// Levels of ids: every id appears after all of its dependencies, ids
    /// within a level keep insertion order.
    pub fn traverse_graph(&self) -> Result<Vec<Vec<ResourceId>>, GraphError> {
        let mut placed: FxHashSet<&ResourceId> = FxHashSet::default();
        let mut remaining: Vec<&ResourceId> = self.order.iter().collect();
        let mut levels = Vec::new();
        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&ResourceId>, Vec<&ResourceId>) = remaining.into_iter().partition(|id| {
                self.nodes.get(*id).map(|n| n.dependencies.iter().all(|d| placed.contains(d))).unwrap_or(true)
            });
            if ready.is_empty() {
                self.validate()?;
                return Err(GraphError::Cycle { cycle: blocked.into_iter().cloned().collect() });
            }
            placed.extend(ready.iter().copied());
            levels.push(ready.into_iter().cloned().collect());
            remaining = blocked;
        }
        Ok(levels)
    }
}
