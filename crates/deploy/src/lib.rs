//! Skiff deploy: builds a dependency graph from declared objects and applies
//! it level by level against a cluster backend, rolling back on failure.

#![forbid(unsafe_code)]

pub mod executor;
pub mod graph;
pub mod strategy;

pub use executor::{Action, DeployError, ExecutionStatus, Executor, ExecutorConfig, PlannedNode};
pub use graph::{DeploymentGraph, DeploymentStatus, GraphError, ObjectNode};
pub use strategy::{classify_by_level, level_of, Strategy, StrategyAuto, UNKNOWN_LEVEL};
