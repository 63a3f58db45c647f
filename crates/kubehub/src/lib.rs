//! Skiff kubehub: kind capability table, the cluster backend seam with its
//! kube-rs implementation, and per-object resource handles.

#![forbid(unsafe_code)]

pub mod cluster;
pub mod handle;
pub mod kinds;
pub mod memory;

pub use cluster::{ClusterApi, KubeCluster, Target};
pub use handle::{HandleConfig, ResourceHandle};
pub use kinds::{is_known, kind_spec, KindSpec, Probe, Readiness, ReplacePolicy, Verb};
pub use memory::MemoryCluster;
