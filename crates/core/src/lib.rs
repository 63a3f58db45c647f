//! Skiff core types: resource identity, declared objects and provider errors.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

mod error;

pub use error::{ApiError, ErrorCause, ErrorDetails, Reason};

pub mod prelude {
    pub use super::{ApiError, Origin, Reason, ResourceId, ResourceObject};
}

/// Unique key of a resource: `(kind, name, namespace?)`.
///
/// The namespace is absent for cluster-scoped kinds and for namespaced objects
/// that leave it to the deployment namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl ResourceId {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, namespace: Option<&str>) -> Self {
        Self { kind: kind.into(), name: name.into(), namespace: namespace.map(|s| s.to_string()) }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Where a declared object came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Origin {
    /// Loaded from a YAML file (document index within the file).
    Yaml { path: String, index: usize },
    /// Read back from the cluster.
    Cluster,
    /// Built in code.
    Inline,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Yaml { path, index } => write!(f, "{}#{}", path, index),
            Origin::Cluster => f.write_str("cluster"),
            Origin::Inline => f.write_str("inline"),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ObjectError {
    #[error("document is not a map")]
    NotAMap,
    #[error("document missing kind")]
    MissingKind,
    #[error("document missing metadata.name")]
    MissingName,
}

/// A declared resource: identity, full document and provenance.
///
/// The document is read-only once the object is built; every consumer works
/// on borrowed views or clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceObject {
    id: ResourceId,
    api_version: String,
    doc: Json,
    origin: Origin,
}

impl ResourceObject {
    pub fn from_document(doc: Json, origin: Origin) -> Result<Self, ObjectError> {
        let map = doc.as_object().ok_or(ObjectError::NotAMap)?;
        let kind = map.get("kind").and_then(|v| v.as_str()).filter(|s| !s.is_empty()).ok_or(ObjectError::MissingKind)?;
        let meta = map.get("metadata");
        let name = meta
            .and_then(|m| m.get("name"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or(ObjectError::MissingName)?;
        let namespace = meta.and_then(|m| m.get("namespace")).and_then(|v| v.as_str()).filter(|s| !s.is_empty());
        let api_version = map.get("apiVersion").and_then(|v| v.as_str()).unwrap_or("v1").to_string();
        let id = ResourceId::new(kind, name, namespace);
        Ok(Self { id, api_version, doc, origin })
    }

    pub fn id(&self) -> &ResourceId { &self.id }
    pub fn kind(&self) -> &str { &self.id.kind }
    pub fn name(&self) -> &str { &self.id.name }
    pub fn namespace(&self) -> Option<&str> { self.id.namespace.as_deref() }
    pub fn api_version(&self) -> &str { &self.api_version }
    pub fn document(&self) -> &Json { &self.doc }
    pub fn origin(&self) -> &Origin { &self.origin }

    /// Split `apiVersion` into `(group, version)`; the core group is empty.
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.split_once('/') {
            Some((g, v)) => (g, v),
            None => ("", self.api_version.as_str()),
        }
    }

    /// Same identity and provenance with a different document.
    pub fn with_document(&self, doc: Json, origin: Origin) -> Self {
        Self { id: self.id.clone(), api_version: self.api_version.clone(), doc, origin }
    }
}
