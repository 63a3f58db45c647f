//! Addressable locations inside nested documents.
//!
//! Lists of maps are addressed by an identity field (`name:web`) instead of an
//! ordinal, so reordering a list never shows up as a difference.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Serialize, Serializer};
use smallvec::SmallVec;

const ELEM_SEP: char = ',';
const ID_SEP: char = ':';
const WILDCARD: &str = "*";

/// One step of a [`Path`].
///
/// `AnyKey` and `AnyListId` are wildcards: they compare equal to any concrete
/// element of the same shape but hash as themselves.
#[derive(Debug, Clone)]
pub enum PathElem {
    Key(String),
    ListId { field: String, value: String },
    AnyKey,
    AnyListId { field: String },
}

impl PathElem {
    pub fn key(k: impl Into<String>) -> Self { PathElem::Key(k.into()) }

    pub fn list_id(field: impl Into<String>, value: impl Into<String>) -> Self {
        PathElem::ListId { field: field.into(), value: value.into() }
    }

    pub fn is_wildcard(&self) -> bool { matches!(self, PathElem::AnyKey | PathElem::AnyListId { .. }) }

    pub fn as_key(&self) -> Option<&str> {
        match self {
            PathElem::Key(k) => Some(k),
            _ => None,
        }
    }

    fn parse(part: &str) -> Self {
        if part == WILDCARD {
            return PathElem::AnyKey;
        }
        match part.split_once(ID_SEP) {
            Some((field, WILDCARD)) => PathElem::AnyListId { field: field.to_string() },
            Some((field, value)) => PathElem::list_id(field, value),
            None => PathElem::key(part),
        }
    }
}

impl PartialEq for PathElem {
    fn eq(&self, other: &Self) -> bool {
        use PathElem::*;
        match (self, other) {
            (Key(a), Key(b)) => a == b,
            (AnyKey, Key(_)) | (Key(_), AnyKey) | (AnyKey, AnyKey) => true,
            (ListId { field: f1, value: v1 }, ListId { field: f2, value: v2 }) => f1 == f2 && v1 == v2,
            (AnyListId { field: f1 }, ListId { field: f2, .. })
            | (ListId { field: f1, .. }, AnyListId { field: f2 })
            | (AnyListId { field: f1 }, AnyListId { field: f2 }) => f1 == f2,
            _ => false,
        }
    }
}

impl Eq for PathElem {}

// Hash deliberately ignores wildcard equality: `*` never collides with a concrete key.
impl Hash for PathElem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            PathElem::Key(k) => { 0u8.hash(state); k.hash(state); }
            PathElem::ListId { field, value } => { 1u8.hash(state); field.hash(state); value.hash(state); }
            PathElem::AnyKey => 2u8.hash(state),
            PathElem::AnyListId { field } => { 3u8.hash(state); field.hash(state); }
        }
    }
}

impl fmt::Display for PathElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElem::Key(k) => f.write_str(k),
            PathElem::ListId { field, value } => write!(f, "{}{}{}", field, ID_SEP, value),
            PathElem::AnyKey => f.write_str(WILDCARD),
            PathElem::AnyListId { field } => write!(f, "{}{}{}", field, ID_SEP, WILDCARD),
        }
    }
}

/// Ordered sequence of [`PathElem`]s, rendered as `spec,containers,name:web,image`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Path {
    elems: SmallVec<[PathElem; 8]>,
}

impl Path {
    pub fn root() -> Self { Self::default() }

    pub fn from_elems(elems: impl IntoIterator<Item = PathElem>) -> Self {
        Self { elems: elems.into_iter().collect() }
    }

    pub fn from_keys(keys: &[&str]) -> Self {
        Self::from_elems(keys.iter().map(|k| PathElem::parse(k)))
    }

    pub fn parse(s: &str) -> Self {
        if s.is_empty() {
            return Self::root();
        }
        Self::from_elems(s.split(ELEM_SEP).map(PathElem::parse))
    }

    pub fn len(&self) -> usize { self.elems.len() }
    pub fn is_empty(&self) -> bool { self.elems.is_empty() }
    pub fn iter(&self) -> std::slice::Iter<'_, PathElem> { self.elems.iter() }
    pub fn elems(&self) -> &[PathElem] { &self.elems }
    pub fn get(&self, idx: usize) -> Option<&PathElem> { self.elems.get(idx) }
    pub fn first(&self) -> Option<&PathElem> { self.elems.first() }
    pub fn last(&self) -> Option<&PathElem> { self.elems.last() }

    /// Key of the element at `idx`, if it is a map key.
    pub fn key_at(&self, idx: usize) -> Option<&str> { self.get(idx).and_then(|e| e.as_key()) }

    pub fn push(&self, elem: PathElem) -> Path {
        let mut elems = self.elems.clone();
        elems.push(elem);
        Path { elems }
    }

    pub fn join(&self, other: &Path) -> Path {
        let mut elems = self.elems.clone();
        elems.extend(other.elems.iter().cloned());
        Path { elems }
    }

    /// Elements `[start, end)`, clamped to the path length.
    pub fn slice(&self, start: usize, end: usize) -> Path {
        let end = end.min(self.len());
        let start = start.min(end);
        Path::from_elems(self.elems[start..end].iter().cloned())
    }

    /// True when `prefix` matches the leading elements of `self` (wildcards honoured).
    pub fn starts_with(&self, prefix: &Path) -> bool {
        prefix.len() <= self.len() && prefix.elems.iter().zip(self.elems.iter()).all(|(p, e)| p == e)
    }

    /// True when `other` is contained in `self`, i.e. `other` is a prefix of `self`.
    pub fn contains(&self, other: &Path) -> bool { self.starts_with(other) }

    pub fn has_wildcard(&self) -> bool { self.elems.iter().any(PathElem::is_wildcard) }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.elems.iter().enumerate() {
            if i > 0 { write!(f, "{}", ELEM_SEP)?; }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self { Path::parse(s) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn equality_and_parse() {
        let p1 = Path::from_keys(&["metadata", "name"]);
        let p2 = Path::from_keys(&["spec", "containers:nginx", "image"]);
        assert_eq!(p1, Path::parse("metadata,name"));
        assert_ne!(p2, Path::from_keys(&["spec", "containers:nginx", "ports"]));
        assert_eq!(p2.get(1), Some(&PathElem::list_id("containers", "nginx")));
        assert_eq!(p2.to_string(), "spec,containers:nginx,image");
    }

    #[test]
    fn containment_is_prefix_match() {
        let path = Path::from_keys(&["metadata", "managedFields", "other"]);
        let same = Path::parse("metadata,managedFields,other");
        assert!(same.contains(&path));
        assert!(path.contains(&same));
        assert!(same.contains(&path.slice(0, 2)));
        assert!(!same.contains(&path.slice(1, 2)));
        assert!(!same.slice(0, 2).contains(&path));
    }

    #[test]
    fn wildcards_match_same_shape_only() {
        let concrete = Path::parse("spec,containers,name:web,imagePullPolicy");
        assert_eq!(Path::parse("spec,containers,name:*,imagePullPolicy"), concrete);
        assert_eq!(Path::parse("spec,*,name:web,imagePullPolicy"), concrete);
        assert_ne!(Path::parse("spec,containers,image:*,imagePullPolicy"), concrete);
        assert_ne!(Path::parse("spec,containers,*,imagePullPolicy"), concrete);
        assert!(concrete.starts_with(&Path::parse("spec,*")));
    }

    #[test]
    fn wildcard_paths_hash_apart_from_concrete() {
        let concrete = Path::parse("spec,containers,name:web");
        let wild = Path::parse("spec,containers,name:*");
        assert_eq!(wild, concrete);

        let mut set = HashSet::new();
        set.insert(concrete.clone());
        set.insert(wild.clone());
        assert_eq!(set.len(), 2);

        let mut scanned: Vec<Path> = Vec::new();
        for p in [concrete, wild] {
            if !scanned.contains(&p) { scanned.push(p); }
        }
        assert_eq!(scanned.len(), 1);
    }

    #[test]
    fn join_push_and_slice() {
        let p = Path::parse("spec").join(&Path::parse("template,spec"));
        assert_eq!(p.to_string(), "spec,template,spec");
        let p = p.push(PathElem::list_id("name", "app"));
        assert_eq!(p.len(), 4);
        assert_eq!(p.slice(2, 99).to_string(), "spec,name:app");
        assert!(p.slice(5, 9).is_empty());
        assert_eq!(p.key_at(0), Some("spec"));
        assert_eq!(p.key_at(3), None);
    }

    #[test]
    fn serializes_as_string() {
        let p = Path::parse("spec,name:a,image");
        assert_eq!(serde_json::to_value(&p).unwrap(), serde_json::json!("spec,name:a,image"));
    }
}
