use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Classified reason of a failed cluster call, as reported by the API server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reason {
    NotFound,
    AlreadyExists,
    Conflict,
    Invalid,
    Forbidden,
    Unauthorized,
    Timeout,
    Unknown(String),
}

impl Reason {
    pub fn parse(s: &str) -> Self {
        match s {
            "NotFound" => Reason::NotFound,
            "AlreadyExists" => Reason::AlreadyExists,
            "Conflict" => Reason::Conflict,
            "Invalid" => Reason::Invalid,
            "Forbidden" => Reason::Forbidden,
            "Unauthorized" => Reason::Unauthorized,
            "Timeout" | "ServerTimeout" => Reason::Timeout,
            other => Reason::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Unknown(s) if s.is_empty() => f.write_str("Unknown"),
            Reason::Unknown(s) => f.write_str(s),
            other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCause {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub field: String,
}

/// Structured `details` block of a Kubernetes `Status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub causes: Vec<ErrorCause>,
}

/// Typed provider error: every failed cluster call is translated into this.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{reason} ({code}): {message}")]
pub struct ApiError {
    pub code: u16,
    pub status: String,
    pub reason: Reason,
    pub message: String,
    pub details: ErrorDetails,
}

#[derive(Deserialize)]
struct StatusBody {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: ErrorDetails,
}

static IMMUTABLE_FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Za-z][\w.\[\]\-]*): (?:Invalid value|Forbidden):").expect("static regex")
});

impl ApiError {
    pub fn new(code: u16, reason: Reason, message: impl Into<String>) -> Self {
        Self { code, status: "Failure".into(), reason, message: message.into(), details: ErrorDetails::default() }
    }

    pub fn not_found(message: impl Into<String>) -> Self { Self::new(404, Reason::NotFound, message) }

    pub fn already_exists(message: impl Into<String>) -> Self { Self::new(409, Reason::AlreadyExists, message) }

    /// Failure below the API layer (connection, serialization, ...).
    pub fn transport(message: impl Into<String>) -> Self { Self::new(0, Reason::Unknown(String::new()), message) }

    /// Parse a Kubernetes `Status` JSON body; falls back to `code` and the raw text.
    pub fn from_status_body(code: u16, body: &str) -> Self {
        match serde_json::from_str::<StatusBody>(body) {
            Ok(b) => Self {
                code: b.code.unwrap_or(code),
                status: b.status,
                reason: Reason::parse(&b.reason),
                message: b.message,
                details: b.details,
            },
            Err(_) => Self::new(code, Reason::Unknown(String::new()), body.trim()),
        }
    }

    pub fn from_kube(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => Self {
                code: resp.code,
                status: resp.status,
                reason: Reason::parse(&resp.reason),
                message: resp.message,
                details: ErrorDetails::default(),
            },
            other => Self::transport(other.to_string()),
        }
    }

    pub fn is_not_found(&self) -> bool { self.reason == Reason::NotFound }

    pub fn is_already_exists(&self) -> bool { self.reason == Reason::AlreadyExists }

    /// Create raced with a deletion of the previous instance that is still finishing.
    pub fn is_being_deleted(&self) -> bool { self.message.contains("object is being deleted") }

    pub fn is_immutable_field_violation(&self) -> bool {
        self.details.causes.iter().any(|c| c.message.contains("immutable"))
            || (matches!(self.reason, Reason::Invalid | Reason::Unknown(_)) && self.message.contains("immutable"))
    }

    /// Names of the fields the server refused to change in place.
    pub fn immutable_fields(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .details
            .causes
            .iter()
            .filter(|c| c.message.contains("immutable") && !c.field.is_empty())
            .map(|c| c.field.clone())
            .collect();
        if out.is_empty() {
            // No structured causes: each "immutable" belongs to the last "<field>: Invalid value:" before it.
            let mut start = 0usize;
            for (pos, _) in self.message.match_indices("immutable") {
                let chunk = &self.message[start..pos];
                if let Some(m) = IMMUTABLE_FIELD_RE.captures_iter(chunk).last() {
                    if let Some(f) = m.get(1) {
                        let field = f.as_str().to_string();
                        if !out.contains(&field) { out.push(field); }
                    }
                }
                start = pos;
            }
        }
        out
    }
}

impl From<kube::Error> for ApiError {
    fn from(err: kube::Error) -> Self { Self::from_kube(err) }
}
