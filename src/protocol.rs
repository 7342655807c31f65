//! Socket protocol message types
//!
//! Defines the line-delimited JSON format for client-daemon communication.
//!
//! ```json
//! // Client -> Server
//! {"kind": "DisplayTypeError", "paths": ["/repo/a.py"]}
//! {"kind": "IncrementalUpdate", "paths": ["/repo/a.py"]}
//! {"SubscribeToTypeErrors": "editor_4711"}
//!
//! // Server -> Client
//! {"kind": "TypeErrors", "body": [...]}
//! {"kind": "Error", "body": "Invalid JSON: ..."}
//! {"name": "editor_4711", "body": {"kind": "TypeErrors", "body": [...]}}
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::schema::AnalysisError;

/// Analysis request from a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Request {
    /// Errors for the given paths, or every error when `paths` is empty
    DisplayTypeError {
        #[serde(default)]
        paths: Vec<PathBuf>,
    },
    /// Re-analyze after the given files changed
    IncrementalUpdate { paths: Vec<PathBuf> },
    /// Daemon status
    GetInfo,
    /// Persist the current environment and error table
    SaveState { path: PathBuf },
    /// Orderly shutdown
    Stop,
}

/// Request to open a named push subscription on this connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionRequest {
    #[serde(rename = "SubscribeToTypeErrors")]
    pub name: String,
}

/// A classified client line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    Subscription(SubscriptionRequest),
    Request(Request),
    /// Unusable input, with a diagnostic for the client
    Malformed(String),
}

/// Classify one protocol line.
///
/// The subscription schema is tried first, then the request schema.
pub fn parse_client_request(line: &str) -> ClientRequest {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => return ClientRequest::Malformed(format!("Invalid JSON: {}", e)),
    };

    if let Ok(subscription) = serde_json::from_value::<SubscriptionRequest>(value.clone()) {
        if subscription.name.is_empty() {
            return ClientRequest::Malformed("Subscription name must not be empty".to_string());
        }
        return ClientRequest::Subscription(subscription);
    }

    match serde_json::from_value::<Request>(value) {
        Ok(request) => ClientRequest::Request(request),
        Err(e) => ClientRequest::Malformed(format!("Unrecognized request: {}", e)),
    }
}

/// Daemon status returned by `GetInfo`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub version: String,
    pub pid: u32,
    pub socket_path: PathBuf,
    pub project_root: PathBuf,
    pub started_at: String,
    pub generation: u64,
    pub module_count: usize,
    pub error_count: usize,
    pub subscriptions: Vec<String>,
    pub bootstrap: String,
}

/// Response to a request, also the body of subscription pushes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body")]
pub enum Response {
    TypeErrors(Vec<AnalysisError>),
    Error(String),
    Info(ServerInfo),
    Ok,
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error(message.into())
    }

    /// Serialize as one newline-terminated protocol line
    pub fn to_line(&self) -> String {
        to_line(self)
    }
}

/// A push to one subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPush {
    pub name: String,
    pub body: Response,
}

impl SubscriptionPush {
    pub fn to_line(&self) -> String {
        to_line(self)
    }
}

fn to_line<T: Serialize>(message: &T) -> String {
    let mut line = serde_json::to_string(message).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to serialize protocol message");
        r#"{"kind":"Error","body":"internal serialization failure"}"#.to_string()
    });
    line.push('\n');
    line
}
