//! Typed probe events, replacing the original's string-keyed map.

use serde::Serialize;
use serde_json::Value;

/// Which table a result belongs to: a property of the member as a whole,
/// or a property of a specific (member, domain) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CheckKind {
    Site,
    Endpoint,
}

/// One outcome of a single probe invocation.
#[derive(Debug, Clone)]
pub enum ProbeEvent {
    Site {
        check_name: String,
        member_name: String,
        success: bool,
        error: Option<String>,
        data: Value,
    },
    Endpoint {
        check_name: String,
        member_name: String,
        /// Host only — see DESIGN.md Open Question 1.
        endpoint_host: String,
        success: bool,
        error: Option<String>,
        data: Value,
    },
}

impl ProbeEvent {
    pub fn check_name(&self) -> &str {
        match self {
            ProbeEvent::Site { check_name, .. } => check_name,
            ProbeEvent::Endpoint { check_name, .. } => check_name,
        }
    }

    pub fn success(&self) -> bool {
        match self {
            ProbeEvent::Site { success, .. } => *success,
            ProbeEvent::Endpoint { success, .. } => *success,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ProbeEvent::Site { error, .. } => error.as_deref(),
            ProbeEvent::Endpoint { error, .. } => error.as_deref(),
        }
    }

    pub fn data(&self) -> &Value {
        match self {
            ProbeEvent::Site { data, .. } => data,
            ProbeEvent::Endpoint { data, .. } => data,
        }
    }
}
