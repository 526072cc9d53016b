//! The administrative API: override a member's eligibility, list members,
//! inspect status. Grounded on `original_source/powerdns/api.go`.

use crate::dns::types::Response;
use crate::health::HealthState;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct AdminState {
    pub health: Arc<HealthState>,
    /// Per-member tokens plus the `"root"` override token — any match
    /// authorizes the request.
    pub auth_key: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ApiRequest {
    method: String,
    #[serde(default)]
    details: String,
    #[serde(default)]
    authkey: String,
}

pub fn router(state: AdminState) -> Router {
    Router::new().route("/api", post(admin_handler)).with_state(state)
}

async fn admin_handler(State(state): State<AdminState>, Json(req): Json<ApiRequest>) -> Json<Response> {
    let result = match req.method.as_str() {
        "enableMember" | "disableMember" => {
            if !is_authorized(&state.auth_key, &req.details, &req.authkey) {
                Response::new("Unauthorized access")
            } else {
                let disable = req.method == "disableMember";
                let found = state.health.set_override(&req.details, disable).await;
                Response::new(if found { 1 } else { 0 })
            }
        }
        "listMembers" => Response::new(state.health.list_members().await),
        "status" => {
            let filter = (!req.details.is_empty()).then_some(req.details.as_str());
            Response::new(state.health.status(filter).await)
        }
        other => {
            warn!(method = %other, "unsupported admin method");
            Response::new(serde_json::Value::Null)
        }
    };
    Json(result)
}

/// Authorized iff `authkey` equals the token registered specifically for
/// `member`, or the `"root"` token.
fn is_authorized(auth_key: &HashMap<String, String>, member: &str, authkey: &str) -> bool {
    if authkey.is_empty() {
        return false;
    }
    auth_key.get(member).is_some_and(|k| k == authkey)
        || auth_key.get("root").is_some_and(|k| k == authkey)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_specific_token_authorizes() {
        let mut auth = HashMap::new();
        auth.insert("alice".to_string(), "alice-token".to_string());
        assert!(is_authorized(&auth, "alice", "alice-token"));
        assert!(!is_authorized(&auth, "alice", "wrong"));
    }

    #[test]
    fn root_token_authorizes_any_member() {
        let mut auth = HashMap::new();
        auth.insert("root".to_string(), "root-token".to_string());
        assert!(is_authorized(&auth, "bob", "root-token"));
    }

    #[test]
    fn empty_authkey_never_authorizes() {
        let mut auth = HashMap::new();
        auth.insert("root".to_string(), String::new());
        assert!(!is_authorized(&auth, "bob", ""));
    }

    #[tokio::test]
    async fn status_narrows_to_the_requested_member() {
        let health = HealthState::new(std::time::Duration::from_secs(300), Arc::new(crate::matrix::NoopNotifier));
        let mut topology = crate::registry::Topology::default();
        let mut members = HashMap::new();
        members.insert(
            "alice".to_string(),
            crate::domain::MemberConfig {
                details: crate::domain::MemberDetails::default(),
                membership: crate::domain::Membership { member_level: 1 },
                service: crate::domain::MemberServiceConfig {
                    active: 1,
                    service_ipv4: "1.2.3.4".to_string(),
                    service_ipv6: String::new(),
                },
                service_assignments: HashMap::new(),
                location: crate::domain::Location { latitude: 0.0, longitude: 0.0 },
            },
        );
        members.insert(
            "bob".to_string(),
            crate::domain::MemberConfig {
                details: crate::domain::MemberDetails::default(),
                membership: crate::domain::Membership { member_level: 1 },
                service: crate::domain::MemberServiceConfig {
                    active: 1,
                    service_ipv4: "5.6.7.8".to_string(),
                    service_ipv6: String::new(),
                },
                service_assignments: HashMap::new(),
                location: crate::domain::Location { latitude: 0.0, longitude: 0.0 },
            },
        );
        let mut domain_members = HashMap::new();
        domain_members.insert(
            "alice".to_string(),
            crate::domain::Endpoint {
                domain: "rpc.example.net".to_string(),
                member_name: "alice".to_string(),
                original_urls: Vec::new(),
            },
        );
        domain_members.insert(
            "bob".to_string(),
            crate::domain::Endpoint {
                domain: "rpc.example.net".to_string(),
                member_name: "bob".to_string(),
                original_urls: Vec::new(),
            },
        );
        topology.members = members;
        topology.endpoints.insert("rpc.example.net".to_string(), domain_members);
        health.sync_topology(&topology).await;

        let admin_state = AdminState {
            health: health.clone(),
            auth_key: HashMap::new(),
        };
        let req = ApiRequest {
            method: "status".to_string(),
            details: "alice".to_string(),
            authkey: String::new(),
        };
        let Json(resp) = admin_handler(State(admin_state), Json(req)).await;
        let domains = resp.result.as_array().expect("array result");
        assert_eq!(domains.len(), 1);
        let members = domains[0]["members"].as_array().expect("members array");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0]["member_name"], "alice");
    }
}
