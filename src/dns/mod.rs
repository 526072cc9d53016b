//! Component E: the DNS backend — the PowerDNS remote/pipe-over-HTTP
//! protocol, grounded on `original_source/powerdns/handler.go` and
//! `powerdns.go`.

pub mod handlers;
pub mod static_entries;
pub mod types;

use crate::geoip::GeoLocator;
use crate::health::HealthState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use reqwest::Client;
use std::sync::Arc;
use tracing::warn;
use types::Request;

#[derive(Clone)]
pub struct DnsState {
    pub health: Arc<HealthState>,
    pub static_entries: Arc<static_entries::StaticEntries>,
    pub geolocator: Arc<dyn GeoLocator>,
    pub http_client: Client,
}

pub fn router(state: DnsState) -> Router {
    Router::new().route("/dns", post(dns_handler)).with_state(state)
}

async fn dns_handler(State(state): State<DnsState>, Json(req): Json<Request>) -> impl IntoResponse {
    match req.method.as_str() {
        "lookup" => Json(handlers::lookup(&state, &req.parameters).await).into_response(),
        "getAllDomains" => Json(handlers::get_all_domains(&state).await).into_response(),
        "getDomainInfo" => Json(handlers::get_domain_info(&state, &req.parameters).await).into_response(),
        "getDomainKeys" => Json(handlers::get_domain_keys(&state, &req.parameters).await).into_response(),
        other => {
            warn!(method = %other, "unsupported dns method");
            (StatusCode::NOT_IMPLEMENTED, "Method not supported").into_response()
        }
    }
}
