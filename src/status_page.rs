//! SUPPLEMENT: an operator-facing HTML status page. Reads the same
//! `HealthState::status` the admin API exposes as JSON, rendered
//! server-side as collapsible per-domain sections.

use crate::health::{DomainStatus, HealthState, MemberRecord};
use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::fmt::Write as _;
use std::sync::Arc;

#[derive(Clone)]
pub struct StatusPageState {
    pub health: Arc<HealthState>,
}

pub fn router(state: StatusPageState) -> Router {
    Router::new().route("/status", get(status_page)).with_state(state)
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    member: Option<String>,
}

async fn status_page(
    State(state): State<StatusPageState>,
    Query(query): Query<StatusQuery>,
) -> Html<String> {
    let domains = state.health.status(query.member.as_deref()).await;
    Html(render(&domains, query.member.as_deref()))
}

fn render(domains: &[DomainStatus], member_filter: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str("<!doctype html><html><head><meta charset=\"utf-8\">");
    out.push_str("<title>ibp-geodns status</title></head><body>");
    out.push_str("<h1>ibp-geodns status</h1>");

    out.push_str("<form method=\"get\"><label>Filter by member: ");
    write!(
        out,
        "<input type=\"text\" name=\"member\" value=\"{}\"></label> <button type=\"submit\">Filter</button></form>",
        escape(member_filter.unwrap_or(""))
    )
    .ok();

    for domain in domains {
        write!(
            out,
            "<details><summary>{} ({} members)</summary><table border=\"1\" cellpadding=\"4\">",
            escape(&domain.domain),
            domain.members.len()
        )
        .ok();
        out.push_str("<tr><th>member</th><th>ipv4</th><th>ipv6</th><th>eligible</th><th>override</th><th>checks</th></tr>");
        for member in &domain.members {
            render_member_row(&mut out, member);
        }
        out.push_str("</table></details>");
    }

    out.push_str("</body></html>");
    out
}

fn render_member_row(out: &mut String, member: &MemberRecord) {
    let mut checks = String::new();
    let mut keys: Vec<&String> = member.results.keys().collect();
    keys.sort();
    for key in keys {
        let result = &member.results[key];
        let marker = if result.success { "ok" } else { "FAIL" };
        write!(checks, "{}={} ", escape(key), marker).ok();
    }

    write!(
        out,
        "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
        escape(&member.member_name),
        escape(&member.ipv4),
        escape(&member.ipv6),
        if member.is_eligible() { "yes" } else { "no" },
        member.override_,
        escape(checks.trim()),
    )
    .ok();
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
