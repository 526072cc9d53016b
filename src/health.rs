//! Component D: the Health State Machine.
//!
//! Consumes aggregator batches and applies the hysteresis rule: a check
//! going unhealthy takes effect immediately, but a check recovering only
//! takes effect once `MinimumOfflineTime` has elapsed since it went down.
//! Maintains the authoritative per-domain,
//! per-member record the DNS resolver reads. Grounded on
//! `original_source/ibpmonitor/results.go` (`MonitorResults`,
//! `checkMemberStatus`) and consumed the way
//! `original_source/powerdns/handlerLookup.go` consumes member eligibility.

use crate::aggregator::{EndpointResults, SiteResults};
use crate::events::CheckKind;
use crate::matrix::Notifier;
use crate::registry::Topology;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offline_since: Option<DateTime<Utc>>,
}

/// The authoritative record the DNS resolver consults for one `(domain,
/// member)` pair.
#[derive(Debug, Clone, Serialize)]
pub struct MemberRecord {
    pub member_name: String,
    pub ipv4: String,
    pub ipv6: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "override")]
    pub override_: bool,
    /// Bare check name for site checks, `"<host>::<check>"` for endpoint
    /// checks scoped to this domain (DESIGN.md Open Question 1).
    pub results: HashMap<String, CheckResult>,
}

impl MemberRecord {
    fn new(member_name: &str, ipv4: &str, ipv6: &str, latitude: f64, longitude: f64) -> Self {
        Self {
            member_name: member_name.to_string(),
            ipv4: ipv4.to_string(),
            ipv6: ipv6.to_string(),
            latitude,
            longitude,
            override_: false,
            results: HashMap::new(),
        }
    }

    /// Eligible iff not administratively overridden out, has a parseable
    /// IPv4 address, and every check currently on record for this domain
    /// is passing.
    pub fn is_eligible(&self) -> bool {
        !self.override_
            && self.ipv4.parse::<Ipv4Addr>().is_ok()
            && self.results.values().all(|r| r.success)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DomainStatus {
    pub domain: String,
    pub members: Vec<MemberRecord>,
}

struct ParsedEvent {
    kind: CheckKind,
    member: String,
    key: String,
    success: bool,
    error: String,
    /// `Some(domain)` restricts the write to that one domain (endpoint
    /// checks); `None` means every domain the member currently serves
    /// (site checks).
    target_domain: Option<String>,
}

/// Owns every domain's member table plus the hysteresis bookkeeping
/// (`previous`/`current`, keyed uniformly per DESIGN.md Open Question 2)
/// needed to decide whether a recovering check has cleared
/// `MinimumOfflineTime`.
pub struct HealthState {
    minimum_offline_time: chrono::Duration,
    notifier: Arc<dyn Notifier>,
    domains: DashMap<String, RwLock<HashMap<String, MemberRecord>>>,
    member_domains: DashMap<String, HashSet<String>>,
    current: DashMap<(CheckKind, String, String), CheckResult>,
    previous: DashMap<(CheckKind, String, String), bool>,
    overrides: DashMap<String, bool>,
}

impl HealthState {
    pub fn new(minimum_offline_time: Duration, notifier: Arc<dyn Notifier>) -> Arc<Self> {
        Arc::new(Self {
            minimum_offline_time: chrono::Duration::from_std(minimum_offline_time)
                .unwrap_or_else(|_| chrono::Duration::zero()),
            notifier,
            domains: DashMap::new(),
            member_domains: DashMap::new(),
            current: DashMap::new(),
            previous: DashMap::new(),
            overrides: DashMap::new(),
        })
    }

    /// Ensures every `(domain, member)` pair the topology currently names
    /// has a record, refreshing address/location fields. Never removes a
    /// record for a member that drops out of a domain — a member that
    /// briefly disappears from the registry keeps its accumulated check
    /// history rather than starting eligibility from zero on return.
    pub async fn sync_topology(&self, topology: &Topology) {
        for (domain, members) in &topology.endpoints {
            let lock = self
                .domains
                .entry(domain.clone())
                .or_insert_with(|| RwLock::new(HashMap::new()));
            let mut guard = lock.write().await;
            for member_name in members.keys() {
                let Some(member) = topology.members.get(member_name) else {
                    continue;
                };
                let override_ = self.overrides.get(member_name).map(|v| *v).unwrap_or(false);
                self.member_domains
                    .entry(member_name.clone())
                    .or_default()
                    .insert(domain.clone());
                guard
                    .entry(member_name.clone())
                    .and_modify(|r| {
                        r.ipv4 = member.service.service_ipv4.clone();
                        r.ipv6 = member.service.service_ipv6.clone();
                        r.latitude = member.location.latitude;
                        r.longitude = member.location.longitude;
                        r.override_ = override_;
                    })
                    .or_insert_with(|| {
                        let mut rec = MemberRecord::new(
                            member_name,
                            &member.service.service_ipv4,
                            &member.service.service_ipv6,
                            member.location.latitude,
                            member.location.longitude,
                        );
                        rec.override_ = override_;
                        rec
                    });
            }
        }
    }

    /// Parses and applies one aggregator batch (`"<site-json>\n<endpoint-
    /// json>"`, per `aggregator::run_snapshotter`).
    pub async fn apply_batch(&self, batch: &str) {
        let Some((site_json, endpoint_json)) = batch.split_once('\n') else {
            warn!("malformed aggregator batch: missing newline separator");
            return;
        };

        let site: SiteResults = match serde_json::from_str(site_json) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to parse site results batch");
                return;
            }
        };
        let endpoint: EndpointResults = match serde_json::from_str(endpoint_json) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "failed to parse endpoint results batch");
                return;
            }
        };

        for (member, checks) in site.members {
            for (check_name, result) in checks {
                self.apply_one(ParsedEvent {
                    kind: CheckKind::Site,
                    member: member.clone(),
                    key: check_name,
                    success: result.success,
                    error: result.checkerror.unwrap_or_default(),
                    target_domain: None,
                })
                .await;
            }
        }

        for (host, members) in endpoint.endpoint {
            for (member, checks) in members {
                for (check_name, result) in checks {
                    self.apply_one(ParsedEvent {
                        kind: CheckKind::Endpoint,
                        member: member.clone(),
                        key: format!("{host}::{check_name}"),
                        success: result.success,
                        error: result.checkerror.unwrap_or_default(),
                        target_domain: Some(host.clone()),
                    })
                    .await;
                }
            }
        }
    }

    async fn apply_one(&self, ev: ParsedEvent) {
        let state_key = (ev.kind, ev.member.clone(), ev.key.clone());
        let prev = self.previous.get(&state_key).map(|v| *v).unwrap_or(false);
        let cur = self.current.get(&state_key).map(|v| v.clone());
        let now = Utc::now();

        let mut new_result = None;
        let mut notify_up = None;

        if ev.success != prev {
            if !ev.success {
                new_result = Some(CheckResult {
                    success: false,
                    error: ev.error.clone(),
                    offline_since: Some(now),
                });
                self.previous.insert(state_key.clone(), false);
                notify_up = Some(false);
            } else {
                match cur.as_ref().and_then(|c| c.offline_since) {
                    None => {
                        new_result = Some(CheckResult {
                            success: true,
                            error: String::new(),
                            offline_since: None,
                        });
                        self.previous.insert(state_key.clone(), true);
                    }
                    Some(offline_since) => {
                        if now - offline_since < self.minimum_offline_time {
                            // Recovered too recently — wait out the hysteresis margin.
                        } else {
                            new_result = Some(CheckResult {
                                success: true,
                                error: String::new(),
                                offline_since: None,
                            });
                            self.previous.insert(state_key.clone(), true);
                            notify_up = Some(true);
                        }
                    }
                }
            }
        } else if !ev.success {
            new_result = Some(CheckResult {
                success: false,
                error: ev.error.clone(),
                offline_since: Some(now),
            });
        }

        let Some(result) = new_result else {
            return;
        };
        self.current.insert(state_key, result.clone());

        let target_domains: Vec<String> = match &ev.target_domain {
            Some(d) => vec![d.clone()],
            None => self
                .member_domains
                .get(&ev.member)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default(),
        };
        for domain in target_domains {
            if let Some(lock) = self.domains.get(&domain) {
                let mut guard = lock.write().await;
                if let Some(record) = guard.get_mut(&ev.member) {
                    record.results.insert(ev.key.clone(), result.clone());
                }
            }
        }

        if let Some(up) = notify_up {
            if up {
                counter!("health_transitions_up_total").increment(1);
            } else {
                counter!("health_transitions_down_total").increment(1);
            }
            let overridden = self.overrides.get(&ev.member).map(|v| *v).unwrap_or(false);
            if !overridden {
                if up {
                    self.notifier.notify_up(&ev.member, &ev.key).await;
                } else {
                    self.notifier.notify_down(&ev.member, &ev.key).await;
                }
            }
        }
    }

    pub async fn is_eligible(&self, domain: &str, member: &str) -> bool {
        let Some(lock) = self.domains.get(domain) else {
            return false;
        };
        let guard = lock.read().await;
        guard.get(member).is_some_and(MemberRecord::is_eligible)
    }

    pub async fn eligible_members(&self, domain: &str) -> Vec<MemberRecord> {
        let Some(lock) = self.domains.get(domain) else {
            return Vec::new();
        };
        let guard = lock.read().await;
        guard
            .values()
            .filter(|r| r.is_eligible())
            .cloned()
            .collect()
    }

    /// Sets the administrative override for `member` across every domain
    /// it currently serves. Returns `false` if the member is unknown.
    pub async fn set_override(&self, member: &str, value: bool) -> bool {
        self.overrides.insert(member.to_string(), value);
        let Some(domains) = self.member_domains.get(member).map(|s| s.clone()) else {
            return false;
        };
        for domain in &domains {
            if let Some(lock) = self.domains.get(domain) {
                let mut guard = lock.write().await;
                if let Some(record) = guard.get_mut(member) {
                    record.override_ = value;
                }
            }
        }
        !domains.is_empty()
    }

    /// One record per known member, deduplicated across domains (whichever
    /// domain is visited last wins, mirroring `powerdns/api.go`'s
    /// `listMembers` map-overwrite semantics — this is a listing, not a
    /// merge).
    pub async fn list_members(&self) -> Vec<MemberRecord> {
        let mut out: HashMap<String, MemberRecord> = HashMap::new();
        for entry in self.domains.iter() {
            let guard = entry.value().read().await;
            for record in guard.values() {
                out.insert(record.member_name.clone(), record.clone());
            }
        }
        let mut out: Vec<MemberRecord> = out.into_values().collect();
        out.sort_by(|a, b| a.member_name.cmp(&b.member_name));
        out
    }

    pub async fn status(&self, member_filter: Option<&str>) -> Vec<DomainStatus> {
        let mut domain_names: Vec<String> = self.domains.iter().map(|e| e.key().clone()).collect();
        domain_names.sort();

        let mut out = Vec::with_capacity(domain_names.len());
        for domain in domain_names {
            let Some(lock) = self.domains.get(&domain) else {
                continue;
            };
            let guard = lock.read().await;
            let mut members: Vec<MemberRecord> = guard
                .values()
                .filter(|m| member_filter.is_none_or(|f| m.member_name == f))
                .cloned()
                .collect();
            members.sort_by(|a, b| a.member_name.cmp(&b.member_name));
            out.push(DomainStatus { domain, members });
        }
        out
    }

    pub fn domains(&self) -> Vec<String> {
        self.domains.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::NoopNotifier;

    fn state() -> Arc<HealthState> {
        HealthState::new(Duration::from_secs(300), Arc::new(NoopNotifier))
    }

    async fn seed_one_member(hs: &HealthState, domain: &str, member: &str) {
        hs.domains
            .entry(domain.to_string())
            .or_insert_with(|| RwLock::new(HashMap::new()));
        hs.member_domains
            .entry(member.to_string())
            .or_default()
            .insert(domain.to_string());
        let lock = hs.domains.get(domain).unwrap();
        lock.write()
            .await
            .insert(member.to_string(), MemberRecord::new(member, "1.2.3.4", "", 0.0, 0.0));
    }

    #[tokio::test]
    async fn down_transition_is_immediate() {
        let hs = state();
        seed_one_member(&hs, "rpc.example.net", "alice").await;
        hs.apply_one(ParsedEvent {
            kind: CheckKind::Site,
            member: "alice".into(),
            key: "ping".into(),
            success: false,
            error: "timeout".into(),
            target_domain: None,
        })
        .await;
        assert!(!hs.is_eligible("rpc.example.net", "alice").await);
    }

    #[tokio::test]
    async fn recovery_within_minimum_offline_time_is_skipped() {
        let hs = state();
        seed_one_member(&hs, "rpc.example.net", "alice").await;
        hs.apply_one(ParsedEvent {
            kind: CheckKind::Site,
            member: "alice".into(),
            key: "ping".into(),
            success: false,
            error: "timeout".into(),
            target_domain: None,
        })
        .await;
        hs.apply_one(ParsedEvent {
            kind: CheckKind::Site,
            member: "alice".into(),
            key: "ping".into(),
            success: true,
            error: String::new(),
            target_domain: None,
        })
        .await;
        // MinimumOfflineTime has not elapsed yet — must still be down.
        assert!(!hs.is_eligible("rpc.example.net", "alice").await);
    }

    #[tokio::test]
    async fn first_success_with_no_prior_failure_is_immediate() {
        let hs = state();
        seed_one_member(&hs, "rpc.example.net", "alice").await;
        hs.apply_one(ParsedEvent {
            kind: CheckKind::Site,
            member: "alice".into(),
            key: "ping".into(),
            success: true,
            error: String::new(),
            target_domain: None,
        })
        .await;
        assert!(hs.is_eligible("rpc.example.net", "alice").await);
    }

    #[tokio::test]
    async fn endpoint_event_only_touches_its_own_domain() {
        let hs = state();
        seed_one_member(&hs, "rpc-a.example.net", "alice").await;
        seed_one_member(&hs, "rpc-b.example.net", "alice").await;
        hs.apply_one(ParsedEvent {
            kind: CheckKind::Endpoint,
            member: "alice".into(),
            key: "rpc-a.example.net::ssl".into(),
            success: false,
            error: "expired".into(),
            target_domain: Some("rpc-a.example.net".into()),
        })
        .await;
        assert!(!hs.is_eligible("rpc-a.example.net", "alice").await);
        assert!(hs.is_eligible("rpc-b.example.net", "alice").await);
    }

    #[tokio::test]
    async fn override_forces_ineligible_regardless_of_checks() {
        let hs = state();
        seed_one_member(&hs, "rpc.example.net", "alice").await;
        assert!(hs.is_eligible("rpc.example.net", "alice").await);
        hs.set_override("alice", true).await;
        assert!(!hs.is_eligible("rpc.example.net", "alice").await);
        hs.set_override("alice", false).await;
        assert!(hs.is_eligible("rpc.example.net", "alice").await);
    }
}
