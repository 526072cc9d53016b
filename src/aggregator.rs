//! Component C: the Result Aggregator.
//!
//! Consumes probe events from a single inbound channel and periodically
//! (every 1s) emits a consolidated batch — a site snapshot and an endpoint
//! snapshot, newline-joined into one string. Grounded on
//! `original_source/ibpmonitor/results.go` (`MonitorResults`,
//! `processResult`, `sendBatchedResults`), restructured into typed tables
//! instead of the original's `map[string]interface{}`.

use crate::events::ProbeEvent;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteCheckResult {
    pub checkname: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkerror: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub checkdata: Value,
}

pub type EndpointCheckResult = SiteCheckResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteResults {
    pub resulttype: String,
    /// `member -> check -> result`
    pub members: HashMap<String, HashMap<String, SiteCheckResult>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointResults {
    pub resulttype: String,
    /// `host -> member -> check -> result`
    pub endpoint: HashMap<String, HashMap<String, HashMap<String, EndpointCheckResult>>>,
}

fn to_result(event: &ProbeEvent) -> SiteCheckResult {
    SiteCheckResult {
        checkname: event.check_name().to_string(),
        success: event.success(),
        checkerror: event.error().map(str::to_string),
        checkdata: event.data().clone(),
    }
}

/// Per-member fine-grained state, protected by `dashmap` rather than the
/// Go source's single coarse `sync.Mutex`.
pub struct Aggregator {
    /// `member -> check -> event`
    site_checks: DashMap<String, DashMap<String, ProbeEvent>>,
    /// `member -> host -> check -> event`
    endpoint_checks: DashMap<String, DashMap<String, DashMap<String, ProbeEvent>>>,
    outbound: mpsc::Sender<String>,
}

impl Aggregator {
    pub fn new(outbound: mpsc::Sender<String>) -> Arc<Self> {
        Arc::new(Self {
            site_checks: DashMap::new(),
            endpoint_checks: DashMap::new(),
            outbound,
        })
    }

    fn process_event(&self, event: ProbeEvent) {
        match &event {
            ProbeEvent::Site { member_name, check_name, .. } => {
                let member_table = self
                    .site_checks
                    .entry(member_name.clone())
                    .or_insert_with(DashMap::new);
                member_table.insert(check_name.clone(), event);
            }
            ProbeEvent::Endpoint {
                member_name,
                endpoint_host,
                check_name,
                ..
            } => {
                let member_table = self
                    .endpoint_checks
                    .entry(member_name.clone())
                    .or_insert_with(DashMap::new);
                let host_table = member_table
                    .entry(endpoint_host.clone())
                    .or_insert_with(DashMap::new);
                host_table.insert(check_name.clone(), event);
            }
        }
    }

    /// Copy-under-lock, build-after-unlock: iterating a `DashMap` takes a
    /// shard lock per bucket visited, never the whole map, so this never
    /// blocks `process_event` for the duration of serialization.
    fn snapshot(&self) -> (SiteResults, EndpointResults) {
        let mut members = HashMap::new();
        for entry in self.site_checks.iter() {
            let member_name = entry.key().clone();
            let checks: HashMap<String, SiteCheckResult> = entry
                .value()
                .iter()
                .map(|c| (c.key().clone(), to_result(c.value())))
                .collect();
            members.insert(member_name, checks);
        }

        let mut endpoint = HashMap::new();
        for member_entry in self.endpoint_checks.iter() {
            let member_name = member_entry.key().clone();
            for host_entry in member_entry.value().iter() {
                let host = host_entry.key().clone();
                let checks: HashMap<String, EndpointCheckResult> = host_entry
                    .value()
                    .iter()
                    .map(|c| (c.key().clone(), to_result(c.value())))
                    .collect();
                endpoint
                    .entry(host)
                    .or_insert_with(HashMap::new)
                    .insert(member_name.clone(), checks);
            }
        }

        (
            SiteResults {
                resulttype: "site".to_string(),
                members,
            },
            EndpointResults {
                resulttype: "endpoint".to_string(),
                endpoint,
            },
        )
    }

    /// Runs the inbound event consumer forever.
    pub async fn run_consumer(self: Arc<Self>, mut inbound: mpsc::Receiver<ProbeEvent>) {
        while let Some(event) = inbound.recv().await {
            self.process_event(event);
        }
    }

    /// Runs the 1s snapshot cadence forever. Overflow on the outbound
    /// channel drops the batch with a warning — the next batch is a
    /// complete replacement.
    pub async fn run_snapshotter(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(SNAPSHOT_INTERVAL);
        loop {
            ticker.tick().await;
            let (site, endpoint) = self.snapshot();
            let Ok(site_json) = serde_json::to_string(&site) else {
                warn!("failed to serialize site snapshot");
                continue;
            };
            let Ok(endpoint_json) = serde_json::to_string(&endpoint) else {
                warn!("failed to serialize endpoint snapshot");
                continue;
            };
            let batch = format!("{site_json}\n{endpoint_json}");
            if let Err(e) = self.outbound.try_send(batch) {
                warn!(error = %e, "aggregator outbound channel full, dropping batch");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn site_event_is_visible_in_next_snapshot() {
        let (tx, _rx) = mpsc::channel(4);
        let agg = Aggregator::new(tx);
        agg.process_event(ProbeEvent::Site {
            check_name: "ping".into(),
            member_name: "alice".into(),
            success: true,
            error: None,
            data: json!({}),
        });
        let (site, _endpoint) = agg.snapshot();
        assert!(site.members["alice"]["ping"].success);
    }

    #[tokio::test]
    async fn endpoint_event_is_scoped_by_host_and_member() {
        let (tx, _rx) = mpsc::channel(4);
        let agg = Aggregator::new(tx);
        agg.process_event(ProbeEvent::Endpoint {
            check_name: "ssl".into(),
            member_name: "alice".into(),
            endpoint_host: "rpc1.example.net".into(),
            success: false,
            error: Some("expired".into()),
            data: json!({}),
        });
        let (_site, endpoint) = agg.snapshot();
        let result = &endpoint.endpoint["rpc1.example.net"]["alice"]["ssl"];
        assert!(!result.success);
        assert_eq!(result.checkerror.as_deref(), Some("expired"));
    }
}
