//! Component B: the Check Engine.
//!
//! Runs one independent periodic ticker per enabled check; on each tick,
//! spawns one bounded, timeout-wrapped probe invocation per member,
//! staggered by ~100µs. Grounded on
//! `original_source/ibpmonitor/ibpmonitor.go` (`LaunchChecks`),
//! `original_source/ibpmonitor/check.go` (`performCheck`) and
//! `original_source/ibpmonitor/checkwrapper.go` (`CheckWrapper`).

use crate::config::{CheckConfig, CheckType};
use crate::domain::Endpoint;
use crate::events::ProbeEvent;
use crate::probes::{ProbeContext, ProbeRegistry};
use crate::registry::Registry;
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

const STAGGER: Duration = Duration::from_micros(100);

pub struct CheckEngine {
    probes: ProbeRegistry,
    registry: Arc<Registry>,
    checks: HashMap<String, CheckConfig>,
    outbound: mpsc::Sender<ProbeEvent>,
}

impl CheckEngine {
    pub fn new(
        probes: ProbeRegistry,
        registry: Arc<Registry>,
        checks: HashMap<String, CheckConfig>,
        outbound: mpsc::Sender<ProbeEvent>,
    ) -> Self {
        Self {
            probes,
            registry,
            checks,
            outbound,
        }
    }

    /// Starts one ticker task per enabled check and returns their join
    /// handles, so the caller can await/shut them down.
    pub fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for check_name in self.checks.keys().cloned().collect::<Vec<_>>() {
            let engine = self.clone();
            handles.push(tokio::spawn(async move {
                engine.run_ticker(check_name).await;
            }));
        }
        handles
    }

    async fn run_ticker(&self, check_name: String) {
        let Some(check_cfg) = self.checks.get(&check_name) else {
            return;
        };
        if !check_cfg.is_enabled() {
            return;
        }
        let Some(probe) = self.probes.get(&check_name).cloned() else {
            warn!(check = %check_name, "no probe registered for enabled check");
            return;
        };

        let mut ticker = tokio::time::interval(Duration::from_secs(check_cfg.check_interval.max(1)));
        loop {
            ticker.tick().await;
            self.perform_check(&check_name, probe.clone()).await;
        }
    }

    async fn perform_check(&self, check_name: &str, probe: Arc<dyn crate::probes::Probe>) {
        let topology = self.registry.snapshot();
        let Some(check_cfg) = self.checks.get(check_name).cloned() else {
            return;
        };
        let timeout = Duration::from_secs(check_cfg.timeout.max(1));

        for member_name in topology.members.keys().cloned().collect::<Vec<_>>() {
            let Some(member) = topology.members.get(&member_name).cloned() else {
                continue;
            };
            let endpoints: HashMap<String, Endpoint> =
                topology.endpoints_for_member(&member_name);
            let probe = probe.clone();
            let check_cfg = check_cfg.clone();
            let check_name = check_name.to_string();
            let outbound = self.outbound.clone();
            let endpoint_hosts = topology.member_endpoint_hosts(&member_name);
            let member_name_for_synth = member_name.clone();
            let check_type_for_synth = check_cfg.check_type;

            tokio::spawn(async move {
                let task = tokio::spawn(async move {
                    let ctx = ProbeContext {
                        member_name: &member_name,
                        member: &member,
                        endpoints: &endpoints,
                        options: &check_cfg,
                    };
                    probe.run(&ctx).await
                });

                let result = tokio::time::timeout(timeout, task).await;
                let events = match result {
                    Ok(Ok(events)) => events,
                    Ok(Err(join_err)) => {
                        let panic_msg = if join_err.is_panic() {
                            format!("{check_name} check panicked for member {member_name_for_synth}")
                        } else {
                            join_err.to_string()
                        };
                        error!(check = %check_name, error = %panic_msg, "probe task failed");
                        synthesize_failures(
                            &check_name,
                            &member_name_for_synth,
                            check_type_for_synth,
                            &endpoint_hosts,
                            &panic_msg,
                        )
                    }
                    Err(_elapsed) => {
                        let msg = format!(
                            "{check_name} check for member {member_name_for_synth} timed out"
                        );
                        warn!(check = %check_name, member = %member_name_for_synth, "probe timed out");
                        synthesize_failures(
                            &check_name,
                            &member_name_for_synth,
                            check_type_for_synth,
                            &endpoint_hosts,
                            &msg,
                        )
                    }
                };

                for event in events {
                    if event.success() {
                        counter!("probe_results_success_total").increment(1);
                    } else {
                        counter!("probe_results_failure_total").increment(1);
                    }
                    if outbound.send(event).await.is_err() {
                        break;
                    }
                }
            });
            tokio::time::sleep(STAGGER).await;
        }
    }
}

/// On timeout or panic, synthesizes one failure event: a single site event
/// for site checks, one endpoint event per endpoint host the member
/// exposes for endpoint checks, grounded on `CheckWrapper`'s
/// `isEndpointCheck` branch.
fn synthesize_failures(
    check_name: &str,
    member_name: &str,
    check_type: CheckType,
    endpoint_hosts: &[String],
    error_msg: &str,
) -> Vec<ProbeEvent> {
    match check_type {
        CheckType::Site => vec![ProbeEvent::Site {
            check_name: check_name.to_string(),
            member_name: member_name.to_string(),
            success: false,
            error: Some(error_msg.to_string()),
            data: serde_json::json!({}),
        }],
        CheckType::Endpoint => endpoint_hosts
            .iter()
            .map(|host| ProbeEvent::Endpoint {
                check_name: check_name.to_string(),
                member_name: member_name.to_string(),
                endpoint_host: host.clone(),
                success: false,
                error: Some(error_msg.to_string()),
                data: serde_json::json!({}),
            })
            .collect(),
    }
}
