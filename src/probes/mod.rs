//! The `Probe` trait and its static registry, replacing the Go source's
//! `RegisterCheck`/`checks` global map in
//! `original_source/ibpmonitor/check.go` with an explicit trait object
//! registry built once at startup.

pub mod ping;
pub mod ssl;
pub mod wss;

use crate::config::CheckConfig;
use crate::domain::{Endpoint, MemberConfig};
use crate::events::ProbeEvent;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything a probe needs to examine a single member on a single tick.
pub struct ProbeContext<'a> {
    pub member_name: &'a str,
    pub member: &'a MemberConfig,
    /// `domain -> Endpoint`, restricted to this member's own endpoints.
    pub endpoints: &'a HashMap<String, Endpoint>,
    pub options: &'a CheckConfig,
}

#[async_trait]
pub trait Probe: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, ctx: &ProbeContext<'_>) -> Vec<ProbeEvent>;
}

pub type ProbeRegistry = HashMap<String, Arc<dyn Probe>>;

/// Builds the registry of built-in probes (ping, ssl, wss).
pub fn default_registry() -> ProbeRegistry {
    let mut registry: ProbeRegistry = HashMap::new();
    register(&mut registry, Arc::new(ping::PingProbe));
    register(&mut registry, Arc::new(ssl::SslProbe));
    register(&mut registry, Arc::new(wss::WssProbe));
    registry
}

pub fn register(registry: &mut ProbeRegistry, probe: Arc<dyn Probe>) {
    registry.insert(probe.name().to_string(), probe);
}
