//! Component A: the Registry Loader.
//!
//! Periodically fetches the Members/Services JSON documents over HTTP and
//! derives the three indices the rest of the system consumes. On any
//! failure the previous snapshot is retained — grounded on
//! `original_source/powerdns/config.go`'s `loadStaticEntries`/
//! `updateStaticEntries` retain-on-error shape.

use crate::domain::{
    extract_domain, Endpoint, MemberConfig, MemberServices, OriginalUrl, ServiceConfig,
    ServiceEndpointInfo,
};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use tracing::{info, warn};

/// A single, internally-consistent view of the fleet topology.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub members: HashMap<String, MemberConfig>,
    pub services: HashMap<String, ServiceConfig>,
    /// `domain -> memberName -> Endpoint`
    pub endpoints: HashMap<String, HashMap<String, Endpoint>>,
    /// `memberName -> { ipv4s, ipv6s, services }`
    pub member_services: HashMap<String, MemberServices>,
    /// `serviceName -> memberName -> { expectedNetwork, urls, domains }`
    pub service_endpoints: HashMap<String, HashMap<String, ServiceEndpointInfo>>,
}

impl Topology {
    /// The set of unique endpoint hosts a member exposes, across every
    /// domain — used by the check wrapper to synthesize per-endpoint
    /// failure events on timeout/panic.
    pub fn member_endpoint_hosts(&self, member_name: &str) -> Vec<String> {
        let mut hosts: Vec<String> = self
            .endpoints
            .iter()
            .filter_map(|(domain, members)| {
                members.get(member_name).map(|_| domain.clone())
            })
            .collect();
        hosts.sort();
        hosts.dedup();
        hosts
    }

    /// `domain -> Endpoint` restricted to the endpoints a single member
    /// exposes, used by endpoint probes (ssl/wss) to know which hostnames
    /// and URLs to exercise for that member.
    pub fn endpoints_for_member(&self, member_name: &str) -> HashMap<String, Endpoint> {
        self.endpoints
            .iter()
            .filter_map(|(domain, members)| {
                members
                    .get(member_name)
                    .map(|ep| (domain.clone(), ep.clone()))
            })
            .collect()
    }
}

fn derive_topology(
    members: HashMap<String, MemberConfig>,
    services: HashMap<String, ServiceConfig>,
) -> Topology {
    let mut endpoints: HashMap<String, HashMap<String, Endpoint>> = HashMap::new();
    let mut member_services: HashMap<String, MemberServices> = HashMap::new();
    let mut service_endpoints: HashMap<String, HashMap<String, ServiceEndpointInfo>> =
        HashMap::new();

    for (member_name, member) in &members {
        if member.service.active != 1 {
            continue;
        }

        let ms_entry = member_services.entry(member_name.clone()).or_default();
        if !member.service.service_ipv4.is_empty() {
            ms_entry.ipv4s.insert(member.service.service_ipv4.clone());
        }
        if !member.service.service_ipv6.is_empty() {
            ms_entry.ipv6s.insert(member.service.service_ipv6.clone());
        }

        let assigned_services: Vec<&String> = member
            .service_assignments
            .values()
            .flatten()
            .collect();

        for service_name in assigned_services {
            let Some(service) = services.get(service_name) else {
                continue;
            };
            if service.configuration.active != 1 {
                continue;
            }
            if member.membership.member_level < service.configuration.level_required {
                continue;
            }

            member_services
                .get_mut(member_name)
                .unwrap()
                .services
                .insert(service_name.clone());

            for provider in service.providers.values() {
                for url in &provider.rpc_urls {
                    let Some(domain) = extract_domain(url) else {
                        continue;
                    };
                    let original = OriginalUrl {
                        url: url.clone(),
                        network_name: service.configuration.network_name.clone(),
                    };

                    let endpoint = endpoints
                        .entry(domain.clone())
                        .or_default()
                        .entry(member_name.clone())
                        .or_insert_with(|| Endpoint {
                            domain: domain.clone(),
                            member_name: member_name.clone(),
                            original_urls: Vec::new(),
                        });
                    if !endpoint.original_urls.iter().any(|u| u.url == original.url) {
                        endpoint.original_urls.push(original.clone());
                    }

                    let se = service_endpoints
                        .entry(service_name.clone())
                        .or_default()
                        .entry(member_name.clone())
                        .or_insert_with(|| ServiceEndpointInfo {
                            expected_network: service.configuration.network_name.clone(),
                            urls: Vec::new(),
                            domains: Default::default(),
                        });
                    if !se.urls.iter().any(|u| u.url == original.url) {
                        se.urls.push(original);
                    }
                    se.domains.insert(domain);
                }
            }
        }
    }

    Topology {
        members,
        services,
        endpoints,
        member_services,
        service_endpoints,
    }
}

async fn fetch_json<T: serde::de::DeserializeOwned>(client: &Client, url: &str) -> anyhow::Result<T> {
    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        anyhow::bail!("GET {url} returned status {}", resp.status());
    }
    let body = resp.json::<T>().await?;
    Ok(body)
}

/// Owns the current topology snapshot; replaced wholesale on each
/// successful reload, readers never see a torn mix.
pub struct Registry {
    client: Client,
    members_url: String,
    services_url: String,
    current: RwLock<Arc<Topology>>,
}

impl Registry {
    pub fn new(client: Client, members_url: String, services_url: String) -> Self {
        Self {
            client,
            members_url,
            services_url,
            current: RwLock::new(Arc::new(Topology::default())),
        }
    }

    pub fn snapshot(&self) -> Arc<Topology> {
        self.current.read().expect("registry lock poisoned").clone()
    }

    /// Fetches both documents and, on success, atomically swaps the
    /// topology. On any failure, logs and retains the previous snapshot.
    pub async fn reload(&self) {
        let members_result =
            fetch_json::<HashMap<String, MemberConfig>>(&self.client, &self.members_url).await;
        let members = match members_result {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, url = %self.members_url, "failed to fetch members registry, retaining previous snapshot");
                return;
            }
        };

        let services_result =
            fetch_json::<HashMap<String, ServiceConfig>>(&self.client, &self.services_url).await;
        let services = match services_result {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, url = %self.services_url, "failed to fetch services registry, retaining previous snapshot");
                return;
            }
        };

        let topology = derive_topology(members, services);
        info!(
            members = topology.members.len(),
            domains = topology.endpoints.len(),
            "registry reloaded"
        );
        *self.current.write().expect("registry lock poisoned") = Arc::new(topology);
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::*;
    use std::collections::{HashMap, HashSet};

    fn member(active: i64, level: i64, ipv4: &str, groups: &[(&str, &[&str])]) -> MemberConfig {
        let mut service_assignments = HashMap::new();
        for (group, names) in groups {
            service_assignments.insert(
                group.to_string(),
                names.iter().map(|s| s.to_string()).collect(),
            );
        }
        MemberConfig {
            details: MemberDetails::default(),
            membership: Membership { member_level: level },
            service: MemberServiceConfig {
                active,
                service_ipv4: ipv4.to_string(),
                service_ipv6: String::new(),
            },
            service_assignments,
            location: Location {
                latitude: 1.0,
                longitude: 2.0,
            },
        }
    }

    fn service(active: i64, level_required: i64, network: &str, urls: &[&str]) -> ServiceConfig {
        let mut providers = HashMap::new();
        providers.insert(
            "provider1".to_string(),
            ServiceProvider {
                rpc_urls: urls.iter().map(|s| s.to_string()).collect(),
            },
        );
        ServiceConfig {
            configuration: ServiceConfiguration {
                active,
                level_required,
                network_name: network.to_string(),
            },
            providers,
        }
    }

    #[test]
    fn derives_endpoints_for_active_eligible_member() {
        let mut members = HashMap::new();
        members.insert(
            "alice".to_string(),
            member(1, 3, "1.2.3.4", &[("polkadot", &["relay"])]),
        );
        let mut services = HashMap::new();
        services.insert(
            "relay".to_string(),
            service(1, 2, "Polkadot", &["wss://rpc.example.net/ws"]),
        );

        let topo = derive_topology(members, services);
        assert!(topo.endpoints.contains_key("rpc.example.net"));
        assert!(topo.endpoints["rpc.example.net"].contains_key("alice"));
        assert_eq!(
            topo.member_services["alice"].services,
            HashSet::from(["relay".to_string()])
        );
    }

    #[test]
    fn excludes_member_with_inactive_service_flag() {
        let mut members = HashMap::new();
        members.insert(
            "bob".to_string(),
            member(0, 3, "1.2.3.4", &[("polkadot", &["relay"])]),
        );
        let mut services = HashMap::new();
        services.insert(
            "relay".to_string(),
            service(1, 2, "Polkadot", &["wss://rpc.example.net/ws"]),
        );
        let topo = derive_topology(members, services);
        assert!(topo.endpoints.is_empty());
    }

    #[test]
    fn excludes_service_below_member_level() {
        let mut members = HashMap::new();
        members.insert(
            "carol".to_string(),
            member(1, 1, "1.2.3.4", &[("polkadot", &["relay"])]),
        );
        let mut services = HashMap::new();
        services.insert(
            "relay".to_string(),
            service(1, 3, "Polkadot", &["wss://rpc.example.net/ws"]),
        );
        let topo = derive_topology(members, services);
        assert!(topo.endpoints.is_empty());
    }

    #[test]
    fn excludes_inactive_service() {
        let mut members = HashMap::new();
        members.insert(
            "dave".to_string(),
            member(1, 5, "1.2.3.4", &[("polkadot", &["relay"])]),
        );
        let mut services = HashMap::new();
        services.insert(
            "relay".to_string(),
            service(0, 1, "Polkadot", &["wss://rpc.example.net/ws"]),
        );
        let topo = derive_topology(members, services);
        assert!(topo.endpoints.is_empty());
    }
}
