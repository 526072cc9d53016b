use ibp_geodns::dns::static_entries::StaticEntries;
use ibp_geodns::dns::types::Parameters;
use ibp_geodns::dns::{handlers, DnsState};
use ibp_geodns::geoip::GeoLocator;
use ibp_geodns::health::HealthState;
use ibp_geodns::matrix::NoopNotifier;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

struct FixedGeoLocator(f64, f64);

impl GeoLocator for FixedGeoLocator {
    fn locate(&self, _ip: IpAddr) -> anyhow::Result<(f64, f64)> {
        Ok((self.0, self.1))
    }
}

fn params(qname: &str, qtype: &str, remote: &str) -> Parameters {
    Parameters {
        local: String::new(),
        qname: qname.to_string(),
        qtype: qtype.to_string(),
        real_remote: remote.to_string(),
        remote: remote.to_string(),
        zone_id: 1,
        name: String::new(),
        kind: String::new(),
    }
}

async fn state_with(geo: (f64, f64)) -> DnsState {
    let health = HealthState::new(Duration::from_secs(300), Arc::new(NoopNotifier));
    let http_client = reqwest::Client::new();
    let static_entries = StaticEntries::new(http_client.clone(), "http://unused.invalid/".to_string());
    DnsState {
        health,
        static_entries,
        geolocator: Arc::new(FixedGeoLocator(geo.0, geo.1)),
        http_client,
    }
}

#[tokio::test]
async fn lookup_returns_fallback_ip_when_no_member_is_eligible() {
    let state = state_with((51.5, -0.1)).await;
    // No domain/member has been registered at all.
    let resp = handlers::lookup(&state, &params("rpc.example.net", "A", "1.2.3.4")).await;
    // An entirely unknown domain returns an empty result, never the fallback.
    assert_eq!(resp.result, serde_json::json!([]));
}

#[tokio::test]
async fn lookup_picks_the_geographically_closest_eligible_member() {
    let state = state_with((51.5, -0.1)).await; // client near London
    seed_member(&state.health, "rpc.example.net", "london-member", "10.0.0.1", 51.5, -0.1).await;
    seed_member(&state.health, "rpc.example.net", "ny-member", "10.0.0.2", 40.7, -74.0).await;

    let resp = handlers::lookup(&state, &params("rpc.example.net", "A", "1.2.3.4")).await;
    let records = resp.result.as_array().expect("array result");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["content"], "10.0.0.1");
}

#[tokio::test]
async fn lookup_falls_back_when_the_closest_member_is_unhealthy() {
    let state = state_with((51.5, -0.1)).await;
    seed_member(&state.health, "rpc.example.net", "london-member", "10.0.0.1", 51.5, -0.1).await;
    state.health.set_override("london-member", true).await;

    let resp = handlers::lookup(&state, &params("rpc.example.net", "A", "1.2.3.4")).await;
    let records = resp.result.as_array().expect("array result");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["content"], "192.96.202.175");
}

#[tokio::test]
async fn get_domain_info_reports_unknown_domains_as_null() {
    let state = state_with((0.0, 0.0)).await;
    let resp = handlers::get_domain_info(&state, &params("nope.example.net", "SOA", "")).await;
    assert!(resp.result.is_null());
}

/// Registers one domain/member pair directly against the health state, as
/// `App::run`'s `sync_topology` call would from a real registry snapshot.
async fn seed_member(
    health: &HealthState,
    domain: &str,
    member: &str,
    ipv4: &str,
    lat: f64,
    lon: f64,
) {
    use ibp_geodns::domain::{
        Location, MemberConfig, MemberDetails, MemberServiceConfig, Membership,
    };
    use ibp_geodns::registry::Topology;
    use std::collections::HashMap;

    let mut members = HashMap::new();
    members.insert(
        member.to_string(),
        MemberConfig {
            details: MemberDetails::default(),
            membership: Membership { member_level: 1 },
            service: MemberServiceConfig {
                active: 1,
                service_ipv4: ipv4.to_string(),
                service_ipv6: String::new(),
            },
            service_assignments: HashMap::new(),
            location: Location {
                latitude: lat,
                longitude: lon,
            },
        },
    );
    let mut endpoint_members = HashMap::new();
    endpoint_members.insert(
        member.to_string(),
        ibp_geodns::domain::Endpoint {
            domain: domain.to_string(),
            member_name: member.to_string(),
            original_urls: Vec::new(),
        },
    );
    let mut endpoints = HashMap::new();
    endpoints.insert(domain.to_string(), endpoint_members);

    let topology = Topology {
        members,
        services: HashMap::new(),
        endpoints,
        member_services: HashMap::new(),
        service_endpoints: HashMap::new(),
    };
    health.sync_topology(&topology).await;
}
