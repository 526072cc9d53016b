//! The four PowerDNS remote-backend methods, grounded on
//! `original_source/powerdns/handlerLookup.go`,
//! `handlerGetAllDomains.go`, `handlerGetDomainInfo.go` and
//! `handlerGetDomainKeys.go`.

use super::types::{DnsKeyEntry, DomainInfo, Parameters, Record, Response};
use super::DnsState;
use crate::geoip::haversine_distance_km;
use chrono::Utc;
use std::collections::HashSet;
use std::net::IpAddr;
use tracing::{info, warn};

/// Returned when geo-steering finds no healthy member for a domain —
/// `original_source/powerdns/handlerLookup.go`'s hardcoded fallback.
const FALLBACK_IPV4: &str = "192.96.202.175";

/// The registered domain's last two dot-separated labels, used for SOA
/// synthesis and `getAllDomains` — mirrors the Go source's inline
/// `strings.Join(parts[len(parts)-2:], ".")`.
fn top_level_domain(domain: &str) -> Option<String> {
    let parts: Vec<&str> = domain.split('.').collect();
    if parts.len() < 2 {
        return None;
    }
    Some(parts[parts.len() - 2..].join("."))
}

fn known_top_level_domains(domains: &[String]) -> HashSet<String> {
    domains.iter().filter_map(|d| top_level_domain(d)).collect()
}

pub async fn lookup(state: &DnsState, params: &Parameters) -> Response {
    let domain = params.qname.trim_end_matches('.').to_ascii_lowercase();
    info!(domain = %domain, qtype = %params.qtype, "dns lookup");

    if domain.starts_with("_acme-challenge.") {
        let acme_records = state.static_entries.lookup(&domain).await;
        if let Some(record) = acme_records.iter().find(|r| r.qtype == "TXT") {
            match super::static_entries::fetch_acme_challenge(&state.http_client, &record.content).await {
                Ok(content) => {
                    return Response::new(vec![Record {
                        qtype: "TXT".to_string(),
                        qname: domain,
                        content,
                        ttl: 0,
                        auth: true,
                        domain_id: params.zone_id,
                    }]);
                }
                Err(e) => warn!(error = %e, "failed to fetch ACME challenge content"),
            }
        }
    }

    let static_matches: Vec<Record> = state
        .static_entries
        .lookup(&domain)
        .await
        .into_iter()
        .filter(|r| r.qtype == params.qtype || params.qtype == "ANY")
        .collect();
    if !static_matches.is_empty() {
        return Response::new(static_matches);
    }

    let known_domains = state.health.domains();

    if params.qtype == "SOA" {
        if let Some(tld) = top_level_domain(&domain) {
            if known_top_level_domains(&known_domains).contains(&tld) {
                let now = Utc::now().timestamp();
                let content =
                    format!("dns-01.{tld}. hostmaster.{tld}. {now} 3600 600 1209600 3600");
                return Response::new(vec![Record {
                    qtype: "SOA".to_string(),
                    qname: tld,
                    content,
                    ttl: 3600,
                    auth: true,
                    domain_id: params.zone_id,
                }]);
            }
        }
    }

    if !known_domains.iter().any(|d| d == &domain) {
        return Response::new(Vec::<Record>::new());
    }

    let mut records = Vec::new();

    match params.remote.parse::<IpAddr>() {
        Ok(ip) => match state.geolocator.locate(ip) {
            Ok((lat, lon)) => {
                let eligible = state.health.eligible_members(&domain).await;
                let mut closest_ipv4: Option<&str> = None;
                let mut closest_ipv6: Option<&str> = None;
                let mut min_distance = f64::MAX;

                for member in &eligible {
                    let dist = haversine_distance_km(lat, lon, member.latitude, member.longitude);
                    if dist < min_distance {
                        min_distance = dist;
                        closest_ipv4 = (!member.ipv4.is_empty()).then_some(member.ipv4.as_str());
                        closest_ipv6 = (!member.ipv6.is_empty()).then_some(member.ipv6.as_str());
                    }
                }

                if params.qtype == "A" || params.qtype == "ANY" {
                    if let Some(ipv4) = closest_ipv4 {
                        records.push(Record {
                            qtype: "A".to_string(),
                            qname: domain.clone(),
                            content: ipv4.to_string(),
                            ttl: 30,
                            auth: true,
                            domain_id: params.zone_id,
                        });
                    }
                }
                if params.qtype == "AAAA" || params.qtype == "ANY" {
                    if let Some(ipv6) = closest_ipv6 {
                        records.push(Record {
                            qtype: "AAAA".to_string(),
                            qname: domain.clone(),
                            content: ipv6.to_string(),
                            ttl: 30,
                            auth: true,
                            domain_id: params.zone_id,
                        });
                    }
                }
            }
            Err(e) => warn!(error = %e, remote = %params.remote, "geoip lookup failed"),
        },
        Err(_) => warn!(remote = %params.remote, "invalid client IP in lookup request"),
    }

    if records.is_empty() && (params.qtype == "A" || params.qtype == "ANY") {
        info!(domain = %domain, "no healthy member found, returning fallback record");
        records.push(Record {
            qtype: "A".to_string(),
            qname: domain.clone(),
            content: FALLBACK_IPV4.to_string(),
            ttl: 30,
            auth: true,
            domain_id: params.zone_id,
        });
    }

    Response::new(records)
}

pub async fn get_all_domains(state: &DnsState) -> Response {
    let now = Utc::now().timestamp();
    let domains: Vec<DomainInfo> = known_top_level_domains(&state.health.domains())
        .into_iter()
        .map(|zone| DomainInfo {
            id: 0,
            zone,
            masters: Vec::new(),
            notified_serial: now,
            serial: now,
            last_check: now,
            kind: "NATIVE".to_string(),
        })
        .collect();
    Response::new(domains)
}

pub async fn get_domain_info(state: &DnsState, params: &Parameters) -> Response {
    let requested = params.qname.trim_end_matches('.');
    let now = Utc::now().timestamp();
    let found = state
        .health
        .domains()
        .into_iter()
        .find(|d| d.trim_end_matches('.') == requested);
    match found {
        Some(zone) => Response::new(DomainInfo {
            id: 0,
            zone,
            masters: Vec::new(),
            notified_serial: now,
            serial: now,
            last_check: now,
            kind: "NATIVE".to_string(),
        }),
        None => Response::new(serde_json::Value::Null),
    }
}

/// A fixed, non-secret demonstration public key, carried over verbatim
/// from `original_source/powerdns/handlerGetDomainKeys.go`.
const DNSKEY_PUBLIC_KEY: &str =
    "Ts7EglQbnyZDVklFGoiAnbB/DGzlJC4RBft7/wouiSxgQ9OB7sXD9yOkhyjhs5BzaOFs0LivpUwQZnYFkafAYA==";

pub async fn get_domain_keys(state: &DnsState, params: &Parameters) -> Response {
    let requested = params.qname.trim_end_matches('.');
    let found = state
        .health
        .domains()
        .into_iter()
        .find(|d| d.trim_end_matches('.') == requested);
    match found {
        Some(zone) => Response::new(vec![DnsKeyEntry {
            id: 3,
            flags: 257,
            active: true,
            published: true,
            content: format!("{zone} IN DNSKEY 257 3 13 {DNSKEY_PUBLIC_KEY}"),
        }]),
        None => Response::new(serde_json::Value::Null),
    }
}
