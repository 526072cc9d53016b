//! Core domain types shared by the registry loader, check engine and
//! resolver: members, services and the endpoints derived from them.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A participating operator, as loaded from the Members JSON registry.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberConfig {
    #[serde(default)]
    pub details: MemberDetails,
    pub membership: Membership,
    pub service: MemberServiceConfig,
    #[serde(rename = "ServiceAssignments", default)]
    pub service_assignments: HashMap<String, Vec<String>>,
    #[serde(rename = "Location")]
    pub location: Location,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemberDetails {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Website", default)]
    pub website: String,
    #[serde(rename = "Logo", default)]
    pub logo: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Membership {
    #[serde(rename = "MemberLevel")]
    pub member_level: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemberServiceConfig {
    #[serde(rename = "Active")]
    pub active: i64,
    #[serde(rename = "ServiceIPv4")]
    pub service_ipv4: String,
    #[serde(rename = "ServiceIPv6", default)]
    pub service_ipv6: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Location {
    #[serde(rename = "Latitude")]
    pub latitude: f64,
    #[serde(rename = "Longitude")]
    pub longitude: f64,
}

/// A named network offered by one or more providers, as loaded from the
/// Services JSON registry.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(rename = "Configuration")]
    pub configuration: ServiceConfiguration,
    #[serde(rename = "Providers", default)]
    pub providers: HashMap<String, ServiceProvider>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfiguration {
    #[serde(rename = "Active")]
    pub active: i64,
    #[serde(rename = "LevelRequired")]
    pub level_required: i64,
    #[serde(rename = "NetworkName")]
    pub network_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceProvider {
    #[serde(rename = "RpcUrls", default)]
    pub rpc_urls: Vec<String>,
}

/// A single `wss://`/`https://` URL exposed by a member, paired with the
/// service's expected chain name for application-layer validation.
#[derive(Debug, Clone, Serialize)]
pub struct OriginalUrl {
    pub url: String,
    pub network_name: String,
}

/// A `(domain, member, urls)` triple derived by the registry loader.
#[derive(Debug, Clone, Serialize)]
pub struct Endpoint {
    pub domain: String,
    pub member_name: String,
    pub original_urls: Vec<OriginalUrl>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MemberServices {
    pub ipv4s: HashSet<String>,
    pub ipv6s: HashSet<String>,
    pub services: HashSet<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceEndpointInfo {
    pub expected_network: String,
    pub urls: Vec<OriginalUrl>,
    pub domains: HashSet<String>,
}

/// Extracts the host component of a `wss://`/`https://` URL, i.e. the
/// substring after the scheme up to the first `/`.
pub fn extract_domain(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("wss://")
        .or_else(|| url.strip_prefix("https://"))?;
    let host = rest.split('/').next().unwrap_or(rest);
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_host_from_wss() {
        assert_eq!(
            extract_domain("wss://rpc.example.net/ws/v1"),
            Some("rpc.example.net".to_string())
        );
    }

    #[test]
    fn extracts_host_from_https() {
        assert_eq!(
            extract_domain("https://rpc.example.net"),
            Some("rpc.example.net".to_string())
        );
    }

    #[test]
    fn rejects_other_schemes() {
        assert_eq!(extract_domain("http://rpc.example.net"), None);
        assert_eq!(extract_domain("not-a-url"), None);
    }
}
