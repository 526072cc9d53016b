//! Startup configuration, loaded from a JSON or YAML file.
//!
//! Loading mirrors `load_config` (extension-sniffed
//! JSON/YAML, `anyhow::Context` on every fallible step).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatrixConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "HomeServerURL", default)]
    pub home_server_url: String,
    #[serde(rename = "Username", default)]
    pub username: String,
    #[serde(rename = "Password", default)]
    pub password: String,
    #[serde(rename = "RoomID", default)]
    pub room_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    Site,
    Endpoint,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckConfig {
    #[serde(rename = "Enabled", default = "default_enabled")]
    pub enabled: i64,
    #[serde(rename = "CheckType")]
    pub check_type: CheckType,
    /// Seconds.
    #[serde(rename = "Timeout")]
    pub timeout: u64,
    /// Seconds.
    #[serde(rename = "CheckInterval")]
    pub check_interval: u64,
    #[serde(rename = "ExtraOptions", default)]
    pub extra_options: HashMap<String, serde_json::Value>,
}

impl CheckConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled != 0
    }

    pub fn extra_u64(&self, key: &str, default: u64) -> u64 {
        self.extra_options
            .get(key)
            .and_then(|v| v.as_u64())
            .unwrap_or(default)
    }

    pub fn extra_f64(&self, key: &str, default: f64) -> f64 {
        self.extra_options
            .get(key)
            .and_then(|v| v.as_f64())
            .unwrap_or(default)
    }
}

fn default_enabled() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(rename = "ServerName", default)]
    pub server_name: String,
    #[serde(rename = "GeoliteDBPath")]
    pub geolite_db_path: String,
    #[serde(rename = "StaticDNSConfigUrl")]
    pub static_dns_config_url: String,
    #[serde(rename = "MembersConfigUrl")]
    pub members_config_url: String,
    #[serde(rename = "ServicesConfigUrl")]
    pub services_config_url: String,
    /// Seconds a member must have been failing before a success is allowed
    /// to restore eligibility.
    #[serde(rename = "MinimumOfflineTime")]
    pub minimum_offline_time: u64,
    #[serde(rename = "AuthKey", default)]
    pub auth_key: HashMap<String, String>,
    #[serde(rename = "Matrix", default)]
    pub matrix: Option<MatrixConfig>,
    #[serde(rename = "Checks")]
    pub checks: HashMap<String, CheckConfig>,

    /// Ambient additions not in the historical Go `:8080` constant: bind
    /// addresses for the three HTTP surfaces.
    #[serde(default = "default_dns_listen_addr")]
    pub dns_listen_addr: String,
    #[serde(default = "default_admin_listen_addr")]
    pub admin_listen_addr: String,
    #[serde(default = "default_registry_refresh_sec")]
    pub registry_refresh_sec: u64,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub json_logging: bool,
}

fn default_dns_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_admin_listen_addr() -> String {
    "0.0.0.0:8081".to_string()
}

fn default_registry_refresh_sec() -> u64 {
    300
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path_ref = path.as_ref();
    let bytes =
        fs::read(path_ref).with_context(|| format!("failed to read config file {:?}", path_ref))?;
    let ext = path_ref
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_else(|| "json".to_string());
    let cfg: Config = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_slice(&bytes).context("failed to parse YAML config")?,
        _ => serde_json::from_slice(&bytes).context("failed to parse JSON config")?,
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let json = r#"{
            "ServerName": "ibp-geodns",
            "GeoliteDBPath": "/geo/GeoLite2-City.mmdb",
            "StaticDNSConfigUrl": "https://example.com/static.json",
            "MembersConfigUrl": "https://example.com/members.json",
            "ServicesConfigUrl": "https://example.com/services.json",
            "MinimumOfflineTime": 300,
            "AuthKey": {"root": "secret"},
            "Checks": {
                "ping": {"Enabled": 1, "CheckType": "site", "Timeout": 10, "CheckInterval": 60, "ExtraOptions": {"MaxLatency": 800}}
            }
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.minimum_offline_time, 300);
        assert_eq!(cfg.checks["ping"].check_type, CheckType::Site);
        assert_eq!(cfg.checks["ping"].extra_u64("MaxLatency", 0), 800);
        assert_eq!(cfg.dns_listen_addr, "0.0.0.0:8080");
    }

    #[test]
    fn load_config_sniffs_yaml_extension() {
        let yaml = r#"
ServerName: ibp-geodns
GeoliteDBPath: /geo/GeoLite2-City.mmdb
StaticDNSConfigUrl: https://example.com/static.json
MembersConfigUrl: https://example.com/members.json
ServicesConfigUrl: https://example.com/services.json
MinimumOfflineTime: 300
Checks: {}
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, yaml).unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.server_name, "ibp-geodns");
        assert_eq!(cfg.admin_listen_addr, "0.0.0.0:8081");
    }

    #[test]
    fn load_config_fails_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        assert!(load_config(&path).is_err());
    }
}
