//! Wire types for the PowerDNS remote-backend JSON protocol, grounded on
//! `original_source/powerdns/types.go`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub qtype: String,
    pub qname: String,
    pub content: String,
    pub ttl: i64,
    pub auth: bool,
    pub domain_id: i64,
}

/// A record loaded from the static DNS overlay — deserialized from the
/// same shape it is later served in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticRecord {
    pub qtype: String,
    pub qname: String,
    pub content: String,
    #[serde(default)]
    pub ttl: i64,
    #[serde(default)]
    pub auth: bool,
    #[serde(default, rename = "domain_id")]
    pub domain_id: i64,
}

impl From<StaticRecord> for Record {
    fn from(r: StaticRecord) -> Self {
        Record {
            qtype: r.qtype,
            qname: r.qname,
            content: r.content,
            ttl: r.ttl,
            auth: r.auth,
            domain_id: r.domain_id,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Parameters {
    #[serde(default)]
    pub local: String,
    #[serde(default)]
    pub qname: String,
    #[serde(default)]
    pub qtype: String,
    #[serde(rename = "real-remote", default)]
    pub real_remote: String,
    #[serde(default)]
    pub remote: String,
    #[serde(rename = "zone-id", default)]
    pub zone_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub parameters: Parameters,
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub result: serde_json::Value,
}

impl Response {
    pub fn new<T: Serialize>(result: T) -> Self {
        Self {
            result: serde_json::to_value(result).unwrap_or(serde_json::Value::Null),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DomainInfo {
    pub id: i64,
    pub zone: String,
    pub masters: Vec<String>,
    pub notified_serial: i64,
    pub serial: i64,
    pub last_check: i64,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DnsKeyEntry {
    pub id: i64,
    pub flags: i64,
    pub active: bool,
    pub published: bool,
    pub content: String,
}
