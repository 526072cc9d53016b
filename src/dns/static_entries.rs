//! The static DNS overlay: a periodically-refetched document of records
//! that take precedence over geo-steered answers (ACME challenge TXT
//! records, fixed A/CNAME entries). Grounded on
//! `original_source/powerdns/config.go` (`loadStaticEntries`,
//! `startStaticEntriesUpdater`).

use super::types::{Record, StaticRecord};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

const REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);

pub struct StaticEntries {
    client: Client,
    url: String,
    entries: RwLock<HashMap<String, Vec<Record>>>,
}

impl StaticEntries {
    pub fn new(client: Client, url: String) -> Arc<Self> {
        Arc::new(Self {
            client,
            url,
            entries: RwLock::new(HashMap::new()),
        })
    }

    pub async fn lookup(&self, qname: &str) -> Vec<Record> {
        self.entries
            .read()
            .await
            .get(qname)
            .cloned()
            .unwrap_or_default()
    }

    /// Fetches the overlay document and, on success, atomically replaces
    /// the table. On failure the previous table is retained.
    pub async fn reload(&self) {
        let result = self.fetch().await;
        match result {
            Ok(table) => {
                let count = table.len();
                *self.entries.write().await = table;
                info!(domains = count, "static DNS overlay reloaded");
            }
            Err(e) => {
                warn!(error = %e, url = %self.url, "failed to reload static DNS overlay, retaining previous entries");
            }
        }
    }

    async fn fetch(&self) -> anyhow::Result<HashMap<String, Vec<Record>>> {
        let resp = self.client.get(&self.url).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("GET {} returned status {}", self.url, resp.status());
        }
        let raw: Vec<StaticRecord> = resp.json().await?;
        let mut table: HashMap<String, Vec<Record>> = HashMap::new();
        for mut entry in raw {
            entry.qname = entry.qname.trim_end_matches('.').to_ascii_lowercase();
            table.entry(entry.qname.clone()).or_default().push(entry.into());
        }
        Ok(table)
    }

    /// Runs `reload` once immediately, then every 15 minutes forever.
    pub async fn run(self: Arc<Self>) {
        self.reload().await;
        let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.reload().await;
        }
    }
}

/// Fetches the TXT content an ACME challenge record points at (the
/// record's `content` field is itself a URL, per
/// `original_source/powerdns/handlerLookup.go`'s `fetchACMEChallenge`).
pub async fn fetch_acme_challenge(client: &Client, url: &str) -> anyhow::Result<String> {
    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        anyhow::bail!("GET {url} returned status {}", resp.status());
    }
    let body = resp.text().await?;
    Ok(body.trim().to_string())
}
