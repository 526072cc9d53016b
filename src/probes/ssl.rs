//! Endpoint check: TLS handshake + leaf certificate expiry, grounded on
//! `original_source/ibpmonitor/checkssl.go`.

use super::{Probe, ProbeContext};
use crate::events::ProbeEvent;
use rustls_pki_types::ServerName;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;

pub struct SslProbe;

const MAX_INFLIGHT_PER_MEMBER: usize = 20;
const MIN_VALIDITY: chrono::Duration = chrono::Duration::days(5);

#[async_trait::async_trait]
impl Probe for SslProbe {
    fn name(&self) -> &'static str {
        "ssl"
    }

    async fn run(&self, ctx: &ProbeContext<'_>) -> Vec<ProbeEvent> {
        let hosts: HashSet<String> = ctx.endpoints.keys().cloned().collect();
        if hosts.is_empty() {
            return Vec::new();
        }

        let ipv4 = ctx.member.service.service_ipv4.clone();
        let semaphore = Arc::new(Semaphore::new(MAX_INFLIGHT_PER_MEMBER));
        let mut tasks = Vec::new();

        for host in hosts {
            let ipv4 = ipv4.clone();
            let sem = semaphore.clone();
            let member_name = ctx.member_name.to_string();
            let check_name = self.name().to_string();
            tasks.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.expect("semaphore closed");
                check_one_host(&check_name, &member_name, &ipv4, &host).await
            }));
            tokio::time::sleep(Duration::from_micros(100)).await;
        }

        let mut events = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(ev) => events.push(ev),
                Err(e) => tracing::warn!(error = %e, "ssl probe subtask panicked"),
            }
        }
        events
    }
}

async fn check_one_host(
    check_name: &str,
    member_name: &str,
    ipv4: &str,
    host: &str,
) -> ProbeEvent {
    match handshake_and_check_expiry(ipv4, host).await {
        Ok(days_until_expiry) => ProbeEvent::Endpoint {
            check_name: check_name.to_string(),
            member_name: member_name.to_string(),
            endpoint_host: host.to_string(),
            success: true,
            error: None,
            data: json!({ "daysUntilExpiry": days_until_expiry }),
        },
        Err(e) => ProbeEvent::Endpoint {
            check_name: check_name.to_string(),
            member_name: member_name.to_string(),
            endpoint_host: host.to_string(),
            success: false,
            error: Some(e.to_string()),
            data: json!({}),
        },
    }
}

fn root_store() -> rustls::RootCertStore {
    let mut store = rustls::RootCertStore::empty();
    store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    store
}

async fn handshake_and_check_expiry(ipv4: &str, hostname: &str) -> anyhow::Result<i64> {
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store())
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(config));

    let tcp = TcpStream::connect((ipv4, 443)).await?;
    let server_name = ServerName::try_from(hostname.to_string())?;
    let tls_stream = connector.connect(server_name, tcp).await?;

    let (_, session) = tls_stream.get_ref();
    let certs = session
        .peer_certificates()
        .ok_or_else(|| anyhow::anyhow!("no peer certificates presented"))?;
    let leaf = certs
        .first()
        .ok_or_else(|| anyhow::anyhow!("empty certificate chain"))?;

    let (_, parsed) = x509_parser::parse_x509_certificate(leaf.as_ref())?;
    let not_after = parsed.validity().not_after;
    let not_after_ts = not_after.timestamp();
    let not_after_dt = chrono::DateTime::from_timestamp(not_after_ts, 0)
        .ok_or_else(|| anyhow::anyhow!("certificate notAfter out of range"))?;

    let now = chrono::Utc::now();
    if not_after_dt < now + MIN_VALIDITY {
        anyhow::bail!("certificate for {hostname} expires at {not_after_dt} (< 5 day margin)");
    }

    Ok((not_after_dt - now).num_days())
}
