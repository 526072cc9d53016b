//! Site check: ICMP echo against `member.ipv4`, grounded on
//! `original_source/ibpmonitor/checkping.go`. Parameters are configurable
//! via `ExtraOptions` (the kept Go snippet hardcodes Count=3/Timeout=2s;
//! this probe exposes count, interval, ttl, size and thresholds instead).

use super::{Probe, ProbeContext};
use crate::events::ProbeEvent;
use serde_json::json;
use std::net::IpAddr;
use std::time::Duration;

pub struct PingProbe;

fn default_count() -> u64 {
    30
}
fn default_interval_ms() -> u64 {
    100
}
fn default_ttl() -> u64 {
    255
}
fn default_size() -> u64 {
    32
}
fn default_max_packet_loss_pct() -> f64 {
    5.0
}
fn default_max_latency_ms() -> u64 {
    800
}
fn default_timeout_secs() -> u64 {
    10
}

#[async_trait::async_trait]
impl Probe for PingProbe {
    fn name(&self) -> &'static str {
        "ping"
    }

    async fn run(&self, ctx: &ProbeContext<'_>) -> Vec<ProbeEvent> {
        let count = ctx.options.extra_u64("PingCount", default_count());
        let interval_ms = ctx.options.extra_u64("PingInterval", default_interval_ms());
        let ttl = ctx.options.extra_u64("PingTTL", default_ttl()) as u8;
        let size = ctx.options.extra_u64("PingSize", default_size()) as usize;
        let max_packet_loss = ctx
            .options
            .extra_f64("MaxPacketLoss", default_max_packet_loss_pct());
        let max_latency_ms = ctx.options.extra_u64("MaxLatency", default_max_latency_ms());
        let timeout = Duration::from_secs(ctx.options.extra_u64("PingTimeout", default_timeout_secs()));

        let Ok(addr) = ctx.member.service.service_ipv4.parse::<IpAddr>() else {
            return vec![ProbeEvent::Site {
                check_name: self.name().to_string(),
                member_name: ctx.member_name.to_string(),
                success: false,
                error: Some(format!(
                    "invalid ipv4 address {:?}",
                    ctx.member.service.service_ipv4
                )),
                data: json!({}),
            }];
        };

        let payload = vec![0u8; size];
        let mut sent = 0u32;
        let mut received = 0u32;
        let mut total_rtt = Duration::ZERO;

        for _ in 0..count {
            sent += 1;
            match tokio::time::timeout(timeout, send_one_ping(addr, &payload, ttl)).await {
                Ok(Ok(rtt)) => {
                    received += 1;
                    total_rtt += rtt;
                }
                Ok(Err(_)) | Err(_) => {}
            }
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        }

        let packet_loss_pct = if sent == 0 {
            100.0
        } else {
            100.0 * (sent - received) as f64 / sent as f64
        };
        let avg_rtt = if received > 0 {
            total_rtt / received
        } else {
            Duration::ZERO
        };

        let success = packet_loss_pct <= max_packet_loss
            && avg_rtt.as_millis() as u64 <= max_latency_ms
            && avg_rtt > Duration::ZERO;

        let data = json!({
            "packetLoss": packet_loss_pct,
            "avgRttMs": avg_rtt.as_millis() as u64,
            "sent": sent,
            "received": received,
        });

        vec![ProbeEvent::Site {
            check_name: self.name().to_string(),
            member_name: ctx.member_name.to_string(),
            success,
            error: if success {
                None
            } else {
                Some(format!(
                    "packetLoss={packet_loss_pct:.1}% avgRtt={}ms",
                    avg_rtt.as_millis()
                ))
            },
            data,
        }]
    }
}

async fn send_one_ping(addr: IpAddr, payload: &[u8], ttl: u8) -> anyhow::Result<Duration> {
    let config = surge_ping::Config::builder().ttl(ttl as u32).build();
    let client = surge_ping::Client::new(&config)?;
    let mut pinger = client
        .pinger(addr, surge_ping::PingIdentifier(rand::random()))
        .await;
    let (_packet, rtt) = pinger
        .ping(surge_ping::PingSequence(0), payload)
        .await?;
    Ok(rtt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_requires_positive_rtt() {
        // A zero RTT (e.g. all pings lost, avg computed as zero) must never
        // be treated as success.
        let avg_rtt = Duration::ZERO;
        let packet_loss_pct = 0.0;
        let success =
            packet_loss_pct <= 5.0 && avg_rtt.as_millis() as u64 <= 800 && avg_rtt > Duration::ZERO;
        assert!(!success);
    }
}
