//! Wires the five components together and owns their lifecycle —
//! `new` builds everything from `Config`, `run` drives it until a shutdown
//! signal arrives. Replaces the Go source's package-level globals
//! (`powerDNSConfigs`, `geoIPReader`, `staticEntries`) with explicit,
//! injectable state.

use crate::admin::{self, AdminState};
use crate::aggregator::Aggregator;
use crate::config::Config;
use crate::dns::{self, static_entries::StaticEntries, DnsState};
use crate::engine::CheckEngine;
use crate::geoip::{GeoLocator, MaxMindGeoLocator};
use crate::health::HealthState;
use crate::matrix::{MatrixNotifier, NoopNotifier, Notifier};
use crate::probes::default_registry;
use crate::registry::Registry;
use crate::status_page::{self, StatusPageState};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub struct App {
    config: Config,
    http_client: Client,
    registry: Arc<Registry>,
    health: Arc<HealthState>,
    static_entries: Arc<StaticEntries>,
    geolocator: Arc<dyn GeoLocator>,
}

impl App {
    pub fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let http_client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        let registry = Arc::new(Registry::new(
            http_client.clone(),
            config.members_config_url.clone(),
            config.services_config_url.clone(),
        ));

        let notifier: Arc<dyn Notifier> = match &config.matrix {
            Some(m) if m.enabled => Arc::new(MatrixNotifier::new(http_client.clone(), m.clone())),
            _ => Arc::new(NoopNotifier),
        };
        let health = HealthState::new(Duration::from_secs(config.minimum_offline_time), notifier);

        let static_entries = StaticEntries::new(http_client.clone(), config.static_dns_config_url.clone());
        let geolocator: Arc<dyn GeoLocator> = Arc::new(MaxMindGeoLocator::open(&config.geolite_db_path)?);

        Ok(Arc::new(Self {
            config,
            http_client,
            registry,
            health,
            static_entries,
            geolocator,
        }))
    }

    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        self.registry.reload().await;
        self.health.sync_topology(&self.registry.snapshot()).await;

        let (probe_tx, probe_rx) = tokio::sync::mpsc::channel(1024);
        let (batch_tx, mut batch_rx) = tokio::sync::mpsc::channel(64);

        let aggregator = Aggregator::new(batch_tx);
        let engine = Arc::new(CheckEngine::new(
            default_registry(),
            self.registry.clone(),
            self.config.checks.clone(),
            probe_tx,
        ));

        let mut handles: Vec<JoinHandle<()>> = engine.start();
        handles.push(tokio::spawn(aggregator.clone().run_consumer(probe_rx)));
        handles.push(tokio::spawn(aggregator.run_snapshotter()));

        let health_for_batches = self.health.clone();
        handles.push(tokio::spawn(async move {
            while let Some(batch) = batch_rx.recv().await {
                health_for_batches.apply_batch(&batch).await;
            }
        }));

        let registry_for_refresh = self.registry.clone();
        let health_for_refresh = self.health.clone();
        let refresh_interval = Duration::from_secs(self.config.registry_refresh_sec.max(1));
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh_interval);
            ticker.tick().await; // the initial load already happened above
            loop {
                ticker.tick().await;
                registry_for_refresh.reload().await;
                health_for_refresh
                    .sync_topology(&registry_for_refresh.snapshot())
                    .await;
            }
        }));

        handles.push(tokio::spawn(self.static_entries.clone().run()));

        let dns_state = DnsState {
            health: self.health.clone(),
            static_entries: self.static_entries.clone(),
            geolocator: self.geolocator.clone(),
            http_client: self.http_client.clone(),
        };
        let dns_listener = tokio::net::TcpListener::bind(&self.config.dns_listen_addr).await?;
        let dns_addr = self.config.dns_listen_addr.clone();
        let dns_router = dns::router(dns_state);
        handles.push(tokio::spawn(async move {
            info!(addr = %dns_addr, "dns backend listening");
            if let Err(e) = axum::serve(dns_listener, dns_router).await {
                error!(error = %e, "dns server exited");
            }
        }));

        let admin_state = AdminState {
            health: self.health.clone(),
            auth_key: self.config.auth_key.clone(),
        };
        let status_state = StatusPageState {
            health: self.health.clone(),
        };
        let admin_router = admin::router(admin_state).merge(status_page::router(status_state));
        let admin_listener = tokio::net::TcpListener::bind(&self.config.admin_listen_addr).await?;
        let admin_addr = self.config.admin_listen_addr.clone();
        handles.push(tokio::spawn(async move {
            info!(addr = %admin_addr, "admin api listening");
            if let Err(e) = axum::serve(admin_listener, admin_router).await {
                error!(error = %e, "admin server exited");
            }
        }));

        shutdown_signal().await;
        info!("shutdown signal received, stopping background tasks");
        for handle in handles {
            handle.abort();
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
