use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

use crate::gateway::DiscardReason;

/// Install the Prometheus recorder and its scrape endpoint on `port`.
///
/// Must run inside a tokio runtime; the HTTP listener is spawned on it.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("Failed to start Prometheus exporter on {}", addr))?;
    info!("Metrics available at http://{}/metrics", addr);
    Ok(())
}

/// Initialize all gateway metrics to zero so they appear in dashboards
/// before the first packet arrives.
pub fn initialize_gateway_metrics() {
    // Ingest
    for source in ["rf", "aprsis"] {
        metrics::counter!("gateway.packet.received", "source" => source).absolute(0);
    }
    metrics::counter!("gateway.packet.accepted").absolute(0);
    for reason in DiscardReason::ALL {
        metrics::counter!("gateway.packet.discarded", "reason" => reason.label()).absolute(0);
    }

    // Packet pool
    metrics::counter!("gateway.pool.allocation_failed").absolute(0);
    metrics::gauge!("pool.live_buffers").set(0.0);

    // Duplicate check
    metrics::counter!("dupecheck.hit").absolute(0);
    metrics::counter!("dupecheck.miss").absolute(0);
    metrics::counter!("dupecheck.expired").absolute(0);
    metrics::counter!("dupecheck.held_expired").absolute(0);
    metrics::gauge!("dupecheck.records").set(0.0);

    // Position history
    metrics::counter!("history.insert").absolute(0);
    metrics::counter!("history.killed").absolute(0);
    metrics::counter!("history.lookup.hit").absolute(0);
    metrics::counter!("history.lookup.miss").absolute(0);
    metrics::counter!("history.expired").absolute(0);
    metrics::gauge!("history.cells").set(0.0);
}
