//! Prometheus recorder and scrape endpoint.
//!
//! The recorder is process-global, so it lives in a `OnceLock` and is
//! installed at most once. The listener is bound before the recorder is
//! installed so a port clash fails startup instead of a background task.

use axum::extract::State;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{
    AddressParseSnafu, BindSnafu, MetricsError, PrometheusInitSnafu, RecorderInstalledSnafu,
};

/// Scrape address used when `metrics.address` is unset.
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9090";

/// Batch durations in seconds; batches run from milliseconds up to minutes.
const BATCH_SECONDS_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0,
];

static RECORDER: OnceLock<MetricsController> = OnceLock::new();

/// Handle to the installed Prometheus recorder.
pub struct MetricsController {
    handle: PrometheusHandle,
}

impl MetricsController {
    pub fn get() -> Option<&'static Self> {
        RECORDER.get()
    }

    /// Current snapshot in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Bind `address`, install the recorder and serve `/metrics` and `/health`
/// in the background. Returns the bound address, which differs from the
/// requested one when port 0 was asked for.
pub async fn init_global(address: &str) -> Result<SocketAddr, MetricsError> {
    let requested: SocketAddr = address.parse().context(AddressParseSnafu { address })?;
    let listener = TcpListener::bind(requested)
        .await
        .context(BindSnafu { addr: requested })?;
    let addr = listener
        .local_addr()
        .context(BindSnafu { addr: requested })?;

    let controller = install()?;
    let app = scrape_router(controller.handle.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(%addr, error = %e, "Metrics endpoint stopped");
        }
    });

    info!(%addr, "Serving job metrics");
    Ok(addr)
}

/// Install the recorder without a listener. Concurrent test threads may all
/// call this; losers wait for the winner's recorder to appear.
pub fn init_test() {
    if install().is_err() {
        while RECORDER.get().is_none() {
            std::hint::spin_loop();
        }
    }
}

fn install() -> Result<&'static MetricsController, MetricsError> {
    ensure!(RECORDER.get().is_none(), RecorderInstalledSnafu);

    let handle = PrometheusBuilder::new()
        .set_buckets(BATCH_SECONDS_BUCKETS)
        .context(PrometheusInitSnafu)?
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    RECORDER
        .set(MetricsController { handle })
        .map_err(|_| RecorderInstalledSnafu.build())?;
    RECORDER.get().context(RecorderInstalledSnafu)
}

fn scrape_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .route("/health", get(|| async { "ok\n" }))
        .with_state(handle)
}

async fn scrape(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::counter;

    #[test]
    fn test_repeated_test_init() {
        init_test();
        init_test();
        assert!(MetricsController::get().is_some());
    }

    #[test]
    fn test_render_includes_recorded_counter() {
        init_test();
        counter!("tributary_render_probe").increment(3);
        let text = MetricsController::get().unwrap().render();
        assert!(text.contains("tributary_render_probe"));
    }

    #[test]
    fn test_racing_test_init() {
        let threads: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(init_test))
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert!(MetricsController::get().is_some());
    }

    #[tokio::test]
    async fn test_unparseable_address() {
        let err = init_global("not-an-address").await.unwrap_err();
        assert!(matches!(err, MetricsError::AddressParse { .. }));
    }

    #[tokio::test]
    async fn test_port_in_use_fails_before_install() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = taken.local_addr().unwrap().to_string();

        let err = init_global(&address).await.unwrap_err();
        assert!(matches!(err, MetricsError::Bind { .. }));
    }
}
