//! Tracing subscriber, Prometheus recorder, and thread spawning helpers.

use std::{io, net::SocketAddr, sync::OnceLock, thread, time::Duration};

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static METRICS_INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the global fmt subscriber. `RUST_LOG` overrides the `info` default.
/// Calling it twice is harmless.
pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_timer(fmt::time::uptime())
                .with_filter(env_filter),
        )
        .try_init();
}

/// Install the metrics recorder once.
///
/// With `listen` set, the exporter serves `/metrics` on that address from its
/// own background runtime. Without it the recorder is kept in-process and an
/// upkeep thread drains histogram buckets.
pub(crate) fn init_metrics(listen: Option<SocketAddr>) -> Result<()> {
    if METRICS_INSTALLED.get().is_some() {
        return Ok(());
    }
    match listen {
        Some(addr) => {
            PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .with_context(|| format!("failed to start metrics exporter on {addr}"))?;
            info!(%addr, "prometheus metrics available at http://{addr}/metrics");
        }
        None => {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            metrics::set_global_recorder(recorder)
                .context("metrics recorder already installed")?;
            let upkeep = handle.clone();
            spawn_thread("prometheus-upkeep", move || loop {
                thread::sleep(Duration::from_secs(5));
                upkeep.run_upkeep();
            })
            .context("failed to spawn prometheus upkeep thread")?;
            let _ = PROM_HANDLE.set(handle);
        }
    }
    let _ = METRICS_INSTALLED.set(());
    Ok(())
}

/// Current metrics snapshot in Prometheus text format, when recorded in-process.
pub(crate) fn render_metrics() -> Option<String> {
    PROM_HANDLE.get().map(PrometheusHandle::render)
}

/// Spawn a named thread that inherits the current tracing dispatcher.
pub(crate) fn spawn_thread<F, T>(name: impl Into<String>, f: F) -> io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name(name.into())
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}
