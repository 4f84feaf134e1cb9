//! Logging and Prometheus export for the pool.
//!
//! Both are process-wide: the first [`init_telemetry`] call installs the
//! subscriber and the recorder, later calls hand out the same scrape handle.
//! The pool's counters are described at install time so `/metrics` carries
//! help text even before the first allocation.

use std::{env, net::SocketAddr, sync::Arc};

use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::hydrate_env_file;

static SUBSCRIBER_INSTALLED: OnceCell<()> = OnceCell::new();
static METRICS_HANDLE: OnceCell<Arc<PrometheusHandle>> = OnceCell::new();

/// SQL statement logging from the driver is noisy at `info`.
const DEFAULT_LOG_FILTER: &str = "info,sqlx=warn";

const POOL_COUNTERS: [(&str, &str); 7] = [
    ("pool_allocations_total", "Allocation attempts by outcome."),
    ("pool_finish_total", "Activation status updates by outcome."),
    ("pool_sms_total", "Pushed SMS by outcome."),
    (
        "pool_store_retries_total",
        "Store calls retried after a busy or timed out attempt.",
    ),
    (
        "pool_store_busy_total",
        "Store calls that stayed busy through the whole retry budget.",
    ),
    (
        "pool_deferred_writes_total",
        "Background releases and SMS appends by job and result.",
    ),
    ("api_requests_total", "Protocol requests by action and status."),
];

/// Where logs are filtered and where, if anywhere, metrics get their own
/// scrape listener.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    log_filter: String,
    metrics_address: Option<String>,
}

impl TelemetryConfig {
    /// `<PREFIX>_LOG_FILTER` takes an `EnvFilter` directive and defaults to
    /// `info,sqlx=warn`. `<PREFIX>_METRICS_ADDRESS` opens a standalone
    /// listener next to the `/metrics` route; blank means none.
    pub fn from_env(prefix: &str) -> Self {
        let _ = hydrate_env_file();
        let upper = prefix.trim().to_ascii_uppercase();

        let log_filter = env::var(format!("{upper}_LOG_FILTER"))
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        let metrics_address = env::var(format!("{upper}_METRICS_ADDRESS"))
            .ok()
            .filter(|value| !value.trim().is_empty());

        Self {
            log_filter,
            metrics_address,
        }
    }

    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    pub fn metrics_address(&self) -> Option<&str> {
        self.metrics_address.as_deref()
    }
}

/// Handle onto the installed recorder; cheap to clone into request state.
#[derive(Clone)]
pub struct TelemetryGuard {
    metrics: Arc<PrometheusHandle>,
}

impl TelemetryGuard {
    /// Prometheus text exposition of every pool and request counter.
    pub fn render_metrics(&self) -> String {
        self.metrics.render()
    }
}

pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    install_tracing(config)?;
    let metrics = install_metrics(config)?;

    Ok(TelemetryGuard { metrics })
}

fn install_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    if SUBSCRIBER_INSTALLED.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_new(config.log_filter())
        .map_err(|err| TelemetryError::InvalidLogFilter(err.to_string()))?;

    if SUBSCRIBER_INSTALLED.set(()).is_ok() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .map_err(|err| TelemetryError::Tracing(err.to_string()))?;
    }

    Ok(())
}

fn install_metrics(config: &TelemetryConfig) -> Result<Arc<PrometheusHandle>, TelemetryError> {
    METRICS_HANDLE
        .get_or_try_init(|| {
            let mut builder = PrometheusBuilder::new();
            if let Some(addr) = config.metrics_address() {
                let socket: SocketAddr =
                    addr.parse().map_err(|err: std::net::AddrParseError| {
                        TelemetryError::InvalidMetricsAddress(addr.to_string(), err.to_string())
                    })?;
                builder = builder.with_http_listener(socket);
            }

            let handle = builder
                .install_recorder()
                .map_err(|err| TelemetryError::Metrics(err.to_string()))?;
            describe_pool_counters();
            Ok(Arc::new(handle))
        })
        .cloned()
}

fn describe_pool_counters() {
    for (name, help) in POOL_COUNTERS {
        describe_counter!(name, help);
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    InvalidLogFilter(String),
    #[error("failed to install tracing subscriber: {0}")]
    Tracing(String),
    #[error("invalid metrics address `{0}`: {1}")]
    InvalidMetricsAddress(String, String),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_quiet_the_sql_driver() {
        let _guard = ENV_GUARD.lock().unwrap();
        env::remove_var("POOLTEST_LOG_FILTER");
        env::remove_var("POOLTEST_METRICS_ADDRESS");
        env::set_var("SMS_POOL_SKIP_DOTENV", "1");

        let cfg = TelemetryConfig::from_env("pooltest");
        assert_eq!(cfg.log_filter(), "info,sqlx=warn");
        assert_eq!(cfg.metrics_address(), None);
    }

    #[test]
    fn prefixed_variables_override_defaults() {
        let _guard = ENV_GUARD.lock().unwrap();
        env::set_var("POOLTEST_LOG_FILTER", "debug");
        env::set_var("POOLTEST_METRICS_ADDRESS", "127.0.0.1:9898");
        let cfg = TelemetryConfig::from_env("POOLTEST");
        assert_eq!(cfg.log_filter(), "debug");
        assert_eq!(cfg.metrics_address(), Some("127.0.0.1:9898"));
        env::remove_var("POOLTEST_LOG_FILTER");
        env::remove_var("POOLTEST_METRICS_ADDRESS");
    }

    #[test]
    fn blank_values_fall_back() {
        let _guard = ENV_GUARD.lock().unwrap();
        env::set_var("POOLTEST_LOG_FILTER", " ");
        env::set_var("POOLTEST_METRICS_ADDRESS", "  ");
        let cfg = TelemetryConfig::from_env("POOLTEST");
        assert_eq!(cfg.log_filter(), "info,sqlx=warn");
        assert_eq!(cfg.metrics_address(), None);
        env::remove_var("POOLTEST_LOG_FILTER");
        env::remove_var("POOLTEST_METRICS_ADDRESS");
    }
}
