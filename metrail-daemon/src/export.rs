//! Metrics export surface.
//!
//! Two halves, both fed from the same store:
//!
//! - `install_metrics_recorder` starts the Prometheus HTTP listener from
//!   `metrics-exporter-prometheus` for internal telemetry.
//! - [`StoreExporter`] periodically mirrors the DSL metric store into the
//!   `metrics` facade so program-defined counters and gauges appear on the
//!   same endpoint. Counters are written with `absolute()`, gauges with
//!   `set()`. Text metrics have no Prometheus type and appear only in the
//!   JSON dump; histogram buckets likewise are dumped as JSON.
//!
//! `write_metrics_json` renders the whole store for one-shot mode and
//! status inspection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::info;

use metrail_core::config::ExportConfig;
use metrail_core::{telemetry, HealthStatus, MetricKind, MetrailError, Pipeline, PipelineError};
use metrail_runtime::store::{DatumValue, MetricSnapshot};
use metrail_runtime::Store;

/// Install the global metrics recorder and start the HTTP listener.
///
/// This function should be called once per process.
pub fn install_metrics_recorder(config: &ExportConfig) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {}", e))?;

    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces; restrict listen_addr in untrusted networks"
        );
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    telemetry::describe_all();
    metrics::gauge!(
        telemetry::BUILD_INFO,
        "version" => env!("CARGO_PKG_VERSION")
    )
    .set(1.0);

    info!(listen_addr = %addr, "Prometheus metrics endpoint active");
    Ok(())
}

/// Mirrors store snapshots into the metrics facade on an interval.
pub struct StoreExporter {
    store: Arc<Store>,
    tick: Duration,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StoreExporter {
    /// Create a new exporter task.
    pub fn new(store: Arc<Store>, tick: Duration) -> Self {
        Self {
            store,
            tick,
            cancel: CancellationToken::new(),
            task: None,
        }
    }
}

impl Pipeline for StoreExporter {
    async fn start(&mut self) -> Result<(), MetrailError> {
        if self.task.is_some() {
            return Err(PipelineError::AlreadyRunning.into());
        }
        let store = Arc::clone(&self.store);
        let tick = self.tick.max(Duration::from_millis(100));
        let cancel = self.cancel.clone();
        self.task = Some(tokio::spawn(async move {
            let mut timer = interval(tick);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = timer.tick() => publish_snapshot(&store.snapshot()),
                    _ = cancel.cancelled() => {
                        // 종료 직전 마지막 상태 반영
                        publish_snapshot(&store.snapshot());
                        return;
                    }
                }
            }
        }));
        info!(interval_ms = self.tick.as_millis() as u64, "store exporter started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), MetrailError> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match &self.task {
            Some(task) if !task.is_finished() => HealthStatus::Healthy,
            Some(_) => HealthStatus::Unhealthy("exporter task exited".to_owned()),
            None => HealthStatus::Unhealthy("not started".to_owned()),
        }
    }
}

/// Push one snapshot into the metrics facade.
fn publish_snapshot(snapshot: &[MetricSnapshot]) {
    for metric in snapshot {
        for datum in &metric.data {
            let mut labels: Vec<metrics::Label> = metric
                .label_keys
                .iter()
                .zip(datum.label_values.iter())
                .map(|(k, v)| metrics::Label::new(k.clone(), v.clone()))
                .collect();
            if let Some(program) = &metric.program {
                labels.push(metrics::Label::new("prog", program.clone()));
            }
            let name = metric
                .alias
                .clone()
                .unwrap_or_else(|| metric.name.clone());

            match (&metric.kind, &datum.value) {
                (MetricKind::Counter, DatumValue::Int(v)) => {
                    metrics::counter!(name, labels).absolute((*v).max(0) as u64);
                }
                (MetricKind::Counter, DatumValue::Float(v)) => {
                    metrics::counter!(name, labels).absolute(v.max(0.0) as u64);
                }
                (MetricKind::Gauge | MetricKind::Timer, DatumValue::Int(v)) => {
                    metrics::gauge!(name, labels).set(*v as f64);
                }
                (MetricKind::Gauge | MetricKind::Timer, DatumValue::Float(v)) => {
                    metrics::gauge!(name, labels).set(*v);
                }
                // Text and histogram buckets are exposed via the JSON dump only
                _ => {}
            }
        }
    }
}

/// Render the store as pretty JSON, mirroring the one-shot dump of the
/// original tool. `emit_timestamp`가 false면 datum 타임스탬프를 생략한다.
pub fn write_metrics_json(store: &Store, emit_timestamp: bool) -> serde_json::Result<String> {
    let mut snapshot = store.snapshot();
    if !emit_timestamp {
        for metric in &mut snapshot {
            for datum in &mut metric.data {
                datum.last_update = None;
            }
        }
    }
    serde_json::to_string_pretty(&snapshot)
}
