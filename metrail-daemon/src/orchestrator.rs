//! Mode dispatch, channel wiring, and lifecycle management.
//!
//! The orchestrator builds the store, loader, tailer, and watcher from a
//! validated configuration, wires the channels between them, and manages
//! ordered startup and graceful shutdown.
//!
//! # Data flow
//! ```text
//! Tailer -> lines channel -> Loader fan-out -> per-program VM -> Store -> Exporter
//! ```
//!
//! # Shutdown (producers before consumers)
//! 1. Cancel the tailer and watcher; the tailer drops the lines sender.
//! 2. The closed lines channel makes the loader drain every VM and return.
//! 3. Stop the GC and exporter pipelines, bounded by a 5 second deadline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use metrail_core::{DynPipeline, MetrailConfig};
use metrail_runtime::{
    DumpOptions, Loader, LoaderConfig, ProgramWatcher, Store, StoreGc, StoreOptions, Tailer,
    TailerConfig, TimeOptions, TimezoneSpec, WatcherConfig,
};

use crate::export::{self, StoreExporter};

/// Inbound line channel capacity (tailer -> loader).
const LINES_CHANNEL_CAPACITY: usize = 1024;
/// Watcher event channel capacity.
const EVENT_CHANNEL_CAPACITY: usize = 16;
/// Upper bound on the shutdown of auxiliary pipelines.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Run the daemon in the mode selected by the configuration.
///
/// Returns the process exit code.
pub async fn run(config: MetrailConfig) -> Result<i32> {
    if config.runtime.compile_only {
        return compile_only(&config).await;
    }

    let store = Arc::new(Store::with_options(StoreOptions {
        omit_prog_label: config.export.omit_prog_label,
        omit_metric_source: config.export.omit_metric_source,
    }));

    let time_opts = TimeOptions {
        timezone: config
            .runtime
            .override_timezone
            .as_deref()
            .and_then(TimezoneSpec::parse)
            .unwrap_or_default(),
        syslog_use_current_year: config.runtime.syslog_use_current_year,
    };

    let mut loader = Loader::new(
        LoaderConfig {
            extension: config.programs.extension.clone(),
            queue_depth: config.runtime.queue_depth,
            publish_timeout: Duration::from_millis(config.runtime.publish_timeout_ms),
            time_opts,
        },
        Arc::clone(&store),
    );

    let program_dir = std::path::PathBuf::from(&config.programs.path);
    let summary = loader
        .load_all(&program_dir)
        .await
        .context("initial program load failed")?;
    for (name, diagnostics) in &summary.failures {
        error!(prog = %name, "program failed to load:\n{diagnostics}");
    }

    // Channel wiring
    let (line_tx, line_rx) = mpsc::channel(LINES_CHANNEL_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();

    let tailer = Tailer::new(
        TailerConfig {
            paths: config.logs.paths.iter().map(Into::into).collect(),
            poll_interval_ms: config.logs.poll_interval_ms,
            max_line_length: config.logs.max_line_length,
            one_shot: config.runtime.one_shot,
        },
        line_tx,
        cancel.clone(),
    );

    if config.runtime.one_shot {
        // One-shot: read to EOF, drain, dump the store, exit.
        drop(event_tx);
        let loader_handle = tokio::spawn(loader.run(line_rx, event_rx));
        tailer.run().await?;
        let loader = loader_handle.await.context("loader task panicked")?;
        info!(
            lines = loader.line_count(),
            programs = loader.program_names().len(),
            "one-shot run complete"
        );
        println!(
            "{}",
            export::write_metrics_json(&store, config.export.emit_metric_timestamp)?
        );
        return Ok(0);
    }

    // Continuous mode: metrics endpoint, watcher, GC, exporter.
    if config.export.enabled {
        export::install_metrics_recorder(&config.export)?;
    }

    let watcher = ProgramWatcher::new(
        WatcherConfig {
            dir: program_dir,
            extension: config.programs.extension.clone(),
            poll_interval_ms: config.programs.poll_interval_ms,
        },
        event_tx,
        cancel.clone(),
    );

    let mut pipelines: Vec<(&str, Box<dyn DynPipeline>)> = vec![(
        "metric-gc",
        Box::new(StoreGc::new(
            Arc::clone(&store),
            Duration::from_secs(config.gc.expired_metric_interval_secs),
        )),
    )];
    if config.export.enabled {
        pipelines.push((
            "store-exporter",
            Box::new(StoreExporter::new(
                Arc::clone(&store),
                Duration::from_secs(config.export.export_interval_secs),
            )),
        ));
    }
    for (name, pipeline) in &mut pipelines {
        pipeline
            .start()
            .await
            .with_context(|| format!("failed to start {name}"))?;
    }

    let watcher_handle = tokio::spawn(watcher.run());
    let tailer_handle = tokio::spawn(tailer.run());
    let loader_handle = tokio::spawn(loader.run(line_rx, event_rx));

    info!("metrail running");
    wait_for_shutdown().await;

    // Graceful shutdown. Cancellation is idempotent, so a second signal
    // while draining is harmless.
    info!("shutdown requested");
    cancel.cancel();

    if let Err(e) = tailer_handle.await.context("tailer task panicked")? {
        warn!(error = %e, "tailer exited with error");
    }
    let loader = loader_handle.await.context("loader task panicked")?;
    info!(lines = loader.line_count(), "loader drained, all vms done");

    if let Err(e) = watcher_handle.await {
        warn!(error = %e, "watcher task panicked");
    }

    let stop_all = async {
        for (name, pipeline) in &mut pipelines {
            if let Err(e) = pipeline.stop().await {
                warn!(module = name, error = %e, "pipeline stop failed");
            }
        }
    };
    if timeout(SHUTDOWN_DEADLINE, stop_all).await.is_err() {
        warn!(
            deadline_secs = SHUTDOWN_DEADLINE.as_secs(),
            "shutdown deadline exceeded, exiting anyway"
        );
    }

    info!("metrail shut down");
    Ok(0)
}

/// Compile every program, print diagnostics and requested dumps, exit.
async fn compile_only(config: &MetrailConfig) -> Result<i32> {
    let dumps = DumpOptions {
        ast: config.runtime.dump_ast,
        ast_types: config.runtime.dump_ast_types,
        bytecode: config.runtime.dump_bytecode,
    };
    let dir = std::path::PathBuf::from(&config.programs.path);
    let results = metrail_runtime::loader::compile_only(&dir, &config.programs.extension, dumps)
        .await
        .context("compile-only run failed")?;

    let mut failed = 0usize;
    for (name, result) in &results {
        match result {
            Ok(_) => info!(prog = %name, "compiled ok"),
            Err(errors) => {
                failed += 1;
                eprintln!("{name}: compile failed");
                eprintln!("{errors}");
            }
        }
    }
    info!(
        total = results.len(),
        failed,
        "compile-only run complete"
    );
    Ok(if failed > 0 { 1 } else { 0 })
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sig) => sig,
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received interrupt");
    }
}
