use crate::infra::audit::{AuditEventType, AuditLogger};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::console::{self, Flow};
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry;
use crossbeam_channel::RecvTimeoutError;
use reactor_core::{ConfigError, Engine, EngineError, SimulatedReactor};
use reactor_io::protocol::{DispatchError, OperatorMessage, SetSetpointMsg};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

/// Interval at which the main thread mirrors statistics and checks the
/// run deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid reactor configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to start engine: {0}")]
    Engine(#[from] EngineError),
    #[error("audit logging requested but failed to initialize: {0}")]
    Audit(#[from] std::io::Error),
    #[error("initial setpoint for {name:?} refused: {source}")]
    Setpoint {
        name: String,
        #[source]
        source: DispatchError,
    },
}

pub fn run_from_args() -> ExitCode {
    let config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("reactor-ctl: {}", e);
            return ExitCode::from(2);
        }
    };
    if config.show_help {
        RuntimeConfig::print_help();
        return ExitCode::SUCCESS;
    }
    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "reactor-ctl failed");
            eprintln!("reactor-ctl: {}", e);
            ExitCode::FAILURE
        }
    }
}

pub fn run(config: RuntimeConfig) -> Result<(), AppError> {
    let _log_guard = init_tracing(config.json_logs, config.log_dir.as_deref());

    telemetry::init();
    let metrics_enabled = config.metrics_addr.is_some();
    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr);

    let reactor_config = config.reactor_config()?;
    let audit = init_audit_logger(config.audit_path.as_deref())?;

    info!(
        tick_ms = reactor_config.tick_period_ms,
        device_timeout_ms = reactor_config.device_timeout_ms,
        invalid_read_threshold = reactor_config.invalid_read_threshold,
        rules = reactor_config.rules.len(),
        controllers = reactor_config.controllers.len(),
        "Starting reactor engine"
    );
    let engine = Engine::spawn(SimulatedReactor::new(), &reactor_config)?;
    let observer = telemetry::start_snapshot_observer(engine.subscribe(), audit.clone());

    if let Some(logger) = &audit {
        let details = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "tick_ms": reactor_config.tick_period_ms,
            "channels": engine.channels().iter().map(|(_, s)| s.name.clone()).collect::<Vec<_>>(),
            "metrics_enabled": metrics_enabled,
        });
        if let Err(e) = logger.record(AuditEventType::EngineStart, details) {
            warn!(error = %e, "Failed to write audit entry");
        }
    }

    for (name, value) in &config.setpoints {
        let message = OperatorMessage::SetSetpoint(SetSetpointMsg {
            channel: name.clone(),
            value: *value,
            tolerance: None,
        });
        message.dispatch(&engine).map_err(|source| AppError::Setpoint {
            name: name.clone(),
            source,
        })?;
        info!(channel = %name, value, "Initial setpoint applied");
    }
    if config.autostart {
        match engine.command_start() {
            Ok(()) => info!("Autostart requested"),
            Err(e) => warn!(error = %e, "Autostart refused"),
        }
    }

    let mut console = config.console_enabled.then(console::spawn_reader);
    let deadline = config.run_seconds.map(|secs| {
        info!(seconds = secs, "Running for limited duration");
        Instant::now() + Duration::from_secs(secs)
    });
    if console.is_some() {
        info!("Reactor engine running. Type JSON commands, \"status\" or \"quit\".");
    } else {
        info!("Reactor engine running.");
    }

    loop {
        telemetry::record_stats(&engine.stats());
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        match &console {
            Some(lines) => match lines.recv_timeout(POLL_INTERVAL) {
                Ok(line) => {
                    let mut stdout = std::io::stdout().lock();
                    if console::handle_line(&engine, &line, audit.as_deref(), &mut stdout)
                        == Flow::Quit
                    {
                        info!("Shutdown requested from console");
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    if deadline.is_none() {
                        info!("Console closed, shutting down");
                        break;
                    }
                    console = None;
                }
            },
            None => thread::sleep(POLL_INTERVAL),
        }
    }

    let stats = engine.shutdown().unwrap_or_default();
    if observer.join().is_err() {
        warn!("Snapshot observer panicked");
    }
    telemetry::record_stats(&stats);

    info!(
        ticks_executed = stats.ticks_executed,
        ticks_missed = stats.ticks_missed,
        max_jitter_us = stats.max_jitter_us,
        safety_stops = stats.safety_stops,
        faults = stats.faults,
        invalid_reads = stats.invalid_reads,
        "Run complete"
    );

    if let Some(logger) = &audit {
        if let Err(e) = logger.record(AuditEventType::EngineShutdown, stats) {
            warn!(error = %e, "Failed to write audit entry");
        }
    }
    Ok(())
}

fn init_audit_logger(audit_path: Option<&Path>) -> Result<Option<Arc<AuditLogger>>, AppError> {
    audit_path
        .map(|path| {
            let logger = AuditLogger::new(path)?;
            info!(path = %path.display(), "Audit logging enabled");
            Ok::<_, AppError>(Arc::new(logger))
        })
        .transpose()
}
