use reactor_core::{ConfigError, ReactorConfig};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgError {
    #[error("{0} requires a value")]
    MissingValue(&'static str),
    #[error("invalid value {value:?} for {flag}")]
    InvalidValue { flag: &'static str, value: String },
    #[error("unknown argument {0:?} (try --help)")]
    Unknown(String),
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub config_path: Option<PathBuf>,
    pub tick_ms: Option<u64>,
    pub run_seconds: Option<u64>,
    pub json_logs: bool,
    pub log_dir: Option<PathBuf>,
    pub metrics_addr: Option<String>,
    pub audit_path: Option<PathBuf>,
    pub autostart: bool,
    /// Initial setpoints as (actuator name, value).
    pub setpoints: Vec<(String, f64)>,
    pub console_enabled: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            config_path: None,
            tick_ms: None,
            run_seconds: None,
            json_logs: false,
            log_dir: None,
            metrics_addr: None,
            audit_path: None,
            autostart: false,
            setpoints: Vec::new(),
            console_enabled: true,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ArgError> {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Result<Self, ArgError> {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" => {
                    cfg.config_path = Some(PathBuf::from(value(args, &mut i, "--config")?));
                }
                "--tick-ms" => {
                    cfg.tick_ms = Some(parse(args, &mut i, "--tick-ms")?);
                }
                "--run-seconds" => {
                    cfg.run_seconds = Some(parse(args, &mut i, "--run-seconds")?);
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--log-dir" => {
                    cfg.log_dir = Some(PathBuf::from(value(args, &mut i, "--log-dir")?));
                }
                "--metrics-addr" => {
                    cfg.metrics_addr = Some(value(args, &mut i, "--metrics-addr")?.to_string());
                }
                "--audit-log" => {
                    cfg.audit_path = Some(PathBuf::from(value(args, &mut i, "--audit-log")?));
                }
                "--autostart" => {
                    cfg.autostart = true;
                }
                "--setpoint" => {
                    let raw = value(args, &mut i, "--setpoint")?;
                    cfg.setpoints.push(parse_setpoint(raw)?);
                }
                "--no-console" => {
                    cfg.console_enabled = false;
                }
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                other => return Err(ArgError::Unknown(other.to_string())),
            }
            i += 1;
        }
        Ok(cfg)
    }

    /// Reactor configuration from `--config` (or defaults) with command line
    /// overrides applied.
    pub fn reactor_config(&self) -> Result<ReactorConfig, ConfigError> {
        let mut reactor = match &self.config_path {
            Some(path) => ReactorConfig::from_file(path)?,
            None => ReactorConfig::default(),
        };
        if let Some(tick_ms) = self.tick_ms {
            reactor.tick_period_ms = tick_ms;
        }
        Ok(reactor)
    }

    pub fn print_help() {
        println!(
            r#"reactor-ctl - photochemical reactor control and acquisition engine

USAGE:
    reactor-ctl [OPTIONS]

OPTIONS:
    --config <PATH>          Reactor configuration (JSON): cadence, interlocks, controllers
    --tick-ms <MS>           Override the tick period in milliseconds [default: 100]
    --run-seconds <SECS>     Run for a fixed duration then shut down safely
    --json-logs              Output logs in JSON format (for log aggregation)
    --log-dir <DIR>          Also write JSON logs to a daily rolling file in DIR
    --metrics-addr <ADDR>    Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    --audit-log <PATH>       Enable audit logging to specified JSONL file
    --autostart              Issue a start command once the engine is up
    --setpoint <NAME=VALUE>  Initial setpoint for a controlled actuator (repeatable)
    --no-console             Do not read operator commands from stdin
    -h, --help               Print this help message

CONSOLE:
    One JSON command per line on stdin, one JSON reply per line on stdout:
    {{"type":"set_setpoint","channel":"heater","value":65.0}}
    {{"type":"start"}}  {{"type":"stop"}}  {{"type":"reset"}}
    The line "status" prints the latest snapshot.

ENVIRONMENT VARIABLES:
    RUST_LOG                 Set log filter (e.g., RUST_LOG=debug,reactor_core=trace)

EXAMPLES:
    # Interactive run against the simulated reactor
    reactor-ctl --setpoint heater=65 --metrics-addr 0.0.0.0:9090

    # Unattended run with full observability
    reactor-ctl --autostart --no-console --json-logs --log-dir /var/log/reactor \
        --audit-log /var/log/reactor/audit.jsonl

    # Short smoke run
    reactor-ctl --run-seconds 5 --no-console
"#
        );
    }
}

fn value<'a>(args: &'a [String], i: &mut usize, flag: &'static str) -> Result<&'a str, ArgError> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or(ArgError::MissingValue(flag))
}

fn parse<T: std::str::FromStr>(
    args: &[String],
    i: &mut usize,
    flag: &'static str,
) -> Result<T, ArgError> {
    let raw = value(args, i, flag)?;
    raw.parse().map_err(|_| ArgError::InvalidValue {
        flag,
        value: raw.to_string(),
    })
}

fn parse_setpoint(raw: &str) -> Result<(String, f64), ArgError> {
    let invalid = || ArgError::InvalidValue {
        flag: "--setpoint",
        value: raw.to_string(),
    };
    let (name, value) = raw.split_once('=').ok_or_else(invalid)?;
    let value: f64 = value.trim().parse().map_err(|_| invalid())?;
    if name.trim().is_empty() {
        return Err(invalid());
    }
    Ok((name.trim().to_string(), value))
}
