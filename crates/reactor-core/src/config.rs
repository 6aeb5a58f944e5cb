use crate::channel::{ChannelCatalog, ChannelId};
use crate::control::ControllerSpec;
use crate::dal::DalConfig;
use crate::error::ConfigError;
use crate::interlock::InterlockRule;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Lower bound on the tick period regardless of measured device latency.
pub const MIN_TICK_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactorConfig {
    pub tick_period_ms: u64,
    pub device_timeout_ms: u64,
    pub invalid_read_threshold: u32,
    pub telemetry_capacity: usize,
    pub subscriber_queue_depth: usize,
    pub command_queue_depth: usize,
    /// Evaluated in this order every tick; most critical hazard first.
    pub rules: Vec<InterlockRule>,
    pub controllers: Vec<ControllerSpec>,
}

impl Default for ReactorConfig {
    /// With the `simulation` feature the defaults describe the simulated
    /// photoreactor; otherwise rules and controllers come from a file.
    fn default() -> Self {
        #[cfg(feature = "simulation")]
        let (rules, controllers) = (
            crate::sim::photoreactor_rules(),
            crate::sim::photoreactor_controllers(),
        );
        #[cfg(not(feature = "simulation"))]
        let (rules, controllers) = (Vec::new(), Vec::new());

        Self {
            tick_period_ms: 100,
            device_timeout_ms: 20,
            invalid_read_threshold: 5,
            telemetry_capacity: 600,
            subscriber_queue_depth: 64,
            command_queue_depth: 64,
            rules,
            controllers,
        }
    }
}

/// Configuration with every channel name resolved against the discovered
/// hardware.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub rules: Vec<InterlockRule<ChannelId>>,
    pub controllers: Vec<ControllerSpec<ChannelId>>,
}

impl ReactorConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn dal_config(&self) -> DalConfig {
        DalConfig {
            timeout: Duration::from_millis(self.device_timeout_ms),
            invalid_threshold: self.invalid_read_threshold,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_period_ms == 0 {
            return Err(ConfigError::Zero {
                what: "tick_period_ms",
            });
        }
        if self.device_timeout_ms == 0 {
            return Err(ConfigError::Zero {
                what: "device_timeout_ms",
            });
        }
        if self.invalid_read_threshold == 0 {
            return Err(ConfigError::Zero {
                what: "invalid_read_threshold",
            });
        }
        if self.telemetry_capacity == 0 {
            return Err(ConfigError::Zero {
                what: "telemetry_capacity",
            });
        }
        if self.subscriber_queue_depth == 0 {
            return Err(ConfigError::Zero {
                what: "subscriber_queue_depth",
            });
        }
        if self.command_queue_depth == 0 {
            return Err(ConfigError::Zero {
                what: "command_queue_depth",
            });
        }
        Ok(())
    }

    pub fn resolve(&self, catalog: &ChannelCatalog) -> Result<ResolvedConfig, ConfigError> {
        let rules = self
            .rules
            .iter()
            .map(|r| r.resolve(catalog))
            .collect::<Result<Vec<_>, _>>()?;
        let controllers = self
            .controllers
            .iter()
            .map(|c| c.resolve(catalog))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ResolvedConfig { rules, controllers })
    }
}
