use crate::channel::{ChannelId, ChannelKind, Unit};
use crate::interlock::{EngineState, ThresholdStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSample {
    pub id: ChannelId,
    pub name: String,
    pub unit: Unit,
    pub kind: ChannelKind,
    pub value: f64,
    pub valid: bool,
    /// Monotonic time of the last successful read or write.
    pub updated_us: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleStatus {
    pub name: String,
    pub status: ThresholdStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopStatus {
    pub actuator: ChannelId,
    pub process: ChannelId,
    pub setpoint: Option<f64>,
    pub tolerance: Option<f64>,
    pub process_value: f64,
    /// Output commanded this tick, if the loop ran.
    pub output: Option<f64>,
    pub in_band: bool,
}

/// Immutable record of every channel at one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub sequence: u64,
    pub timestamp_us: u64,
    pub unix_us: u64,
    pub state: EngineState,
    pub channels: Vec<ChannelSample>,
    pub rules: Vec<RuleStatus>,
    pub loops: Vec<LoopStatus>,
    /// Rule that put the engine into SafetyStop.
    pub trip: Option<String>,
    /// Channel whose sustained invalid reads faulted the engine.
    pub fault: Option<ChannelId>,
    pub overrun: bool,
    pub jitter_us: u64,
}

impl Snapshot {
    pub fn channel(&self, id: ChannelId) -> Option<&ChannelSample> {
        self.channels.get(id.index())
    }

    pub fn by_name(&self, name: &str) -> Option<&ChannelSample> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Value of a channel if its reading is valid.
    pub fn valid_value(&self, id: ChannelId) -> Option<f64> {
        self.channel(id).filter(|c| c.valid).map(|c| c.value)
    }

    pub fn rule(&self, name: &str) -> Option<ThresholdStatus> {
        self.rules.iter().find(|r| r.name == name).map(|r| r.status)
    }
}
