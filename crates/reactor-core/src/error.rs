use crate::channel::ChannelId;
use crate::interlock::EngineState;
use thiserror::Error;

/// Failure reported by a device driver for a single read or write.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriverError {
    #[error("device did not respond within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("device disconnected")]
    Disconnected,
    #[error("device rejected request: {reason}")]
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DalError {
    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),
    #[error("channel {channel} is a sensor and cannot be written")]
    NotWritable { channel: ChannelId },
    #[error("value {value} outside range [{min}, {max}] of channel {channel}")]
    OutOfRange {
        channel: ChannelId,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("write to channel {channel} failed: {source}")]
    Device {
        channel: ChannelId,
        #[source]
        source: DriverError,
    },
}

/// Reason an operator command was refused. No state changes when returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandRejection {
    #[error("setpoint {value} outside range [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },
    #[error("setpoint {value} is not a finite number")]
    NonFinite { value: f64 },
    #[error("tolerance {tolerance} must be finite and non-negative")]
    InvalidTolerance { tolerance: f64 },
    #[error("channel {0} has no controller")]
    NotControlled(ChannelId),
    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),
    #[error("{command} is not allowed while engine is {state:?}")]
    IllegalTransition {
        command: &'static str,
        state: EngineState,
    },
    #[error("command queue is full")]
    QueueFull,
    #[error("engine has stopped")]
    EngineStopped,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("driver reported no channels")]
    NoChannels,
    #[error("duplicate channel name {0:?}")]
    DuplicateChannel(String),
    #[error("channel {name:?} has invalid range [{min}, {max}]")]
    InvalidRange { name: String, min: f64, max: f64 },
    #[error("channel {name:?} safe value {value} outside its range")]
    InvalidSafeValue { name: String, value: f64 },
    #[error("unknown channel {0:?} referenced in configuration")]
    UnknownChannel(String),
    #[error("channel {name:?} must be {expected}")]
    WrongKind { name: String, expected: &'static str },
    #[error("channel {0:?} is controlled by more than one loop")]
    DuplicateController(String),
    #[error("invalid controller for {channel:?}: {what}")]
    InvalidController { channel: String, what: &'static str },
    #[error("tick period {period_us} us is faster than the minimum {min_us} us")]
    CadenceTooFast { period_us: u64, min_us: u64 },
    #[error("{what} must be greater than zero")]
    Zero { what: &'static str },
    #[error("failed to read configuration: {0}")]
    Io(String),
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Dal(#[from] DalError),
    #[error("failed to spawn tick thread: {0}")]
    Spawn(#[from] std::io::Error),
}
