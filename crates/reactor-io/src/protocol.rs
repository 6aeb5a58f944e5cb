//! JSON line messages exchanged with operator consoles and downstream
//! consumers.

use reactor_core::{ChannelId, CommandRejection, Engine, EngineState, Snapshot, ThresholdStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const fn v1() -> Self {
        Self { major: 1, minor: 0 }
    }

    /// Messages without a version are treated as current.
    pub fn is_supported(&self) -> bool {
        self.major <= 1
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ChannelMsg {
    pub value: f64,
    pub unit: &'static str,
    pub valid: bool,
    pub updated_us: u64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct LoopMsg {
    pub actuator: String,
    pub process: String,
    pub setpoint: Option<f64>,
    pub output: Option<f64>,
    pub in_band: bool,
}

/// One published snapshot keyed by channel name.
#[derive(Debug, Serialize)]
pub struct SnapshotMsg {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub protocol_version: ProtocolVersion,
    pub sequence: u64,
    pub timestamp_us: u64,
    pub unix_us: u64,
    pub state: EngineState,
    pub trip: Option<String>,
    pub fault: Option<String>,
    pub overrun: bool,
    pub jitter_us: u64,
    pub channels: BTreeMap<String, ChannelMsg>,
    pub rules: BTreeMap<String, ThresholdStatus>,
    pub loops: Vec<LoopMsg>,
}

impl SnapshotMsg {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let name = |id: ChannelId| {
            snapshot
                .channel(id)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| id.to_string())
        };
        Self {
            msg_type: "snapshot",
            protocol_version: ProtocolVersion::v1(),
            sequence: snapshot.sequence,
            timestamp_us: snapshot.timestamp_us,
            unix_us: snapshot.unix_us,
            state: snapshot.state,
            trip: snapshot.trip.clone(),
            fault: snapshot.fault.map(name),
            overrun: snapshot.overrun,
            jitter_us: snapshot.jitter_us,
            channels: snapshot
                .channels
                .iter()
                .map(|c| {
                    (
                        c.name.clone(),
                        ChannelMsg {
                            value: c.value,
                            unit: c.unit.symbol(),
                            valid: c.valid,
                            updated_us: c.updated_us,
                        },
                    )
                })
                .collect(),
            rules: snapshot
                .rules
                .iter()
                .map(|r| (r.name.clone(), r.status))
                .collect(),
            loops: snapshot
                .loops
                .iter()
                .map(|l| LoopMsg {
                    actuator: name(l.actuator),
                    process: name(l.process),
                    setpoint: l.setpoint,
                    output: l.output,
                    in_band: l.in_band,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SetSetpointMsg {
    /// Name of the controlled actuator.
    pub channel: String,
    pub value: f64,
    #[serde(default)]
    pub tolerance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperatorMessage {
    SetSetpoint(SetSetpointMsg),
    Start,
    Stop,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("message has no type")]
    MissingType,
    #[error("unknown message type {0:?}")]
    UnknownType(String),
    #[error("unsupported protocol version {}.{}", .0.major, .0.minor)]
    UnsupportedVersion(ProtocolVersion),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("unknown channel {0:?}")]
    UnknownChannel(String),
    #[error(transparent)]
    Rejected(#[from] CommandRejection),
}

impl OperatorMessage {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        if let Some(raw) = value.get("protocol_version") {
            let version: ProtocolVersion = serde_json::from_value(raw.clone())
                .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
            if !version.is_supported() {
                return Err(ProtocolError::UnsupportedVersion(version));
            }
        }
        let msg_type = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(ProtocolError::MissingType)?;
        match msg_type {
            "set_setpoint" => serde_json::from_value(value)
                .map(OperatorMessage::SetSetpoint)
                .map_err(|e| ProtocolError::Malformed(e.to_string())),
            "start" => Ok(OperatorMessage::Start),
            "stop" => Ok(OperatorMessage::Stop),
            "reset" => Ok(OperatorMessage::Reset),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OperatorMessage::SetSetpoint(_) => "set_setpoint",
            OperatorMessage::Start => "start",
            OperatorMessage::Stop => "stop",
            OperatorMessage::Reset => "reset",
        }
    }

    pub fn dispatch(&self, engine: &Engine) -> Result<(), DispatchError> {
        match self {
            OperatorMessage::SetSetpoint(msg) => {
                let id = engine
                    .channel_id(&msg.channel)
                    .ok_or_else(|| DispatchError::UnknownChannel(msg.channel.clone()))?;
                match msg.tolerance {
                    Some(tolerance) => engine.set_setpoint_with_tolerance(id, msg.value, tolerance)?,
                    None => engine.set_setpoint(id, msg.value)?,
                }
            }
            OperatorMessage::Start => engine.command_start()?,
            OperatorMessage::Stop => engine.command_stop()?,
            OperatorMessage::Reset => engine.reset_safety_stop()?,
        }
        Ok(())
    }
}

/// Answer to one operator line.
#[derive(Debug, Serialize, PartialEq)]
pub struct ReplyMsg {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub command: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub state: EngineState,
}

impl ReplyMsg {
    pub fn accepted(command: &'static str, state: EngineState) -> Self {
        Self {
            msg_type: "reply",
            command,
            ok: true,
            error: None,
            state,
        }
    }

    pub fn rejected(command: &'static str, state: EngineState, error: impl ToString) -> Self {
        Self {
            msg_type: "reply",
            command,
            ok: false,
            error: Some(error.to_string()),
            state,
        }
    }
}
