use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a channel in discovery order. Only meaningful for the device
/// layer that handed it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u16);

impl ChannelId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Sensor,
    Actuator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Celsius,
    Bar,
    LitersPerMinute,
    Rpm,
    Lux,
    UvIndex,
    Percent,
    /// Digital input or output, 0.0 or 1.0.
    Flag,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Celsius => "°C",
            Unit::Bar => "bar",
            Unit::LitersPerMinute => "L/min",
            Unit::Rpm => "rpm",
            Unit::Lux => "lx",
            Unit::UvIndex => "UVI",
            Unit::Percent => "%",
            Unit::Flag => "",
        }
    }
}

/// Static description of a channel as reported by the driver at discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    pub unit: Unit,
    pub kind: ChannelKind,
    /// Declared physical range. Writes outside it are refused.
    pub min: f64,
    pub max: f64,
    /// Value an actuator is driven to when the reactor must be made safe.
    #[serde(default)]
    pub safe_value: Option<f64>,
    /// Sustained invalid reads on a required channel fault the engine.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl ChannelSpec {
    pub fn sensor(name: &str, unit: Unit, min: f64, max: f64) -> Self {
        Self {
            name: name.to_string(),
            unit,
            kind: ChannelKind::Sensor,
            min,
            max,
            safe_value: None,
            required: true,
        }
    }

    pub fn actuator(name: &str, unit: Unit, min: f64, max: f64, safe_value: f64) -> Self {
        Self {
            name: name.to_string(),
            unit,
            kind: ChannelKind::Actuator,
            min,
            max,
            safe_value: Some(safe_value),
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn is_actuator(&self) -> bool {
        self.kind == ChannelKind::Actuator
    }
}

/// Live state of one channel. Owned by the device layer.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: ChannelId,
    pub spec: ChannelSpec,
    pub value: f64,
    pub last_update_us: u64,
    pub valid: bool,
    pub(crate) consecutive_invalid: u32,
}

impl Channel {
    pub(crate) fn new(id: ChannelId, spec: ChannelSpec) -> Self {
        let value = spec.safe_value.unwrap_or(0.0);
        Self {
            id,
            spec,
            value,
            last_update_us: 0,
            valid: false,
            consecutive_invalid: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn consecutive_invalid(&self) -> u32 {
        self.consecutive_invalid
    }
}

/// Result of a single read: last known value plus whether it is trustworthy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub value: f64,
    pub valid: bool,
}

/// Read-only directory of discovered channels, shared with command callers
/// for name lookups and range checks.
#[derive(Debug, Clone, Default)]
pub struct ChannelCatalog {
    specs: Vec<ChannelSpec>,
}

impl ChannelCatalog {
    pub fn new(specs: Vec<ChannelSpec>) -> Self {
        Self { specs }
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn id(&self, name: &str) -> Option<ChannelId> {
        self.specs
            .iter()
            .position(|s| s.name == name)
            .map(|i| ChannelId(i as u16))
    }

    pub fn spec(&self, id: ChannelId) -> Option<&ChannelSpec> {
        self.specs.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChannelId, &ChannelSpec)> {
        self.specs
            .iter()
            .enumerate()
            .map(|(i, s)| (ChannelId(i as u16), s))
    }

    /// Look up a configured channel name, optionally requiring a kind.
    pub fn resolve(
        &self,
        name: &str,
        expected: Option<ChannelKind>,
    ) -> Result<ChannelId, crate::error::ConfigError> {
        use crate::error::ConfigError;

        let id = self
            .id(name)
            .ok_or_else(|| ConfigError::UnknownChannel(name.to_string()))?;
        match (expected, self.specs[id.index()].kind) {
            (Some(ChannelKind::Actuator), ChannelKind::Sensor) => Err(ConfigError::WrongKind {
                name: name.to_string(),
                expected: "an actuator",
            }),
            (Some(ChannelKind::Sensor), ChannelKind::Actuator) => Err(ConfigError::WrongKind {
                name: name.to_string(),
                expected: "a sensor",
            }),
            _ => Ok(id),
        }
    }
}
