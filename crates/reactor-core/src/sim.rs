use crate::channel::{ChannelId, ChannelSpec, Unit};
use crate::control::{ControllerSpec, PidGains};
use crate::dal::DeviceDriver;
use crate::error::DriverError;
use crate::interlock::{InterlockRule, Predicate, SafeAction};
use crate::setpoint::SetpointRange;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const REACTOR_TEMP: &str = "reactor_temp";
pub const PRESSURE: &str = "pressure";
pub const COOLANT_FLOW: &str = "coolant_flow";
pub const STIRRER_SPEED: &str = "stirrer_speed";
pub const IRRADIANCE: &str = "irradiance";
pub const LEAK_DETECTED: &str = "leak_detected";
pub const HEATER: &str = "heater";
pub const COOLING_VALVE: &str = "cooling_valve";
pub const COOLANT_PUMP: &str = "coolant_pump";
pub const STIRRER: &str = "stirrer";
pub const LAMP: &str = "lamp";

const AMBIENT_C: f64 = 22.0;
const COOLANT_C: f64 = 12.0;

/// Channel layout of the simulated photoreactor, in discovery order.
pub fn reactor_channels() -> Vec<ChannelSpec> {
    vec![
        ChannelSpec::sensor(REACTOR_TEMP, Unit::Celsius, -20.0, 250.0),
        ChannelSpec::sensor(PRESSURE, Unit::Bar, 0.0, 10.0),
        ChannelSpec::sensor(COOLANT_FLOW, Unit::LitersPerMinute, 0.0, 20.0),
        ChannelSpec::sensor(STIRRER_SPEED, Unit::Rpm, 0.0, 2000.0),
        ChannelSpec::sensor(IRRADIANCE, Unit::Lux, 0.0, 60_000.0),
        ChannelSpec::sensor(LEAK_DETECTED, Unit::Flag, 0.0, 1.0),
        ChannelSpec::actuator(HEATER, Unit::Percent, 0.0, 100.0, 0.0),
        ChannelSpec::actuator(COOLING_VALVE, Unit::Percent, 0.0, 100.0, 100.0),
        ChannelSpec::actuator(COOLANT_PUMP, Unit::Percent, 0.0, 100.0, 100.0),
        ChannelSpec::actuator(STIRRER, Unit::Rpm, 0.0, 2000.0, 0.0),
        ChannelSpec::actuator(LAMP, Unit::Percent, 0.0, 100.0, 0.0),
    ]
}

fn action(channel: &str, value: f64) -> SafeAction {
    SafeAction {
        channel: channel.to_string(),
        value,
    }
}

/// Interlocks for the simulated photoreactor, most critical hazard first.
pub fn photoreactor_rules() -> Vec<InterlockRule> {
    let make_safe = vec![
        action(HEATER, 0.0),
        action(LAMP, 0.0),
        action(COOLING_VALVE, 100.0),
        action(COOLANT_PUMP, 100.0),
    ];
    vec![
        InterlockRule {
            name: "over_temperature".to_string(),
            predicate: Predicate::Above {
                channel: REACTOR_TEMP.to_string(),
                limit: 90.0,
                warn: Some(80.0),
            },
            actions: make_safe.clone(),
        },
        InterlockRule {
            name: "over_pressure".to_string(),
            predicate: Predicate::Above {
                channel: PRESSURE.to_string(),
                limit: 3.0,
                warn: Some(2.5),
            },
            actions: make_safe,
        },
        InterlockRule {
            name: "coolant_leak".to_string(),
            predicate: Predicate::Flag {
                channel: LEAK_DETECTED.to_string(),
            },
            actions: vec![
                action(HEATER, 0.0),
                action(LAMP, 0.0),
                action(COOLANT_PUMP, 0.0),
                action(STIRRER, 0.0),
            ],
        },
        InterlockRule {
            name: "over_irradiance".to_string(),
            predicate: Predicate::Above {
                channel: IRRADIANCE.to_string(),
                limit: 55_000.0,
                warn: Some(50_000.0),
            },
            actions: vec![action(LAMP, 0.0)],
        },
    ]
}

pub fn photoreactor_controllers() -> Vec<ControllerSpec> {
    vec![
        ControllerSpec {
            actuator: HEATER.to_string(),
            process: REACTOR_TEMP.to_string(),
            gains: PidGains {
                kp: 4.0,
                ki: 0.05,
                kd: 1.0,
                integral_limit: 400.0,
            },
            setpoint_range: Some(SetpointRange::new(0.0, 200.0)),
            default_tolerance: 1.0,
        },
        ControllerSpec {
            actuator: STIRRER.to_string(),
            process: STIRRER_SPEED.to_string(),
            gains: PidGains {
                kp: 0.3,
                ki: 0.8,
                kd: 0.0,
                integral_limit: 2500.0,
            },
            setpoint_range: None,
            default_tolerance: 20.0,
        },
        ControllerSpec {
            actuator: LAMP.to_string(),
            process: IRRADIANCE.to_string(),
            gains: PidGains {
                kp: 0.002,
                ki: 0.004,
                kd: 0.0,
                integral_limit: 25_000.0,
            },
            setpoint_range: Some(SetpointRange::new(0.0, 50_000.0)),
            default_tolerance: 500.0,
        },
    ]
}

/// Fault injection shared between a running simulation and a test or
/// operator console.
#[derive(Debug, Default)]
struct Faults {
    unresponsive: HashMap<String, bool>,
    forced: HashMap<String, f64>,
}

#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    faults: Arc<Mutex<Faults>>,
}

impl FaultInjector {
    fn lock(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every read and write of `channel` time out.
    pub fn disconnect(&self, channel: &str) {
        self.lock().unresponsive.insert(channel.to_string(), true);
    }

    pub fn reconnect(&self, channel: &str) {
        self.lock().unresponsive.remove(channel);
    }

    /// Override the value a sensor reports regardless of the physics.
    pub fn force(&self, channel: &str, value: f64) {
        self.lock().forced.insert(channel.to_string(), value);
    }

    pub fn release(&self, channel: &str) {
        self.lock().forced.remove(channel);
    }

    fn is_unresponsive(&self, channel: &str) -> bool {
        self.lock().unresponsive.get(channel).copied().unwrap_or(false)
    }

    fn forced(&self, channel: &str) -> Option<f64> {
        self.lock().forced.get(channel).copied()
    }
}

/// Lumped-parameter photoreactor: jacketed vessel with heater, coolant
/// loop, stirrer and lamp.
#[derive(Debug)]
pub struct SimulatedReactor {
    specs: Vec<ChannelSpec>,
    temperature_c: f64,
    pressure_bar: f64,
    coolant_flow_lpm: f64,
    stirrer_rpm: f64,
    irradiance_lux: f64,
    leak: bool,

    heater_pct: f64,
    valve_pct: f64,
    pump_pct: f64,
    stirrer_cmd_rpm: f64,
    lamp_pct: f64,

    heater_gain: f64,
    lamp_heat_gain: f64,
    cooling_coeff: f64,
    ambient_loss: f64,
    timeout: Duration,
    faults: FaultInjector,
}

impl SimulatedReactor {
    pub fn new() -> Self {
        Self {
            specs: reactor_channels(),
            temperature_c: AMBIENT_C,
            pressure_bar: 1.0,
            coolant_flow_lpm: 0.0,
            stirrer_rpm: 0.0,
            irradiance_lux: 0.0,
            leak: false,
            heater_pct: 0.0,
            valve_pct: 0.0,
            pump_pct: 0.0,
            stirrer_cmd_rpm: 0.0,
            lamp_pct: 0.0,
            heater_gain: 0.12,
            lamp_heat_gain: 0.01,
            cooling_coeff: 0.004,
            ambient_loss: 0.002,
            timeout: Duration::from_millis(20),
            faults: FaultInjector::default(),
        }
    }

    pub fn with_temperature(mut self, temperature_c: f64) -> Self {
        self.temperature_c = temperature_c;
        self
    }

    pub fn fault_injector(&self) -> FaultInjector {
        self.faults.clone()
    }

    pub fn temperature(&self) -> f64 {
        self.temperature_c
    }

    fn name(&self, channel: ChannelId) -> Result<&str, DriverError> {
        self.specs
            .get(channel.index())
            .map(|s| s.name.as_str())
            .ok_or_else(|| DriverError::Rejected {
                reason: format!("no channel {channel}"),
            })
    }
}

impl Default for SimulatedReactor {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceDriver for SimulatedReactor {
    fn discover(&mut self) -> Vec<ChannelSpec> {
        self.specs.clone()
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn read(&mut self, channel: ChannelId) -> Result<f64, DriverError> {
        let name = self.name(channel)?;
        if self.faults.is_unresponsive(name) {
            return Err(DriverError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            });
        }
        if let Some(value) = self.faults.forced(name) {
            return Ok(value);
        }
        let value = match name {
            REACTOR_TEMP => self.temperature_c,
            PRESSURE => self.pressure_bar,
            COOLANT_FLOW => self.coolant_flow_lpm,
            STIRRER_SPEED => self.stirrer_rpm,
            IRRADIANCE => self.irradiance_lux,
            LEAK_DETECTED => f64::from(u8::from(self.leak)),
            HEATER => self.heater_pct,
            COOLING_VALVE => self.valve_pct,
            COOLANT_PUMP => self.pump_pct,
            STIRRER => self.stirrer_cmd_rpm,
            LAMP => self.lamp_pct,
            other => {
                return Err(DriverError::Rejected {
                    reason: format!("unknown channel {other}"),
                })
            }
        };
        Ok(value)
    }

    fn write(&mut self, channel: ChannelId, value: f64) -> Result<(), DriverError> {
        let name = self.name(channel)?.to_string();
        if self.faults.is_unresponsive(&name) {
            return Err(DriverError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            });
        }
        match name.as_str() {
            HEATER => self.heater_pct = value,
            COOLING_VALVE => self.valve_pct = value,
            COOLANT_PUMP => self.pump_pct = value,
            STIRRER => self.stirrer_cmd_rpm = value,
            LAMP => self.lamp_pct = value,
            other => {
                return Err(DriverError::Rejected {
                    reason: format!("{other} is read-only"),
                })
            }
        }
        Ok(())
    }

    fn step(&mut self, dt_s: f64) {
        if dt_s <= 0.0 {
            return;
        }
        // Coolant loop: flow needs both pump and valve.
        let flow_target = 0.2 * self.pump_pct * (self.valve_pct / 100.0);
        self.coolant_flow_lpm += (flow_target - self.coolant_flow_lpm) * (1.0 - (-dt_s / 2.0).exp());

        // Stirrer motor lag.
        self.stirrer_rpm +=
            (self.stirrer_cmd_rpm - self.stirrer_rpm) * (1.0 - (-dt_s / 0.8).exp());

        self.irradiance_lux = self.lamp_pct * 500.0;

        // Thermal balance of the vessel.
        let heat_in = self.heater_pct * self.heater_gain + self.lamp_pct * self.lamp_heat_gain;
        let heat_out = self.cooling_coeff * self.coolant_flow_lpm * (self.temperature_c - COOLANT_C) * 10.0
            + self.ambient_loss * (self.temperature_c - AMBIENT_C);
        self.temperature_c += (heat_in - heat_out) * dt_s;

        // Solvent vapour pressure rises steeply past 60 °C.
        self.pressure_bar = 1.0 + ((self.temperature_c - 60.0).max(0.0) * 0.05);
    }
}
