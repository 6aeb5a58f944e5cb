//! Per-actuator PID control.
//!
//! Each loop reads one process channel and commands one actuator. Time
//! deltas come from snapshot timestamps, so tick jitter changes the
//! integral and derivative terms exactly as much as it should.

use crate::channel::{ChannelCatalog, ChannelId, ChannelKind};
use crate::error::{CommandRejection, ConfigError};
use crate::setpoint::{Setpoint, SetpointRange, Validated};
use crate::snapshot::{LoopStatus, Snapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    /// Integral gain, per second.
    pub ki: f64,
    /// Derivative gain, seconds.
    pub kd: f64,
    /// Bound on the accumulated error integral, in process units times seconds.
    pub integral_limit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidController {
    gains: PidGains,
    out_min: f64,
    out_max: f64,
}

impl PidController {
    pub fn new(gains: PidGains, out_min: f64, out_max: f64) -> Result<Self, &'static str> {
        let finite = [gains.kp, gains.ki, gains.kd, gains.integral_limit]
            .iter()
            .all(|g| g.is_finite());
        if !finite {
            return Err("gains must be finite");
        }
        if gains.ki < 0.0 || gains.kd < 0.0 {
            return Err("ki and kd must be non-negative");
        }
        if gains.integral_limit <= 0.0 {
            return Err("integral_limit must be positive");
        }
        if out_min >= out_max {
            return Err("output range is empty");
        }
        Ok(Self {
            gains,
            out_min,
            out_max,
        })
    }

    pub fn gains(&self) -> &PidGains {
        &self.gains
    }

    /// One control step at `timestamp_us`. The first step after a reset has
    /// no history and is proportional only.
    pub fn update(&self, state: &mut PidState, setpoint: f64, measurement: f64, timestamp_us: u64) -> f64 {
        let error = setpoint - measurement;
        let dt_s = state
            .prev_timestamp_us
            .filter(|prev| timestamp_us > *prev)
            .map(|prev| (timestamp_us - prev) as f64 / 1_000_000.0);

        let p_term = self.gains.kp * error;

        let limit = self.gains.integral_limit;
        let candidate = match dt_s {
            Some(dt) => (state.integral + error * dt).clamp(-limit, limit),
            None => state.integral,
        };
        let i_term = self.gains.ki * candidate;

        // Derivative on measurement avoids a kick when the setpoint moves.
        let d_term = match (dt_s, state.prev_measurement) {
            (Some(dt), Some(prev)) => -self.gains.kd * (measurement - prev) / dt,
            _ => 0.0,
        };

        let raw = p_term + i_term + d_term;
        let output = raw.clamp(self.out_min, self.out_max);

        // Conditional integration: hold the integral while saturated.
        if output == raw {
            state.integral = candidate;
        }
        state.prev_measurement = Some(measurement);
        state.prev_timestamp_us = Some(timestamp_us);
        state.last_output = Some(output);
        output
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidState {
    pub integral: f64,
    pub prev_measurement: Option<f64>,
    pub prev_timestamp_us: Option<u64>,
    pub last_output: Option<f64>,
}

/// Configuration of one loop. `C` is a channel name in configuration and a
/// resolved [`ChannelId`] at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSpec<C = String> {
    pub actuator: C,
    pub process: C,
    pub gains: PidGains,
    /// Allowed setpoints; defaults to the process channel's declared range.
    #[serde(default)]
    pub setpoint_range: Option<SetpointRange>,
    /// Tolerance applied when a setpoint is commanded without one.
    #[serde(default = "default_tolerance")]
    pub default_tolerance: f64,
}

fn default_tolerance() -> f64 {
    1.0
}

impl ControllerSpec<String> {
    pub fn resolve(&self, catalog: &ChannelCatalog) -> Result<ControllerSpec<ChannelId>, ConfigError> {
        let actuator = catalog.resolve(&self.actuator, Some(ChannelKind::Actuator))?;
        let process = catalog.resolve(&self.process, None)?;
        let process_spec = catalog
            .spec(process)
            .ok_or_else(|| ConfigError::UnknownChannel(self.process.clone()))?;
        let range = self
            .setpoint_range
            .unwrap_or(SetpointRange::new(process_spec.min, process_spec.max));
        if !(range.min.is_finite() && range.max.is_finite() && range.min <= range.max) {
            return Err(ConfigError::InvalidController {
                channel: self.actuator.clone(),
                what: "setpoint range is empty",
            });
        }
        if range.min < process_spec.min || range.max > process_spec.max {
            return Err(ConfigError::InvalidController {
                channel: self.actuator.clone(),
                what: "setpoint range exceeds the process channel's range",
            });
        }
        if !self.default_tolerance.is_finite() || self.default_tolerance < 0.0 {
            return Err(ConfigError::InvalidController {
                channel: self.actuator.clone(),
                what: "default tolerance must be non-negative",
            });
        }
        Ok(ControllerSpec {
            actuator,
            process,
            gains: self.gains,
            setpoint_range: Some(range),
            default_tolerance: self.default_tolerance,
        })
    }
}

#[derive(Debug)]
struct LoopSlot {
    actuator: ChannelId,
    process: ChannelId,
    pid: PidController,
    state: PidState,
    range: SetpointRange,
    default_tolerance: f64,
    setpoint: Option<Setpoint<Validated>>,
    output: Option<f64>,
}

/// All controllers of the reactor. Runs only while the engine is Running.
#[derive(Debug, Default)]
pub struct ControlLoop {
    slots: Vec<LoopSlot>,
}

impl ControlLoop {
    pub fn new(
        specs: Vec<ControllerSpec<ChannelId>>,
        catalog: &ChannelCatalog,
    ) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut slots = Vec::with_capacity(specs.len());
        for spec in specs {
            let actuator = catalog
                .spec(spec.actuator)
                .ok_or_else(|| ConfigError::UnknownChannel(spec.actuator.to_string()))?;
            if !seen.insert(spec.actuator) {
                return Err(ConfigError::DuplicateController(actuator.name.clone()));
            }
            let pid = PidController::new(spec.gains, actuator.min, actuator.max).map_err(|what| {
                ConfigError::InvalidController {
                    channel: actuator.name.clone(),
                    what,
                }
            })?;
            let range = spec.setpoint_range.ok_or_else(|| ConfigError::InvalidController {
                channel: actuator.name.clone(),
                what: "setpoint range not resolved",
            })?;
            slots.push(LoopSlot {
                actuator: spec.actuator,
                process: spec.process,
                pid,
                state: PidState::default(),
                range,
                default_tolerance: spec.default_tolerance,
                setpoint: None,
                output: None,
            });
        }
        Ok(Self { slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Setpoint range and default tolerance of the loop driving `actuator`.
    pub fn limits(&self, actuator: ChannelId) -> Option<(SetpointRange, f64)> {
        self.slot(actuator).map(|s| (s.range, s.default_tolerance))
    }

    pub fn set_setpoint(
        &mut self,
        actuator: ChannelId,
        setpoint: Setpoint<Validated>,
    ) -> Result<(), CommandRejection> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.actuator == actuator)
            .ok_or(CommandRejection::NotControlled(actuator))?;
        slot.setpoint = Some(setpoint);
        Ok(())
    }

    pub fn setpoint(&self, actuator: ChannelId) -> Option<Setpoint<Validated>> {
        self.slot(actuator).and_then(|s| s.setpoint)
    }

    pub fn state(&self, actuator: ChannelId) -> Option<&PidState> {
        self.slot(actuator).map(|s| &s.state)
    }

    /// Forget accumulated history so a new Running period starts without
    /// windup.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.state = PidState::default();
            slot.output = None;
        }
    }

    /// Mark every loop as not driving its actuator this tick.
    pub fn suspend(&mut self) {
        for slot in &mut self.slots {
            slot.output = None;
        }
    }

    /// Outputs for this tick, clamped to each actuator's declared range.
    /// Loops without a setpoint or with an invalid process reading are
    /// skipped.
    pub fn compute(&mut self, snapshot: &Snapshot) -> Vec<(ChannelId, f64)> {
        let mut outputs = Vec::with_capacity(self.slots.len());
        for slot in &mut self.slots {
            slot.output = None;
            let Some(setpoint) = slot.setpoint else {
                continue;
            };
            let Some(measurement) = snapshot.valid_value(slot.process) else {
                continue;
            };
            let output = slot
                .pid
                .update(&mut slot.state, setpoint.value(), measurement, snapshot.timestamp_us);
            slot.output = Some(output);
            outputs.push((slot.actuator, output));
        }
        outputs
    }

    pub fn statuses(&self, snapshot: &Snapshot) -> Vec<LoopStatus> {
        self.slots
            .iter()
            .map(|slot| {
                let process_value = snapshot
                    .channel(slot.process)
                    .map(|c| c.value)
                    .unwrap_or(f64::NAN);
                let valid = snapshot.valid_value(slot.process).is_some();
                LoopStatus {
                    actuator: slot.actuator,
                    process: slot.process,
                    setpoint: slot.setpoint.map(|s| s.value()),
                    tolerance: slot.setpoint.map(|s| s.tolerance()),
                    process_value,
                    output: slot.output,
                    in_band: valid && slot.setpoint.is_some_and(|s| s.in_band(process_value)),
                }
            })
            .collect()
    }

    fn slot(&self, actuator: ChannelId) -> Option<&LoopSlot> {
        self.slots.iter().find(|s| s.actuator == actuator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelSpec, Unit};

    fn gains() -> PidGains {
        PidGains {
            kp: 2.0,
            ki: 0.5,
            kd: 0.0,
            integral_limit: 50.0,
        }
    }

    #[test]
    fn proportional_only_on_first_step() {
        let pid = PidController::new(gains(), 0.0, 100.0).unwrap();
        let mut state = PidState::default();
        let out = pid.update(&mut state, 60.0, 50.0, 1_000_000);
        assert!((out - 20.0).abs() < 1e-9);
        assert_eq!(state.integral, 0.0);
    }

    #[test]
    fn integral_accumulates_with_timestamp_delta() {
        let pid = PidController::new(gains(), 0.0, 100.0).unwrap();
        let mut state = PidState::default();
        pid.update(&mut state, 60.0, 55.0, 0);
        pid.update(&mut state, 60.0, 55.0, 200_000);
        // error 5 over 0.2 s
        assert!((state.integral - 1.0).abs() < 1e-9);
    }

    #[test]
    fn integral_is_clamped() {
        let g = PidGains {
            kp: 0.0,
            ki: 0.1,
            kd: 0.0,
            integral_limit: 3.0,
        };
        let pid = PidController::new(g, -1000.0, 1000.0).unwrap();
        let mut state = PidState::default();
        for i in 0..100u64 {
            pid.update(&mut state, 100.0, 0.0, i * 1_000_000);
        }
        assert_eq!(state.integral, 3.0);
    }

    #[test]
    fn output_clamped_and_integral_held_while_saturated() {
        let pid = PidController::new(gains(), 0.0, 100.0).unwrap();
        let mut state = PidState::default();
        for i in 0..20u64 {
            let out = pid.update(&mut state, 200.0, 0.0, i * 100_000);
            assert_eq!(out, 100.0);
        }
        assert_eq!(state.integral, 0.0);
    }

    #[test]
    fn derivative_uses_actual_elapsed_time() {
        let g = PidGains {
            kp: 0.0,
            ki: 0.0,
            kd: 1.0,
            integral_limit: 1.0,
        };
        let pid = PidController::new(g, -100.0, 100.0).unwrap();

        let mut fast = PidState::default();
        pid.update(&mut fast, 0.0, 0.0, 0);
        let d_fast = pid.update(&mut fast, 0.0, 1.0, 100_000);

        let mut slow = PidState::default();
        pid.update(&mut slow, 0.0, 0.0, 0);
        let d_slow = pid.update(&mut slow, 0.0, 1.0, 200_000);

        assert!((d_fast - -10.0).abs() < 1e-9);
        assert!((d_slow - -5.0).abs() < 1e-9);
    }

    fn catalog() -> ChannelCatalog {
        ChannelCatalog::new(vec![
            ChannelSpec::sensor("temp", Unit::Celsius, -20.0, 250.0),
            ChannelSpec::actuator("heater", Unit::Percent, 0.0, 100.0, 0.0),
        ])
    }

    fn heater_loop(setpoint_range: Option<SetpointRange>) -> ControllerSpec {
        ControllerSpec {
            actuator: "heater".to_string(),
            process: "temp".to_string(),
            gains: gains(),
            setpoint_range,
            default_tolerance: 1.0,
        }
    }

    #[test]
    fn setpoint_range_defaults_to_process_range() {
        let resolved = heater_loop(None).resolve(&catalog()).unwrap();
        assert_eq!(resolved.setpoint_range, Some(SetpointRange::new(-20.0, 250.0)));
    }

    #[test]
    fn setpoint_range_must_fit_process_range() {
        for range in [SetpointRange::new(0.0, 1000.0), SetpointRange::new(-50.0, 100.0)] {
            assert!(matches!(
                heater_loop(Some(range)).resolve(&catalog()),
                Err(ConfigError::InvalidController { .. })
            ));
        }
        assert!(heater_loop(Some(SetpointRange::new(0.0, 200.0)))
            .resolve(&catalog())
            .is_ok());
    }

    #[test]
    fn rejects_invalid_gains() {
        let mut g = gains();
        g.ki = -1.0;
        assert!(PidController::new(g, 0.0, 1.0).is_err());
        assert!(PidController::new(gains(), 1.0, 1.0).is_err());
        g = gains();
        g.integral_limit = 0.0;
        assert!(PidController::new(g, 0.0, 1.0).is_err());
    }
}
