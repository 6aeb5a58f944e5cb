use crate::error::CommandRejection;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

#[derive(Debug, Clone, Copy)]
pub struct Unvalidated;

#[derive(Debug, Clone, Copy)]
pub struct Validated;

/// Target for one controlled loop plus the band considered "on target".
#[derive(Debug, Clone, Copy)]
pub struct Setpoint<State = Unvalidated> {
    value: f64,
    tolerance: f64,
    _state: PhantomData<State>,
}

/// Range a loop's setpoint must fall in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetpointRange {
    pub min: f64,
    pub max: f64,
}

impl SetpointRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

impl Setpoint<Unvalidated> {
    pub fn new(value: f64, tolerance: f64) -> Self {
        Self {
            value,
            tolerance,
            _state: PhantomData,
        }
    }

    pub fn validate(self, range: &SetpointRange) -> Result<Setpoint<Validated>, CommandRejection> {
        if !self.value.is_finite() {
            return Err(CommandRejection::NonFinite { value: self.value });
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(CommandRejection::InvalidTolerance {
                tolerance: self.tolerance,
            });
        }
        if self.value < range.min || self.value > range.max {
            return Err(CommandRejection::OutOfRange {
                value: self.value,
                min: range.min,
                max: range.max,
            });
        }

        Ok(Setpoint {
            value: self.value,
            tolerance: self.tolerance,
            _state: PhantomData,
        })
    }
}

impl Setpoint<Validated> {
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn in_band(&self, measured: f64) -> bool {
        (measured - self.value).abs() <= self.tolerance
    }
}
