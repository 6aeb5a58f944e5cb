use crate::channel::{Channel, ChannelCatalog, ChannelId, ChannelSpec, Reading};
use crate::error::{ConfigError, DalError, DriverError};
use crate::timebase::TimeBase;
use log::{debug, warn};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Contract a hardware driver fulfils. Channel ids are indices into the
/// list returned by `discover`.
pub trait DeviceDriver: Send {
    /// Channels the hardware exposes, in a stable order.
    fn discover(&mut self) -> Vec<ChannelSpec>;
    /// Upper bound the driver must honour for every read and write.
    fn set_timeout(&mut self, timeout: Duration);
    fn read(&mut self, channel: ChannelId) -> Result<f64, DriverError>;
    fn write(&mut self, channel: ChannelId, value: f64) -> Result<(), DriverError>;
    /// Advance simulated physics. Real hardware has nothing to do here.
    fn step(&mut self, _dt_s: f64) {}
}

impl<D: DeviceDriver + ?Sized> DeviceDriver for Box<D> {
    fn discover(&mut self) -> Vec<ChannelSpec> {
        (**self).discover()
    }

    fn set_timeout(&mut self, timeout: Duration) {
        (**self).set_timeout(timeout)
    }

    fn read(&mut self, channel: ChannelId) -> Result<f64, DriverError> {
        (**self).read(channel)
    }

    fn write(&mut self, channel: ChannelId, value: f64) -> Result<(), DriverError> {
        (**self).write(channel, value)
    }

    fn step(&mut self, dt_s: f64) {
        (**self).step(dt_s)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DalConfig {
    pub timeout: Duration,
    /// Consecutive invalid reads on a required channel before Fault.
    pub invalid_threshold: u32,
}

impl Default for DalConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(20),
            invalid_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DalStats {
    pub reads: u64,
    pub invalid_reads: u64,
    pub writes: u64,
    pub failed_writes: u64,
}

/// Device abstraction layer. Sole owner of channel state.
pub struct DeviceLayer<D: DeviceDriver> {
    driver: D,
    channels: Vec<Channel>,
    config: DalConfig,
    timebase: TimeBase,
    stats: DalStats,
}

impl<D: DeviceDriver> DeviceLayer<D> {
    pub fn new(mut driver: D, config: DalConfig, timebase: TimeBase) -> Result<Self, ConfigError> {
        if config.invalid_threshold == 0 {
            return Err(ConfigError::Zero {
                what: "invalid_read_threshold",
            });
        }
        let specs = driver.discover();
        validate_specs(&specs)?;
        driver.set_timeout(config.timeout);

        let channels = specs
            .into_iter()
            .enumerate()
            .map(|(i, spec)| Channel::new(ChannelId(i as u16), spec))
            .collect::<Vec<_>>();
        debug!("device layer initialised with {} channels", channels.len());

        Ok(Self {
            driver,
            channels,
            config,
            timebase,
            stats: DalStats::default(),
        })
    }

    pub fn list_channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn catalog(&self) -> ChannelCatalog {
        ChannelCatalog::new(self.channels.iter().map(|c| c.spec.clone()).collect())
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(id.index())
    }

    pub fn find(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.spec.name == name)
    }

    pub fn config(&self) -> &DalConfig {
        &self.config
    }

    pub fn stats(&self) -> DalStats {
        self.stats
    }

    pub fn step(&mut self, dt_s: f64) {
        self.driver.step(dt_s);
    }

    /// Read one channel. An unresponsive device yields an invalid reading,
    /// never an error.
    pub fn read(&mut self, id: ChannelId) -> Result<Reading, DalError> {
        if id.index() >= self.channels.len() {
            return Err(DalError::UnknownChannel(id));
        }
        self.stats.reads += 1;

        let started = Instant::now();
        let result = self.driver.read(id);
        let elapsed = started.elapsed();
        let now_us = self.timebase.now_us();
        let timeout = self.config.timeout;

        let channel = &mut self.channels[id.index()];
        let failure = match result {
            Ok(_) if elapsed > timeout => Some(DriverError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
            Ok(value) if !value.is_finite() => Some(DriverError::Rejected {
                reason: format!("non-finite value {value}"),
            }),
            Ok(value) => {
                channel.value = value;
                channel.last_update_us = now_us;
                channel.valid = true;
                channel.consecutive_invalid = 0;
                None
            }
            Err(e) => Some(e),
        };

        if let Some(err) = failure {
            self.stats.invalid_reads += 1;
            mark_invalid(channel);
            warn!(
                "read of {} failed ({} consecutive): {}",
                channel.spec.name, channel.consecutive_invalid, err
            );
        }

        Ok(Reading {
            value: channel.value,
            valid: channel.valid,
        })
    }

    /// Write an actuator. Values outside the declared range are refused
    /// before reaching the driver.
    pub fn write(&mut self, id: ChannelId, value: f64) -> Result<(), DalError> {
        let channel = self
            .channels
            .get(id.index())
            .ok_or(DalError::UnknownChannel(id))?;
        if !channel.spec.is_actuator() {
            return Err(DalError::NotWritable { channel: id });
        }
        if !channel.spec.contains(value) {
            return Err(DalError::OutOfRange {
                channel: id,
                value,
                min: channel.spec.min,
                max: channel.spec.max,
            });
        }
        self.stats.writes += 1;

        let started = Instant::now();
        let result = self.driver.write(id, value);
        let elapsed = started.elapsed();
        let now_us = self.timebase.now_us();
        let timeout = self.config.timeout;

        let channel = &mut self.channels[id.index()];
        let result = match result {
            Ok(()) if elapsed > timeout => Err(DriverError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
            other => other,
        };
        match result {
            Ok(()) => {
                channel.value = value;
                channel.last_update_us = now_us;
                channel.valid = true;
                Ok(())
            }
            Err(source) => {
                self.stats.failed_writes += 1;
                mark_invalid(channel);
                Err(DalError::Device {
                    channel: id,
                    source,
                })
            }
        }
    }

    /// First required channel whose consecutive invalid reads reached the
    /// configured threshold.
    pub fn exhausted_channel(&self) -> Option<ChannelId> {
        self.channels
            .iter()
            .find(|c| c.spec.required && c.consecutive_invalid >= self.config.invalid_threshold)
            .map(|c| c.id)
    }

    /// Drive every actuator that declares a safe value to it. Returns the
    /// failed writes; the remaining actuators are still attempted.
    pub fn drive_safe(&mut self) -> Vec<DalError> {
        let targets = self
            .channels
            .iter()
            .filter_map(|c| c.spec.safe_value.filter(|_| c.spec.is_actuator()).map(|v| (c.id, v)))
            .collect::<Vec<_>>();
        targets
            .into_iter()
            .filter_map(|(id, value)| self.write(id, value).err())
            .collect()
    }

    /// Time one full read sweep over every channel. Goes straight to the
    /// driver: channel state and statistics stay untouched.
    pub fn measure_round_trip(&mut self) -> Duration {
        let started = Instant::now();
        for channel in &self.channels {
            if let Err(err) = self.driver.read(channel.id) {
                debug!("round-trip read of {} failed: {}", channel.spec.name, err);
            }
        }
        started.elapsed()
    }
}

fn mark_invalid(channel: &mut Channel) {
    channel.valid = false;
    channel.consecutive_invalid = channel.consecutive_invalid.saturating_add(1);
}

fn validate_specs(specs: &[ChannelSpec]) -> Result<(), ConfigError> {
    if specs.is_empty() {
        return Err(ConfigError::NoChannels);
    }
    let mut seen = HashSet::new();
    for spec in specs {
        if !seen.insert(spec.name.as_str()) {
            return Err(ConfigError::DuplicateChannel(spec.name.clone()));
        }
        if !spec.min.is_finite() || !spec.max.is_finite() || spec.min > spec.max {
            return Err(ConfigError::InvalidRange {
                name: spec.name.clone(),
                min: spec.min,
                max: spec.max,
            });
        }
        if let Some(safe) = spec.safe_value {
            if !spec.contains(safe) {
                return Err(ConfigError::InvalidSafeValue {
                    name: spec.name.clone(),
                    value: safe,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Unit;

    struct FakeDriver {
        values: Vec<f64>,
        failing: Vec<bool>,
        written: Vec<(ChannelId, f64)>,
    }

    impl FakeDriver {
        fn new() -> Self {
            Self {
                values: vec![25.0, 0.0],
                failing: vec![false, false],
                written: Vec::new(),
            }
        }
    }

    impl DeviceDriver for FakeDriver {
        fn discover(&mut self) -> Vec<ChannelSpec> {
            vec![
                ChannelSpec::sensor("temp", Unit::Celsius, -20.0, 300.0),
                ChannelSpec::actuator("heater", Unit::Percent, 0.0, 100.0, 0.0),
            ]
        }

        fn set_timeout(&mut self, _timeout: Duration) {}

        fn read(&mut self, channel: ChannelId) -> Result<f64, DriverError> {
            if self.failing[channel.index()] {
                return Err(DriverError::Timeout { timeout_ms: 20 });
            }
            Ok(self.values[channel.index()])
        }

        fn write(&mut self, channel: ChannelId, value: f64) -> Result<(), DriverError> {
            if self.failing[channel.index()] {
                return Err(DriverError::Disconnected);
            }
            self.written.push((channel, value));
            self.values[channel.index()] = value;
            Ok(())
        }
    }

    fn layer(driver: FakeDriver) -> DeviceLayer<FakeDriver> {
        DeviceLayer::new(driver, DalConfig::default(), TimeBase::new()).unwrap()
    }

    #[test]
    fn lists_channels_in_discovery_order() {
        let dal = layer(FakeDriver::new());
        let names: Vec<_> = dal.list_channels().iter().map(|c| c.name()).collect();
        assert_eq!(names, ["temp", "heater"]);
        assert_eq!(dal.find("heater").unwrap().id, ChannelId(1));
    }

    #[test]
    fn successful_read_marks_channel_valid() {
        let mut dal = layer(FakeDriver::new());
        let reading = dal.read(ChannelId(0)).unwrap();
        assert_eq!(reading, Reading { value: 25.0, valid: true });
        assert!(dal.channel(ChannelId(0)).unwrap().valid);
    }

    #[test]
    fn failed_read_is_invalid_not_error() {
        let mut driver = FakeDriver::new();
        driver.failing[0] = true;
        let mut dal = layer(driver);
        for expected in 1..=3 {
            let reading = dal.read(ChannelId(0)).unwrap();
            assert!(!reading.valid);
            assert_eq!(dal.channel(ChannelId(0)).unwrap().consecutive_invalid(), expected);
        }
        assert_eq!(dal.stats().invalid_reads, 3);
    }

    #[test]
    fn threshold_reports_exhausted_channel() {
        let mut driver = FakeDriver::new();
        driver.failing[0] = true;
        let mut dal = layer(driver);
        for _ in 0..4 {
            dal.read(ChannelId(0)).unwrap();
        }
        assert_eq!(dal.exhausted_channel(), None);
        dal.read(ChannelId(0)).unwrap();
        assert_eq!(dal.exhausted_channel(), Some(ChannelId(0)));
    }

    #[test]
    fn round_trip_sweep_leaves_channels_untouched() {
        let mut driver = FakeDriver::new();
        driver.failing[0] = true;
        let mut dal = layer(driver);
        dal.measure_round_trip();

        let temp = dal.channel(ChannelId(0)).unwrap();
        assert_eq!(temp.consecutive_invalid(), 0);
        assert_eq!(dal.stats().reads, 0);
        assert_eq!(dal.stats().invalid_reads, 0);
    }

    #[test]
    fn write_rejects_out_of_range_without_applying() {
        let mut dal = layer(FakeDriver::new());
        let err = dal.write(ChannelId(1), 150.0).unwrap_err();
        assert!(matches!(err, DalError::OutOfRange { .. }));
        assert!(dal.driver.written.is_empty());
        assert!(dal.write(ChannelId(1), f64::NAN).is_err());
    }

    #[test]
    fn write_rejects_sensor_channel() {
        let mut dal = layer(FakeDriver::new());
        assert_eq!(
            dal.write(ChannelId(0), 1.0),
            Err(DalError::NotWritable {
                channel: ChannelId(0)
            })
        );
    }

    #[test]
    fn drive_safe_writes_every_actuator() {
        let mut dal = layer(FakeDriver::new());
        dal.write(ChannelId(1), 80.0).unwrap();
        assert!(dal.drive_safe().is_empty());
        assert_eq!(dal.driver.written.last(), Some(&(ChannelId(1), 0.0)));
        assert_eq!(dal.channel(ChannelId(1)).unwrap().value, 0.0);
    }

    #[test]
    fn rejects_duplicate_channel_names() {
        struct Dup;
        impl DeviceDriver for Dup {
            fn discover(&mut self) -> Vec<ChannelSpec> {
                vec![
                    ChannelSpec::sensor("t", Unit::Celsius, 0.0, 1.0),
                    ChannelSpec::sensor("t", Unit::Celsius, 0.0, 1.0),
                ]
            }
            fn set_timeout(&mut self, _timeout: Duration) {}
            fn read(&mut self, _channel: ChannelId) -> Result<f64, DriverError> {
                Ok(0.0)
            }
            fn write(&mut self, _channel: ChannelId, _value: f64) -> Result<(), DriverError> {
                Ok(())
            }
        }
        let res = DeviceLayer::new(Dup, DalConfig::default(), TimeBase::new());
        assert!(matches!(res, Err(ConfigError::DuplicateChannel(_))));
    }
}
