use crate::channel::ChannelId;
use crate::control::ControlLoop;
use crate::dal::{DeviceDriver, DeviceLayer};
use crate::error::CommandRejection;
use crate::interlock::{EngineState, Interlock, OperatorCommand};
use crate::setpoint::{Setpoint, Validated};
use crate::snapshot::{ChannelSample, Snapshot};
use crate::telemetry::TelemetryBuffer;
use crate::timebase::TimeBase;
use crossbeam_channel::Receiver;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Requests handed from caller threads to the tick thread. Applied at the
/// start of the next tick, never mid-tick.
#[derive(Debug, Clone, Copy)]
pub enum Command {
    SetSetpoint {
        actuator: ChannelId,
        setpoint: Setpoint<Validated>,
    },
    Operator {
        command: OperatorCommand,
        /// What the caller was admitted against. A start or reset is
        /// refused if a safety stop was entered since.
        checked: Admission,
    },
}

/// Engine state and safety-stop count of one published tick, read together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub state: EngineState,
    pub safety_stops: u64,
}

impl Admission {
    fn pack(self) -> u64 {
        (self.safety_stops << 8) | u64::from(self.state.as_u8())
    }

    fn unpack(raw: u64) -> Self {
        Self {
            state: EngineState::from_u8((raw & 0xff) as u8),
            safety_stops: raw >> 8,
        }
    }
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
    pub ticks_executed: u64,
    pub ticks_missed: u64,
    pub max_jitter_us: u64,
    pub safety_stops: u64,
    pub faults: u64,
    pub invalid_reads: u64,
    pub failed_writes: u64,
    pub commands_refused: u64,
}

/// State the tick thread publishes for other threads to read.
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    /// Packed [`Admission`]; one load gives a consistent pair.
    admission: AtomicU64,
    ticks_executed: AtomicU64,
    ticks_missed: AtomicU64,
    max_jitter_us: AtomicU64,
    safety_stops: AtomicU64,
    faults: AtomicU64,
    invalid_reads: AtomicU64,
    failed_writes: AtomicU64,
    commands_refused: AtomicU64,
}

impl SharedState {
    pub(crate) fn state(&self) -> EngineState {
        self.admission().state
    }

    pub(crate) fn admission(&self) -> Admission {
        Admission::unpack(self.admission.load(Ordering::Acquire))
    }

    pub(crate) fn stats(&self) -> ExecutionStats {
        ExecutionStats {
            ticks_executed: self.ticks_executed.load(Ordering::Relaxed),
            ticks_missed: self.ticks_missed.load(Ordering::Relaxed),
            max_jitter_us: self.max_jitter_us.load(Ordering::Relaxed),
            safety_stops: self.safety_stops.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            invalid_reads: self.invalid_reads.load(Ordering::Relaxed),
            failed_writes: self.failed_writes.load(Ordering::Relaxed),
            commands_refused: self.commands_refused.load(Ordering::Relaxed),
        }
    }

    fn publish(&self, state: EngineState, stats: &ExecutionStats) {
        self.ticks_executed.store(stats.ticks_executed, Ordering::Relaxed);
        self.ticks_missed.store(stats.ticks_missed, Ordering::Relaxed);
        self.max_jitter_us.store(stats.max_jitter_us, Ordering::Relaxed);
        self.safety_stops.store(stats.safety_stops, Ordering::Relaxed);
        self.faults.store(stats.faults, Ordering::Relaxed);
        self.invalid_reads.store(stats.invalid_reads, Ordering::Relaxed);
        self.failed_writes.store(stats.failed_writes, Ordering::Relaxed);
        self.commands_refused.store(stats.commands_refused, Ordering::Relaxed);
        let admission = Admission {
            state,
            safety_stops: stats.safety_stops,
        };
        self.admission.store(admission.pack(), Ordering::Release);
    }
}

/// Fixed-cadence acquisition and control cycle. Sole writer of channel
/// values, engine state and controller accumulators.
pub struct Scheduler<D: DeviceDriver> {
    dal: DeviceLayer<D>,
    interlock: Interlock,
    control: ControlLoop,
    telemetry: Arc<TelemetryBuffer>,
    commands: Receiver<Command>,
    shared: Arc<SharedState>,
    period: Duration,
    timebase: TimeBase,
    stats: ExecutionStats,
    sequence: u64,
    last_tick_us: Option<u64>,
}

impl<D: DeviceDriver> Scheduler<D> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        dal: DeviceLayer<D>,
        interlock: Interlock,
        control: ControlLoop,
        telemetry: Arc<TelemetryBuffer>,
        commands: Receiver<Command>,
        shared: Arc<SharedState>,
        period: Duration,
        timebase: TimeBase,
    ) -> Self {
        Self {
            dal,
            interlock,
            control,
            telemetry,
            commands,
            shared,
            period,
            timebase,
            stats: ExecutionStats::default(),
            sequence: 0,
            last_tick_us: None,
        }
    }

    pub fn stats(&self) -> ExecutionStats {
        self.stats
    }

    pub fn state(&self) -> EngineState {
        self.interlock.state()
    }

    pub fn device_layer(&self) -> &DeviceLayer<D> {
        &self.dal
    }

    pub fn control(&self) -> &ControlLoop {
        &self.control
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Tick until `stop` is raised, then make the reactor safe.
    pub fn run(&mut self, stop: &AtomicBool) {
        let mut scheduled = Instant::now();
        let mut overrun = false;

        while !stop.load(Ordering::Relaxed) {
            let started = Instant::now();
            let jitter_us = started.saturating_duration_since(scheduled).as_micros() as u64;

            self.tick_with(overrun, jitter_us);

            scheduled += self.period;
            let now = Instant::now();
            if now > scheduled {
                // Start the next tick right away; do not try to catch up.
                self.stats.ticks_missed += 1;
                self.shared.publish(self.interlock.state(), &self.stats);
                warn!(
                    "tick {} overran its {} ms period by {} us",
                    self.sequence,
                    self.period.as_millis(),
                    now.duration_since(scheduled).as_micros()
                );
                scheduled = now;
                overrun = true;
            } else {
                overrun = false;
                std::thread::sleep(scheduled - now);
            }
        }

        self.finish();
    }

    /// One acquisition/control cycle, on time.
    pub fn tick(&mut self) -> Arc<Snapshot> {
        self.tick_with(false, 0)
    }

    fn tick_with(&mut self, overrun: bool, jitter_us: u64) -> Arc<Snapshot> {
        let timestamp_us = self.timebase.now_us();
        let dt_s = self
            .last_tick_us
            .map(|prev| timestamp_us.saturating_sub(prev) as f64 / 1_000_000.0)
            .unwrap_or(0.0);
        self.last_tick_us = Some(timestamp_us);
        self.sequence += 1;

        self.apply_commands();
        self.dal.step(dt_s);

        // (a) acquire
        for i in 0..self.dal.list_channels().len() {
            let _ = self.dal.read(ChannelId(i as u16));
        }
        let acquired = self.build_snapshot(timestamp_us, self.interlock.state(), overrun, jitter_us);

        // (b) interlock
        let exhausted = self.dal.exhausted_channel();
        let verdict = self.interlock.evaluate(&acquired, exhausted);
        let transition = self.interlock.apply(verdict);

        if transition.drive_all_safe {
            self.stats.faults += 1;
            for err in self.dal.drive_safe() {
                error!("failed to drive actuator safe: {}", err);
            }
        }
        if transition.to == EngineState::SafetyStop && transition.from != EngineState::SafetyStop {
            self.stats.safety_stops += 1;
        }
        for action in &transition.actions {
            if let Err(err) = self.dal.write(action.channel, action.value) {
                error!("safe-state action failed: {}", err);
            }
        }

        // (c) control
        if transition.to == EngineState::Running {
            if transition.entered_running() {
                debug!("entering Running, resetting controller history");
                self.control.reset();
            }
            for (actuator, output) in self.control.compute(&acquired) {
                if let Err(err) = self.dal.write(actuator, output) {
                    warn!("control write failed: {}", err);
                }
            }
        } else {
            self.control.suspend();
        }

        // (d) publish post-write state
        let mut published = self.build_snapshot(timestamp_us, transition.to, overrun, jitter_us);
        published.loops = self.control.statuses(&published);

        let dal_stats = self.dal.stats();
        self.stats.ticks_executed += 1;
        self.stats.max_jitter_us = self.stats.max_jitter_us.max(jitter_us);
        self.stats.invalid_reads = dal_stats.invalid_reads;
        self.stats.failed_writes = dal_stats.failed_writes;
        self.shared.publish(transition.to, &self.stats);

        self.telemetry.publish(published)
    }

    /// Drive every actuator safe and publish a final snapshot.
    pub fn finish(&mut self) -> Arc<Snapshot> {
        info!("scheduler stopping, driving actuators to safe values");
        self.interlock.halt();
        self.control.suspend();
        for err in self.dal.drive_safe() {
            error!("failed to drive actuator safe on shutdown: {}", err);
        }
        self.sequence += 1;
        let timestamp_us = self.timebase.now_us();
        let mut last = self.build_snapshot(timestamp_us, self.interlock.state(), false, 0);
        last.loops = self.control.statuses(&last);
        self.shared.publish(self.interlock.state(), &self.stats);
        self.telemetry.publish(last)
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            let result = match command {
                Command::SetSetpoint { actuator, setpoint } => {
                    debug!("setpoint {} -> {}", actuator, setpoint.value());
                    self.control.set_setpoint(actuator, setpoint)
                }
                Command::Operator { command, checked } if self.is_stale(command, checked) => {
                    Err(CommandRejection::IllegalTransition {
                        command: command.name(),
                        state: self.interlock.state(),
                    })
                }
                Command::Operator {
                    command: OperatorCommand::Stop,
                    ..
                } => {
                    self.interlock.request_stop();
                    Ok(())
                }
                Command::Operator {
                    command: OperatorCommand::Start,
                    ..
                } => self.interlock.request_start(),
                Command::Operator {
                    command: OperatorCommand::ResetSafetyStop,
                    ..
                } => self.interlock.reset(),
            };
            if let Err(rejection) = result {
                // State moved between admission and application.
                self.stats.commands_refused += 1;
                warn!("command {:?} refused at tick start: {}", command, rejection);
            }
        }
    }

    /// A reset must have been issued against the safety stop now in force,
    /// and a start must not predate any safety stop.
    fn is_stale(&self, command: OperatorCommand, checked: Admission) -> bool {
        let stop_since = checked.safety_stops != self.stats.safety_stops;
        match command {
            OperatorCommand::Stop => false,
            OperatorCommand::Start => stop_since,
            OperatorCommand::ResetSafetyStop => {
                stop_since || checked.state != EngineState::SafetyStop
            }
        }
    }

    fn build_snapshot(&self, timestamp_us: u64, state: EngineState, overrun: bool, jitter_us: u64) -> Snapshot {
        let channels = self
            .dal
            .list_channels()
            .iter()
            .map(|c| ChannelSample {
                id: c.id,
                name: c.spec.name.clone(),
                unit: c.spec.unit,
                kind: c.spec.kind,
                value: c.value,
                valid: c.valid,
                updated_us: c.last_update_us,
            })
            .collect();
        Snapshot {
            sequence: self.sequence,
            timestamp_us,
            unix_us: self.timebase.to_unix_us(timestamp_us),
            state,
            channels,
            rules: self.interlock.rule_statuses(),
            loops: Vec::new(),
            trip: self.interlock.trip_cause().map(str::to_string),
            fault: self.interlock.fault_channel(),
            overrun,
            jitter_us,
        }
    }
}
