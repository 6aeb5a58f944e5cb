//! Public face of the engine: a handle owned by the caller
//! while a dedicated thread runs the [`Scheduler`].

use crate::channel::{ChannelCatalog, ChannelId};
use crate::config::{ReactorConfig, MIN_TICK_PERIOD};
use crate::control::ControlLoop;
use crate::dal::{DeviceDriver, DeviceLayer};
use crate::error::{CommandRejection, ConfigError, EngineError};
use crate::interlock::{admit, EngineState, Interlock, OperatorCommand};
use crate::scheduler::{Command, ExecutionStats, Scheduler, SharedState};
use crate::setpoint::{Setpoint, SetpointRange};
use crate::snapshot::Snapshot;
use crate::telemetry::{Subscription, TelemetryBuffer};
use crate::timebase::TimeBase;
use crossbeam_channel::{bounded, Sender, TrySendError};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub struct Engine {
    commands: Sender<Command>,
    telemetry: Arc<TelemetryBuffer>,
    shared: Arc<SharedState>,
    catalog: ChannelCatalog,
    limits: HashMap<ChannelId, (SetpointRange, f64)>,
    tick_period: Duration,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<ExecutionStats>>,
}

impl Engine {
    /// Assemble an engine without starting its thread. The caller drives
    /// the returned scheduler tick by tick.
    pub fn build<D: DeviceDriver>(
        driver: D,
        config: &ReactorConfig,
    ) -> Result<(Engine, Scheduler<D>), EngineError> {
        config.validate()?;
        let timebase = TimeBase::new();
        let mut dal = DeviceLayer::new(driver, config.dal_config(), timebase)?;
        let catalog = dal.catalog();
        let resolved = config.resolve(&catalog)?;

        let round_trip = dal.measure_round_trip();
        let min_period = round_trip.max(MIN_TICK_PERIOD);
        if config.tick_period() < min_period {
            return Err(ConfigError::CadenceTooFast {
                period_us: config.tick_period().as_micros() as u64,
                min_us: min_period.as_micros() as u64,
            }
            .into());
        }

        let control = ControlLoop::new(resolved.controllers, &catalog)?;
        let limits = catalog
            .iter()
            .filter_map(|(id, _)| control.limits(id).map(|l| (id, l)))
            .collect();
        let interlock = Interlock::new(resolved.rules);
        let telemetry = Arc::new(TelemetryBuffer::new(
            config.telemetry_capacity,
            config.subscriber_queue_depth,
        ));
        let (tx, rx) = bounded(config.command_queue_depth);
        let shared = Arc::new(SharedState::default());

        info!(
            "engine built: {} channels, {} interlock rules, {} control loops, {} ms tick (device round trip {} us)",
            catalog.len(),
            interlock.rules().len(),
            control.len(),
            config.tick_period_ms,
            round_trip.as_micros()
        );

        let scheduler = Scheduler::new(
            dal,
            interlock,
            control,
            Arc::clone(&telemetry),
            rx,
            Arc::clone(&shared),
            config.tick_period(),
            timebase,
        );
        let engine = Engine {
            commands: tx,
            telemetry,
            shared,
            catalog,
            limits,
            tick_period: config.tick_period(),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        };
        Ok((engine, scheduler))
    }

    /// Build the engine and start ticking on a dedicated thread.
    pub fn spawn<D: DeviceDriver + 'static>(
        driver: D,
        config: &ReactorConfig,
    ) -> Result<Engine, EngineError> {
        let (mut engine, mut scheduler) = Self::build(driver, config)?;
        let stop = Arc::clone(&engine.stop);
        let worker = std::thread::Builder::new()
            .name("reactor-tick".to_string())
            .spawn(move || {
                scheduler.run(&stop);
                scheduler.stats()
            })?;
        engine.worker = Some(worker);
        Ok(engine)
    }

    pub fn latest_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.telemetry.latest()
    }

    /// Retained snapshots newer than `sequence`, oldest first.
    pub fn snapshots_since(&self, sequence: u64) -> Vec<Arc<Snapshot>> {
        self.telemetry.since(sequence)
    }

    pub fn subscribe(&self) -> Subscription {
        self.telemetry.subscribe()
    }

    pub fn telemetry(&self) -> &TelemetryBuffer {
        &self.telemetry
    }

    /// Set the target of the loop driving `actuator`, with that loop's
    /// default tolerance.
    pub fn set_setpoint(&self, actuator: ChannelId, value: f64) -> Result<(), CommandRejection> {
        let (_, tolerance) = self.loop_limits(actuator)?;
        self.set_setpoint_with_tolerance(actuator, value, tolerance)
    }

    pub fn set_setpoint_with_tolerance(
        &self,
        actuator: ChannelId,
        value: f64,
        tolerance: f64,
    ) -> Result<(), CommandRejection> {
        let (range, _) = self.loop_limits(actuator)?;
        let setpoint = Setpoint::new(value, tolerance).validate(&range)?;
        self.send(Command::SetSetpoint { actuator, setpoint })
    }

    pub fn command_start(&self) -> Result<(), CommandRejection> {
        self.operator(OperatorCommand::Start)
    }

    pub fn command_stop(&self) -> Result<(), CommandRejection> {
        self.operator(OperatorCommand::Stop)
    }

    pub fn reset_safety_stop(&self) -> Result<(), CommandRejection> {
        self.operator(OperatorCommand::ResetSafetyStop)
    }

    /// State as of the most recently completed tick.
    pub fn engine_state(&self) -> EngineState {
        self.shared.state()
    }

    pub fn stats(&self) -> ExecutionStats {
        self.shared.stats()
    }

    pub fn channels(&self) -> &ChannelCatalog {
        &self.catalog
    }

    pub fn channel_id(&self, name: &str) -> Option<ChannelId> {
        self.catalog.id(name)
    }

    pub fn tick_period(&self) -> Duration {
        self.tick_period
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Stop ticking: the current tick completes, actuators are driven safe
    /// and a final snapshot is published. Returns the thread's statistics,
    /// or `None` if the engine was never spawned.
    pub fn shutdown(mut self) -> Option<ExecutionStats> {
        self.stop_worker()
    }

    fn stop_worker(&mut self) -> Option<ExecutionStats> {
        self.stop.store(true, Ordering::Relaxed);
        let worker = self.worker.take()?;
        match worker.join() {
            Ok(stats) => {
                info!(
                    "engine stopped after {} ticks ({} missed)",
                    stats.ticks_executed, stats.ticks_missed
                );
                Some(stats)
            }
            Err(_) => {
                warn!("tick thread panicked");
                None
            }
        }
    }

    fn operator(&self, command: OperatorCommand) -> Result<(), CommandRejection> {
        let checked = self.shared.admission();
        admit(command, checked.state)?;
        self.send(Command::Operator { command, checked })
    }

    fn loop_limits(&self, actuator: ChannelId) -> Result<(SetpointRange, f64), CommandRejection> {
        if self.catalog.spec(actuator).is_none() {
            return Err(CommandRejection::UnknownChannel(actuator));
        }
        self.limits
            .get(&actuator)
            .copied()
            .ok_or(CommandRejection::NotControlled(actuator))
    }

    fn send(&self, command: Command) -> Result<(), CommandRejection> {
        if self.stop.load(Ordering::Relaxed) {
            return Err(CommandRejection::EngineStopped);
        }
        self.commands.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => CommandRejection::QueueFull,
            TrySendError::Disconnected(_) => CommandRejection::EngineStopped,
        })
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop_worker();
    }
}
