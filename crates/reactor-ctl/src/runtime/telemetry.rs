use crate::infra::audit::{AuditEventType, AuditLogger, StateTransitionDetails};
use reactor_core::{EngineState, ExecutionStats, Snapshot, Subscription, ThresholdStatus};
use reactor_io::metrics::{
    init_metrics, serve_metrics, sync_counter, CHANNEL_VALID, CHANNEL_VALUE, ENGINE_STATE,
    FAILED_WRITES, FAULTS, INVALID_READS, LOOP_OUTPUT, LOOP_SETPOINT, RULE_STATUS, SAFETY_STOPS,
    SUBSCRIBER_DROPS, TICKS_EXECUTED, TICKS_MISSED, TICK_JITTER_US,
};
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

pub fn init() {
    init_metrics();
}

pub fn start_metrics_server(addr: &Option<String>) -> Option<thread::JoinHandle<()>> {
    addr.as_ref().map(|addr| {
        info!(addr = %addr, "Starting metrics server");
        serve_metrics(addr.clone())
    })
}

/// Mirror the engine's running totals into the Prometheus counters.
pub fn record_stats(stats: &ExecutionStats) {
    sync_counter(&TICKS_EXECUTED, stats.ticks_executed);
    sync_counter(&TICKS_MISSED, stats.ticks_missed);
    sync_counter(&SAFETY_STOPS, stats.safety_stops);
    sync_counter(&FAULTS, stats.faults);
    sync_counter(&INVALID_READS, stats.invalid_reads);
    sync_counter(&FAILED_WRITES, stats.failed_writes);
}

fn status_code(status: ThresholdStatus) -> f64 {
    match status {
        ThresholdStatus::Ok => 0.0,
        ThresholdStatus::Warning => 1.0,
        ThresholdStatus::OkAgain => 2.0,
        ThresholdStatus::Tripped => 3.0,
    }
}

pub fn observe_snapshot(snapshot: &Snapshot) {
    ENGINE_STATE.set(f64::from(snapshot.state.as_u8()));
    TICK_JITTER_US.observe(snapshot.jitter_us as f64);
    for channel in &snapshot.channels {
        CHANNEL_VALUE
            .with_label_values(&[channel.name.as_str(), channel.unit.symbol()])
            .set(channel.value);
        CHANNEL_VALID
            .with_label_values(&[channel.name.as_str()])
            .set(if channel.valid { 1.0 } else { 0.0 });
    }
    for rule in &snapshot.rules {
        RULE_STATUS
            .with_label_values(&[rule.name.as_str()])
            .set(status_code(rule.status));
    }
    for status in &snapshot.loops {
        let Some(actuator) = snapshot.channel(status.actuator) else {
            continue;
        };
        if let Some(setpoint) = status.setpoint {
            LOOP_SETPOINT
                .with_label_values(&[actuator.name.as_str()])
                .set(setpoint);
        }
        LOOP_OUTPUT
            .with_label_values(&[actuator.name.as_str()])
            .set(status.output.unwrap_or(0.0));
    }
}

/// Follow published snapshots until the engine shuts down: update gauges
/// and record state changes.
pub fn start_snapshot_observer(
    subscription: Subscription,
    audit: Option<Arc<AuditLogger>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        // Every engine starts Idle; the first snapshot may already be later.
        let mut last_state = Some(EngineState::Idle);
        while let Some(snapshot) = subscription.recv() {
            observe_snapshot(&snapshot);
            sync_counter(&SUBSCRIBER_DROPS, subscription.dropped());

            if let Some(previous) = last_state.filter(|s| *s != snapshot.state) {
                let fault = snapshot
                    .fault
                    .and_then(|id| snapshot.channel(id))
                    .map(|c| c.name.clone());
                match snapshot.state {
                    EngineState::SafetyStop | EngineState::Fault => {
                        warn!(
                            from = ?previous,
                            to = ?snapshot.state,
                            trip = snapshot.trip.as_deref().unwrap_or(""),
                            fault = fault.as_deref().unwrap_or(""),
                            "Engine state changed"
                        );
                    }
                    _ => info!(from = ?previous, to = ?snapshot.state, "Engine state changed"),
                }
                if let Some(logger) = &audit {
                    let details = StateTransitionDetails {
                        sequence: snapshot.sequence,
                        from: previous,
                        to: snapshot.state,
                        trip: snapshot.trip.clone(),
                        fault,
                    };
                    if let Err(e) = logger.record(AuditEventType::StateTransition, details) {
                        error!(error = %e, "Failed to write audit entry");
                    }
                }
            }
            last_state = Some(snapshot.state);
        }
    })
}
