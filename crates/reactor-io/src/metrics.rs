//! Prometheus metrics for the reactor engine.
//!
//! Counters mirror the engine's execution statistics; gauges carry the
//! latest published snapshot.

use prometheus::{
    Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::LazyLock;
use std::thread;
use tiny_http::{Response, Server};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Scheduler Metrics
// ============================================================================

/// Total ticks executed
pub static TICKS_EXECUTED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new("reactor_ticks_executed_total", "Total ticks executed").unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Ticks that overran their period
pub static TICKS_MISSED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "reactor_ticks_missed_total",
        "Ticks that overran their period (missed deadlines)",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Tick start jitter distribution in microseconds
pub static TICK_JITTER_US: LazyLock<Histogram> = LazyLock::new(|| {
    let histogram = Histogram::with_opts(
        HistogramOpts::new(
            "reactor_tick_jitter_us",
            "Tick start lateness against its schedule, in microseconds",
        )
        .buckets(vec![
            10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
        ]),
    )
    .unwrap();
    REGISTRY.register(Box::new(histogram.clone())).unwrap();
    histogram
});

// ============================================================================
// Safety Metrics
// ============================================================================

/// Engine state (0=idle,1=running,2=safety_stop,3=fault)
pub static ENGINE_STATE: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        "reactor_engine_state",
        "Engine state (0=idle,1=running,2=safety_stop,3=fault)",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Entries into SafetyStop
pub static SAFETY_STOPS: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "reactor_safety_stops_total",
        "Interlock trips that moved the engine into SafetyStop",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Entries into Fault
pub static FAULTS: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "reactor_faults_total",
        "Device failures that moved the engine into Fault",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Per-rule threshold status (0=ok,1=warning,2=ok_again,3=tripped)
pub static RULE_STATUS: LazyLock<GaugeVec> = LazyLock::new(|| {
    let gauge = GaugeVec::new(
        Opts::new(
            "reactor_interlock_status",
            "Interlock rule status (0=ok,1=warning,2=ok_again,3=tripped)",
        ),
        &["rule"],
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Operator commands refused, by command
pub static COMMANDS_REJECTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "reactor_commands_rejected_total",
            "Operator commands refused by the engine",
        ),
        &["command"],
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

// ============================================================================
// Device Metrics
// ============================================================================

/// Reads that timed out or returned garbage
pub static INVALID_READS: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "reactor_invalid_reads_total",
        "Channel reads that timed out or returned a non-finite value",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Actuator writes the device refused or timed out on
pub static FAILED_WRITES: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "reactor_failed_writes_total",
        "Actuator writes that failed at the device",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Latest value per channel
pub static CHANNEL_VALUE: LazyLock<GaugeVec> = LazyLock::new(|| {
    let gauge = GaugeVec::new(
        Opts::new("reactor_channel_value", "Latest value of each channel"),
        &["channel", "unit"],
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Whether the latest value per channel is valid (1) or stale (0)
pub static CHANNEL_VALID: LazyLock<GaugeVec> = LazyLock::new(|| {
    let gauge = GaugeVec::new(
        Opts::new(
            "reactor_channel_valid",
            "Channel validity (1=valid, 0=invalid)",
        ),
        &["channel"],
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Control Metrics
// ============================================================================

/// Commanded setpoint per controlled actuator
pub static LOOP_SETPOINT: LazyLock<GaugeVec> = LazyLock::new(|| {
    let gauge = GaugeVec::new(
        Opts::new("reactor_loop_setpoint", "Setpoint of each control loop"),
        &["actuator"],
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Last controller output per controlled actuator
pub static LOOP_OUTPUT: LazyLock<GaugeVec> = LazyLock::new(|| {
    let gauge = GaugeVec::new(
        Opts::new("reactor_loop_output", "Last output of each control loop"),
        &["actuator"],
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Telemetry Metrics
// ============================================================================

/// Snapshots a slow subscriber did not receive
pub static SUBSCRIBER_DROPS: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "reactor_subscriber_dropped_total",
        "Snapshots not delivered because a subscriber queue was full",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Advance `counter` to a running total reported elsewhere.
pub fn sync_counter(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

// ============================================================================
// Metrics HTTP Server
// ============================================================================

/// Start the metrics HTTP server on the given address.
/// Returns a join handle for the server thread.
pub fn serve_metrics(bind_addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };

        tracing::info!("Metrics server listening on http://{}/metrics", bind_addr);

        for request in server.incoming_requests() {
            let response = route(request.url());
            let _ = request.respond(response);
        }
    })
}

fn route(path: &str) -> Response<std::io::Cursor<Vec<u8>>> {
    match path {
        "/metrics" => {
            let encoder = TextEncoder::new();
            let mut buffer = Vec::new();
            if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
                tracing::warn!("Failed to encode metrics: {}", e);
                return Response::from_string("Internal Server Error").with_status_code(500);
            }
            let response = Response::from_data(buffer);
            match tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"text/plain; version=0.0.4"[..]) {
                Ok(header) => response.with_header(header),
                Err(()) => response,
            }
        }
        "/health" => Response::from_string("OK"),
        "/ready" => {
            // Ready once a tick has run and the engine is not faulted.
            if TICKS_EXECUTED.get() > 0 && ENGINE_STATE.get() < 3.0 {
                Response::from_string("Ready")
            } else {
                Response::from_string("Not Ready").with_status_code(503)
            }
        }
        _ => Response::from_string("Not Found").with_status_code(404),
    }
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    let _ = TICKS_EXECUTED.get();
    let _ = TICKS_MISSED.get();
    let _ = TICK_JITTER_US.get_sample_count();
    let _ = ENGINE_STATE.get();
    let _ = SAFETY_STOPS.get();
    let _ = FAULTS.get();
    RULE_STATUS.reset();
    COMMANDS_REJECTED.reset();
    let _ = INVALID_READS.get();
    let _ = FAILED_WRITES.get();
    CHANNEL_VALUE.reset();
    CHANNEL_VALID.reset();
    LOOP_SETPOINT.reset();
    LOOP_OUTPUT.reset();
    let _ = SUBSCRIBER_DROPS.get();
}
