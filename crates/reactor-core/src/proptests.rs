#[cfg(test)]
mod properties {
    use crate::channel::{ChannelCatalog, ChannelId, ChannelKind, ChannelSpec, Unit};
    use crate::control::{PidController, PidGains, PidState};
    use crate::error::CommandRejection;
    use crate::interlock::{EngineState, Interlock, InterlockRule, Predicate, SafeAction};
    use crate::setpoint::{Setpoint, SetpointRange};
    use crate::snapshot::{ChannelSample, Snapshot};
    use crate::telemetry::TelemetryBuffer;
    use proptest::prelude::*;

    fn interlock() -> Interlock {
        let catalog = ChannelCatalog::new(vec![
            ChannelSpec::sensor("temp", Unit::Celsius, -20.0, 250.0),
            ChannelSpec::actuator("heater", Unit::Percent, 0.0, 100.0, 0.0),
        ]);
        let rule = InterlockRule {
            name: "over_temperature".to_string(),
            predicate: Predicate::Above {
                channel: "temp".to_string(),
                limit: 90.0,
                warn: Some(80.0),
            },
            actions: vec![SafeAction {
                channel: "heater".to_string(),
                value: 0.0,
            }],
        };
        Interlock::new(vec![rule.resolve(&catalog).unwrap()])
    }

    fn snapshot(sequence: u64, temp: f64, valid: bool) -> Snapshot {
        Snapshot {
            sequence,
            timestamp_us: sequence * 100_000,
            unix_us: 0,
            state: EngineState::Idle,
            channels: vec![ChannelSample {
                id: ChannelId(0),
                name: "temp".to_string(),
                unit: Unit::Celsius,
                kind: ChannelKind::Sensor,
                value: temp,
                valid,
                updated_us: 0,
            }],
            rules: Vec::new(),
            loops: Vec::new(),
            trip: None,
            fault: None,
            overrun: false,
            jitter_us: 0,
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(2000))]

        // Property: two interlocks fed the same readings and commands agree on every tick
        #[test]
        fn interlock_is_deterministic(
            ticks in prop::collection::vec((-20.0f64..150.0, any::<bool>(), any::<bool>()), 1..40),
        ) {
            let mut a = interlock();
            let mut b = interlock();
            for (i, (temp, valid, start)) in ticks.into_iter().enumerate() {
                if start {
                    let _ = a.request_start();
                    let _ = b.request_start();
                }
                let snap = snapshot(i as u64, temp, valid);
                let ta = a.apply(a.evaluate(&snap, None));
                let tb = b.apply(b.evaluate(&snap, None));
                prop_assert_eq!(ta, tb);
                prop_assert_eq!(a.rule_statuses(), b.rule_statuses());
            }
        }

        // Property: a valid reading above the limit always ends in SafetyStop
        #[test]
        fn over_limit_always_trips(temp in 90.001f64..250.0, start in any::<bool>()) {
            let mut il = interlock();
            if start {
                il.request_start().unwrap();
            }
            let transition = il.apply(il.evaluate(&snapshot(1, temp, true), None));
            prop_assert_eq!(transition.to, EngineState::SafetyStop);
            prop_assert_eq!(transition.actions.len(), 1);
        }

        // Property: an invalid reading never fires a rule, whatever its value
        #[test]
        fn invalid_reading_never_trips(temp in -1000.0f64..1000.0) {
            let il = interlock();
            let verdict = il.evaluate(&snapshot(1, temp, false), None);
            prop_assert!(verdict.fired.is_empty());
        }

        // Property: setpoints inside the range are accepted, outside are rejected
        #[test]
        fn setpoint_range_is_enforced(value in -500.0f64..500.0, tolerance in 0.0f64..10.0) {
            let range = SetpointRange::new(0.0, 200.0);
            let result = Setpoint::new(value, tolerance).validate(&range);
            if (0.0..=200.0).contains(&value) {
                prop_assert!(result.is_ok(), "rejected in-range value {}", value);
            } else {
                let is_out_of_range = matches!(result, Err(CommandRejection::OutOfRange { .. }));
                prop_assert!(is_out_of_range, "expected OutOfRange, got {:?}", result);
            }
        }

        // Property: PID output never leaves the actuator range
        #[test]
        fn pid_output_is_clamped(
            setpoint in -1000.0f64..1000.0,
            measurements in prop::collection::vec(-1000.0f64..1000.0, 1..50),
            kp in 0.0f64..50.0,
            ki in 0.0f64..10.0,
            kd in 0.0f64..5.0,
        ) {
            let pid = PidController::new(
                PidGains { kp, ki, kd, integral_limit: 100.0 },
                0.0,
                100.0,
            ).unwrap();
            let mut state = PidState::default();
            for (i, m) in measurements.into_iter().enumerate() {
                let out = pid.update(&mut state, setpoint, m, i as u64 * 100_000);
                prop_assert!((0.0..=100.0).contains(&out), "output {} out of range", out);
                prop_assert!(state.integral.abs() <= 100.0);
            }
        }

        // Property: the ring never exceeds capacity and replays strictly newer snapshots in order
        #[test]
        fn telemetry_ring_is_bounded(capacity in 1usize..32, published in 0u64..100, from in 0u64..100) {
            let buf = TelemetryBuffer::new(capacity, 4);
            for seq in 1..=published {
                buf.publish(snapshot(seq, 20.0, true));
            }
            prop_assert!(buf.len() <= capacity);
            let replay = buf.since(from);
            prop_assert!(replay.iter().all(|s| s.sequence > from));
            prop_assert!(replay.windows(2).all(|w| w[0].sequence + 1 == w[1].sequence));
            if let Some(last) = replay.last() {
                prop_assert_eq!(last.sequence, published);
            }
        }
    }
}
