use reactor_core::sim::{HEATER, REACTOR_TEMP};
use reactor_core::{CommandRejection, Engine, EngineState, ReactorConfig, SimulatedReactor};
use reactor_io::protocol::{
    DispatchError, OperatorMessage, ProtocolError, ProtocolVersion, ReplyMsg, SetSetpointMsg,
    SnapshotMsg,
};

#[test]
fn parses_set_setpoint_message() {
    let raw = r#"{
        "type":"set_setpoint",
        "protocol_version":{"major":1,"minor":0},
        "channel":"heater",
        "value":65.0,
        "tolerance":0.5
    }"#;

    let msg = OperatorMessage::parse(raw).expect("set_setpoint should parse");
    assert_eq!(
        msg,
        OperatorMessage::SetSetpoint(SetSetpointMsg {
            channel: "heater".to_string(),
            value: 65.0,
            tolerance: Some(0.5),
        })
    );
}

#[test]
fn parses_state_commands() {
    assert_eq!(OperatorMessage::parse(r#"{"type":"start"}"#), Ok(OperatorMessage::Start));
    assert_eq!(OperatorMessage::parse(r#"{"type":"stop"}"#), Ok(OperatorMessage::Stop));
    assert_eq!(OperatorMessage::parse(r#"{"type":"reset"}"#), Ok(OperatorMessage::Reset));
}

#[test]
fn rejects_bad_lines() {
    assert!(matches!(
        OperatorMessage::parse("not json"),
        Err(ProtocolError::Malformed(_))
    ));
    assert_eq!(
        OperatorMessage::parse(r#"{"value":1}"#),
        Err(ProtocolError::MissingType)
    );
    assert_eq!(
        OperatorMessage::parse(r#"{"type":"explode"}"#),
        Err(ProtocolError::UnknownType("explode".to_string()))
    );
    assert_eq!(
        OperatorMessage::parse(r#"{"type":"start","protocol_version":{"major":2,"minor":0}}"#),
        Err(ProtocolError::UnsupportedVersion(ProtocolVersion { major: 2, minor: 0 }))
    );
    assert!(matches!(
        OperatorMessage::parse(r#"{"type":"set_setpoint","channel":"heater"}"#),
        Err(ProtocolError::Malformed(_))
    ));
}

#[test]
fn dispatch_reaches_engine() {
    let (engine, mut scheduler) = Engine::build(SimulatedReactor::new(), &ReactorConfig::default())
        .expect("engine builds");

    OperatorMessage::parse(r#"{"type":"set_setpoint","channel":"heater","value":70.0}"#)
        .unwrap()
        .dispatch(&engine)
        .unwrap();
    OperatorMessage::Start.dispatch(&engine).unwrap();
    let snap = scheduler.tick();
    assert_eq!(snap.state, EngineState::Running);
    let heater = engine.channel_id(HEATER).unwrap();
    let status = snap.loops.iter().find(|l| l.actuator == heater).unwrap();
    assert_eq!(status.setpoint, Some(70.0));

    let err = OperatorMessage::parse(r#"{"type":"set_setpoint","channel":"heater","value":900.0}"#)
        .unwrap()
        .dispatch(&engine)
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Rejected(CommandRejection::OutOfRange { .. })
    ));

    let err = OperatorMessage::parse(r#"{"type":"set_setpoint","channel":"boiler","value":1.0}"#)
        .unwrap()
        .dispatch(&engine)
        .unwrap_err();
    assert_eq!(err, DispatchError::UnknownChannel("boiler".to_string()));
}

#[test]
fn snapshot_message_is_keyed_by_name() {
    let (_engine, mut scheduler) =
        Engine::build(SimulatedReactor::new(), &ReactorConfig::default()).expect("engine builds");
    let snap = scheduler.tick();

    let value = serde_json::to_value(SnapshotMsg::from_snapshot(&snap)).unwrap();
    assert_eq!(value["type"], "snapshot");
    assert_eq!(value["protocol_version"]["major"], 1);
    assert_eq!(value["sequence"], 1);
    assert_eq!(value["state"], "idle");
    assert_eq!(value["channels"][REACTOR_TEMP]["unit"], "°C");
    assert_eq!(value["channels"][REACTOR_TEMP]["valid"], true);
    assert_eq!(value["rules"]["over_temperature"], "ok");
    assert_eq!(value["loops"][0]["actuator"], HEATER);
    assert_eq!(value["fault"], serde_json::Value::Null);
}

#[test]
fn reply_omits_error_when_accepted() {
    let ok = serde_json::to_value(ReplyMsg::accepted("start", EngineState::Idle)).unwrap();
    assert_eq!(ok["ok"], true);
    assert!(ok.get("error").is_none());

    let rejected = ReplyMsg::rejected("start", EngineState::Fault, "start is not allowed");
    let value = serde_json::to_value(rejected).unwrap();
    assert_eq!(value["ok"], false);
    assert_eq!(value["state"], "fault");
}
