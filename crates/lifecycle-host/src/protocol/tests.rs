//! Unit tests for protocol types and encoding.

use rstest::rstest;
use serde_json::json;

use super::encoding::to_compat_string;
use super::*;

fn payload(value: serde_json::Value) -> Payload {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected object fixture, got {other}"),
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[test]
fn parses_request_with_payload() {
    let request = EventRequest::parse(r#"{"Event":"OnCreate","Data":{"foo":"20"}}"#)
        .expect("request should parse");
    assert_eq!(request.event(), "OnCreate");
    assert_eq!(request.kind(), EventKind::Lifecycle(Lifecycle::Create));
    assert_eq!(request.data(), Some(&payload(json!({"foo": "20"}))));
}

#[rstest]
#[case::null_data(r#"{"Event":"OnDestroy","Data":null}"#)]
#[case::absent_data(r#"{"Event":"OnDestroy"}"#)]
fn missing_payload_is_none(#[case] line: &str) {
    let request = EventRequest::parse(line).expect("request should parse");
    assert!(request.data().is_none());
}

#[test]
fn trims_surrounding_whitespace() {
    let request =
        EventRequest::parse("  {\"Event\":\"OnReceive\",\"Data\":{}}\r\n").expect("parse");
    assert_eq!(request.kind(), EventKind::Lifecycle(Lifecycle::Receive));
}

#[test]
fn ignores_unrecognised_fields() {
    let request = EventRequest::parse(r#"{"Event":"OnReceive","Data":{},"Trace":"abc"}"#)
        .expect("parse");
    assert_eq!(request.event(), "OnReceive");
}

#[rstest]
#[case::empty("")]
#[case::whitespace("   ")]
#[case::not_json("not json")]
#[case::array(r#"["OnCreate"]"#)]
#[case::positional_request(r#"["OnCreate", {"a": 1}]"#)]
#[case::missing_event(r#"{"Data":{}}"#)]
#[case::numeric_event(r#"{"Event":7,"Data":{}}"#)]
#[case::list_payload(r#"{"Event":"OnCreate","Data":[1,2]}"#)]
fn rejects_malformed_lines(#[case] line: &str) {
    let result = EventRequest::parse(line);
    assert!(
        matches!(result, Err(DispatchError::Protocol { .. })),
        "expected protocol error for {line:?}, got {result:?}"
    );
}

#[test]
fn protocol_error_mentions_offending_line() {
    let error = EventRequest::parse("{oops").expect_err("should fail");
    assert!(
        error.to_string().contains("{oops"),
        "expected line in message: {error}"
    );
}

// ---------------------------------------------------------------------------
// Event classification
// ---------------------------------------------------------------------------

#[rstest]
#[case("OnCreate", Lifecycle::Create, "on_create", 1)]
#[case("OnReceive", Lifecycle::Receive, "on_receive", 1)]
#[case("OnDestroy", Lifecycle::Destroy, "on_destroy", 0)]
fn lifecycle_names_round_trip(
    #[case] event: &str,
    #[case] expected: Lifecycle,
    #[case] function: &str,
    #[case] arity: usize,
) {
    let lifecycle = Lifecycle::from_event_name(event).expect("known event");
    assert_eq!(lifecycle, expected);
    assert_eq!(lifecycle.event_name(), event);
    assert_eq!(lifecycle.function_name(), function);
    assert_eq!(lifecycle.arity(), arity);
    assert_eq!(lifecycle.to_string(), event);
}

#[rstest]
#[case::unknown("OnFoo")]
#[case::wrong_case("oncreate")]
#[case::function_name("on_create")]
fn unrecognised_names_are_unknown(#[case] event: &str) {
    assert_eq!(EventKind::parse(event), EventKind::Unknown(event.to_owned()));
}

// ---------------------------------------------------------------------------
// Responses and encoding
// ---------------------------------------------------------------------------

#[test]
fn result_data_is_double_encoded() {
    let response =
        EventResponse::result("OnCreate", &payload(json!({"x": 1}))).expect("encode result");
    assert_eq!(response.data(), r#"{"x": 1}"#);
    assert_eq!(response.status(), ResponseStatus::Ok);

    let line = to_compat_string(&response).expect("encode response");
    assert_eq!(
        line,
        r#"{"Event": "OnCreate", "Status": "ok", "Data": "{\"x\": 1}"}"#
    );
}

#[test]
fn error_response_carries_fixed_marker() {
    let line = to_compat_string(&EventResponse::error("OnFoo")).expect("encode");
    assert_eq!(
        line,
        r#"{"Event": "OnFoo", "Status": "error", "Data": "see error log for details"}"#
    );
}

#[test]
fn output_event_becomes_standard_output_response() {
    let response = EventResponse::from(OutputEvent::new("hello"));
    assert_eq!(response.event(), STANDARD_OUTPUT_EVENT);
    let line = to_compat_string(&response).expect("encode");
    assert_eq!(
        line,
        r#"{"Event": "StandardOutput", "Status": "ok", "Data": "hello"}"#
    );
}

#[test]
fn default_result_keeps_field_order() {
    let encoded = to_compat_string(&default_result()).expect("encode");
    assert_eq!(
        encoded,
        r#"{"status": "default", "message": "No result generated"}"#
    );
}

#[rstest]
#[case::nested(json!({"a": [1, 2], "b": {"c": null}}), r#"{"a": [1, 2], "b": {"c": null}}"#)]
#[case::float(json!({"v": 20.0}), r#"{"v": 20.0}"#)]
#[case::non_ascii(json!({"k": "naïve"}), r#"{"k": "na\u00efve"}"#)]
#[case::astral(json!({"k": "😀"}), r#"{"k": "\ud83d\ude00"}"#)]
#[case::control(json!({"k": "a\nb"}), r#"{"k": "a\nb"}"#)]
fn compat_encoding_matches_wire_format(#[case] value: serde_json::Value, #[case] expected: &str) {
    assert_eq!(to_compat_string(&value).expect("encode"), expected);
}

#[test]
fn encoded_responses_decode_back() {
    let response =
        EventResponse::result("OnReceive", &payload(json!({"foobar": "20.0_10.0"})))
            .expect("encode result");
    let line = to_compat_string(&response).expect("encode");
    let decoded: EventResponse = serde_json::from_str(&line).expect("decode");
    assert_eq!(decoded, response);

    let inner: serde_json::Value = serde_json::from_str(decoded.data()).expect("decode data");
    assert_eq!(inner["foobar"], "20.0_10.0");
}
