use agent_relay::agent::{parse_stream_line, StreamEvent, TextAccumulator};

#[test]
fn parses_text_delta() {
    let line = r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}}"#;
    assert_eq!(parse_stream_line(line), StreamEvent::TextDelta("Hel".into()));
}

#[test]
fn ignores_non_text_deltas() {
    let line = r#"{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{"}}}"#;
    assert_eq!(parse_stream_line(line), StreamEvent::Unknown);
    let start = r#"{"type":"stream_event","event":{"type":"message_start"}}"#;
    assert_eq!(parse_stream_line(start), StreamEvent::Unknown);
}

#[test]
fn parses_turn_message_text_blocks() {
    let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hello "},{"type":"tool_use","name":"Bash"},{"type":"text","text":"world"}]}}"#;
    assert_eq!(
        parse_stream_line(line),
        StreamEvent::TurnMessage("Hello world".into())
    );

    let tools_only = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Bash"}]}}"#;
    assert_eq!(parse_stream_line(tools_only), StreamEvent::Unknown);
}

#[test]
fn parses_result() {
    let line = r#"{"type":"result","subtype":"success","is_error":false,"result":"Done."}"#;
    assert_eq!(
        parse_stream_line(line),
        StreamEvent::Result {
            text: "Done.".into(),
            is_error: false
        }
    );
    let failed = r#"{"type":"result","is_error":true,"result":"quota"}"#;
    assert_eq!(
        parse_stream_line(failed),
        StreamEvent::Result {
            text: "quota".into(),
            is_error: true
        }
    );
}

#[test]
fn malformed_and_unknown_lines_are_ignored() {
    for line in [
        "",
        "   ",
        "not json",
        "{\"type\":",
        r#"{"no_type":1}"#,
        r#"{"type":"system","subtype":"init"}"#,
        r#"{"type":"result","result":42}"#,
    ] {
        assert_eq!(parse_stream_line(line), StreamEvent::Unknown, "line: {line}");
    }
}

#[test]
fn deltas_accumulate_and_report_changes() {
    let mut acc = TextAccumulator::new();
    assert!(acc.push(&StreamEvent::TextDelta("Hello".into())));
    assert!(acc.push(&StreamEvent::TextDelta(", world".into())));
    assert!(!acc.push(&StreamEvent::TextDelta(String::new())));
    assert!(!acc.push(&StreamEvent::Unknown));
    assert_eq!(acc.text(), "Hello, world");
}

#[test]
fn turn_message_only_fills_an_empty_buffer() {
    let mut acc = TextAccumulator::new();
    assert!(acc.push(&StreamEvent::TurnMessage("whole turn".into())));
    assert_eq!(acc.text(), "whole turn");

    let mut acc = TextAccumulator::new();
    acc.push(&StreamEvent::TextDelta("streamed".into()));
    assert!(!acc.push(&StreamEvent::TurnMessage("streamed twice".into())));
    assert_eq!(acc.text(), "streamed");
}

#[test]
fn result_wins_for_final_text() {
    let mut acc = TextAccumulator::new();
    acc.push(&StreamEvent::TextDelta("  draft  ".into()));
    assert_eq!(acc.clone().into_final(), "draft");

    assert!(!acc.push(&StreamEvent::Result {
        text: " final answer \n".into(),
        is_error: false
    }));
    assert_eq!(acc.text(), "  draft  ");
    assert_eq!(acc.into_final(), "final answer");
}

#[test]
fn restart_discards_the_abandoned_attempt() {
    let mut acc = TextAccumulator::new();
    assert!(!acc.push(&StreamEvent::Restarted));

    acc.push(&StreamEvent::TextDelta("stale partial".into()));
    acc.push(&StreamEvent::Result {
        text: "stale".into(),
        is_error: true,
    });
    assert!(acc.push(&StreamEvent::Restarted));
    assert_eq!(acc.text(), "");

    // The turn-message fallback applies again to the retry.
    assert!(acc.push(&StreamEvent::TurnMessage("fresh".into())));
    assert_eq!(acc.into_final(), "fresh");
}
