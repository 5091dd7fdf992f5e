// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn parses_usage_record() {
    let record = StreamRecord::parse_line(
        r#"{"type":"assistant","usage":{"input_tokens":120,"output_tokens":30}}"#,
    )
    .unwrap();
    assert_eq!(record.kind, "assistant");
    assert_eq!(record.tokens(), 150);
}

#[test]
fn parses_tool_use_record() {
    let record = StreamRecord::parse_line(
        r#"{"type":"assistant","tool_use":{"name":"Bash","input":{"command":"ls"}}}"#,
    )
    .unwrap();
    let tool = record.tool_use.unwrap();
    assert_eq!(tool.name, "Bash");
    assert_eq!(tool.input["command"], "ls");
}

#[test]
fn tolerates_unknown_fields_and_kinds() {
    let record = StreamRecord::parse_line(
        r#"{"type":"system","subtype":"init","session_id":"abc","model":"opus"}"#,
    )
    .unwrap();
    assert_eq!(record.kind, "system");
    assert_eq!(record.subtype.as_deref(), Some("init"));
    assert_eq!(record.tokens(), 0);
}

#[test]
fn non_json_lines_read_as_none() {
    assert!(StreamRecord::parse_line("").is_none());
    assert!(StreamRecord::parse_line("   ").is_none());
    assert!(StreamRecord::parse_line("warning: something").is_none());
}

#[test]
fn result_error_only_on_error_subtype() {
    let ok = StreamRecord::parse_line(r#"{"type":"result","subtype":"success"}"#).unwrap();
    assert!(ok.is_result());
    assert!(ok.result_error().is_none());

    let failed =
        StreamRecord::parse_line(r#"{"type":"result","subtype":"error","text":"limit hit"}"#)
            .unwrap();
    assert_eq!(failed.result_error(), Some("limit hit"));

    let failed_no_text = StreamRecord::parse_line(r#"{"type":"result","subtype":"error"}"#).unwrap();
    assert_eq!(
        failed_no_text.result_error(),
        Some("adapter reported an error")
    );

    let not_result = StreamRecord::parse_line(r#"{"type":"text","subtype":"error"}"#).unwrap();
    assert!(not_result.result_error().is_none());
}

#[test]
fn text_records_carry_text() {
    let record = StreamRecord::parse_line(r#"{"type":"text","text":"hello"}"#).unwrap();
    assert_eq!(record.text.as_deref(), Some("hello"));
}
