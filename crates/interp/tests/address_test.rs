//! ADDRESS routing tests: command dispatch, MATCHING collection, HEREDOCs,
//! and the RC/RESULT propagation contract.

use indexmap::IndexMap;
use rexon_interp::{
    handler_fn, AddressRegistration, CollectingOutput, HandlerError, Interpreter, RunError, Value,
};
use std::sync::{Arc, Mutex};

type Calls = Arc<Mutex<Vec<(String, Value)>>>;

/// Handler that records `(payload, params)` pairs and succeeds.
fn recording_target(interp: &mut Interpreter, name: &str) -> Calls {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let sink = calls.clone();
    let handler = handler_fn(move |command, params, _context| {
        sink.lock().unwrap().push((command.to_string(), params.clone()));
        Ok(Value::Number(0.0))
    });
    interp.register_address_target(name, AddressRegistration::new(handler));
    calls
}

fn pattern_of(params: &Value) -> Option<String> {
    params
        .lookup_segment("_addressMatchingPattern")
        .map(|v| v.to_display_string())
}

fn interp_with_output() -> (Interpreter, Arc<CollectingOutput>) {
    let output = CollectingOutput::new();
    let mut interp = Interpreter::new();
    interp.set_output_handler(output.clone());
    (interp, output)
}

#[tokio::test]
async fn test_quoted_command_under_current_address() {
    let (mut interp, _out) = interp_with_output();
    let calls = recording_target(&mut interp, "calculator");
    interp
        .run_source("ADDRESS calculator\n\"press 7\"\n\"press +\"", None)
        .await
        .unwrap();
    let recorded = calls.lock().unwrap();
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0].0, "press 7");
    assert_eq!(recorded[1].0, "press +");
}

#[tokio::test]
async fn test_one_shot_does_not_change_current_address() {
    let (mut interp, _out) = interp_with_output();
    let one = recording_target(&mut interp, "one");
    let two = recording_target(&mut interp, "two");
    let source = r#"
ADDRESS one
ADDRESS two "direct hit"
"back to one"
"#;
    interp.run_source(source, None).await.unwrap();
    assert_eq!(two.lock().unwrap().len(), 1);
    assert_eq!(two.lock().unwrap()[0].0, "direct hit");
    let one_calls = one.lock().unwrap();
    assert_eq!(one_calls.len(), 1);
    assert_eq!(one_calls[0].0, "back to one");
}

#[tokio::test]
async fn test_bare_command_without_target_fails() {
    let (mut interp, _out) = interp_with_output();
    let err = interp.run_source("\"orphan command\"", None).await.unwrap_err();
    assert!(matches!(err, RunError::NoActiveTarget { line: 1, .. }));
}

#[tokio::test]
async fn test_heredoc_dispatch_payload() {
    let (mut interp, _out) = interp_with_output();
    let calls = recording_target(&mut interp, "sqlengine");
    let source = "ADDRESS sqlengine\n<<SQL\nSELECT id\nFROM users\nSQL\n";
    interp.run_source(source, None).await.unwrap();
    let recorded = calls.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    // Lines strictly between the markers, joined by \n, no trailing newline.
    assert_eq!(recorded[0].0, "SELECT id\nFROM users");
}

#[tokio::test]
async fn test_matching_multiline_flushes_once_at_end_of_program() {
    let (mut interp, _out) = interp_with_output();
    let calls = recording_target(&mut interp, "sqlengine");
    let source = "ADDRESS sqlengine MATCHING MULTILINE \"  (.*)\"\n  CREATE TABLE test (\n    id INTEGER PRIMARY KEY,\n    name TEXT";
    interp.run_source(source, None).await.unwrap();
    let recorded = calls.lock().unwrap();
    assert_eq!(recorded.len(), 1, "handler called exactly once");
    assert_eq!(
        recorded[0].0,
        "CREATE TABLE test (\nid INTEGER PRIMARY KEY,\nname TEXT"
    );
    assert_eq!(pattern_of(&recorded[0].1).as_deref(), Some("  (.*)"));
}

#[tokio::test]
async fn test_matching_multiline_blocks_and_verbatim_line() {
    let (mut interp, _out) = interp_with_output();
    let calls = recording_target(&mut interp, "testhandler");
    let source = "ADDRESS testhandler MATCHING MULTILINE \"  (.*)\"\n  line one\n  line two\n  line three\nnot indented\n  second block line one\n  second block line two";
    interp.run_source(source, None).await.unwrap();
    let recorded = calls.lock().unwrap();
    let payloads: Vec<&str> = recorded.iter().map(|(p, _)| p.as_str()).collect();
    assert_eq!(
        payloads,
        vec![
            "line one\nline two\nline three",
            "not indented",
            "second block line one\nsecond block line two",
        ]
    );
    for (_, params) in recorded.iter() {
        assert_eq!(pattern_of(params).as_deref(), Some("  (.*)"));
    }
}

#[tokio::test]
async fn test_matching_single_line_dispatches_individually() {
    let (mut interp, _out) = interp_with_output();
    let calls = recording_target(&mut interp, "collector");
    let source =
        "ADDRESS collector MATCHING \"  (.*)\"\n  first\n  second\nverbatim, untrimmed";
    interp.run_source(source, None).await.unwrap();
    let recorded = calls.lock().unwrap();
    let payloads: Vec<&str> = recorded.iter().map(|(p, _)| p.as_str()).collect();
    assert_eq!(payloads, vec!["first", "second", "verbatim, untrimmed"]);
}

#[tokio::test]
async fn test_matching_ignores_blank_lines() {
    let (mut interp, _out) = interp_with_output();
    let calls = recording_target(&mut interp, "collector");
    let source = "ADDRESS collector MATCHING MULTILINE \"  (.*)\"\n  one\n\n  two";
    interp.run_source(source, None).await.unwrap();
    let recorded = calls.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].0, "one\ntwo");
}

#[tokio::test]
async fn test_matching_buffer_flushes_on_address_change() {
    let (mut interp, _out) = interp_with_output();
    let sql = recording_target(&mut interp, "sqlengine");
    let other = recording_target(&mut interp, "other");
    let source = "ADDRESS sqlengine MATCHING MULTILINE \"  (.*)\"\n  pending line\nADDRESS other\n\"fresh command\"";
    interp.run_source(source, None).await.unwrap();
    // The buffered payload went to the previous target before the switch.
    let sql_calls = sql.lock().unwrap();
    assert_eq!(sql_calls.len(), 1);
    assert_eq!(sql_calls[0].0, "pending line");
    let other_calls = other.lock().unwrap();
    assert_eq!(other_calls.len(), 1);
    assert_eq!(other_calls[0].0, "fresh command");
}

#[tokio::test]
async fn test_rc_and_result_reflect_handler_return() {
    let (mut interp, _out) = interp_with_output();
    let handler = handler_fn(|command, _params, _context| {
        let mut map = IndexMap::new();
        map.insert("success".to_string(), Value::Boolean(true));
        map.insert("echo".to_string(), Value::String(command.to_string()));
        map.insert(
            "rows".to_string(),
            Value::Array(vec![Value::Number(1.0), Value::Number(2.0)]),
        );
        Ok(Value::Object(map))
    });
    interp.register_address_target("db", AddressRegistration::new(handler));
    interp
        .run_source("ADDRESS db\n\"query things\"", None)
        .await
        .unwrap();

    assert_eq!(interp.get_variable("RC"), Some(Value::Number(0.0)));
    // RESULT is the entire handler return value, structurally.
    let result = interp.get_variable("RESULT").expect("RESULT");
    assert_eq!(
        result.lookup_segment("echo"),
        Some(Value::String("query things".to_string()))
    );
    assert_eq!(
        result.lookup_segment("rows"),
        Some(Value::Array(vec![Value::Number(1.0), Value::Number(2.0)]))
    );
}

#[tokio::test]
async fn test_rc_from_explicit_rc_field() {
    let (mut interp, _out) = interp_with_output();
    let handler = handler_fn(|_command, _params, _context| {
        let mut map = IndexMap::new();
        map.insert("rc".to_string(), Value::Number(4.0));
        Ok(Value::Object(map))
    });
    interp.register_address_target("warny", AddressRegistration::new(handler));
    interp
        .run_source("ADDRESS warny\n\"do something\"", None)
        .await
        .unwrap();
    assert_eq!(interp.get_variable("RC"), Some(Value::Number(4.0)));
}

#[tokio::test]
async fn test_failing_handler_sets_rc_and_propagates() {
    let (mut interp, _out) = interp_with_output();
    let handler = handler_fn(|_command, _params, _context| {
        let mut shape = IndexMap::new();
        shape.insert("success".to_string(), Value::Boolean(false));
        shape.insert(
            "error".to_string(),
            Value::String("table missing".to_string()),
        );
        Err(HandlerError::new("table missing")
            .with_rc(8.0)
            .with_shape(Value::Object(shape)))
    });
    interp.register_address_target("db", AddressRegistration::new(handler));
    let err = interp
        .run_source("ADDRESS db\n\"query nothing\"", None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("table missing"));
    assert_eq!(interp.get_variable("RC"), Some(Value::Number(8.0)));
    let result = interp.get_variable("RESULT").expect("RESULT");
    assert_eq!(
        result.lookup_segment("error"),
        Some(Value::String("table missing".to_string()))
    );
}

#[tokio::test]
async fn test_call_method_on_current_target_captures_full_result() {
    let (mut interp, _out) = interp_with_output();
    let handler = handler_fn(|method, params, _context| {
        let mut map = IndexMap::new();
        map.insert("method".to_string(), Value::String(method.to_string()));
        map.insert("params".to_string(), params.clone());
        map.insert("display".to_string(), Value::String("42".to_string()));
        Ok(Value::Object(map))
    });
    interp.register_address_target(
        "calculator",
        AddressRegistration::new(handler).with_methods(vec!["status".to_string()]),
    );
    // The zero-argument method path must still capture the whole result.
    interp
        .run_source("ADDRESS calculator\nCALL status", None)
        .await
        .unwrap();
    let result = interp.get_variable("RESULT").expect("RESULT");
    assert_eq!(
        result.lookup_segment("method"),
        Some(Value::String("status".to_string()))
    );
    assert_eq!(
        result.lookup_segment("display"),
        Some(Value::String("42".to_string()))
    );
}

#[tokio::test]
async fn test_call_method_with_arguments_numbers_params() {
    let (mut interp, _out) = interp_with_output();
    let handler = handler_fn(|method, params, _context| {
        assert_eq!(method, "press");
        Ok(params.clone())
    });
    interp.register_address_target(
        "calculator",
        AddressRegistration::new(handler).with_methods(vec!["press".to_string()]),
    );
    interp
        .run_source("ADDRESS calculator\nCALL press \"7\"", None)
        .await
        .unwrap();
    let result = interp.get_variable("RESULT").expect("RESULT");
    assert_eq!(
        result.lookup_segment("1"),
        Some(Value::String("7".to_string()))
    );
}

#[tokio::test]
async fn test_unknown_address_target() {
    let (mut interp, _out) = interp_with_output();
    let err = interp
        .run_source("ADDRESS ghost\n\"boo\"", None)
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::UnknownAddressTarget { .. }));
    assert!(err.to_string().contains("ghost"));
}

#[tokio::test]
async fn test_target_names_are_case_insensitive() {
    let (mut interp, _out) = interp_with_output();
    let calls = recording_target(&mut interp, "SqlEngine");
    interp
        .run_source("ADDRESS sqlengine\n\"hello\"", None)
        .await
        .unwrap();
    assert_eq!(calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_handler_source_context_carries_line() {
    let (mut interp, _out) = interp_with_output();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler = handler_fn(move |_command, _params, context| {
        sink.lock().unwrap().push((context.line, context.source_line.clone()));
        Ok(Value::Number(0.0))
    });
    interp.register_address_target("echo", AddressRegistration::new(handler));
    interp
        .run_source("ADDRESS echo\n\"first\"\n\"second\"", None)
        .await
        .unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0], (2, "\"first\"".to_string()));
    assert_eq!(seen[1], (3, "\"second\"".to_string()));
}

#[tokio::test]
async fn test_trace_uses_header_lines_for_address_forms() {
    let (mut interp, _out) = interp_with_output();
    let _calls = recording_target(&mut interp, "h");
    interp.set_trace(true);
    let source = "ADDRESS h\n\"cmd one\"\n<<BLOCK\nbody line\nBLOCK\nSAY 'done'";
    interp.run_source(source, None).await.unwrap();
    assert_eq!(
        interp.trace_lines(),
        &[
            ">> 1 ADDRESS h",
            ">> 2 \"cmd one\"",
            ">> 3 <<BLOCK",
            ">> 6 SAY 'done'",
        ]
    );
}
