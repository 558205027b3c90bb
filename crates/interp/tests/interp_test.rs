//! End-to-end interpreter tests: control flow, calls, variables, tracing.

use rexon_interp::{CollectingOutput, Interpreter, RunError, RunResult, Value};
use std::sync::Arc;

fn interp_with_output() -> (Interpreter, Arc<CollectingOutput>) {
    let output = CollectingOutput::new();
    let mut interp = Interpreter::new();
    interp.set_output_handler(output.clone());
    (interp, output)
}

#[tokio::test]
async fn test_pipe_chain_scenario() {
    let (mut interp, _out) = interp_with_output();
    let result = interp
        .run_source("LET result = \"hello\" |> UPPER |> LENGTH", None)
        .await
        .unwrap();
    assert_eq!(result, RunResult::Normal);
    assert_eq!(interp.get_variable("result"), Some(Value::Number(5.0)));
}

#[tokio::test]
async fn test_pipe_binds_looser_than_arithmetic() {
    let (mut interp, _out) = interp_with_output();
    interp
        .run_source("LET x = 5 + 3 |> ABS\nLET y = 0 - 8 |> ABS", None)
        .await
        .unwrap();
    assert_eq!(interp.get_variable("x"), Some(Value::Number(8.0)));
    assert_eq!(interp.get_variable("y"), Some(Value::Number(8.0)));
}

#[tokio::test]
async fn test_say_joins_expressions_with_spaces() {
    let (mut interp, out) = interp_with_output();
    interp
        .run_source("SAY 'total:' 5 + 3 'items'", None)
        .await
        .unwrap();
    assert_eq!(out.lines(), vec!["total: 8 items"]);
}

#[tokio::test]
async fn test_number_formatting_in_output() {
    let (mut interp, out) = interp_with_output();
    interp
        .run_source("SAY 10 / 4\nSAY 10 / 2\nSAY 7 // 2\nSAY 7 % 2", None)
        .await
        .unwrap();
    assert_eq!(out.lines(), vec!["2.5", "5", "1", "3"]);
}

#[tokio::test]
async fn test_if_else_branches() {
    let (mut interp, out) = interp_with_output();
    interp
        .run_source(
            "LET n = 3\nIF n > 2 THEN SAY 'big'\nELSE SAY 'small'\nIF n > 9 THEN SAY 'no'",
            None,
        )
        .await
        .unwrap();
    assert_eq!(out.lines(), vec!["big"]);
}

#[tokio::test]
async fn test_counted_do_with_leave_and_iterate() {
    let (mut interp, out) = interp_with_output();
    let source = r#"
DO i = 1 TO 10
  IF i = 3 THEN ITERATE
  IF i = 5 THEN LEAVE
  SAY i
END
SAY 'after' i
"#;
    interp.run_source(source, None).await.unwrap();
    assert_eq!(out.lines(), vec!["1", "2", "4", "after 5"]);
}

#[tokio::test]
async fn test_do_while_and_forever() {
    let (mut interp, out) = interp_with_output();
    let source = r#"
LET n = 0
DO WHILE n < 3
  LET n = n + 1
END
SAY n
DO FOREVER
  LET n = n + 1
  IF n >= 5 THEN LEAVE
END
SAY n
"#;
    interp.run_source(source, None).await.unwrap();
    assert_eq!(out.lines(), vec!["3", "5"]);
}

#[tokio::test]
async fn test_do_over_array_and_object_order() {
    let (mut interp, out) = interp_with_output();
    let source = r#"
LET items = ["a", "b"]
DO item OVER items
  SAY item
END
LET obj = {"z": 1, "a": 2}
DO v OVER obj
  SAY v
END
"#;
    interp.run_source(source, None).await.unwrap();
    // Object values iterate in insertion order, not key order.
    assert_eq!(out.lines(), vec!["a", "b", "1", "2"]);
}

#[tokio::test]
async fn test_leave_outside_loop_is_a_nop() {
    let (mut interp, out) = interp_with_output();
    interp
        .run_source("LEAVE\nITERATE\nSAY 'still here'", None)
        .await
        .unwrap();
    assert_eq!(out.lines(), vec!["still here"]);
}

#[tokio::test]
async fn test_select_runs_first_true_when() {
    let (mut interp, out) = interp_with_output();
    let source = r#"
LET x = 2
SELECT
  WHEN x = 1 THEN SAY 'one'
  WHEN x = 2 THEN SAY 'two'
  WHEN x > 0 THEN SAY 'positive'
  OTHERWISE SAY 'other'
END
"#;
    interp.run_source(source, None).await.unwrap();
    assert_eq!(out.lines(), vec!["two"]);
}

#[tokio::test]
async fn test_subroutine_call_sets_result() {
    let (mut interp, out) = interp_with_output();
    let source = r#"
CALL Greet "world"
SAY RESULT
EXIT 0

Greet:
PARSE ARG who
RETURN "hello " || who
"#;
    interp.run_source(source, None).await.unwrap();
    assert_eq!(out.lines(), vec!["hello world"]);
}

#[tokio::test]
async fn test_subroutine_shares_variables_without_procedure() {
    let (mut interp, _out) = interp_with_output();
    let source = r#"
LET x = 1
CALL Bump
EXIT 0

Bump:
LET x = x + 1
RETURN
"#;
    interp.run_source(source, None).await.unwrap();
    assert_eq!(interp.get_variable("x"), Some(Value::Number(2.0)));
}

#[tokio::test]
async fn test_procedure_opens_fresh_frame() {
    let (mut interp, out) = interp_with_output();
    let source = r#"
LET x = "outer"
CALL Isolated
SAY x
EXIT 0

Isolated: PROCEDURE
LET x = "inner"
RETURN
"#;
    interp.run_source(source, None).await.unwrap();
    assert_eq!(out.lines(), vec!["outer"]);
}

#[tokio::test]
async fn test_arg_builtin_reads_call_arguments() {
    let (mut interp, out) = interp_with_output();
    let source = r#"
CALL Report "a", "b", "c"
EXIT 0

Report: PROCEDURE
SAY ARG()
SAY ARG(2)
SAY ARG(9)
RETURN
"#;
    interp.run_source(source, None).await.unwrap();
    assert_eq!(out.lines(), vec!["3", "b", ""]);
}

#[tokio::test]
async fn test_function_position_subroutine() {
    let (mut interp, _out) = interp_with_output();
    let source = r#"
LET doubled = Twice(21)
EXIT 0

Twice: PROCEDURE
PARSE ARG n
RETURN n * 2
"#;
    interp.run_source(source, None).await.unwrap();
    assert_eq!(interp.get_variable("doubled"), Some(Value::Number(42.0)));
}

#[tokio::test]
async fn test_signal_jumps_and_unknown_label_fails() {
    let (mut interp, out) = interp_with_output();
    let source = r#"
SIGNAL Past
SAY 'skipped'
Past:
SAY 'landed'
"#;
    interp.run_source(source, None).await.unwrap();
    assert_eq!(out.lines(), vec!["landed"]);

    let (mut interp, _out) = interp_with_output();
    let err = interp
        .run_source("SIGNAL MissingTarget", None)
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("MISSINGTARGET"), "message: {}", message);
    assert!(message.contains("not found"), "message: {}", message);
}

#[tokio::test]
async fn test_call_stack_depth_is_bounded() {
    let (mut interp, _out) = interp_with_output();
    let source = "CALL Boom\nEXIT 0\n\nBoom:\nCALL Boom\nRETURN";
    let err = interp.run_source(source, None).await.unwrap_err();
    assert!(matches!(err, RunError::StackOverflow { .. }));
    assert!(err.to_string().contains("Maximum call stack"));
}

#[tokio::test]
async fn test_exit_code_and_unless_guard() {
    // Guard true: execution continues.
    let (mut interp, out) = interp_with_output();
    interp
        .run_source("EXIT 7 UNLESS 1 = 1, 'should not print'\nSAY 'alive'", None)
        .await
        .unwrap();
    assert_eq!(out.lines(), vec!["alive"]);
    assert!(out.error_lines().is_empty());

    // Guard false: message to the error stream, terminate with the code.
    let (mut interp, out) = interp_with_output();
    let result = interp
        .run_source("EXIT 7 UNLESS 1 = 2, 'precondition failed'\nSAY 'dead'", None)
        .await
        .unwrap();
    assert_eq!(result, RunResult::Exit(7.0));
    assert_eq!(out.error_lines(), vec!["precondition failed"]);
    assert!(out.lines().is_empty());
}

#[tokio::test]
async fn test_top_level_return_value() {
    let (mut interp, _out) = interp_with_output();
    let result = interp.run_source("RETURN 6 * 7", None).await.unwrap();
    assert_eq!(result, RunResult::Return(Value::Number(42.0)));
}

#[tokio::test]
async fn test_undefined_symbol_resolves_to_own_name() {
    let (mut interp, out) = interp_with_output();
    interp
        .run_source("SAY undefined_thing\nSAY SYMBOL('undefined_thing')", None)
        .await
        .unwrap();
    assert_eq!(out.lines(), vec!["UNDEFINED_THING", "LIT"]);
}

#[tokio::test]
async fn test_array_set_mutates_variable_in_place() {
    let (mut interp, out) = interp_with_output();
    let source = r#"
LET arr = ["a", "b", "c"]
ARRAY_SET(arr, 2, "B")
SAY ARRAY_GET(arr, 2)
SAY arr.1
SAY arr.0
"#;
    interp.run_source(source, None).await.unwrap();
    // ARRAY_GET is 1-based; the arr.N dot form is 0-based.
    assert_eq!(out.lines(), vec!["B", "B", "a"]);
}

#[tokio::test]
async fn test_array_push_and_pop() {
    let (mut interp, out) = interp_with_output();
    let source = r#"
LET arr = [1]
ARRAY_PUSH(arr, 2)
SAY ARRAY_LENGTH(arr)
LET last = ARRAY_POP(arr)
SAY last
SAY ARRAY_LENGTH(arr)
"#;
    interp.run_source(source, None).await.unwrap();
    assert_eq!(out.lines(), vec!["2", "2", "1"]);
}

#[tokio::test]
async fn test_object_literals_and_dot_paths() {
    let (mut interp, out) = interp_with_output();
    let source = r#"
LET person = {"name": "Ada", "langs": ["rexx", "rust"]}
SAY person.name
SAY person.langs.1
SAY person.missing
"#;
    interp.run_source(source, None).await.unwrap();
    assert_eq!(out.lines(), vec!["Ada", "rust", ""]);
}

#[tokio::test]
async fn test_named_arguments_are_string_labels() {
    let (mut interp, _out) = interp_with_output();
    // A variable spelled like the parameter label must not leak into it.
    interp.register_builtin("CAPTURE", |_, args| {
        Ok(args.first().cloned().unwrap_or(Value::Undefined))
    });
    let source = r#"
LET host = "WRONG"
LET params = CAPTURE(host="db.example", port=5432)
"#;
    interp.run_source(source, None).await.unwrap();
    let params = interp.get_variable("params").expect("params");
    assert_eq!(
        params.lookup_segment("host"),
        Some(Value::String("db.example".to_string()))
    );
    assert_eq!(params.lookup_segment("port"), Some(Value::Number(5432.0)));
    match params {
        Value::Object(map) => assert!(map.contains_key("host"), "label spelling preserved"),
        other => panic!("expected one parameter object, got {}", other.type_name()),
    }
}

#[tokio::test]
async fn test_array_arguments_are_not_stringified() {
    let (mut interp, _out) = interp_with_output();
    interp.register_builtin("FIRST_OF", |_, args| {
        match args.first() {
            Some(Value::Array(items)) => Ok(items.first().cloned().unwrap_or(Value::Undefined)),
            other => panic!("expected array argument, got {:?}", other),
        }
    });
    interp
        .run_source("LET x = FIRST_OF([7, 8])", None)
        .await
        .unwrap();
    assert_eq!(interp.get_variable("x"), Some(Value::Number(7.0)));
}

#[tokio::test]
async fn test_join_accepts_stem_shaped_objects() {
    let (mut interp, out) = interp_with_output();
    let source = r#"
LET stem = {"0": 2, "1": "x", "2": "y"}
SAY JOIN(stem, "-")
"#;
    interp.run_source(source, None).await.unwrap();
    assert_eq!(out.lines(), vec!["x-y"]);
}

#[tokio::test]
async fn test_division_by_zero_is_an_error() {
    let (mut interp, _out) = interp_with_output();
    let err = interp.run_source("LET x = 1 / 0", None).await.unwrap_err();
    assert!(err.to_string().contains("Division by zero"));
}

#[tokio::test]
async fn test_string_number_interconversion_in_arithmetic() {
    let (mut interp, out) = interp_with_output();
    interp
        .run_source("LET x = \"21\" * 2\nSAY x\nSAY \"3\" + \"4\"", None)
        .await
        .unwrap();
    assert_eq!(out.lines(), vec!["42", "7"]);
}

#[tokio::test]
async fn test_comparison_and_logic_operators() {
    let (mut interp, out) = interp_with_output();
    let source = r#"
SAY 2 <= 2
SAY "abc" = "abc"
SAY " 5 " = 5
SAY "a" <> "b"
SAY 1 & 0
SAY 1 | 0
SAY ¬(1 = 2)
"#;
    interp.run_source(source, None).await.unwrap();
    assert_eq!(
        out.lines(),
        vec!["true", "true", "true", "true", "false", "true", "true"]
    );
}

// ========== Tracing ==========

#[tokio::test]
async fn test_trace_nested_select_taken_path_only() {
    let (mut interp, _out) = interp_with_output();
    interp.set_trace(true);
    let source = "/* nested select trace */\nSELECT\n  WHEN 1 = 1 THEN DO\n    SAY \"level1\"\n    SELECT\n      WHEN 2 = 2 THEN\n        SAY \"level2\"\n      OTHERWISE\n        SAY \"nope\"\n    END\n  OTHERWISE SAY \"outer\"\nEND\n\nSAY \"done\"";
    interp.run_source(source, None).await.unwrap();
    assert_eq!(
        interp.trace_lines(),
        &[
            ">> 2 SELECT",
            ">> 3 WHEN 1 = 1 THEN DO",
            ">> 4 SAY \"level1\"",
            ">> 5 SELECT",
            ">> 6 WHEN 2 = 2 THEN",
            ">> 7 SAY \"level2\"",
            ">> 14 SAY \"done\"",
        ]
    );
    // END lines (10, 12) and untaken branches (8, 9, 11) never trace.
    for line in interp.trace_lines() {
        assert!(!line.starts_with(">> 8 "));
        assert!(!line.starts_with(">> 10 "));
        assert!(!line.starts_with(">> 13 "));
        assert!(!line.contains("(no line#)"));
    }
}

#[tokio::test]
async fn test_trace_loop_and_if_lines() {
    let (mut interp, _out) = interp_with_output();
    interp.set_trace(true);
    let source = "DO i = 1 TO 2\n  SAY i\nEND";
    interp.run_source(source, None).await.unwrap();
    assert_eq!(
        interp.trace_lines(),
        &[">> 1 DO i = 1 TO 2", ">> 2 SAY i", ">> 2 SAY i"]
    );
}

// ========== External script calls ==========

#[tokio::test]
async fn test_external_call_isolation_and_result() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("helper.rexx"),
        "PARSE ARG base\nLET leaked = \"from helper\"\nRETURN base * 10\n",
    )
    .unwrap();
    let main_path = dir.path().join("main.rexx");
    let source = r#"
LET mine = "caller"
CALL "./helper.rexx" 4
SAY RESULT
SAY SYMBOL('leaked')
SAY mine
"#;
    std::fs::write(&main_path, source).unwrap();

    let (mut interp, out) = interp_with_output();
    let commands = rexon_interp::parse(source).unwrap();
    interp
        .run(commands, Some(source), Some(&main_path))
        .await
        .unwrap();
    // Callee variables never leak; caller variables survive.
    assert_eq!(out.lines(), vec!["40", "LIT", "caller"]);
}

#[tokio::test]
async fn test_external_call_missing_file_names_path() {
    let dir = tempfile::tempdir().unwrap();
    let main_path = dir.path().join("main.rexx");
    let source = "CALL \"./nope.rexx\"";
    std::fs::write(&main_path, source).unwrap();

    let (mut interp, _out) = interp_with_output();
    let commands = rexon_interp::parse(source).unwrap();
    let err = interp
        .run(commands, Some(source), Some(&main_path))
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::ScriptNotFound { .. }));
    assert!(err.to_string().contains("nope.rexx"));
}

#[tokio::test]
async fn test_external_call_callee_cannot_see_caller() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("probe.rexx"),
        "RETURN SYMBOL('secret')\n",
    )
    .unwrap();
    let main_path = dir.path().join("main.rexx");
    let source = "LET secret = 42\nCALL \"./probe.rexx\"\nSAY RESULT";
    std::fs::write(&main_path, source).unwrap();

    let (mut interp, out) = interp_with_output();
    let commands = rexon_interp::parse(source).unwrap();
    interp
        .run(commands, Some(source), Some(&main_path))
        .await
        .unwrap();
    assert_eq!(out.lines(), vec!["LIT"]);
}

// ========== Embedding API ==========

#[tokio::test]
async fn test_get_and_set_variable() {
    let (mut interp, _out) = interp_with_output();
    interp.set_variable("seed", Value::Number(5.0));
    interp.run_source("LET grown = seed + 1", None).await.unwrap();
    assert_eq!(interp.get_variable("GROWN"), Some(Value::Number(6.0)));
    assert_eq!(interp.get_variable("grown"), Some(Value::Number(6.0)));
}

#[tokio::test]
async fn test_script_arguments_via_parse_arg() {
    let (mut interp, out) = interp_with_output();
    interp.set_script_arguments(vec!["alpha".into(), "beta".into()]);
    interp
        .run_source("PARSE ARG first, second\nSAY second first", None)
        .await
        .unwrap();
    assert_eq!(out.lines(), vec!["beta alpha"]);
}

#[tokio::test]
async fn test_remote_orchestration_variables() {
    let (mut interp, out) = interp_with_output();
    interp.enable_remote_orchestration("orch-17");
    interp
        .run_source("SAY SCRO_REMOTE\nSAY SCRO_ORCHESTRATION_ID", None)
        .await
        .unwrap();
    assert_eq!(out.lines(), vec!["true", "orch-17"]);
}

#[tokio::test]
async fn test_function_not_defined_error() {
    let (mut interp, _out) = interp_with_output();
    let err = interp
        .run_source("LET x = NO_SUCH_FUNCTION(1)", None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("NO_SUCH_FUNCTION"));
}
