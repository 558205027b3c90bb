//! REQUIRE tests: built-in libraries, local library scripts, preference
//! lists, security policies, and the remote checkpoint channel.

use rexon_interp::{CollectingOutput, Interpreter};
use rexon_library::ChannelMessage;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn interp_with_output() -> (Interpreter, Arc<CollectingOutput>) {
    let output = CollectingOutput::new();
    let mut interp = Interpreter::new();
    interp.set_output_handler(output.clone());
    (interp, output)
}

#[tokio::test]
async fn test_require_builtin_library_registers_functions_and_metadata() {
    let (mut interp, out) = interp_with_output();
    interp
        .run_source(
            "REQUIRE \"string-functions\"\nSAY CENTER('hi', 6, '*')\nSAY WORDPOS('two', 'one two three')",
            None,
        )
        .await
        .unwrap();
    assert_eq!(out.lines(), vec!["**hi**", "2"]);

    let registry = interp.metadata_registry();
    let registry = registry.read().unwrap();
    let entry = registry.get("center").expect("CENTER metadata");
    assert_eq!(entry.module.as_deref(), Some("string-functions"));
    assert!(!registry.by_category("string").is_empty());
    assert!(!registry.by_module("string-functions").is_empty());
}

#[tokio::test]
async fn test_require_math_library() {
    let (mut interp, out) = interp_with_output();
    interp
        .run_source(
            "REQUIRE \"math-functions\"\nSAY CLAMP(99, 0, 10)\nSAY GCD(12, 18)",
            None,
        )
        .await
        .unwrap();
    assert_eq!(out.lines(), vec!["10", "6"]);
}

#[tokio::test]
async fn test_require_local_library_script() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("libs")).unwrap();
    std::fs::write(
        dir.path().join("libs/calc.rexx"),
        "double: PROCEDURE\nPARSE ARG n\nRETURN n * 2\n\ntriple: PROCEDURE\nPARSE ARG n\nRETURN n * 3\n",
    )
    .unwrap();
    let main_path = dir.path().join("main.rexx");
    let source = "REQUIRE \"./libs/calc.rexx\"\nSAY DOUBLE(21)\nSAY TRIPLE(7)";
    std::fs::write(&main_path, source).unwrap();

    let (mut interp, out) = interp_with_output();
    let commands = rexon_interp::parse(source).unwrap();
    interp
        .run(commands, Some(source), Some(&main_path))
        .await
        .unwrap();
    assert_eq!(out.lines(), vec!["42", "21"]);
}

#[tokio::test]
async fn test_require_preference_list_takes_second_candidate() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("libs")).unwrap();
    std::fs::write(
        dir.path().join("libs/calc.rexx"),
        "answer: PROCEDURE\nRETURN 42\n",
    )
    .unwrap();
    let main_path = dir.path().join("main.rexx");
    let source = "REQUIRE \"./nonexistent/first.rexx, ./libs/calc.rexx\"\nSAY ANSWER()";
    std::fs::write(&main_path, source).unwrap();

    let (mut interp, out) = interp_with_output();
    let commands = rexon_interp::parse(source).unwrap();
    interp
        .run(commands, Some(source), Some(&main_path))
        .await
        .unwrap();
    assert_eq!(out.lines(), vec!["42"]);
}

#[tokio::test]
async fn test_require_failure_lists_every_attempt() {
    let (mut interp, _out) = interp_with_output();
    let err = interp
        .run_source("REQUIRE \"first-missing, second-missing\"", None)
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("first-missing"), "message: {}", message);
    assert!(message.contains("second-missing"), "message: {}", message);
}

#[tokio::test]
async fn test_require_relative_without_script_context() {
    let (mut interp, _out) = interp_with_output();
    let err = interp
        .run_source("REQUIRE \"./libs/calc.rexx\"", None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("script file context"));
}

#[tokio::test]
async fn test_strict_policy_denies_local_library() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("lib.rexx"), "f: PROCEDURE\nRETURN 1\n").unwrap();
    let main_path = dir.path().join("main.rexx");
    let source = "REQUIRE \"./lib.rexx\"";
    std::fs::write(&main_path, source).unwrap();

    let (mut interp, _out) = interp_with_output();
    interp.set_security_policy("strict").unwrap();
    let commands = rexon_interp::parse(source).unwrap();
    let err = interp
        .run(commands, Some(source), Some(&main_path))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("strict"));
}

#[tokio::test]
async fn test_blocklisted_library_message() {
    let (mut interp, _out) = interp_with_output();
    interp.block_library("github.com/evil/lib");
    let err = interp
        .run_source("REQUIRE \"github.com/evil/lib\"", None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("on security blocklist"));
}

#[tokio::test]
async fn test_remote_require_over_channel() {
    let (mut interp, out) = interp_with_output();
    let sent: Arc<Mutex<Vec<ChannelMessage>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = sent.clone();
    interp.set_streaming_progress_callback(move |message| {
        sink.lock().unwrap().push(message.clone());
    });

    let exchange = interp.channel_exchange().expect("channel");
    let responder = tokio::spawn(async move {
        loop {
            let request = sent.lock().unwrap().first().cloned();
            if let Some(ChannelMessage::RequireRequest {
                require_id,
                library_name,
                ..
            }) = request
            {
                exchange.deliver(ChannelMessage::RequireResponse {
                    require_id,
                    success: true,
                    library_code: Some(
                        "quadruple: PROCEDURE\nPARSE ARG n\nRETURN n * 4\n".to_string(),
                    ),
                    library_name,
                    error: None,
                });
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });

    interp
        .run_source(
            "REQUIRE \"central:acme/quad@1.0.0\"\nSAY QUADRUPLE(10)",
            None,
        )
        .await
        .unwrap();
    responder.await.unwrap();
    assert_eq!(out.lines(), vec!["40"]);
}

#[tokio::test(start_paused = true)]
async fn test_remote_require_timeout_is_reported() {
    let (mut interp, _out) = interp_with_output();
    interp.set_streaming_progress_callback(|_| {});
    interp.set_require_timeout(Duration::from_millis(20));
    let err = interp
        .run_source("REQUIRE \"central:acme/slow@1.0.0\"", None)
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("central:acme/slow@1.0.0"), "{}", message);
    assert!(message.contains("timeout"), "{}", message);
}

#[tokio::test]
async fn test_remote_require_without_channel() {
    let (mut interp, _out) = interp_with_output();
    let err = interp
        .run_source("REQUIRE \"central:acme/quad@1.0.0\"", None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no_communication_channel"));
}

#[tokio::test]
async fn test_unknown_reference_approval_exchange() {
    let (mut interp, out) = interp_with_output();
    let sent: Arc<Mutex<Vec<ChannelMessage>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = sent.clone();
    interp.set_streaming_progress_callback(move |message| {
        sink.lock().unwrap().push(message.clone());
    });
    interp.set_approval_timeout(Duration::from_secs(5));

    let exchange = interp.channel_exchange().expect("channel");
    let responder = tokio::spawn(async move {
        let mut answered_permission = false;
        loop {
            let next = sent.lock().unwrap().last().cloned();
            match next {
                Some(ChannelMessage::PermissionRequest {
                    request_id,
                    library_name,
                    risk_level,
                    ..
                }) if !answered_permission => {
                    assert_eq!(risk_level, "high");
                    exchange.deliver(ChannelMessage::PermissionResponse {
                        request_id,
                        approved: true,
                        library_name,
                        reason: None,
                    });
                    answered_permission = true;
                }
                Some(ChannelMessage::RequireRequest {
                    require_id,
                    library_name,
                    ..
                }) => {
                    exchange.deliver(ChannelMessage::RequireResponse {
                        require_id,
                        success: true,
                        library_code: Some("mystery: PROCEDURE\nRETURN 'solved'\n".to_string()),
                        library_name,
                        error: None,
                    });
                    break;
                }
                _ => {}
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });

    interp
        .run_source("REQUIRE \"mystery-lib\"\nSAY MYSTERY()", None)
        .await
        .unwrap();
    responder.await.unwrap();
    assert_eq!(out.lines(), vec!["solved"]);
}

#[tokio::test]
async fn test_unknown_reference_denied() {
    let (mut interp, _out) = interp_with_output();
    let sent: Arc<Mutex<Vec<ChannelMessage>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = sent.clone();
    interp.set_streaming_progress_callback(move |message| {
        sink.lock().unwrap().push(message.clone());
    });

    let exchange = interp.channel_exchange().expect("channel");
    let responder = tokio::spawn(async move {
        loop {
            let request = sent.lock().unwrap().first().cloned();
            if let Some(ChannelMessage::PermissionRequest {
                request_id,
                library_name,
                ..
            }) = request
            {
                exchange.deliver(ChannelMessage::PermissionResponse {
                    request_id,
                    approved: false,
                    library_name,
                    reason: Some("not on the allowlist".to_string()),
                });
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });

    let err = interp
        .run_source("REQUIRE \"mystery-lib\"", None)
        .await
        .unwrap_err();
    responder.await.unwrap();
    assert!(err.to_string().contains("not on the allowlist"));
}

#[tokio::test]
async fn test_metadata_registry_shared_between_interpreters() {
    let (mut first, _out) = interp_with_output();
    first
        .run_source("REQUIRE \"math-functions\"", None)
        .await
        .unwrap();

    let mut second = Interpreter::new();
    second.set_metadata_registry(first.metadata_registry());
    let registry = second.metadata_registry();
    let registry = registry.read().unwrap();
    assert!(registry.get("CLAMP").is_some());
}
