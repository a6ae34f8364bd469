//! Integration tests for streamed filter generation over HTTP.

mod common;

use std::time::Duration;

use common::{loaded_panel, spawn_mock_backend, OK_SNIPPET};
use serde_json::json;
use sieve_core::{GenerationEvent, SieveError, StreamState};
use tokio::time::timeout;

#[tokio::test]
async fn test_snippet_streams_into_code_buffer() {
    let (url, backend) = spawn_mock_backend().await;
    let panel = loaded_panel(&url, 5, "CCC AAA").await;
    let mut events = panel.subscribe();

    let code = panel
        .learn_filter(Some("m-1"), "ok.txt")
        .await
        .expect("generation should succeed");

    assert_eq!(code, OK_SNIPPET);
    assert_eq!(panel.code().await, OK_SNIPPET);
    assert!(!panel.is_generating());

    let request = backend
        .last_generation
        .lock()
        .await
        .clone()
        .expect("request recorded");
    assert_eq!(request["model"], json!("m-1"));
    assert_eq!(request["promptTemplate"], json!("ok.txt"));
    let sent: Vec<&str> = request["wallets"]
        .as_array()
        .expect("wallets array")
        .iter()
        .filter_map(|w| w["wallet_address"].as_str())
        .collect();
    assert_eq!(sent, vec!["AAA", "CCC"]);
    assert_eq!(request["wallets"][0]["performance_and_risk"]["pnl_sol"], json!(12.5));

    let mut tokens = String::new();
    let mut names = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("Timeout waiting for event")
            .expect("event channel");
        names.push(event.event_name());
        if let GenerationEvent::Token(payload) = &event {
            tokens.push_str(&payload.text);
        }
        if event.is_terminal() {
            break;
        }
    }
    assert_eq!(tokens, OK_SNIPPET);
    assert_eq!(names.first(), Some(&"started"));
    assert_eq!(names.last(), Some(&"completed"));
    assert!(names.contains(&"malformed"));

    let record = panel.last_generation().await.expect("record");
    assert_eq!(record.state, StreamState::Complete);
    assert_eq!(record.token_count, 2);
    assert_eq!(record.malformed, 1);
    assert_eq!(record.wallet_count, 2);
}

#[tokio::test]
async fn test_error_record_keeps_tokens_and_appends_trailer() {
    let (url, _backend) = spawn_mock_backend().await;
    let panel = loaded_panel(&url, 5, "AAA").await;

    let err = panel
        .learn_filter(Some("m-1"), "fail.txt")
        .await
        .expect_err("stream carries an error record");

    assert!(
        matches!(&err, SieveError::ProducerError { message } if message == "Request timed out."),
        "got: {err:?}"
    );
    assert_eq!(
        panel.code().await,
        "foobar\n\n# AN ERROR OCCURRED: Request timed out."
    );

    let record = panel.last_generation().await.expect("record");
    assert_eq!(record.state, StreamState::Failed);
    assert_eq!(record.error.as_deref(), Some("Stream error: Request timed out."));
}

#[tokio::test]
async fn test_tokens_in_same_chunk_as_error_reach_code_buffer() {
    let (url, _backend) = spawn_mock_backend().await;
    let panel = loaded_panel(&url, 5, "AAA").await;
    let mut events = panel.subscribe();

    let err = panel
        .learn_filter(Some("m-1"), "burst.txt")
        .await
        .expect_err("stream carries an error record");

    assert!(
        matches!(&err, SieveError::ProducerError { message } if message == "boom"),
        "got: {err:?}"
    );
    assert_eq!(panel.code().await, "foobar\n\n# AN ERROR OCCURRED: boom");

    let mut tokens = String::new();
    loop {
        let event = timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("Timeout waiting for event")
            .expect("event channel");
        if let GenerationEvent::Token(payload) = &event {
            tokens.push_str(&payload.text);
        }
        if event.is_terminal() {
            break;
        }
    }
    assert_eq!(tokens, "foobar");

    let record = panel.last_generation().await.expect("record");
    assert_eq!(record.state, StreamState::Failed);
}

#[tokio::test]
async fn test_rejected_request_reports_backend_error() {
    let (url, _backend) = spawn_mock_backend().await;
    let panel = loaded_panel(&url, 5, "AAA").await;
    panel.set_code("old snippet").await;

    let err = panel
        .learn_filter(Some("m-1"), "missing.txt")
        .await
        .expect_err("unknown template");

    assert!(
        matches!(&err, SieveError::Backend { status: 500, message } if message == "Error reading prompt file: missing.txt"),
        "got: {err:?}"
    );
    assert_eq!(
        panel.code().await,
        "\n\n# AN ERROR OCCURRED: Backend error (500): Error reading prompt file: missing.txt"
    );

    let record = panel.last_generation().await.expect("record");
    assert_eq!(record.state, StreamState::Failed);
    assert_eq!(record.token_count, 0);
}

#[tokio::test]
async fn test_stalled_stream_times_out() {
    let (url, _backend) = spawn_mock_backend().await;
    let panel = loaded_panel(&url, 1, "AAA").await;

    let err = timeout(
        Duration::from_secs(10),
        panel.learn_filter(Some("m-1"), "stall.txt"),
    )
    .await
    .expect("chunk timeout should fire first")
    .expect_err("stream stalls");

    assert!(
        matches!(err, SieveError::StreamTimeout { timeout_secs: 1 }),
        "got: {err:?}"
    );
    assert!(panel.code().await.starts_with("partial\n\n# AN ERROR OCCURRED: Stream stalled"));
    assert!(!panel.is_generating());
}

#[tokio::test]
async fn test_second_generation_is_rejected_while_streaming() {
    let (url, _backend) = spawn_mock_backend().await;
    let panel = loaded_panel(&url, 2, "AAA").await;

    let first = {
        let panel = panel.clone();
        tokio::spawn(async move { panel.learn_filter(Some("m-1"), "stall.txt").await })
    };

    timeout(Duration::from_secs(2), async {
        while !panel.is_generating() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first generation should start");

    let err = panel
        .learn_filter(Some("m-1"), "ok.txt")
        .await
        .expect_err("slot is busy");
    assert!(matches!(err, SieveError::GenerationInProgress), "got: {err:?}");

    let first = first.await.expect("task joins");
    assert!(matches!(first, Err(SieveError::StreamTimeout { .. })));

    // The slot is free again once the first generation ends.
    let code = panel
        .learn_filter(Some("m-1"), "ok.txt")
        .await
        .expect("generation after release");
    assert_eq!(code, OK_SNIPPET);
}

#[tokio::test]
async fn test_saved_snippet_matches_buffer() {
    let (url, _backend) = spawn_mock_backend().await;
    let panel = loaded_panel(&url, 5, "AAA").await;
    panel
        .learn_filter(Some("m-1"), "ok.txt")
        .await
        .expect("generation should succeed");

    let dir = std::env::temp_dir().join("sieve_integration_snippets");
    let path = panel
        .save_snippet(Some(&dir))
        .await
        .expect("save")
        .expect("buffer is not empty");

    assert_eq!(
        std::fs::read_to_string(&path).expect("read snippet"),
        OK_SNIPPET
    );
    std::fs::remove_file(&path).ok();
}
