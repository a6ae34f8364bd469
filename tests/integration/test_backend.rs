//! Integration tests for the request/response backend flows.
//!
//! Each test spawns an in-process mock backend and drives it through the real
//! HTTP client and control panel.

mod common;

use std::sync::atomic::Ordering;

use common::{loaded_panel, panel_for, spawn_mock_backend, workbook};
use serde_json::json;
use sieve_core::{SieveError, ToggleOutcome};

// ============================================================================
// Settings
// ============================================================================

#[tokio::test]
async fn test_initialize_fetches_backend_config() {
    let (url, _backend) = spawn_mock_backend().await;
    let panel = panel_for(&url, 5);

    let config = panel.initialize().await.expect("initialize");

    assert!(!config.has_api_key());
    assert_eq!(config.starred_models, vec!["m-1".to_string()]);
    assert_eq!(panel.backend_config().await, config);
}

#[tokio::test]
async fn test_prompts_are_listed() {
    let (url, _backend) = spawn_mock_backend().await;
    let panel = panel_for(&url, 5);

    let prompts = panel.client().list_prompts().await.expect("prompts");

    assert_eq!(prompts, vec!["fail.txt", "ok.txt", "stall.txt"]);
}

#[tokio::test]
async fn test_valid_key_is_stored_and_saved() {
    let (url, backend) = spawn_mock_backend().await;
    let panel = panel_for(&url, 5);
    panel.initialize().await.expect("initialize");

    panel
        .validate_and_store_key("  good-key ")
        .await
        .expect("key should validate");

    assert_eq!(panel.backend_config().await.api_key, "good-key");
    assert_eq!(backend.config.lock().await["api_key"], json!("good-key"));
    assert_eq!(backend.config_saves.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rejected_key_is_not_stored() {
    let (url, backend) = spawn_mock_backend().await;
    let panel = panel_for(&url, 5);
    panel.initialize().await.expect("initialize");

    let err = panel
        .validate_and_store_key("bad-key")
        .await
        .expect_err("key should be rejected");

    assert!(
        matches!(&err, SieveError::InvalidApiKey { message } if message.contains("401")),
        "got: {err:?}"
    );
    assert!(!panel.backend_config().await.has_api_key());
    assert_eq!(backend.config_saves.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_refresh_models_and_select() {
    let (url, backend) = spawn_mock_backend().await;
    let panel = panel_for(&url, 5);
    panel.initialize().await.expect("initialize");
    panel
        .validate_and_store_key("good-key")
        .await
        .expect("key should validate");

    let models = panel.refresh_models().await.expect("refresh");
    assert_eq!(models, vec!["m-1", "m-2"]);
    assert_eq!(
        backend.config.lock().await["all_models"],
        json!(["m-1", "m-2"])
    );

    assert!(panel.select_model("m-2").await.expect("select"));
    assert!(!panel.select_model("m-2").await.expect("select again"));
    assert_eq!(backend.config.lock().await["selected_model"], json!("m-2"));

    // key + refresh + one model change
    assert_eq!(backend.config_saves.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_backend_error_field_is_surfaced() {
    let (url, _backend) = spawn_mock_backend().await;
    let panel = panel_for(&url, 5);

    let err = panel
        .client()
        .list_models()
        .await
        .expect_err("models without a key should fail");

    assert!(
        matches!(&err, SieveError::Backend { status: 500, message } if message == "401 Client Error: Unauthorized"),
        "got: {err:?}"
    );
    assert!(err.is_transient());
}

// ============================================================================
// Wallets and selection
// ============================================================================

#[tokio::test]
async fn test_load_wallets_then_sync_views() {
    let (url, backend) = spawn_mock_backend().await;
    let panel = panel_for(&url, 5);

    let loaded = panel
        .load_wallets(&[workbook("a.xlsx"), workbook("b.xlsx")])
        .await
        .expect("load");
    assert_eq!(loaded, 4);
    assert_eq!(backend.uploads.load(Ordering::SeqCst), 2);

    let report = panel.apply_bulk_input("CCC | ZZZ;\nAAA, AAA").await;
    assert_eq!(report.selected, 2);
    assert_eq!(report.unmatched, vec!["ZZZ".to_string()]);
    assert_eq!(panel.address_text().await, "AAA\nCCC");

    assert_eq!(
        panel.toggle_wallet(2, true).await,
        ToggleOutcome::Unaddressable { index: 2 }
    );
    assert_eq!(panel.toggle_wallet(0, false).await, ToggleOutcome::Applied);
    assert_eq!(panel.address_text().await, "CCC");

    // Reloading replaces the list and clears the selection.
    panel
        .load_wallets(&[workbook("c.xlsx")])
        .await
        .expect("reload");
    assert_eq!(panel.address_text().await, "");
}

#[tokio::test]
async fn test_load_wallets_missing_file_is_io_error() {
    let (url, backend) = spawn_mock_backend().await;
    let panel = panel_for(&url, 5);

    let err = panel
        .load_wallets(&[std::env::temp_dir().join("sieve_no_such_workbook.xlsx")])
        .await
        .expect_err("missing file");

    assert!(matches!(err, SieveError::Io(_)), "got: {err:?}");
    assert_eq!(backend.uploads.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Execution
// ============================================================================

#[tokio::test]
async fn test_execute_returns_matches() {
    let (url, _backend) = spawn_mock_backend().await;
    let panel = loaded_panel(&url, 5, "AAA").await;
    panel.set_code("result_df = df[df['roi'] > 40]").await;

    let results = panel.execute_code().await.expect("execute");

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].address(), Some("AAA"));
    assert_eq!(results[0].roi_percent(), Some(48.0));
}

#[tokio::test]
async fn test_execute_failure_carries_backend_message() {
    let (url, _backend) = spawn_mock_backend().await;
    let panel = loaded_panel(&url, 5, "AAA").await;
    panel.set_code("boom").await;

    let err = panel.execute_code().await.expect_err("execution should fail");

    assert_eq!(
        err.to_string(),
        "Backend error (500): Code execution failed: boom"
    );
}
