//! `POST /v1/file` bridged to the `FileUpload` RPC.

mod common;

use common::{Harness, TestApp};
use portico_gateway::domain::credential::CredentialSource;
use portico_gateway::{CredentialError, SessionToken, StaticCredential};
use proptest::prelude::*;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::Duration;
use tonic::Status;

const TOKEN: &str = "abcdefghijklmnop";

struct BrokenCredential;

impl CredentialSource for BrokenCredential {
    fn stored_token(&self) -> Result<SessionToken, CredentialError> {
        Err(CredentialError::Missing)
    }
}

fn upload_form(space_id: Option<&str>, file: Option<(&str, &[u8])>) -> Form {
    let mut form = Form::new();
    if let Some(space_id) = space_id {
        form = form.text("space_id", space_id.to_string());
    }
    if let Some((name, contents)) = file {
        form = form.part("file", Part::bytes(contents.to_vec()).file_name(name.to_string()));
    }
    form
}

async fn post_form(harness: &Harness, form: Form) -> reqwest::Response {
    reqwest::Client::new()
        .post(harness.proxy_url("/v1/file"))
        .multipart(form)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_upload_success_returns_object_id() {
    let harness = Harness::start(TestApp::default(), StaticCredential::new(TOKEN)).await;

    let response = post_form(
        &harness,
        upload_form(Some("space-1"), Some(("notes.md", b"# hello"))),
    )
    .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "object_id": "obj-space-1" }));

    let uploads = harness.app.uploads();
    assert_eq!(uploads.len(), 1);
    let upload = &uploads[0];
    assert_eq!(upload.space_id, "space-1");
    assert_eq!(upload.contents, b"# hello");
    assert_eq!(upload.token.as_deref(), Some(TOKEN));
    assert_eq!(
        upload.local_path.extension().and_then(|e| e.to_str()),
        Some("md")
    );
    assert!(upload.local_path.starts_with(harness.staging.path()));

    // Staged copy is gone once the response is out
    assert!(!upload.local_path.exists());
    assert_eq!(harness.staged_files(), 0);

    harness.gateway.stop().await;
}

#[tokio::test]
async fn test_empty_token_sends_no_metadata() {
    let harness = Harness::start(TestApp::default(), StaticCredential::default()).await;

    let response = post_form(&harness, upload_form(Some("s"), Some(("a.txt", b"x")))).await;
    assert_eq!(response.status(), 200);
    assert_eq!(harness.app.uploads()[0].token, None);

    harness.gateway.stop().await;
}

#[tokio::test]
async fn test_non_post_is_method_not_allowed() {
    let harness = Harness::start(TestApp::default(), StaticCredential::new(TOKEN)).await;

    for method in [reqwest::Method::GET, reqwest::Method::PUT, reqwest::Method::DELETE] {
        let response = reqwest::Client::new()
            .request(method, harness.proxy_url("/v1/file"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 405);
    }
    assert_eq!(harness.app.handled(), 0);

    harness.gateway.stop().await;
}

#[tokio::test]
async fn test_non_multipart_body_is_bad_request() {
    let harness = Harness::start(TestApp::default(), StaticCredential::new(TOKEN)).await;

    let response = reqwest::Client::new()
        .post(harness.proxy_url("/v1/file"))
        .header("content-type", "application/json")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(harness.app.handled(), 0);

    harness.gateway.stop().await;
}

#[tokio::test]
async fn test_missing_fields_are_bad_request() {
    let harness = Harness::start(TestApp::default(), StaticCredential::new(TOKEN)).await;

    let response = post_form(&harness, upload_form(None, Some(("a.txt", b"x")))).await;
    assert_eq!(response.status(), 400);
    assert_eq!(response.text().await.unwrap(), "space_id is required\n");

    let response = post_form(&harness, upload_form(Some(""), Some(("a.txt", b"x")))).await;
    assert_eq!(response.status(), 400);

    let response = post_form(&harness, upload_form(Some("space-1"), None)).await;
    assert_eq!(response.status(), 400);
    assert_eq!(response.text().await.unwrap(), "file is required\n");

    assert_eq!(harness.app.handled(), 0);
    assert_eq!(harness.staged_files(), 0);

    harness.gateway.stop().await;
}

#[tokio::test]
async fn test_text_field_named_file_is_not_a_file() {
    let harness = Harness::start(TestApp::default(), StaticCredential::new(TOKEN)).await;

    let form = Form::new()
        .text("space_id", "space-1")
        .text("file", "hello");
    let response = post_form(&harness, form).await;
    assert_eq!(response.status(), 400);
    assert_eq!(response.text().await.unwrap(), "file is required\n");
    assert_eq!(harness.app.handled(), 0);
    assert_eq!(harness.staged_files(), 0);

    harness.gateway.stop().await;
}

#[tokio::test]
async fn test_oversized_form_is_bad_request() {
    let harness = Harness::start_with(TestApp::default(), StaticCredential::new(TOKEN), |c| {
        c.limits.max_upload_size = 1024;
    })
    .await;

    let big = vec![7u8; 64 * 1024];
    let response = post_form(&harness, upload_form(Some("s"), Some(("big.bin", &big)))).await;
    assert_eq!(response.status(), 400);
    assert_eq!(harness.app.handled(), 0);
    assert_eq!(harness.staged_files(), 0);

    harness.gateway.stop().await;
}

#[tokio::test]
async fn test_credential_failure_skips_rpc() {
    let harness = Harness::start(TestApp::default(), BrokenCredential).await;

    let response = post_form(&harness, upload_form(Some("s"), Some(("a.txt", b"x")))).await;
    assert_eq!(response.status(), 500);
    assert_eq!(
        response.text().await.unwrap(),
        "Failed to get stored session token\n"
    );
    assert_eq!(harness.app.handled(), 0);
    assert_eq!(harness.staged_files(), 0);

    harness.gateway.stop().await;
}

#[tokio::test]
async fn test_application_error_is_reported_with_redacted_token() {
    let harness = Harness::start(
        TestApp::failing_uploads("quota exceeded"),
        StaticCredential::new(TOKEN),
    )
    .await;

    let response = post_form(&harness, upload_form(Some("space-9"), Some(("a.txt", b"x")))).await;
    assert_eq!(response.status(), 400);
    let text = response.text().await.unwrap();
    assert_eq!(
        text,
        "Upload error: quota exceeded (Token: abcde..., Space: space-9)\n"
    );
    assert!(!text.contains(TOKEN));
    assert_eq!(harness.staged_files(), 0);

    harness.gateway.stop().await;
}

#[tokio::test]
async fn test_denied_upload_is_transport_error() {
    let harness = Harness::start(
        TestApp::denying(Status::permission_denied("locked")),
        StaticCredential::new(TOKEN),
    )
    .await;

    let response = post_form(&harness, upload_form(Some("s"), Some(("a.txt", b"x")))).await;
    assert_eq!(response.status(), 500);
    let text = response.text().await.unwrap();
    assert!(text.starts_with("gRPC error: code = PermissionDenied"), "{text}");
    assert!(text.contains("locked"));
    assert_eq!(harness.app.handled(), 0);
    assert_eq!(harness.staged_files(), 0);

    harness.gateway.stop().await;
}

#[tokio::test]
async fn test_slow_upload_rpc_is_transport_error() {
    let harness = Harness::start_with(
        TestApp::slow_uploads(Duration::from_secs(2)),
        StaticCredential::new(TOKEN),
        |c| {
            c.timeouts.upload_rpc = Duration::from_millis(300);
        },
    )
    .await;

    let response = post_form(&harness, upload_form(Some("s"), Some(("a.txt", b"x")))).await;
    assert_eq!(response.status(), 500);
    let text = response.text().await.unwrap();
    assert!(text.starts_with("gRPC error: code = "), "{text}");
    assert!(!text.contains("within 0s"), "{text}");
    assert_eq!(harness.staged_files(), 0);

    harness.gateway.stop().await;
}

#[tokio::test]
async fn test_missing_staging_dir_is_server_error() {
    let harness = Harness::start_with(TestApp::default(), StaticCredential::new(TOKEN), |c| {
        c.upload.staging_dir = c.upload.staging_dir.join("missing");
    })
    .await;

    let response = post_form(&harness, upload_form(Some("s"), Some(("a.txt", b"x")))).await;
    assert_eq!(response.status(), 500);
    // No server paths in the body
    assert_eq!(response.text().await.unwrap(), "Failed to create temp file\n");
    assert_eq!(harness.app.handled(), 0);
    assert_eq!(harness.staged_files(), 0);

    harness.gateway.stop().await;
}

proptest! {
    #[test]
    fn prop_token_preview_never_leaks_more_than_prefix(token in "[A-Za-z0-9]{0,64}") {
        let preview = SessionToken::new(token.clone()).preview();
        if token.len() > 5 {
            prop_assert_eq!(&preview, &format!("{}...", &token[..5]));
            prop_assert!(!preview.contains(&token));
        } else if token.is_empty() {
            prop_assert_eq!(preview, "empty");
        } else {
            prop_assert_eq!(preview, "[redacted]");
        }
    }
}
