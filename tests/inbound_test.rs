//! Internal PBX hook tests: Asterisk inbound ingestion and the
//! FreeSWITCH outbound result hook.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use tower::ServiceExt;

use common::*;
use faxbot::api::models::{Backend, FaxJob, JobStatus};

fn internal_request(uri: &str, secret: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .uri(uri)
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(secret) = secret {
        builder = builder.header("X-Internal-Secret", secret);
    }
    builder
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn write_spool_tiff(dir: &tempfile::TempDir, name: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, b"II*\x00 fake tiff payload").unwrap();
    path.to_str().unwrap().to_string()
}

#[tokio::test]
async fn test_asterisk_inbound_happy_path() {
    let ctx = build_test_app();
    let spool = tempfile::TempDir::new().unwrap();
    let tiff_path = write_spool_tiff(&spool, "ABC.tiff");

    let (status, response) = send(
        &ctx.app,
        internal_request(
            "/_internal/asterisk/inbound",
            Some(INTERNAL_SECRET),
            serde_json::json!({
                "tiff_path": tiff_path,
                "to_number": "+15551230000",
                "from_number": "+15559876543",
                "uniqueid": "ABC",
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let inbound_id = response["id"].as_str().unwrap().to_string();

    let (status, listing) = send(&ctx.app, get_request("/inbound", Some(ADMIN_KEY))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["total"], 1);
    let item = &listing["items"][0];
    assert_eq!(item["backend"], "sip");
    assert_eq!(item["to_number"], "+15551230000");
    assert_eq!(item["from_number"], "+15559876543");
    assert_eq!(item["status"], "received");
    let token = item["pdf_token"].as_str().unwrap();
    assert!(token.len() >= 32);

    // Single record fetch with the read scope
    let (status, fetched) = send(
        &ctx.app,
        get_request(&format!("/inbound/{inbound_id}"), Some(ADMIN_KEY)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], inbound_id.as_str());

    // Tokenized PDF download carries the cache-defeating headers
    let response = ctx
        .app
        .clone()
        .oneshot(get_request(
            &format!("/inbound/{inbound_id}/pdf?token={token}"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/pdf"
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store, no-cache, must-revalidate"
    );
    assert_eq!(response.headers().get(header::PRAGMA).unwrap(), "no-cache");
    assert_eq!(response.headers().get(header::EXPIRES).unwrap(), "0");
}

#[tokio::test]
async fn test_asterisk_inbound_requires_secret() {
    let ctx = build_test_app();
    let spool = tempfile::TempDir::new().unwrap();
    let tiff_path = write_spool_tiff(&spool, "DEF.tiff");

    let payload = serde_json::json!({
        "tiff_path": tiff_path,
        "to_number": "+15551230000",
        "uniqueid": "DEF",
    });

    let (status, _) = send(
        &ctx.app,
        internal_request("/_internal/asterisk/inbound", None, payload.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &ctx.app,
        internal_request("/_internal/asterisk/inbound", Some("wrong"), payload),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, listing) = send(&ctx.app, get_request("/inbound", Some(ADMIN_KEY))).await;
    assert_eq!(listing["total"], 0);
}

#[tokio::test]
async fn test_asterisk_inbound_rejects_traversal_paths() {
    let ctx = build_test_app();

    for path in [
        "../../../etc/passwd",
        "/var/spool/asterisk/../../etc/passwd",
        "relative/fax.tiff",
    ] {
        let (status, _) = send(
            &ctx.app,
            internal_request(
                "/_internal/asterisk/inbound",
                Some(INTERNAL_SECRET),
                serde_json::json!({
                    "tiff_path": path,
                    "to_number": "+15551230000",
                    "uniqueid": format!("esc-{path}"),
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "path {path} must be rejected");
    }
}

#[tokio::test]
async fn test_asterisk_inbound_deduplicates_uniqueid() {
    let ctx = build_test_app();
    let spool = tempfile::TempDir::new().unwrap();
    let tiff_path = write_spool_tiff(&spool, "GHI.tiff");

    let payload = serde_json::json!({
        "tiff_path": tiff_path,
        "to_number": "+15551230000",
        "uniqueid": "GHI",
    });

    let (status, _) = send(
        &ctx.app,
        internal_request("/_internal/asterisk/inbound", Some(INTERNAL_SECRET), payload.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, response) = send(
        &ctx.app,
        internal_request("/_internal/asterisk/inbound", Some(INTERNAL_SECRET), payload),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["duplicate"], true);

    let (_, listing) = send(&ctx.app, get_request("/inbound", Some(ADMIN_KEY))).await;
    assert_eq!(listing["total"], 1);
}

#[tokio::test]
async fn test_asterisk_inbound_missing_tiff_records_failure() {
    let ctx = build_test_app();

    let (status, _) = send(
        &ctx.app,
        internal_request(
            "/_internal/asterisk/inbound",
            Some(INTERNAL_SECRET),
            serde_json::json!({
                "tiff_path": "/nonexistent/spool/MISSING.tiff",
                "to_number": "+15551230000",
                "uniqueid": "MISSING",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, listing) = send(
        &ctx.app,
        get_request("/inbound?status=failed", Some(ADMIN_KEY)),
    )
    .await;
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["items"][0]["status"], "failed");
}

#[tokio::test]
async fn test_asterisk_inbound_disabled_returns_not_found() {
    let mut config = test_config();
    config.inbound.enabled = false;
    let ctx = build_test_app_with(config);
    let spool = tempfile::TempDir::new().unwrap();
    let tiff_path = write_spool_tiff(&spool, "OFF.tiff");

    let (status, _) = send(
        &ctx.app,
        internal_request(
            "/_internal/asterisk/inbound",
            Some(INTERNAL_SECRET),
            serde_json::json!({
                "tiff_path": tiff_path,
                "to_number": "+15551230000",
                "uniqueid": "OFF",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_inbound_listing_requires_scope() {
    let ctx = build_test_app();

    // A key with only fax scopes cannot list inbound
    let (_, created) = send(
        &ctx.app,
        json_request(
            "POST",
            "/admin/api-keys",
            Some(ADMIN_KEY),
            serde_json::json!({"name": "sender", "scopes": ["fax:send", "fax:read"]}),
        ),
    )
    .await;
    let token = created["token"].as_str().unwrap();

    let (status, _) = send(&ctx.app, get_request("/inbound", Some(token))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&ctx.app, get_request("/inbound", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_inbound_pdf_with_api_key_instead_of_token() {
    let ctx = build_test_app();
    let spool = tempfile::TempDir::new().unwrap();
    let tiff_path = write_spool_tiff(&spool, "KEYED.tiff");

    let (_, response) = send(
        &ctx.app,
        internal_request(
            "/_internal/asterisk/inbound",
            Some(INTERNAL_SECRET),
            serde_json::json!({
                "tiff_path": tiff_path,
                "to_number": "+15551230000",
                "uniqueid": "KEYED",
            }),
        ),
    )
    .await;
    let inbound_id = response["id"].as_str().unwrap();

    // No token, but a key with inbound:read
    let (_, created) = send(
        &ctx.app,
        json_request(
            "POST",
            "/admin/api-keys",
            Some(ADMIN_KEY),
            serde_json::json!({"name": "reader", "scopes": ["inbound:read"]}),
        ),
    )
    .await;
    let token = created["token"].as_str().unwrap();

    let (status, _) = send(
        &ctx.app,
        get_request(&format!("/inbound/{inbound_id}/pdf"), Some(token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Neither token nor key
    let (status, _) = send(
        &ctx.app,
        get_request(&format!("/inbound/{inbound_id}/pdf"), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_freeswitch_outbound_result_finalizes_job() {
    let ctx = build_test_app();

    let mut job = FaxJob::new("job_fs".into(), "+15551234567".into(), Backend::Sip);
    job.status = JobStatus::InProgress;
    job.provider_sid = Some("job_fs".into());
    ctx.state.store.put_job(&job).unwrap();

    let (status, _) = send(
        &ctx.app,
        internal_request(
            "/_internal/freeswitch/outbound_result",
            Some(INTERNAL_SECRET),
            serde_json::json!({
                "job_id": "job_fs",
                "fax_status": "SUCCESS",
                "fax_document_transferred_pages": 2,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let job = ctx.state.store.get_job("job_fs").unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.pages, Some(2));

    // A late contradictory result does not reopen the job
    let (status, response) = send(
        &ctx.app,
        internal_request(
            "/_internal/freeswitch/outbound_result",
            Some(INTERNAL_SECRET),
            serde_json::json!({"job_id": "job_fs", "fax_status": "FAILED"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["duplicate"], true);
    let job = ctx.state.store.get_job("job_fs").unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Success);
}

#[tokio::test]
async fn test_freeswitch_outbound_result_failure() {
    let ctx = build_test_app();

    let mut job = FaxJob::new("job_fsf".into(), "+15551234567".into(), Backend::Sip);
    job.status = JobStatus::InProgress;
    ctx.state.store.put_job(&job).unwrap();

    let (status, _) = send(
        &ctx.app,
        internal_request(
            "/_internal/freeswitch/outbound_result",
            Some(INTERNAL_SECRET),
            serde_json::json!({
                "job_id": "job_fsf",
                "fax_status": "FS_NOT_SENT",
                "fax_result_text": "NO_ANSWER",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let job = ctx.state.store.get_job("job_fsf").unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("NO_ANSWER"));
}

#[tokio::test]
async fn test_freeswitch_outbound_result_auth_and_missing_job() {
    let ctx = build_test_app();

    let (status, _) = send(
        &ctx.app,
        internal_request(
            "/_internal/freeswitch/outbound_result",
            Some("wrong"),
            serde_json::json!({"job_id": "x", "fax_status": "SUCCESS"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &ctx.app,
        internal_request(
            "/_internal/freeswitch/outbound_result",
            Some(INTERNAL_SECRET),
            serde_json::json!({"job_id": "ghost", "fax_status": "SUCCESS"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_inbound_list_filters() {
    let ctx = build_test_app();
    let spool = tempfile::TempDir::new().unwrap();

    for (i, number) in ["+15551230000", "+15551239999"].iter().enumerate() {
        let tiff_path = write_spool_tiff(&spool, &format!("F{i}.tiff"));
        send(
            &ctx.app,
            internal_request(
                "/_internal/asterisk/inbound",
                Some(INTERNAL_SECRET),
                serde_json::json!({
                    "tiff_path": tiff_path,
                    "to_number": number,
                    "uniqueid": format!("F{i}"),
                }),
            ),
        )
        .await;
    }

    let (_, listing) = send(
        &ctx.app,
        get_request("/inbound?to_number=%2B15551230000", Some(ADMIN_KEY)),
    )
    .await;
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["items"][0]["to_number"], "+15551230000");

    let (_, listing) = send(&ctx.app, get_request("/inbound?limit=1", Some(ADMIN_KEY))).await;
    assert_eq!(listing["total"], 2);
    assert_eq!(listing["items"].as_array().unwrap().len(), 1);
}
