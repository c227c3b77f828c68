//! End-to-end PBX outbound: submit through the router, observe the
//! Originate on an in-process AMI peer, answer with a FaxResult event and
//! watch the job reach its terminal state.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use common::*;
use faxbot::ami::AmiClient;
use faxbot::api::models::Backend;
use faxbot::config::AmiConfig;
use faxbot::providers::SipProvider;

/// Minimal AMI peer: banner, login ack, then a FaxResult for every
/// Originate, echoing the job id it finds in the action.
async fn spawn_ami_fixture(fax_status: &'static str, pages: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half
            .write_all(b"Asterisk Call Manager/5.0.0\r\n")
            .await
            .unwrap();

        let login = read_block(&mut reader).await;
        assert_eq!(login.get("Action").map(String::as_str), Some("Login"));
        write_half
            .write_all(b"Response: Success\r\nActionID: login\r\nMessage: Authentication accepted\r\n\r\n")
            .await
            .unwrap();

        let originate = read_block(&mut reader).await;
        assert_eq!(
            originate.get("Action").map(String::as_str),
            Some("Originate")
        );
        let action_id = originate.get("ActionID").cloned().unwrap();

        let event = format!(
            "Event: UserEvent\r\nUserEvent: FaxResult\r\nJobId: {action_id}\r\nFaxStatus: {fax_status}\r\nFaxPages: {pages}\r\n\r\n"
        );
        write_half.write_all(event.as_bytes()).await.unwrap();

        // Keep the connection open so the client's read loop stays alive
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    port
}

async fn read_block(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
) -> HashMap<String, String> {
    let mut block = HashMap::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.unwrap();
        if n == 0 {
            return block;
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if !block.is_empty() {
                return block;
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            block.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
}

async fn build_sip_app(fax_status: &'static str, pages: &'static str) -> (TestApp, tempfile::TempDir) {
    let port = spawn_ami_fixture(fax_status, pages).await;
    let spool = tempfile::TempDir::new().unwrap();

    let ami_config = AmiConfig {
        host: "127.0.0.1".into(),
        port,
        username: "faxbot".into(),
        password: Some("amipass".into()),
        fax_dir: spool.path().to_path_buf(),
        command_timeout_secs: 5,
    };

    let mut config = test_config();
    config.ami = ami_config.clone();

    let ami = AmiClient::new(&ami_config);
    let sip = Arc::new(SipProvider::new(ami, &ami_config));

    let ctx = build_test_app_custom(config, Backend::Sip, vec![sip]);
    (ctx, spool)
}

async fn poll_until_terminal(ctx: &TestApp, job_id: &str) -> serde_json::Value {
    for _ in 0..50 {
        let (_, job) = send(&ctx.app, get_request(&format!("/fax/{job_id}"), Some(ADMIN_KEY))).await;
        let status = job["status"].as_str().unwrap_or("").to_string();
        if status == "SUCCESS" || status == "FAILED" {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("job {job_id} never reached a terminal state");
}

#[tokio::test]
async fn test_sip_outbound_success_via_control_event() {
    let (ctx, spool) = build_sip_app("SUCCESS", "2").await;

    let request = fax_request(
        Some(ADMIN_KEY),
        "+15551234567",
        "doc.pdf",
        "application/pdf",
        b"%PDF-1.4 two pages",
    );
    let (status, job) = send(&ctx.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["backend"], "sip");
    assert_eq!(job["status"], "in_progress");
    let job_id = job["id"].as_str().unwrap().to_string();
    // The action id doubles as the provider sid
    assert_eq!(job["provider_sid"], job_id.as_str());

    // The TIFF was spooled for Asterisk
    assert!(spool.path().join(format!("{job_id}.tiff")).exists());

    let job = poll_until_terminal(&ctx, &job_id).await;
    assert_eq!(job["status"], "SUCCESS");
    assert_eq!(job["pages"], 2);
}

#[tokio::test]
async fn test_sip_outbound_failure_via_control_event() {
    let (ctx, _spool) = build_sip_app("FAILED", "0").await;

    let request = fax_request(
        Some(ADMIN_KEY),
        "+15551234567",
        "doc.pdf",
        "application/pdf",
        b"%PDF-1.4",
    );
    let (status, job) = send(&ctx.app, request).await;
    assert_eq!(status, StatusCode::OK);
    let job_id = job["id"].as_str().unwrap().to_string();

    let job = poll_until_terminal(&ctx, &job_id).await;
    assert_eq!(job["status"], "FAILED");
    assert!(job["error"].is_string());
}
