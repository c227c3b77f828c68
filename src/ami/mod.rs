//! Persistent Asterisk AMI control connection.
//!
//! A single TCP session authenticates with a Login action, then a read
//! loop parses `Key: Value` blocks and completes per-action oneshot
//! channels when the matching `UserEvent FaxResult` arrives. Outbound
//! commands register their action id before writing, so the event cannot
//! race the subscription. The write half doubles as the connection guard:
//! dialing happens under its lock, which keeps concurrent reconnects out.
//! On disconnect every pending command is failed and a backoff loop
//! (1s base, 30s cap, jitter) re-establishes the session.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::AmiConfig;

const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_CAP: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum AmiError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("login rejected")]
    Login,

    #[error("not connected")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal result of one SendFAX attempt, as reported by the dialplan
#[derive(Debug, Clone)]
pub struct FaxResult {
    pub success: bool,
    pub pages: Option<u32>,
    pub detail: Option<String>,
}

#[derive(Clone)]
pub struct AmiClient {
    inner: Arc<Inner>,
}

struct Inner {
    host: String,
    port: u16,
    username: String,
    password: String,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    pending: Mutex<HashMap<String, oneshot::Sender<FaxResult>>>,
    reconnecting: AtomicBool,
}

impl AmiClient {
    pub fn new(config: &AmiConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                host: config.host.clone(),
                port: config.port,
                username: config.username.clone(),
                password: config.password.clone().unwrap_or_default(),
                writer: tokio::sync::Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                reconnecting: AtomicBool::new(false),
            }),
        }
    }

    /// Dial and authenticate. No-op when already connected.
    pub async fn connect(&self) -> Result<(), AmiError> {
        let mut guard = self.inner.writer.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let addr = format!("{}:{}", self.inner.host, self.inner.port);
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| AmiError::Connect(format!("timeout dialing {addr}")))?
            .map_err(|e| AmiError::Connect(e.to_string()))?;

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        // Banner line, e.g. "Asterisk Call Manager/5.0.0"
        let mut banner = String::new();
        reader.read_line(&mut banner).await?;
        debug!(banner = banner.trim(), "AMI connected");

        let login = format!(
            "Action: Login\r\nActionID: login\r\nUsername: {}\r\nSecret: {}\r\nEvents: on\r\n\r\n",
            self.inner.username, self.inner.password
        );
        write_half.write_all(login.as_bytes()).await?;

        let response = read_block(&mut reader)
            .await?
            .ok_or(AmiError::Connect("connection closed during login".into()))?;
        if response.get("Response").map(String::as_str) != Some("Success") {
            return Err(AmiError::Login);
        }
        info!(host = %self.inner.host, "AMI login accepted");

        *guard = Some(write_half);
        drop(guard);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            read_loop(inner, reader).await;
        });

        Ok(())
    }

    /// Queue an Originate that runs the SendFAX dialplan against the
    /// spooled TIFF. The returned channel resolves when the read loop sees
    /// the matching FaxResult event; the caller owns the timeout.
    pub async fn originate_sendfax(
        &self,
        action_id: &str,
        to_number: &str,
        tiff_path: &Path,
    ) -> Result<oneshot::Receiver<FaxResult>, AmiError> {
        self.connect().await?;

        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .unwrap()
            .insert(action_id.to_string(), tx);

        let action = format!(
            "Action: Originate\r\n\
             ActionID: {action_id}\r\n\
             Channel: Local/{to_number}@faxout\r\n\
             Context: sendfax\r\n\
             Exten: s\r\n\
             Priority: 1\r\n\
             Async: true\r\n\
             Variable: FAXFILE={}\r\n\
             Variable: JOBID={action_id}\r\n\
             Variable: DESTINATION={to_number}\r\n\r\n",
            tiff_path.display()
        );

        let mut guard = self.inner.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| {
            self.inner.pending.lock().unwrap().remove(action_id);
            AmiError::NotConnected
        })?;

        if let Err(e) = writer.write_all(action.as_bytes()).await {
            self.inner.pending.lock().unwrap().remove(action_id);
            return Err(e.into());
        }

        Ok(rx)
    }
}

/// Read one `Key: Value` block, terminated by an empty line.
/// Returns `None` on clean EOF before any line.
async fn read_block(
    reader: &mut BufReader<OwnedReadHalf>,
) -> std::io::Result<Option<HashMap<String, String>>> {
    let mut block = HashMap::new();
    let mut saw_line = false;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(if saw_line { Some(block) } else { None });
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if saw_line {
                return Ok(Some(block));
            }
            continue;
        }
        saw_line = true;
        if let Some((key, value)) = line.split_once(':') {
            block.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
}

async fn read_loop(inner: Arc<Inner>, mut reader: BufReader<OwnedReadHalf>) {
    loop {
        match read_block(&mut reader).await {
            Ok(Some(block)) => handle_block(&inner, block),
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "AMI read failed");
                break;
            }
        }
    }

    warn!("AMI connection lost");
    *inner.writer.lock().await = None;

    // Outstanding commands will never see their event on this session
    let pending: Vec<_> = inner.pending.lock().unwrap().drain().collect();
    for (_, tx) in pending {
        let _ = tx.send(FaxResult {
            success: false,
            pages: None,
            detail: Some("control connection lost".into()),
        });
    }

    spawn_reconnect(inner);
}

fn handle_block(inner: &Arc<Inner>, block: HashMap<String, String>) {
    let is_fax_result = block.get("Event").map(String::as_str) == Some("UserEvent")
        && block.get("UserEvent").map(String::as_str) == Some("FaxResult");
    if !is_fax_result {
        return;
    }

    let Some(id) = block
        .get("JobId")
        .or_else(|| block.get("ActionID"))
        .cloned()
    else {
        debug!("FaxResult event without correlation id");
        return;
    };

    let status = block
        .get("FaxStatus")
        .or_else(|| block.get("FaxResult"))
        .map(String::as_str)
        .unwrap_or("");
    let pages = block
        .get("FaxPages")
        .or_else(|| block.get("Pages"))
        .and_then(|p| p.parse().ok());

    let result = FaxResult {
        success: status.eq_ignore_ascii_case("SUCCESS"),
        pages,
        detail: block.get("FaxError").cloned(),
    };

    if let Some(tx) = inner.pending.lock().unwrap().remove(&id) {
        let _ = tx.send(result);
    } else {
        debug!(action_id = %id, "FaxResult for unknown action id");
    }
}

fn spawn_reconnect(inner: Arc<Inner>) {
    if inner.reconnecting.swap(true, Ordering::SeqCst) {
        return;
    }

    tokio::spawn(async move {
        let client = AmiClient {
            inner: inner.clone(),
        };
        let mut backoff = RECONNECT_BASE;
        loop {
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
            tokio::time::sleep(backoff + jitter).await;

            match client.connect().await {
                Ok(()) => {
                    info!("AMI reconnected");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, backoff_secs = backoff.as_secs(), "AMI reconnect failed");
                    backoff = (backoff * 2).min(RECONNECT_CAP);
                }
            }
        }
        inner.reconnecting.store(false, Ordering::SeqCst);
    });
}
