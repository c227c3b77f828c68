use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, State},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::{info, warn};

use super::state::AppState;
use super::{admin, fax, inbound, webhooks};
use crate::ami::AmiClient;
use crate::api::models::Backend;
use crate::config::{BackendKind, Config};
use crate::convert;
use crate::ledger::{self, FaxStore, RetentionPolicy};
use crate::providers::{
    DisabledProvider, PhaxioProvider, ProviderRegistry, SinchProvider, SipProvider,
};
use crate::storage::StorageClient;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub async fn run(address: SocketAddr) -> Result<(), AnyError> {
    info!("Loading configuration");
    let config = Config::load().map_err(|e| format!("Failed to load config: {}", e))?;

    let ledger_path = config.server.data_dir.join("ledger");
    info!(path = %ledger_path.display(), "Opening ledger");
    let store =
        FaxStore::open(&ledger_path).map_err(|e| format!("Failed to open ledger: {}", e))?;

    let storage = StorageClient::from_config(&config.storage)
        .map_err(|e| format!("Failed to initialize storage: {}", e))?;
    info!(backend = storage.label, "Storage initialized");

    let converter = convert::from_config(&config.convert);

    let (providers, ami) = build_providers(&config)?;
    info!(backend = providers.active_backend().as_str(), "Provider registry initialized");

    // Dial the PBX early so the first send does not pay the connect cost;
    // failures fall back to connect-on-send.
    if let Some(ami) = ami {
        tokio::spawn(async move {
            if let Err(e) = ami.connect().await {
                warn!(error = %e, "Initial AMI connect failed, will retry on demand");
            }
        });
    }

    let state = AppState::new(config, store, storage, converter, providers);

    spawn_retention_task(state.clone());

    let app = build_router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "Faxbot API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// One retention pass, for the `faxbot sweep` subcommand and cron-style
/// deployments.
pub async fn sweep_once() -> Result<(), AnyError> {
    let config = Config::load().map_err(|e| format!("Failed to load config: {}", e))?;
    let store = FaxStore::open(config.server.data_dir.join("ledger"))?;
    let storage = StorageClient::from_config(&config.storage)
        .map_err(|e| format!("Failed to initialize storage: {}", e))?;

    let stats = ledger::run_sweep(
        &store,
        &storage,
        RetentionPolicy {
            artifact_days: config.inbound.retention_days,
            dedup_window_hours: config.retention.dedup_window_hours,
        },
    )
    .await?;
    info!(?stats, "Sweep finished");
    Ok(())
}

/// Build the full route table. Tests drive this router directly.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.limits.max_file_size_bytes() + 1024 * 1024;

    Router::new()
        .route("/fax", post(fax::send_fax))
        .route("/fax/{id}", get(fax::get_fax))
        .route("/fax/{id}/pdf", get(fax::get_fax_pdf))
        .route("/phaxio-callback", post(webhooks::phaxio_callback))
        .route("/phaxio-inbound", post(webhooks::phaxio_inbound))
        .route("/sinch-callback", post(webhooks::sinch_callback))
        .route("/sinch-inbound", post(webhooks::sinch_inbound))
        .route("/_internal/asterisk/inbound", post(inbound::asterisk_inbound))
        .route(
            "/_internal/freeswitch/outbound_result",
            post(inbound::freeswitch_outbound_result),
        )
        .route("/inbound", get(inbound::list_inbound))
        .route("/inbound/{id}", get(inbound::get_inbound))
        .route("/inbound/{id}/pdf", get(inbound::get_inbound_pdf))
        .route(
            "/admin/api-keys",
            post(admin::create_api_key).get(admin::list_api_keys),
        )
        .route("/admin/api-keys/{id}", delete(admin::revoke_api_key))
        .route("/admin/api-keys/{id}/rotate", post(admin::rotate_api_key))
        .route(
            "/admin/mailboxes",
            post(admin::create_mailbox).get(admin::list_mailboxes),
        )
        .route(
            "/admin/inbound-rules",
            put(admin::put_inbound_rule).get(admin::list_inbound_rules),
        )
        .route("/health", get(health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        // Decompress gzip/deflate request bodies transparently
        .layer(RequestDecompressionLayer::new())
}

/// Construct providers for every configured backend. Non-active providers
/// stay registered so their callbacks keep verifying during migrations.
fn build_providers(
    config: &Config,
) -> Result<(ProviderRegistry, Option<AmiClient>), AnyError> {
    let active = match config.backend.kind {
        BackendKind::Phaxio => Backend::Phaxio,
        BackendKind::Sinch => Backend::Sinch,
        BackendKind::Sip => Backend::Sip,
        BackendKind::Disabled => Backend::Disabled,
    };

    let mut registry = ProviderRegistry::new(active);
    registry.register(Arc::new(DisabledProvider));

    if config.phaxio.api_key.is_some() || config.phaxio.callback_token.is_some() {
        registry.register(Arc::new(PhaxioProvider::new(&config.phaxio)?));
    }

    let sinch_configured = config.sinch.project_id.is_some()
        || config.sinch.basic_user.is_some()
        || config.sinch.hmac_secret.is_some();
    if sinch_configured {
        registry.register(Arc::new(SinchProvider::new(&config.sinch)?));
    }

    let mut ami = None;
    if config.backend.kind == BackendKind::Sip {
        let client = AmiClient::new(&config.ami);
        registry.register(Arc::new(SipProvider::new(client.clone(), &config.ami)));
        ami = Some(client);
    }

    Ok((registry, ami))
}

fn spawn_retention_task(state: AppState) {
    if state.config.retention.sweep_minutes == 0 {
        warn!("Retention sweep disabled (sweep_minutes = 0)");
        return;
    }
    let interval = Duration::from_secs(state.config.retention.sweep_minutes * 60);
    let policy = RetentionPolicy {
        artifact_days: state.config.inbound.retention_days,
        dedup_window_hours: state.config.retention.dedup_window_hours,
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup stays quick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match ledger::run_sweep(&state.store, &state.storage, policy).await {
                Ok(stats) => {
                    if stats.errors > 0 {
                        warn!(errors = stats.errors, "Sweep finished with errors, will retry next interval");
                    }
                }
                Err(e) => warn!(error = %e, "Retention sweep failed"),
            }
        }
    });
}

/// Liveness endpoint; reports component statuses.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    use std::collections::HashMap;

    let mut components = HashMap::new();

    components.insert("api".to_string(), "healthy".to_string());
    components.insert(
        "ledger".to_string(),
        match state.store.persist() {
            Ok(()) => "healthy".to_string(),
            Err(_) => "unhealthy".to_string(),
        },
    );
    components.insert("storage".to_string(), "healthy".to_string());
    components.insert(
        "backend".to_string(),
        state.providers.active_backend().as_str().to_string(),
    );

    let all_healthy = components
        .values()
        .all(|status| status != "unhealthy");
    let status_code = if all_healthy {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };

    let response = super::models::HealthResponse {
        status: if all_healthy { "healthy" } else { "unhealthy" }.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
