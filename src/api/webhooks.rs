//! Provider webhook ingress: signature verification, idempotency, job
//! state updates and the cloud inbound pipeline.
//!
//! Every delivery claims its `(provider_sid, event_type)` pair first;
//! losers of that claim answer 200 without touching state, which makes
//! retried deliveries harmless. Handlers stay within provider retry
//! deadlines: the only slow work is the bounded inbound PDF fetch.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use super::error::ApiError;
use super::models::{Backend, InboundFax, InboundStatus, JobStatus};
use super::state::AppState;
use crate::keys;
use crate::ledger::Transition;
use crate::observability::mask_number;
use crate::providers::{CallbackEvent, ProviderError};

const INBOUND_TOKEN_LEN: usize = 48;
const INBOUND_EVENT: &str = "inbound";

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub job_id: Option<String>,
}

pub async fn phaxio_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    handle_outbound_callback(state, Backend::Phaxio, query.job_id, headers, body).await
}

pub async fn sinch_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    handle_outbound_callback(state, Backend::Sinch, query.job_id, headers, body).await
}

pub async fn phaxio_inbound(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    handle_inbound_webhook(state, Backend::Phaxio, headers, body).await
}

pub async fn sinch_inbound(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    handle_inbound_webhook(state, Backend::Sinch, headers, body).await
}

async fn handle_outbound_callback(
    state: AppState,
    backend: Backend,
    job_id_hint: Option<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let provider = state
        .providers
        .get(backend)
        .ok_or_else(|| ApiError::NotFound(format!("{} not configured", backend.as_str())))?;

    state.metrics.callback_received();

    provider
        .verify_callback(&headers, &body)
        .map_err(|e| reject_callback(&state, backend, e))?;

    let event = provider
        .parse_callback(&body)
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    if !state
        .store
        .claim_callback(&event.provider_sid, &event.event_type)?
    {
        state.metrics.callback_duplicate();
        state.audit.emit(
            "callback_duplicate",
            None,
            backend.as_str(),
            &format!("sid={} event={}", event.provider_sid, event.event_type),
        );
        return Ok(Json(json!({"status": "ok", "duplicate": true})));
    }

    let job = match &job_id_hint {
        Some(id) => state.store.get_job(id)?,
        None => state.store.find_job_by_provider_sid(&event.provider_sid)?,
    };

    let Some(job) = job else {
        warn!(backend = backend.as_str(), sid = %event.provider_sid, "Callback for unknown job");
        return Ok(Json(json!({"status": "ignored"})));
    };

    apply_terminal_event(&state, &job.id, &event)?;

    state.audit.emit(
        "callback_applied",
        None,
        backend.as_str(),
        &format!("job={} sid={} status={:?}", job.id, event.provider_sid, event.status),
    );

    Ok(Json(json!({"status": "ok"})))
}

/// Apply a terminal provider event to the job. Callback pages overwrite
/// the local estimate; the precondition keeps terminal states absorbing.
fn apply_terminal_event(
    state: &AppState,
    job_id: &str,
    event: &CallbackEvent,
) -> Result<(), ApiError> {
    if !event.status.is_terminal() {
        return Ok(());
    }

    let outcome = state.store.transition_job(
        job_id,
        &[JobStatus::Queued, JobStatus::InProgress],
        |job| {
            job.status = event.status;
            if job.provider_sid.is_none() {
                job.provider_sid = Some(event.provider_sid.clone());
            }
            if let Some(pages) = event.pages {
                job.pages = Some(pages);
            }
            if event.status == JobStatus::Failed {
                job.error = Some(
                    event
                        .error
                        .clone()
                        .unwrap_or_else(|| "provider reported failure".into()),
                );
            }
        },
    )?;

    if let Transition::Applied(job) = outcome {
        match job.status {
            JobStatus::Success => state.metrics.job_succeeded(),
            JobStatus::Failed => state.metrics.job_failed(),
            _ => {}
        }
        info!(job_id = %job.id, status = ?job.status, "Job finalized by callback");
    }

    Ok(())
}

async fn handle_inbound_webhook(
    state: AppState,
    backend: Backend,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.config.inbound.enabled {
        return Err(ApiError::NotFound("inbound receiving disabled".into()));
    }

    let provider = state
        .providers
        .get(backend)
        .ok_or_else(|| ApiError::NotFound(format!("{} not configured", backend.as_str())))?;

    state.metrics.callback_received();

    provider
        .verify_callback(&headers, &body)
        .map_err(|e| reject_callback(&state, backend, e))?;

    let event = provider
        .parse_callback(&body)
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    if !state
        .store
        .claim_callback(&event.provider_sid, INBOUND_EVENT)?
    {
        state.metrics.callback_duplicate();
        return Ok(Json(json!({"status": "ok", "duplicate": true})));
    }

    let now = Utc::now();
    let id = Uuid::now_v7().to_string();
    let mut record = InboundFax {
        id: id.clone(),
        from_number: event.from_number.clone(),
        to_number: event.to_number.clone(),
        status: InboundStatus::Received,
        backend,
        provider_sid: Some(event.provider_sid.clone()),
        pages: event.pages,
        size_bytes: None,
        sha256: None,
        error: None,
        pdf_path: None,
        tiff_path: None,
        mailbox_label: None,
        pdf_token: None,
        pdf_token_expires_at: None,
        retention_until: Some(
            now + Duration::days(state.config.inbound.retention_days as i64),
        ),
        created_at: now,
        received_at: now,
        updated_at: now,
    };

    match provider.fetch_inbound_pdf(&event.provider_sid).await {
        Ok(Some(pdf)) => {
            let pdf_key = format!("inbound/{id}/fax.pdf");
            state.storage.put(&pdf_key, pdf.clone()).await?;
            record.pdf_path = Some(pdf_key);
            record.size_bytes = Some(pdf.len() as u64);
            record.sha256 = Some(hex::encode(Sha256::digest(&pdf)));
            finalize_inbound(&state, &mut record);
        }
        Ok(None) => {
            record.status = InboundStatus::Failed;
            record.error = Some("provider delivered no document".into());
        }
        Err(e) => {
            warn!(backend = backend.as_str(), sid = %event.provider_sid, error = %e, "Inbound fetch failed");
            record.status = InboundStatus::Failed;
            record.error = Some("document fetch failed".into());
        }
    }

    state.store.put_inbound(&record)?;
    state.metrics.inbound_received();
    state.audit.emit(
        "inbound_received",
        None,
        backend.as_str(),
        &format!(
            "inbound={} to={} status={:?}",
            record.id,
            record.to_number.as_deref().map(mask_number).unwrap_or_default(),
            record.status
        ),
    );

    Ok(Json(json!({"status": "ok", "id": record.id})))
}

/// Mailbox routing and access token minting for a stored inbound artifact.
pub(super) fn finalize_inbound(state: &AppState, record: &mut InboundFax) {
    if let Some(to) = record.to_number.as_deref() {
        match state.store.get_inbound_rule(to) {
            Ok(Some(rule)) => record.mailbox_label = Some(rule.mailbox_label),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Inbound rule lookup failed"),
        }
    }

    record.pdf_token = Some(keys::random_token(INBOUND_TOKEN_LEN));
    record.pdf_token_expires_at = Some(
        Utc::now() + Duration::minutes(state.config.inbound.token_ttl_minutes as i64),
    );
}

fn reject_callback(state: &AppState, backend: Backend, error: ProviderError) -> ApiError {
    state.metrics.auth_failure();
    state
        .audit
        .emit("callback_rejected", None, backend.as_str(), &error.to_string());
    ApiError::Unauthorized
}
