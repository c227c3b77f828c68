//! Inbound fax listing, retrieval and the internal PBX hooks.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;
use uuid::Uuid;

use super::auth::{self, scopes};
use super::error::ApiError;
use super::models::{
    Backend, InboundFax, InboundListResponse, InboundResponse, InboundStatus, JobStatus,
};
use super::ratelimit::RouteClass;
use super::state::AppState;
use super::validation::validate_spool_path;
use super::webhooks::finalize_inbound;
use crate::ledger::{InboundFilter, Transition};
use crate::observability::mask_number;

#[derive(Debug, Deserialize)]
pub struct InboundListParams {
    pub to_number: Option<String>,
    pub status: Option<String>,
    pub mailbox: Option<String>,
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

pub async fn list_inbound(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<InboundListParams>,
) -> Result<impl IntoResponse, ApiError> {
    auth::authorize(
        &state,
        &headers,
        scopes::INBOUND_LIST,
        RouteClass::InboundList,
        "GET /inbound",
    )?;

    let status = match params.status.as_deref() {
        None => None,
        Some("received") => Some(InboundStatus::Received),
        Some("failed") => Some(InboundStatus::Failed),
        Some(other) => {
            return Err(ApiError::Validation(format!("unknown status filter: {other}")))
        }
    };

    let filter = InboundFilter {
        to_number: params.to_number,
        status,
        mailbox: params.mailbox,
        since: params.since,
        limit: params.limit,
        offset: params.offset,
    };

    let (records, total) = state.store.list_inbound(&filter)?;
    let items = records.iter().map(InboundResponse::from).collect();

    Ok(Json(InboundListResponse { items, total }))
}

pub async fn get_inbound(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    auth::authorize(
        &state,
        &headers,
        scopes::INBOUND_READ,
        RouteClass::InboundGet,
        "GET /inbound/{id}",
    )?;

    let record = state
        .store
        .get_inbound(&id)?
        .ok_or_else(|| ApiError::NotFound(format!("inbound {id}")))?;

    Ok(Json(InboundResponse::from(&record)))
}

#[derive(Debug, Deserialize)]
pub struct InboundPdfQuery {
    pub token: Option<String>,
}

/// Artifact fetch: a valid token is sufficient; otherwise the caller
/// needs an API key with `inbound:read`.
pub async fn get_inbound_pdf(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<InboundPdfQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .store
        .get_inbound(&id)?
        .ok_or_else(|| ApiError::NotFound(format!("inbound {id}")))?;

    let token_grants = match (&query.token, &record.pdf_token, record.pdf_token_expires_at) {
        (Some(presented), Some(stored), Some(expires_at)) => {
            let equal: bool = presented.as_bytes().ct_eq(stored.as_bytes()).into();
            equal && Utc::now() < expires_at
        }
        _ => false,
    };

    if !token_grants {
        if query.token.is_some() {
            // A token was presented and it is wrong or expired
            state
                .audit
                .emit("token_denied", None, "GET /inbound/{id}/pdf", &id);
            return Err(ApiError::Forbidden("token".into()));
        }
        let principal = auth::resolve(&state, &headers, "GET /inbound/{id}/pdf")?;
        auth::require_scope(&state, &principal, scopes::INBOUND_READ, "GET /inbound/{id}/pdf")?;
        auth::check_rate(&state, &principal, RouteClass::InboundGet)?;
    }

    let pdf_path = record
        .pdf_path
        .as_deref()
        .ok_or_else(|| ApiError::NotFound("artifact".into()))?;
    let bytes = state.storage.get(pdf_path).await?;

    Ok((super::pdf_response_headers(), bytes))
}

// ── Internal PBX hooks ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AsteriskInboundRequest {
    pub tiff_path: String,
    pub to_number: Option<String>,
    pub from_number: Option<String>,
    pub faxstatus: Option<String>,
    pub faxpages: Option<u32>,
    pub uniqueid: String,
}

/// Privileged hook the Asterisk dialplan calls after ReceiveFAX. The body
/// points at a TIFF inside the shared spool; the core converts it to PDF
/// and files the inbound record.
pub async fn asterisk_inbound(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AsteriskInboundRequest>,
) -> Result<impl IntoResponse, ApiError> {
    auth::verify_internal_secret(&state, &headers)?;

    if !state.config.inbound.enabled {
        return Err(ApiError::NotFound("inbound receiving disabled".into()));
    }

    validate_spool_path(&request.tiff_path)?;

    if !state.store.claim_callback(&request.uniqueid, "inbound")? {
        state.metrics.callback_duplicate();
        return Ok(Json(json!({"status": "ok", "duplicate": true})));
    }

    let now = Utc::now();
    let id = Uuid::now_v7().to_string();
    let failed_receive = request
        .faxstatus
        .as_deref()
        .map(|s| !s.eq_ignore_ascii_case("SUCCESS"))
        .unwrap_or(false);

    let mut record = InboundFax {
        id: id.clone(),
        from_number: request.from_number.clone(),
        to_number: request.to_number.clone(),
        status: InboundStatus::Received,
        backend: Backend::Sip,
        provider_sid: Some(request.uniqueid.clone()),
        pages: request.faxpages,
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

    if failed_receive {
        record.status = InboundStatus::Failed;
        record.error = Some("fax reception failed".into());
    } else {
        match ingest_tiff(&state, &id, &request.tiff_path, &mut record).await {
            Ok(()) => finalize_inbound(&state, &mut record),
            Err(e) => {
                warn!(inbound_id = %id, error = %e, "Inbound TIFF ingest failed");
                record.status = InboundStatus::Failed;
                record.error = Some("document conversion failed".into());
            }
        }
    }

    state.store.put_inbound(&record)?;
    state.metrics.inbound_received();
    state.audit.emit(
        "inbound_received",
        None,
        "sip",
        &format!(
            "inbound={} to={} status={:?}",
            record.id,
            record.to_number.as_deref().map(mask_number).unwrap_or_default(),
            record.status
        ),
    );

    Ok(Json(json!({"status": "ok", "id": record.id})))
}

async fn ingest_tiff(
    state: &AppState,
    id: &str,
    tiff_path: &str,
    record: &mut InboundFax,
) -> Result<(), ApiError> {
    let tiff = tokio::fs::read(tiff_path)
        .await
        .map_err(|e| ApiError::Internal(format!("spool read failed: {e}")))?;

    let tiff_key = format!("inbound/{id}/fax.tiff");
    state.storage.put(&tiff_key, tiff.clone()).await?;
    record.tiff_path = Some(tiff_key);

    let pdf = state
        .converter
        .tiff_to_pdf(&tiff)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let pdf_key = format!("inbound/{id}/fax.pdf");
    state.storage.put(&pdf_key, pdf.clone()).await?;
    record.pdf_path = Some(pdf_key);
    record.size_bytes = Some(pdf.len() as u64);
    record.sha256 = Some(hex::encode(Sha256::digest(&pdf)));

    if record.pages.is_none() {
        if let Ok(pages) = state.converter.count_pages(&pdf).await {
            record.pages = Some(pages);
        }
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct FreeswitchOutboundResult {
    pub job_id: String,
    pub fax_status: String,
    pub fax_result_text: Option<String>,
    pub fax_document_transferred_pages: Option<u32>,
    pub uuid: Option<String>,
}

/// Privileged hook a FreeSWITCH event handler calls with the outcome of
/// an outbound transmission.
pub async fn freeswitch_outbound_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<FreeswitchOutboundResult>,
) -> Result<impl IntoResponse, ApiError> {
    auth::verify_internal_secret(&state, &headers)?;

    let success = request.fax_status.eq_ignore_ascii_case("SUCCESS");

    let outcome = state.store.transition_job(
        &request.job_id,
        &[JobStatus::Queued, JobStatus::InProgress],
        |job| {
            job.status = if success {
                JobStatus::Success
            } else {
                JobStatus::Failed
            };
            if let Some(pages) = request.fax_document_transferred_pages {
                job.pages = Some(pages);
            }
            if !success {
                job.error = Some(
                    request
                        .fax_result_text
                        .clone()
                        .filter(|t| t.len() <= 120)
                        .unwrap_or_else(|| "fax transmission failed".into()),
                );
            }
            if job.provider_sid.is_none() {
                job.provider_sid = request.uuid.clone();
            }
        },
    )?;

    match outcome {
        Transition::Applied(job) => {
            match job.status {
                JobStatus::Success => state.metrics.job_succeeded(),
                _ => state.metrics.job_failed(),
            }
            Ok(Json(json!({"status": "ok"})))
        }
        Transition::Skipped(_) => Ok(Json(json!({"status": "ok", "duplicate": true}))),
        Transition::NotFound => Err(ApiError::NotFound(format!("job {}", request.job_id))),
    }
}
