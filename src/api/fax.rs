//! Outbound fax submission and retrieval.
//!
//! `POST /fax` validates, persists and converts the upload, dispatches to
//! the active provider and answers with the job snapshot. Cloud callbacks
//! or the PBX completion task take the job to its terminal state;
//! `GET /fax/{id}` polls it, and `GET /fax/{id}/pdf` serves the rendered
//! artifact under the short-lived token minted for URL-fetch providers.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::time::Duration as StdDuration;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use super::auth::{self, scopes};
use super::error::ApiError;
use super::models::{Backend, FaxJob, JobResponse, JobStatus};
use super::ratelimit::RouteClass;
use super::state::AppState;
use super::validation::{validate_destination, validate_file_size, validate_media, FaxMedia};
use crate::ledger::Transition;
use crate::observability::mask_number;
use crate::providers::SendRequest;
use crate::{keys, ami};

const PDF_TOKEN_LEN: usize = 48;

pub async fn send_fax(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth::authorize(&state, &headers, scopes::FAX_SEND, RouteClass::Send, "POST /fax")?;

    let max_bytes = state.config.limits.max_file_size_bytes();

    let mut to = None;
    let mut upload: Option<(Vec<u8>, Option<String>, Option<String>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| map_multipart_error(e, max_bytes))?
    {
        match field.name() {
            Some("to") => {
                to = Some(
                    field
                        .text()
                        .await
                        .map_err(|_| ApiError::Validation("unreadable `to` field".into()))?,
                );
            }
            Some("file") => {
                let content_type = field.content_type().map(str::to_string);
                let filename = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| map_multipart_error(e, max_bytes))?;
                upload = Some((bytes.to_vec(), content_type, filename));
            }
            _ => {}
        }
    }

    let to = to.ok_or_else(|| ApiError::Validation("missing `to` field".into()))?;
    let (file_bytes, content_type, filename) =
        upload.ok_or_else(|| ApiError::Validation("missing `file` field".into()))?;

    // Ordered so that an oversized PNG reports 413, not 415
    let to_number = validate_destination(&to)?;
    validate_file_size(file_bytes.len(), max_bytes)?;
    let media = validate_media(content_type.as_deref(), filename.as_deref())?;

    let backend = state.providers.active_backend();
    let job_id = Uuid::now_v7().to_string();
    let mut job = FaxJob::new(job_id.clone(), to_number, backend);

    state
        .storage
        .put(
            &format!("jobs/{job_id}/original.{}", media.extension()),
            file_bytes.clone(),
        )
        .await?;

    // TXT uploads become PDF before anything else sees them
    let pdf_bytes = match media {
        FaxMedia::Pdf => file_bytes,
        FaxMedia::Text => match state.converter.text_to_pdf(&file_bytes).await {
            Ok(pdf) => pdf,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Text conversion failed");
                return fail_job(&state, job, "document conversion failed").await;
            }
        },
    };

    let pdf_key = format!("jobs/{job_id}/fax.pdf");
    state.storage.put(&pdf_key, pdf_bytes.clone()).await?;
    job.pdf_path = Some(pdf_key);

    // The PBX transmits TIFF
    let tiff_bytes = if backend == Backend::Sip {
        match state.converter.pdf_to_tiff(&pdf_bytes).await {
            Ok(tiff) => {
                let tiff_key = format!("jobs/{job_id}/fax.tiff");
                state.storage.put(&tiff_key, tiff.clone()).await?;
                job.tiff_path = Some(tiff_key);
                Some(tiff)
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "TIFF conversion failed");
                return fail_job(&state, job, "document conversion failed").await;
            }
        }
    } else {
        None
    };

    // Local estimate; a callback that carries pages overwrites it
    match state.converter.count_pages(&pdf_bytes).await {
        Ok(pages) => job.pages = Some(pages),
        Err(e) => warn!(job_id = %job.id, error = %e, "Page count failed"),
    }

    // URL-fetch providers pull the PDF through a tokenized public URL
    if backend == Backend::Phaxio {
        let token = keys::random_token(PDF_TOKEN_LEN);
        let ttl = Duration::minutes(state.config.tokens.pdf_ttl_minutes as i64);
        job.pdf_url = Some(format!(
            "{}/fax/{}/pdf?token={}",
            state.config.server.public_url.trim_end_matches('/'),
            job.id,
            token
        ));
        job.pdf_token = Some(token);
        job.pdf_token_expires_at = Some(Utc::now() + ttl);
    }

    state.store.put_job(&job)?;
    state.metrics.job_submitted();
    state.audit.emit(
        "fax_submitted",
        principal.key_id.as_deref(),
        "POST /fax",
        &format!("job={} to={} backend={}", job.id, mask_number(&job.to_number), backend.as_str()),
    );

    let provider = state
        .providers
        .active()
        .ok_or_else(|| ApiError::Internal("active backend has no provider".into()))?;

    let request = SendRequest {
        job: &job,
        pdf_bytes: Some(&pdf_bytes),
        pdf_url: job.pdf_url.as_deref(),
        tiff_bytes: tiff_bytes.as_deref(),
    };

    match provider.send(request).await {
        Ok(outcome) => {
            let updated = state.store.transition_job(&job.id, &[JobStatus::Queued], |j| {
                j.status = outcome.status;
                j.provider_sid = Some(outcome.provider_sid.clone());
                if outcome.status == JobStatus::Failed {
                    j.error = Some("provider rejected the fax".into());
                }
            })?;

            let job = match updated {
                Transition::Applied(job) => job,
                _ => state
                    .store
                    .get_job(&job.id)?
                    .ok_or_else(|| ApiError::Internal("job vanished mid-submit".into()))?,
            };

            match job.status {
                JobStatus::Success => state.metrics.job_succeeded(),
                JobStatus::Failed => state.metrics.job_failed(),
                _ => {}
            }

            if let Some(completion) = outcome.completion {
                spawn_pbx_completion(state.clone(), job.id.clone(), completion);
            }

            info!(job_id = %job.id, backend = backend.as_str(), status = ?job.status, "Fax dispatched");
            Ok(Json(JobResponse::from(&job)))
        }
        Err(e) => {
            warn!(job_id = %job.id, backend = backend.as_str(), error = %e, "Dispatch failed");
            fail_job(&state, job, &sanitized_send_error(&e)).await
        }
    }
}

/// Mark a pre-dispatch or dispatch failure terminal and answer with the
/// job snapshot.
async fn fail_job(
    state: &AppState,
    job: FaxJob,
    error: &str,
) -> Result<Json<JobResponse>, ApiError> {
    let outcome = state.store.transition_job(
        &job.id,
        &[JobStatus::Queued, JobStatus::InProgress],
        |j| {
            j.status = JobStatus::Failed;
            j.error = Some(error.to_string());
        },
    )?;

    let job = match outcome {
        Transition::Applied(job) | Transition::Skipped(job) => job,
        Transition::NotFound => {
            // Failed before the first put; persist the terminal snapshot
            let mut job = job;
            job.status = JobStatus::Failed;
            job.error = Some(error.to_string());
            job.updated_at = Utc::now();
            state.store.put_job(&job)?;
            job
        }
    };

    state.metrics.job_failed();
    Ok(Json(JobResponse::from(&job)))
}

fn sanitized_send_error(error: &crate::providers::ProviderError) -> String {
    // ProviderError messages are already written for storage; keep them short
    let msg = error.to_string();
    if msg.len() > 120 {
        "provider send failed".to_string()
    } else {
        msg
    }
}

/// Waits for the control-connection result and finalizes the job.
fn spawn_pbx_completion(
    state: AppState,
    job_id: String,
    completion: tokio::sync::oneshot::Receiver<ami::FaxResult>,
) {
    let timeout = StdDuration::from_secs(state.config.ami.command_timeout_secs);

    tokio::spawn(async move {
        let result = match tokio::time::timeout(timeout, completion).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) | Err(_) => ami::FaxResult {
                success: false,
                pages: None,
                detail: Some("no response from fax channel".into()),
            },
        };

        let outcome = state.store.transition_job(
            &job_id,
            &[JobStatus::Queued, JobStatus::InProgress],
            |j| {
                if result.success {
                    j.status = JobStatus::Success;
                } else {
                    j.status = JobStatus::Failed;
                    j.error = Some(
                        result
                            .detail
                            .clone()
                            .unwrap_or_else(|| "fax transmission failed".into()),
                    );
                }
                if let Some(pages) = result.pages {
                    j.pages = Some(pages);
                }
            },
        );

        match outcome {
            Ok(Transition::Applied(job)) => {
                match job.status {
                    JobStatus::Success => state.metrics.job_succeeded(),
                    _ => state.metrics.job_failed(),
                }
                info!(job_id = %job.id, status = ?job.status, "PBX fax finalized");
            }
            Ok(_) => {}
            Err(e) => warn!(job_id = %job_id, error = %e, "Failed to finalize PBX job"),
        }
    });
}

fn map_multipart_error(error: axum::extract::multipart::MultipartError, max_bytes: usize) -> ApiError {
    if error.status() == axum::http::StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(max_bytes + 1)
    } else {
        ApiError::Validation("malformed multipart body".into())
    }
}

pub async fn get_fax(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    auth::authorize(
        &state,
        &headers,
        scopes::FAX_READ,
        RouteClass::Status,
        "GET /fax/{id}",
    )?;

    let job = state
        .store
        .get_job(&job_id)?
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id}")))?;

    Ok(Json(JobResponse::from(&job)))
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Tokenized artifact fetch, used by URL-fetch providers and operators.
/// Constant-time token compare; expiry is strict (`now < expires_at`).
pub async fn get_fax_pdf(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .store
        .get_job(&job_id)?
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id}")))?;

    let presented = query.token.ok_or(ApiError::Forbidden("token".into()))?;
    let stored = job
        .pdf_token
        .as_deref()
        .ok_or(ApiError::Forbidden("token".into()))?;
    let expires_at = job
        .pdf_token_expires_at
        .ok_or(ApiError::Forbidden("token".into()))?;

    let token_ok: bool = presented.as_bytes().ct_eq(stored.as_bytes()).into();
    if !token_ok || Utc::now() >= expires_at {
        state
            .audit
            .emit("token_denied", None, "GET /fax/{id}/pdf", &job_id);
        return Err(ApiError::Forbidden("token".into()));
    }

    let pdf_path = job
        .pdf_path
        .as_deref()
        .ok_or_else(|| ApiError::NotFound("artifact".into()))?;
    let bytes = state.storage.get(pdf_path).await?;

    Ok((super::pdf_response_headers(), bytes))
}
