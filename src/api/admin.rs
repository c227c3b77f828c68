//! Administrative endpoints: API keys, mailboxes and inbound routing
//! rules. Everything here requires the `keys:manage` scope.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use super::auth::{self, scopes};
use super::error::ApiError;
use super::models::{
    ApiKeyCreatedResponse, ApiKeyRecord, ApiKeyResponse, InboundRule, Mailbox,
};
use super::ratelimit::RouteClass;
use super::state::AppState;
use super::validation::validate_destination;
use crate::keys;
use crate::ledger::LedgerError;

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
    pub owner: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub note: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub async fn create_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateKeyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth::authorize(
        &state,
        &headers,
        scopes::KEYS_MANAGE,
        RouteClass::Admin,
        "POST /admin/api-keys",
    )?;

    if request.name.trim().is_empty() {
        return Err(ApiError::Validation("name is required".into()));
    }
    for scope in &request.scopes {
        if !scopes::ALL.contains(&scope.as_str()) {
            return Err(ApiError::Validation(format!("unknown scope: {scope}")));
        }
    }

    let minted = keys::mint().map_err(|e| ApiError::Internal(e.to_string()))?;
    let now = Utc::now();
    let record = ApiKeyRecord {
        key_id: minted.key_id.clone(),
        key_hash: minted.key_hash,
        name: request.name.trim().to_string(),
        owner: request.owner,
        scopes: request.scopes,
        note: request.note,
        created_at: now,
        last_used_at: None,
        expires_at: request.expires_at,
        revoked_at: None,
    };

    match state.store.create_api_key(&record) {
        Ok(()) => {}
        Err(LedgerError::Duplicate(id)) => return Err(ApiError::Conflict(id)),
        Err(e) => return Err(e.into()),
    }

    state.audit.emit(
        "api_key_created",
        principal.key_id.as_deref(),
        "POST /admin/api-keys",
        &record.key_id,
    );
    info!(key_id = %record.key_id, name = %record.name, "API key created");

    Ok(Json(ApiKeyCreatedResponse {
        key_id: record.key_id,
        token: minted.token,
        name: record.name,
        scopes: record.scopes,
        created_at: record.created_at,
    }))
}

pub async fn list_api_keys(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    auth::authorize(
        &state,
        &headers,
        scopes::KEYS_MANAGE,
        RouteClass::Admin,
        "GET /admin/api-keys",
    )?;

    let records = state.store.list_api_keys()?;
    let keys: Vec<ApiKeyResponse> = records.iter().map(ApiKeyResponse::from).collect();
    Ok(Json(keys))
}

pub async fn revoke_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth::authorize(
        &state,
        &headers,
        scopes::KEYS_MANAGE,
        RouteClass::Admin,
        "DELETE /admin/api-keys/{id}",
    )?;

    let record = state
        .store
        .update_api_key(&key_id, |record| {
            if record.revoked_at.is_none() {
                record.revoked_at = Some(Utc::now());
            }
        })?
        .ok_or_else(|| ApiError::NotFound(format!("key {key_id}")))?;

    state.audit.emit(
        "api_key_revoked",
        principal.key_id.as_deref(),
        "DELETE /admin/api-keys/{id}",
        &key_id,
    );

    Ok(Json(ApiKeyResponse::from(&record)))
}

pub async fn rotate_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth::authorize(
        &state,
        &headers,
        scopes::KEYS_MANAGE,
        RouteClass::Admin,
        "POST /admin/api-keys/{id}/rotate",
    )?;

    let existing = state
        .store
        .get_api_key(&key_id)?
        .ok_or_else(|| ApiError::NotFound(format!("key {key_id}")))?;

    if existing.revoked_at.is_some() {
        return Err(ApiError::Conflict(format!("key {key_id} is revoked")));
    }

    let (token, key_hash) =
        keys::mint_secret(&key_id).map_err(|e| ApiError::Internal(e.to_string()))?;

    let record = state
        .store
        .update_api_key(&key_id, |record| {
            record.key_hash = key_hash;
        })?
        .ok_or_else(|| ApiError::NotFound(format!("key {key_id}")))?;

    state.audit.emit(
        "api_key_rotated",
        principal.key_id.as_deref(),
        "POST /admin/api-keys/{id}/rotate",
        &key_id,
    );

    Ok(Json(ApiKeyCreatedResponse {
        key_id: record.key_id,
        token,
        name: record.name,
        scopes: record.scopes,
        created_at: record.created_at,
    }))
}

// ── Mailboxes & routing rules ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateMailboxRequest {
    pub label: String,
    pub note: Option<String>,
}

pub async fn create_mailbox(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateMailboxRequest>,
) -> Result<impl IntoResponse, ApiError> {
    auth::authorize(
        &state,
        &headers,
        scopes::KEYS_MANAGE,
        RouteClass::Admin,
        "POST /admin/mailboxes",
    )?;

    let label = request.label.trim();
    if label.is_empty()
        || !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ApiError::Validation(
            "label must be alphanumeric with dashes".into(),
        ));
    }
    if state.store.get_mailbox(label)?.is_some() {
        return Err(ApiError::Conflict(label.to_string()));
    }

    let mailbox = Mailbox {
        label: label.to_string(),
        note: request.note,
        created_at: Utc::now(),
    };
    state.store.put_mailbox(&mailbox)?;

    Ok(Json(mailbox))
}

pub async fn list_mailboxes(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    auth::authorize(
        &state,
        &headers,
        scopes::KEYS_MANAGE,
        RouteClass::Admin,
        "GET /admin/mailboxes",
    )?;

    Ok(Json(state.store.list_mailboxes()?))
}

#[derive(Debug, Deserialize)]
pub struct PutRuleRequest {
    pub to_number: String,
    pub mailbox_label: String,
}

/// Upsert the single routing rule for a number.
pub async fn put_inbound_rule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PutRuleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    auth::authorize(
        &state,
        &headers,
        scopes::KEYS_MANAGE,
        RouteClass::Admin,
        "PUT /admin/inbound-rules",
    )?;

    let to_number = validate_destination(&request.to_number)?;
    if state.store.get_mailbox(&request.mailbox_label)?.is_none() {
        return Err(ApiError::Validation(format!(
            "unknown mailbox: {}",
            request.mailbox_label
        )));
    }

    let rule = InboundRule {
        to_number,
        mailbox_label: request.mailbox_label,
        created_at: Utc::now(),
    };
    state.store.put_inbound_rule(&rule)?;

    Ok(Json(rule))
}

pub async fn list_inbound_rules(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    auth::authorize(
        &state,
        &headers,
        scopes::KEYS_MANAGE,
        RouteClass::Admin,
        "GET /admin/inbound-rules",
    )?;

    Ok(Json(state.store.list_inbound_rules()?))
}
