//! Bearer token resolution and scope enforcement.
//!
//! Callers present `X-API-Key: fbk_live_<keyId>_<secret>`. The key id
//! indexes the stored record; the secret half verifies against its PBKDF2
//! hash. The bootstrap token from configuration compares constant-time
//! and grants every scope. All failure paths collapse into one 401.

use axum::http::HeaderMap;
use chrono::Utc;
use subtle::ConstantTimeEq;

use super::error::ApiError;
use super::ratelimit::RouteClass;
use super::state::AppState;
use crate::keys;

pub const API_KEY_HEADER: &str = "x-api-key";

pub mod scopes {
    pub const FAX_SEND: &str = "fax:send";
    pub const FAX_READ: &str = "fax:read";
    pub const INBOUND_LIST: &str = "inbound:list";
    pub const INBOUND_READ: &str = "inbound:read";
    pub const KEYS_MANAGE: &str = "keys:manage";
    pub const PLUGINS_READ: &str = "admin:plugins:read";
    pub const PLUGINS_WRITE: &str = "admin:plugins:write";

    pub const ALL: &[&str] = &[
        FAX_SEND,
        FAX_READ,
        INBOUND_LIST,
        INBOUND_READ,
        KEYS_MANAGE,
        PLUGINS_READ,
        PLUGINS_WRITE,
    ];
}

/// A resolved caller
#[derive(Debug, Clone)]
pub struct Principal {
    /// None for the bootstrap token and for open dev mode
    pub key_id: Option<String>,
    pub scopes: Vec<String>,
}

impl Principal {
    fn admin() -> Self {
        Self {
            key_id: None,
            scopes: scopes::ALL.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// Key for the per-key rate limiter
    pub fn rate_key(&self) -> &str {
        self.key_id.as_deref().unwrap_or("anonymous")
    }
}

/// Resolve the caller from the `X-API-Key` header.
pub fn resolve(state: &AppState, headers: &HeaderMap, route: &str) -> Result<Principal, ApiError> {
    let presented = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let bootstrap = state.config.auth.bootstrap_key.as_deref();

    let Some(token) = presented else {
        // Open mode: no bootstrap key configured and enforcement switched off
        if !state.config.auth.require_api_key && bootstrap.is_none() {
            return Ok(Principal::admin());
        }
        return Err(deny(state, None, route, "missing key"));
    };

    if let Some(bootstrap) = bootstrap {
        if token.as_bytes().ct_eq(bootstrap.as_bytes()).into() {
            return Ok(Principal::admin());
        }
    }

    let Some((key_id, secret)) = keys::parse_token(token) else {
        return Err(deny(state, None, route, "malformed key"));
    };

    let record = match state.store.get_api_key(key_id) {
        Ok(Some(record)) => record,
        Ok(None) => return Err(deny(state, Some(key_id), route, "unknown key")),
        Err(e) => return Err(ApiError::Internal(e.to_string())),
    };

    let now = Utc::now();
    if !record.is_active(now) {
        return Err(deny(state, Some(key_id), route, "revoked or expired key"));
    }

    if !keys::verify_secret(secret, &record.key_hash) {
        return Err(deny(state, Some(key_id), route, "secret mismatch"));
    }

    // Best-effort; not in the request critical path for correctness
    state.store.touch_api_key(key_id, now);

    Ok(Principal {
        key_id: Some(record.key_id),
        scopes: record.scopes,
    })
}

fn deny(state: &AppState, key_id: Option<&str>, route: &str, reason: &str) -> ApiError {
    state.metrics.auth_failure();
    state.audit.emit("auth_denied", key_id, route, reason);
    ApiError::Unauthorized
}

/// Scope gate; 403 when the resolved principal lacks the scope.
pub fn require_scope(
    state: &AppState,
    principal: &Principal,
    scope: &str,
    route: &str,
) -> Result<(), ApiError> {
    if principal.has_scope(scope) {
        return Ok(());
    }
    state.audit.emit(
        "scope_denied",
        principal.key_id.as_deref(),
        route,
        scope,
    );
    Err(ApiError::Forbidden(scope.to_string()))
}

/// Per-key rate limit gate for a route class.
pub fn check_rate(
    state: &AppState,
    principal: &Principal,
    class: RouteClass,
) -> Result<(), ApiError> {
    match state.limits.check(class, principal.rate_key()) {
        Ok(()) => Ok(()),
        Err(retry_after_secs) => {
            state.metrics.rate_limited();
            state.audit.emit(
                "rate_limited",
                principal.key_id.as_deref(),
                class.as_str(),
                "quota exceeded",
            );
            Err(ApiError::RateLimited { retry_after_secs })
        }
    }
}

/// Shared gate: resolve, require a scope, apply a rate class.
pub fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    scope: &str,
    class: RouteClass,
    route: &str,
) -> Result<Principal, ApiError> {
    let principal = resolve(state, headers, route)?;
    require_scope(state, &principal, scope, route)?;
    check_rate(state, &principal, class)?;
    Ok(principal)
}

/// Constant-time check for the internal PBX hook secret.
pub fn verify_internal_secret(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let configured = state
        .config
        .inbound
        .internal_secret
        .as_deref()
        .ok_or(ApiError::Unauthorized)?;

    let presented = headers
        .get("x-internal-secret")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    if presented.as_bytes().ct_eq(configured.as_bytes()).into() {
        Ok(())
    } else {
        state.metrics.auth_failure();
        state
            .audit
            .emit("auth_denied", None, "internal", "internal secret mismatch");
        Err(ApiError::Unauthorized)
    }
}
