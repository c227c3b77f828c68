use super::models::{BackendKind, Config, StorageProvider};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("backend {0:?} requires {1}")]
    MissingBackendCredential(BackendKind, &'static str),

    #[error("storage provider s3 requires a bucket")]
    MissingBucket,

    #[error("ENFORCE_PUBLIC_HTTPS is set but public_url is {0}")]
    InsecurePublicUrl(String),

    #[error("inbound is enabled with the sip backend but ASTERISK_INBOUND_SECRET is not set")]
    MissingInternalSecret,
}

/// Validate cross-field constraints after all sources are merged.
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    match config.backend.kind {
        BackendKind::Phaxio => {
            if config.phaxio.api_key.is_none() || config.phaxio.api_secret.is_none() {
                return Err(ValidationError::MissingBackendCredential(
                    BackendKind::Phaxio,
                    "PHAXIO_API_KEY and PHAXIO_API_SECRET",
                ));
            }
        }
        BackendKind::Sinch => {
            if config.sinch.project_id.is_none()
                || config.sinch.api_key.is_none()
                || config.sinch.api_secret.is_none()
            {
                return Err(ValidationError::MissingBackendCredential(
                    BackendKind::Sinch,
                    "SINCH_PROJECT_ID, SINCH_API_KEY and SINCH_API_SECRET",
                ));
            }
        }
        BackendKind::Sip => {
            if config.ami.password.is_none() {
                return Err(ValidationError::MissingBackendCredential(
                    BackendKind::Sip,
                    "ASTERISK_AMI_PASSWORD",
                ));
            }
        }
        BackendKind::Disabled => {}
    }

    if config.storage.provider == StorageProvider::S3 && config.storage.bucket.is_none() {
        return Err(ValidationError::MissingBucket);
    }

    if config.server.enforce_public_https && !config.server.public_url.starts_with("https://") {
        return Err(ValidationError::InsecurePublicUrl(
            config.server.public_url.clone(),
        ));
    }

    if config.inbound.enabled
        && config.backend.kind == BackendKind::Sip
        && config.inbound.internal_secret.is_none()
    {
        return Err(ValidationError::MissingInternalSecret);
    }

    Ok(())
}
