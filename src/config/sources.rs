use super::models::{BackendKind, Config, ProcessorKind, StorageProvider};
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "FAXBOT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/faxbot.toml";
const ENV_PREFIX: &str = "FAXBOT";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. `FAXBOT__*` environment overrides
/// 5. Flat operator environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_from_sources(config_path)?;

    apply_operator_env(&mut config);

    Ok(config)
}

/// Load configuration from a specific path and environment
/// Useful for testing with custom config files
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::debug!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // FAXBOT__SERVER__BIND_ADDR -> server.bind_addr
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

/// Apply the flat environment variable names that operators configure
/// deployments with. These names are a compatibility contract and take
/// priority over every other source. Secrets are only ever read here,
/// never from TOML files.
pub fn apply_operator_env(config: &mut Config) {
    if let Some(kind) = env_str("FAX_BACKEND").and_then(|v| BackendKind::parse(&v)) {
        config.backend.kind = kind;
    }
    if env_bool("FAX_DISABLED").unwrap_or(false) {
        config.backend.kind = BackendKind::Disabled;
    }

    if let Some(mb) = env_parse::<u64>("MAX_FILE_SIZE_MB") {
        config.limits.max_file_size_mb = mb;
    }
    if let Some(rpm) = env_parse::<u32>("MAX_REQUESTS_PER_MINUTE") {
        config.limits.requests_per_minute = rpm;
    }
    if let Some(rpm) = env_parse::<u32>("INBOUND_LIST_RPM") {
        config.limits.inbound_list_rpm = rpm;
    }
    if let Some(rpm) = env_parse::<u32>("INBOUND_GET_RPM") {
        config.limits.inbound_get_rpm = rpm;
    }

    if let Some(key) = env_str("API_KEY") {
        config.auth.bootstrap_key = Some(key);
    }
    if let Some(required) = env_bool("REQUIRE_API_KEY") {
        config.auth.require_api_key = required;
    }

    if let Some(url) = env_str("PUBLIC_API_URL") {
        config.server.public_url = url;
    }
    if let Some(enforce) = env_bool("ENFORCE_PUBLIC_HTTPS") {
        config.server.enforce_public_https = enforce;
    }
    if let Some(ttl) = env_parse::<u64>("PDF_TOKEN_TTL_MINUTES") {
        config.tokens.pdf_ttl_minutes = ttl;
    }

    if let Some(enabled) = env_bool("INBOUND_ENABLED") {
        config.inbound.enabled = enabled;
    }
    if let Some(days) = env_parse::<u32>("INBOUND_RETENTION_DAYS") {
        config.inbound.retention_days = days;
    }
    if let Some(ttl) = env_parse::<u64>("INBOUND_TOKEN_TTL_MINUTES") {
        config.inbound.token_ttl_minutes = ttl;
    }

    if let Some(backend) = env_str("STORAGE_BACKEND") {
        match backend.to_ascii_lowercase().as_str() {
            "s3" => config.storage.provider = StorageProvider::S3,
            "local" => config.storage.provider = StorageProvider::Local,
            "memory" => config.storage.provider = StorageProvider::Memory,
            other => tracing::warn!(backend = other, "Unknown STORAGE_BACKEND, keeping configured provider"),
        }
    }
    if let Some(bucket) = env_str("S3_BUCKET") {
        config.storage.bucket = Some(bucket);
    }
    if let Some(region) = env_str("S3_REGION") {
        config.storage.region = Some(region);
    }
    if let Some(endpoint) = env_str("S3_ENDPOINT_URL") {
        config.storage.endpoint = Some(endpoint);
    }
    if let Some(kms) = env_str("S3_KMS_KEY_ID") {
        config.storage.kms_key_id = Some(kms);
    }
    if let Some(access_key) = env_str("S3_ACCESS_KEY").or_else(|| env_str("AWS_ACCESS_KEY_ID")) {
        config.storage.access_key = Some(access_key);
    }
    if let Some(secret_key) = env_str("S3_SECRET_KEY").or_else(|| env_str("AWS_SECRET_ACCESS_KEY")) {
        config.storage.secret_key = Some(secret_key);
    }

    if let Some(secret) = env_str("ASTERISK_INBOUND_SECRET") {
        config.inbound.internal_secret = Some(secret);
    }
    if let Some(host) = env_str("ASTERISK_AMI_HOST") {
        config.ami.host = host;
    }
    if let Some(port) = env_parse::<u16>("ASTERISK_AMI_PORT") {
        config.ami.port = port;
    }
    if let Some(user) = env_str("ASTERISK_AMI_USERNAME") {
        config.ami.username = user;
    }
    if let Some(pass) = env_str("ASTERISK_AMI_PASSWORD") {
        config.ami.password = Some(pass);
    }

    if let Some(key) = env_str("PHAXIO_API_KEY") {
        config.phaxio.api_key = Some(key);
    }
    if let Some(secret) = env_str("PHAXIO_API_SECRET") {
        config.phaxio.api_secret = Some(secret);
    }
    if let Some(token) = env_str("PHAXIO_CALLBACK_TOKEN") {
        config.phaxio.callback_token = Some(token);
    }

    if let Some(project) = env_str("SINCH_PROJECT_ID") {
        config.sinch.project_id = Some(project);
    }
    if let Some(key) = env_str("SINCH_API_KEY") {
        config.sinch.api_key = Some(key);
    }
    if let Some(secret) = env_str("SINCH_API_SECRET") {
        config.sinch.api_secret = Some(secret);
    }
    if let Some(user) = env_str("SINCH_BASIC_USER") {
        config.sinch.basic_user = Some(user);
    }
    if let Some(pass) = env_str("SINCH_BASIC_PASS") {
        config.sinch.basic_pass = Some(pass);
    }
    if let Some(secret) = env_str("SINCH_HMAC_SECRET") {
        config.sinch.hmac_secret = Some(secret);
    }

    if let Some(enabled) = env_bool("AUDIT_LOG_ENABLED") {
        config.audit.enabled = enabled;
    }
    if let Some(processor) = env_str("FAX_PROCESSOR") {
        match processor.to_ascii_lowercase().as_str() {
            "ghostscript" => config.convert.processor = ProcessorKind::Ghostscript,
            "stub" => config.convert.processor = ProcessorKind::Stub,
            other => tracing::warn!(processor = other, "Unknown FAX_PROCESSOR, keeping configured processor"),
        }
    }
}

fn env_str(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
    env_str(name).map(|v| {
        matches!(
            v.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_str(name).and_then(|v| v.parse().ok())
}
