use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub inbound: InboundConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub convert: ConvertConfig,
    #[serde(default)]
    pub phaxio: PhaxioConfig,
    #[serde(default)]
    pub sinch: SinchConfig,
    #[serde(default)]
    pub ami: AmiConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            backend: BackendConfig::default(),
            auth: AuthConfig::default(),
            limits: LimitsConfig::default(),
            tokens: TokenConfig::default(),
            storage: StorageConfig::default(),
            inbound: InboundConfig::default(),
            retention: RetentionConfig::default(),
            convert: ConvertConfig::default(),
            phaxio: PhaxioConfig::default(),
            sinch: SinchConfig::default(),
            ami: AmiConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Base URL clients and providers reach this service at.
    /// Tokenized PDF URLs are derived from it.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    #[serde(default)]
    pub enforce_public_https: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_dir: default_data_dir(),
            public_url: default_public_url(),
            enforce_public_https: false,
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

/// Outbound backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Phaxio,
    Sinch,
    Sip,
    #[default]
    Disabled,
}

impl BackendKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "phaxio" => Some(Self::Phaxio),
            "sinch" => Some(Self::Sinch),
            "sip" => Some(Self::Sip),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Bootstrap admin token (loaded from environment, not from config file)
    #[serde(skip)]
    pub bootstrap_key: Option<String>,
    #[serde(default = "default_true")]
    pub require_api_key: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bootstrap_key: None,
            require_api_key: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Request limits and per-key rate limits (requests per minute; 0 disables)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default)]
    pub requests_per_minute: u32,
    #[serde(default)]
    pub inbound_list_rpm: u32,
    #[serde(default)]
    pub inbound_get_rpm: u32,
    #[serde(default)]
    pub admin_rpm: u32,
}

impl LimitsConfig {
    pub fn max_file_size_bytes(&self) -> usize {
        (self.max_file_size_mb as usize) * 1024 * 1024
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size_mb(),
            requests_per_minute: 0,
            inbound_list_rpm: 0,
            inbound_get_rpm: 0,
            admin_rpm: 0,
        }
    }
}

fn default_max_file_size_mb() -> u64 {
    10
}

/// Artifact access token TTLs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenConfig {
    #[serde(default = "default_token_ttl_minutes")]
    pub pdf_ttl_minutes: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            pdf_ttl_minutes: default_token_ttl_minutes(),
        }
    }
}

fn default_token_ttl_minutes() -> u64 {
    60
}

/// Storage provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    S3,
    #[default]
    Local,
    Memory,
}

/// Artifact storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    /// Root directory for the local provider
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub kms_key_id: Option<String>,
    /// S3 credentials (loaded from environment, not from config file)
    #[serde(skip)]
    pub access_key: Option<String>,
    #[serde(skip)]
    pub secret_key: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::Local,
            root: default_storage_root(),
            bucket: None,
            region: None,
            endpoint: None,
            kms_key_id: None,
            access_key: None,
            secret_key: None,
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/artifacts")
}

/// Inbound receiving configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InboundConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_token_ttl_minutes")]
    pub token_ttl_minutes: u64,
    /// Shared secret for the internal PBX hooks (environment only)
    #[serde(skip)]
    pub internal_secret: Option<String>,
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retention_days: default_retention_days(),
            token_ttl_minutes: default_token_ttl_minutes(),
            internal_secret: None,
        }
    }
}

fn default_retention_days() -> u32 {
    30
}

/// Retention sweep configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_sweep_minutes")]
    pub sweep_minutes: u64,
    #[serde(default = "default_dedup_window_hours")]
    pub dedup_window_hours: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_minutes: default_sweep_minutes(),
            dedup_window_hours: default_dedup_window_hours(),
        }
    }
}

fn default_sweep_minutes() -> u64 {
    60
}

fn default_dedup_window_hours() -> u64 {
    48
}

/// Document processor selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorKind {
    #[default]
    Ghostscript,
    Stub,
}

/// Document conversion configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConvertConfig {
    #[serde(default)]
    pub processor: ProcessorKind,
    #[serde(default = "default_gs_bin")]
    pub gs_bin: String,
    #[serde(default = "default_tiff2pdf_bin")]
    pub tiff2pdf_bin: String,
    #[serde(default = "default_convert_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            processor: ProcessorKind::Ghostscript,
            gs_bin: default_gs_bin(),
            tiff2pdf_bin: default_tiff2pdf_bin(),
            timeout_secs: default_convert_timeout_secs(),
        }
    }
}

fn default_gs_bin() -> String {
    "gs".to_string()
}

fn default_tiff2pdf_bin() -> String {
    "tiff2pdf".to_string()
}

fn default_convert_timeout_secs() -> u64 {
    60
}

/// Phaxio provider configuration (credentials from environment only)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhaxioConfig {
    #[serde(default = "default_phaxio_base_url")]
    pub base_url: String,
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(skip)]
    pub api_secret: Option<String>,
    #[serde(skip)]
    pub callback_token: Option<String>,
}

impl Default for PhaxioConfig {
    fn default() -> Self {
        Self {
            base_url: default_phaxio_base_url(),
            api_key: None,
            api_secret: None,
            callback_token: None,
        }
    }
}

fn default_phaxio_base_url() -> String {
    "https://api.phaxio.com/v2.1".to_string()
}

/// Sinch provider configuration (credentials from environment only)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinchConfig {
    #[serde(default = "default_sinch_base_url")]
    pub base_url: String,
    #[serde(skip)]
    pub project_id: Option<String>,
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(skip)]
    pub api_secret: Option<String>,
    #[serde(skip)]
    pub basic_user: Option<String>,
    #[serde(skip)]
    pub basic_pass: Option<String>,
    #[serde(skip)]
    pub hmac_secret: Option<String>,
}

impl Default for SinchConfig {
    fn default() -> Self {
        Self {
            base_url: default_sinch_base_url(),
            project_id: None,
            api_key: None,
            api_secret: None,
            basic_user: None,
            basic_pass: None,
            hmac_secret: None,
        }
    }
}

fn default_sinch_base_url() -> String {
    "https://fax.api.sinch.com/v3".to_string()
}

/// Asterisk AMI configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AmiConfig {
    #[serde(default = "default_ami_host")]
    pub host: String,
    #[serde(default = "default_ami_port")]
    pub port: u16,
    #[serde(default = "default_ami_username")]
    pub username: String,
    #[serde(skip)]
    pub password: Option<String>,
    /// Directory shared with Asterisk where outbound TIFFs are spooled
    #[serde(default = "default_fax_dir")]
    pub fax_dir: PathBuf,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for AmiConfig {
    fn default() -> Self {
        Self {
            host: default_ami_host(),
            port: default_ami_port(),
            username: default_ami_username(),
            password: None,
            fax_dir: default_fax_dir(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

fn default_ami_host() -> String {
    "asterisk".to_string()
}

fn default_ami_port() -> u16 {
    5038
}

fn default_ami_username() -> String {
    "faxbot".to_string()
}

fn default_fax_dir() -> PathBuf {
    PathBuf::from("/var/spool/asterisk/fax")
}

fn default_command_timeout_secs() -> u64 {
    60
}

/// Audit logging configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AuditConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.limits.max_file_size_mb, 10);
        assert_eq!(config.limits.max_file_size_bytes(), 10 * 1024 * 1024);
        assert_eq!(config.tokens.pdf_ttl_minutes, 60);
        assert_eq!(config.inbound.retention_days, 30);
        assert_eq!(config.retention.dedup_window_hours, 48);
        assert_eq!(config.backend.kind, BackendKind::Disabled);
        assert!(!config.inbound.enabled);
    }

    #[test]
    fn test_config_from_toml() {
        let config: Config = toml::from_str(
            r#"
[backend]
kind = "sip"

[ami]
host = "pbx.internal"
port = 5039
fax_dir = "/faxdata"

[convert]
processor = "stub"
timeout_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.kind, BackendKind::Sip);
        assert_eq!(config.ami.host, "pbx.internal");
        assert_eq!(config.ami.port, 5039);
        assert_eq!(config.ami.fax_dir.to_str().unwrap(), "/faxdata");
        assert_eq!(config.convert.processor, ProcessorKind::Stub);
        assert_eq!(config.convert.timeout_secs, 30);
        // Untouched sections keep their defaults
        assert_eq!(config.limits.max_file_size_mb, 10);
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!(BackendKind::parse("phaxio"), Some(BackendKind::Phaxio));
        assert_eq!(BackendKind::parse("SIP"), Some(BackendKind::Sip));
        assert_eq!(BackendKind::parse("disabled"), Some(BackendKind::Disabled));
        assert_eq!(BackendKind::parse("efax"), None);
    }
}
