use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "chatrelay.toml",
    "config/chatrelay.toml",
    "crates/config/chatrelay.toml",
    "../chatrelay.toml",
    "../config/chatrelay.toml",
    "../crates/config/chatrelay.toml",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub websocket: WebSocketConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            websocket: WebSocketConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 7080,
        }
    }
}

/// Connection-level options for the realtime WebSocket endpoint.
///
/// The transport layer consumes these as-is; the routing core never
/// re-derives their semantics.
///
/// ```
/// use chatrelay_config::WebSocketConfig;
///
/// let ws = WebSocketConfig::default();
/// assert_eq!(ws.path, "/ws");
/// assert_eq!(ws.ping_interval_seconds, 25);
/// assert!(!ws.compression);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Path prefix the WebSocket route is mounted on.
    #[serde(default = "WebSocketConfig::default_path")]
    pub path: String,
    /// Cross-origin allow-list.
    #[serde(default = "WebSocketConfig::default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default = "WebSocketConfig::default_allowed_methods")]
    pub allowed_methods: Vec<String>,
    #[serde(default = "WebSocketConfig::default_allowed_headers")]
    pub allowed_headers: Vec<String>,
    #[serde(default = "WebSocketConfig::default_allow_credentials")]
    pub allow_credentials: bool,
    /// Keep-alive ping cadence.
    #[serde(default = "WebSocketConfig::default_ping_interval")]
    pub ping_interval_seconds: u64,
    /// A connection silent for longer than this is dropped.
    #[serde(default = "WebSocketConfig::default_ping_timeout")]
    pub ping_timeout_seconds: u64,
    /// Deadline for authentication and initial room setup.
    #[serde(default = "WebSocketConfig::default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    /// Maximum inbound frame size in bytes.
    #[serde(default = "WebSocketConfig::default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// Accept clients speaking the previous protocol revision.
    #[serde(default)]
    pub legacy_protocol: bool,
    /// Per-message payload compression toggle.
    #[serde(default)]
    pub compression: bool,
}

impl WebSocketConfig {
    fn default_path() -> String {
        "/ws".to_string()
    }

    fn default_allowed_origins() -> Vec<String> {
        vec!["http://localhost:3000".to_string()]
    }

    fn default_allowed_methods() -> Vec<String> {
        vec!["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()]
    }

    fn default_allowed_headers() -> Vec<String> {
        vec![
            "authorization".to_string(),
            "content-type".to_string(),
            "token".to_string(),
        ]
    }

    const fn default_allow_credentials() -> bool {
        true
    }

    const fn default_ping_interval() -> u64 {
        25
    }

    const fn default_ping_timeout() -> u64 {
        20
    }

    const fn default_connect_timeout() -> u64 {
        45
    }

    const fn default_max_payload_bytes() -> usize {
        1 << 20
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
            allowed_origins: Self::default_allowed_origins(),
            allowed_methods: Self::default_allowed_methods(),
            allowed_headers: Self::default_allowed_headers(),
            allow_credentials: Self::default_allow_credentials(),
            ping_interval_seconds: Self::default_ping_interval(),
            ping_timeout_seconds: Self::default_ping_timeout(),
            connect_timeout_seconds: Self::default_connect_timeout(),
            max_payload_bytes: Self::default_max_payload_bytes(),
            legacy_protocol: false,
            compression: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://chatrelay.db".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "AuthConfig::default_session_ttl")]
    pub session_ttl_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_seconds: 86_400,
        }
    }
}

impl AuthConfig {
    fn default_session_ttl() -> u64 {
        86_400
    }
}

/// Load the application configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use chatrelay_config::load;
///
/// std::env::remove_var("CHATRELAY_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.http.address.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let session_ttl = defaults.auth.session_ttl_seconds;
    let session_ttl_i64 = if session_ttl > i64::MAX as u64 {
        i64::MAX
    } else {
        session_ttl as i64
    };

    let mut builder = config::Config::builder();
    builder = builder
        .set_default("http.address", defaults.http.address.clone())
        .unwrap()
        .set_default("http.port", i64::from(defaults.http.port))
        .unwrap()
        .set_default("websocket.path", defaults.websocket.path.clone())
        .unwrap()
        .set_default(
            "websocket.allowed_origins",
            defaults.websocket.allowed_origins.clone(),
        )
        .unwrap()
        .set_default(
            "websocket.allowed_methods",
            defaults.websocket.allowed_methods.clone(),
        )
        .unwrap()
        .set_default(
            "websocket.allowed_headers",
            defaults.websocket.allowed_headers.clone(),
        )
        .unwrap()
        .set_default(
            "websocket.allow_credentials",
            defaults.websocket.allow_credentials,
        )
        .unwrap()
        .set_default(
            "websocket.ping_interval_seconds",
            defaults.websocket.ping_interval_seconds as i64,
        )
        .unwrap()
        .set_default(
            "websocket.ping_timeout_seconds",
            defaults.websocket.ping_timeout_seconds as i64,
        )
        .unwrap()
        .set_default(
            "websocket.connect_timeout_seconds",
            defaults.websocket.connect_timeout_seconds as i64,
        )
        .unwrap()
        .set_default(
            "websocket.max_payload_bytes",
            defaults.websocket.max_payload_bytes as i64,
        )
        .unwrap()
        .set_default(
            "websocket.legacy_protocol",
            defaults.websocket.legacy_protocol,
        )
        .unwrap()
        .set_default("websocket.compression", defaults.websocket.compression)
        .unwrap()
        .set_default("database.url", defaults.database.url.clone())
        .unwrap()
        .set_default(
            "database.max_connections",
            i64::from(defaults.database.max_connections),
        )
        .unwrap()
        .set_default("auth.session_ttl_seconds", session_ttl_i64)
        .unwrap();

    let environment_overrides = config::Environment::with_prefix("CHATRELAY").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("CHATRELAY_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via CHATRELAY_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let mut config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    if config.auth.session_ttl_seconds > i64::MAX as u64 {
        config.auth.session_ttl_seconds = i64::MAX as u64;
    }

    debug!(?config, "loaded chatrelay configuration");
    Ok(config)
}
