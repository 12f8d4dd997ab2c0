use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub outbox: OutboxConfig,
    pub sessions: SessionsConfig,
    pub bridge: BridgeConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct OutboxConfig {
    pub max_attempts: u32,
    pub retry_base_delay_secs: u64,
    pub retry_backoff_multiplier: u32,
    pub retry_jitter_secs: u64,
    pub claim_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub claim_batch_size: u32,
    pub worker_count: u32,
    /// Upper bound on a single adapter `send` call, on top of the bridge's
    /// own request timeout.
    pub send_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SessionsConfig {
    pub sweep_interval_secs: u64,
    pub start_timeout_secs: u64,
    /// How long an operator has to submit the second factor once the
    /// provider demands one.
    pub second_factor_window_secs: u64,
}

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub whatsapp_base_url: Option<String>,
    pub telegram_base_url: Option<String>,
    pub auth_token: Option<SecretString>,
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub bridge_auth_token: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://courier.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            outbox: OutboxConfig {
                max_attempts: 5,
                retry_base_delay_secs: 10,
                retry_backoff_multiplier: 2,
                retry_jitter_secs: 5,
                claim_timeout_secs: 120,
                poll_interval_secs: 5,
                claim_batch_size: 16,
                worker_count: 2,
                send_timeout_secs: 30,
            },
            sessions: SessionsConfig {
                sweep_interval_secs: 30,
                start_timeout_secs: 20,
                second_factor_window_secs: 120,
            },
            bridge: BridgeConfig {
                whatsapp_base_url: None,
                telegram_base_url: None,
                auth_token: None,
                request_timeout_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("courier.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(outbox) = patch.outbox {
            if let Some(max_attempts) = outbox.max_attempts {
                self.outbox.max_attempts = max_attempts;
            }
            if let Some(retry_base_delay_secs) = outbox.retry_base_delay_secs {
                self.outbox.retry_base_delay_secs = retry_base_delay_secs;
            }
            if let Some(retry_backoff_multiplier) = outbox.retry_backoff_multiplier {
                self.outbox.retry_backoff_multiplier = retry_backoff_multiplier;
            }
            if let Some(retry_jitter_secs) = outbox.retry_jitter_secs {
                self.outbox.retry_jitter_secs = retry_jitter_secs;
            }
            if let Some(claim_timeout_secs) = outbox.claim_timeout_secs {
                self.outbox.claim_timeout_secs = claim_timeout_secs;
            }
            if let Some(poll_interval_secs) = outbox.poll_interval_secs {
                self.outbox.poll_interval_secs = poll_interval_secs;
            }
            if let Some(claim_batch_size) = outbox.claim_batch_size {
                self.outbox.claim_batch_size = claim_batch_size;
            }
            if let Some(worker_count) = outbox.worker_count {
                self.outbox.worker_count = worker_count;
            }
            if let Some(send_timeout_secs) = outbox.send_timeout_secs {
                self.outbox.send_timeout_secs = send_timeout_secs;
            }
        }

        if let Some(sessions) = patch.sessions {
            if let Some(sweep_interval_secs) = sessions.sweep_interval_secs {
                self.sessions.sweep_interval_secs = sweep_interval_secs;
            }
            if let Some(start_timeout_secs) = sessions.start_timeout_secs {
                self.sessions.start_timeout_secs = start_timeout_secs;
            }
            if let Some(second_factor_window_secs) = sessions.second_factor_window_secs {
                self.sessions.second_factor_window_secs = second_factor_window_secs;
            }
        }

        if let Some(bridge) = patch.bridge {
            if let Some(whatsapp_base_url) = bridge.whatsapp_base_url {
                self.bridge.whatsapp_base_url = Some(whatsapp_base_url);
            }
            if let Some(telegram_base_url) = bridge.telegram_base_url {
                self.bridge.telegram_base_url = Some(telegram_base_url);
            }
            if let Some(bridge_auth_token_value) = bridge.auth_token {
                self.bridge.auth_token = Some(secret_value(bridge_auth_token_value));
            }
            if let Some(request_timeout_secs) = bridge.request_timeout_secs {
                self.bridge.request_timeout_secs = request_timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("COURIER_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("COURIER_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("COURIER_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("COURIER_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("COURIER_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("COURIER_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("COURIER_SERVER_PORT") {
            self.server.port = parse_u16("COURIER_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("COURIER_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("COURIER_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("COURIER_OUTBOX_MAX_ATTEMPTS") {
            self.outbox.max_attempts = parse_u32("COURIER_OUTBOX_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("COURIER_OUTBOX_RETRY_BASE_DELAY_SECS") {
            self.outbox.retry_base_delay_secs =
                parse_u64("COURIER_OUTBOX_RETRY_BASE_DELAY_SECS", &value)?;
        }
        if let Some(value) = read_env("COURIER_OUTBOX_CLAIM_TIMEOUT_SECS") {
            self.outbox.claim_timeout_secs =
                parse_u64("COURIER_OUTBOX_CLAIM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("COURIER_OUTBOX_POLL_INTERVAL_SECS") {
            self.outbox.poll_interval_secs =
                parse_u64("COURIER_OUTBOX_POLL_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("COURIER_OUTBOX_WORKER_COUNT") {
            self.outbox.worker_count = parse_u32("COURIER_OUTBOX_WORKER_COUNT", &value)?;
        }
        if let Some(value) = read_env("COURIER_OUTBOX_SEND_TIMEOUT_SECS") {
            self.outbox.send_timeout_secs =
                parse_u64("COURIER_OUTBOX_SEND_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("COURIER_SESSIONS_SWEEP_INTERVAL_SECS") {
            self.sessions.sweep_interval_secs =
                parse_u64("COURIER_SESSIONS_SWEEP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("COURIER_SESSIONS_START_TIMEOUT_SECS") {
            self.sessions.start_timeout_secs =
                parse_u64("COURIER_SESSIONS_START_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("COURIER_BRIDGE_WHATSAPP_BASE_URL") {
            self.bridge.whatsapp_base_url = Some(value);
        }
        if let Some(value) = read_env("COURIER_BRIDGE_TELEGRAM_BASE_URL") {
            self.bridge.telegram_base_url = Some(value);
        }
        if let Some(value) = read_env("COURIER_BRIDGE_AUTH_TOKEN") {
            self.bridge.auth_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("COURIER_BRIDGE_REQUEST_TIMEOUT_SECS") {
            self.bridge.request_timeout_secs =
                parse_u64("COURIER_BRIDGE_REQUEST_TIMEOUT_SECS", &value)?;
        }

        let log_level = read_env("COURIER_LOGGING_LEVEL").or_else(|| read_env("COURIER_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("COURIER_LOGGING_FORMAT").or_else(|| read_env("COURIER_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(bridge_auth_token) = overrides.bridge_auth_token {
            self.bridge.auth_token = Some(secret_value(bridge_auth_token));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_outbox(&self.outbox)?;
        validate_sessions(&self.sessions)?;
        validate_bridge(&self.bridge)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("courier.toml"), PathBuf::from("config/courier.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_outbox(outbox: &OutboxConfig) -> Result<(), ConfigError> {
    if outbox.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "outbox.max_attempts must be greater than zero".to_string(),
        ));
    }

    if outbox.retry_backoff_multiplier < 2 {
        return Err(ConfigError::Validation(
            "outbox.retry_backoff_multiplier must be at least 2".to_string(),
        ));
    }

    if outbox.claim_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "outbox.claim_timeout_secs must be greater than zero".to_string(),
        ));
    }

    // Anything faster hammers the store without improving delivery latency.
    if outbox.poll_interval_secs < 2 {
        return Err(ConfigError::Validation(
            "outbox.poll_interval_secs must be at least 2".to_string(),
        ));
    }

    if outbox.claim_batch_size == 0 {
        return Err(ConfigError::Validation(
            "outbox.claim_batch_size must be greater than zero".to_string(),
        ));
    }

    if outbox.worker_count == 0 {
        return Err(ConfigError::Validation(
            "outbox.worker_count must be greater than zero".to_string(),
        ));
    }

    if outbox.send_timeout_secs == 0 || outbox.send_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "outbox.send_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_sessions(sessions: &SessionsConfig) -> Result<(), ConfigError> {
    if sessions.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "sessions.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }

    if sessions.start_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "sessions.start_timeout_secs must be greater than zero".to_string(),
        ));
    }

    if sessions.second_factor_window_secs == 0 {
        return Err(ConfigError::Validation(
            "sessions.second_factor_window_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_bridge(bridge: &BridgeConfig) -> Result<(), ConfigError> {
    for (label, base_url) in [
        ("bridge.whatsapp_base_url", &bridge.whatsapp_base_url),
        ("bridge.telegram_base_url", &bridge.telegram_base_url),
    ] {
        if let Some(url) = base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Validation(format!(
                    "{label} must start with http:// or https://"
                )));
            }
        }
    }

    if let Some(token) = &bridge.auth_token {
        if token.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "bridge.auth_token must not be blank when set".to_string(),
            ));
        }
    }

    if bridge.request_timeout_secs == 0 || bridge.request_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "bridge.request_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    outbox: Option<OutboxPatch>,
    sessions: Option<SessionsPatch>,
    bridge: Option<BridgePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct OutboxPatch {
    max_attempts: Option<u32>,
    retry_base_delay_secs: Option<u64>,
    retry_backoff_multiplier: Option<u32>,
    retry_jitter_secs: Option<u64>,
    claim_timeout_secs: Option<u64>,
    poll_interval_secs: Option<u64>,
    claim_batch_size: Option<u32>,
    worker_count: Option<u32>,
    send_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionsPatch {
    sweep_interval_secs: Option<u64>,
    start_timeout_secs: Option<u64>,
    second_factor_window_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct BridgePatch {
    whatsapp_base_url: Option<String>,
    telegram_base_url: Option<String>,
    auth_token: Option<String>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
