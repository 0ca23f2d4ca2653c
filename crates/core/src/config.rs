use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::authorization::PriorityThresholds;
use crate::transitions::{AmbiguityPolicy, UnmatchedPolicy};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub rules: RulesConfig,
    pub authorization: AuthorizationConfig,
    pub follow_up: FollowUpConfig,
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
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug)]
pub struct RulesConfig {
    pub ambiguity: AmbiguityPolicy,
    pub unmatched: UnmatchedPolicy,
}

#[derive(Clone, Debug)]
pub struct AuthorizationConfig {
    pub high_after_hours: u32,
    pub urgent_after_hours: u32,
    /// Supervisor assigned to new requests when the caller names none.
    pub default_supervisor_id: Option<String>,
}

impl AuthorizationConfig {
    pub fn thresholds(&self) -> PriorityThresholds {
        PriorityThresholds::from_hours(self.high_after_hours, self.urgent_after_hours)
    }
}

#[derive(Clone, Debug)]
pub struct FollowUpConfig {
    pub max_observation_chars: usize,
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
    pub ambiguity: Option<AmbiguityPolicy>,
    pub unmatched: Option<UnmatchedPolicy>,
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
                url: "sqlite://collecta.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            rules: RulesConfig {
                ambiguity: AmbiguityPolicy::TieBreak,
                unmatched: UnmatchedPolicy::NoChange,
            },
            authorization: AuthorizationConfig {
                high_after_hours: 8,
                urgent_after_hours: 24,
                default_supervisor_id: None,
            },
            follow_up: FollowUpConfig {
                max_observation_chars: crate::follow_ups::DEFAULT_MAX_OBSERVATION_CHARS,
            },
        }
    }
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

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("collecta.toml"));
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

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(rules) = patch.rules {
            if let Some(ambiguity) = rules.ambiguity {
                self.rules.ambiguity = ambiguity;
            }
            if let Some(unmatched) = rules.unmatched {
                self.rules.unmatched = unmatched;
            }
        }

        if let Some(authorization) = patch.authorization {
            if let Some(high_after_hours) = authorization.high_after_hours {
                self.authorization.high_after_hours = high_after_hours;
            }
            if let Some(urgent_after_hours) = authorization.urgent_after_hours {
                self.authorization.urgent_after_hours = urgent_after_hours;
            }
            if let Some(default_supervisor_id) = authorization.default_supervisor_id {
                self.authorization.default_supervisor_id = Some(default_supervisor_id);
            }
        }

        if let Some(follow_up) = patch.follow_up {
            if let Some(max_observation_chars) = follow_up.max_observation_chars {
                self.follow_up.max_observation_chars = max_observation_chars;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("COLLECTA_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("COLLECTA_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("COLLECTA_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("COLLECTA_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("COLLECTA_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("COLLECTA_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("COLLECTA_SERVER_PORT") {
            self.server.port = parse_env("COLLECTA_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("COLLECTA_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("COLLECTA_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("COLLECTA_LOGGING_LEVEL").or_else(|| read_env("COLLECTA_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("COLLECTA_LOGGING_FORMAT").or_else(|| read_env("COLLECTA_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        if let Some(value) = read_env("COLLECTA_RULES_AMBIGUITY") {
            self.rules.ambiguity = parse_env("COLLECTA_RULES_AMBIGUITY", &value)?;
        }
        if let Some(value) = read_env("COLLECTA_RULES_UNMATCHED") {
            self.rules.unmatched = parse_env("COLLECTA_RULES_UNMATCHED", &value)?;
        }

        if let Some(value) = read_env("COLLECTA_AUTHORIZATION_HIGH_AFTER_HOURS") {
            self.authorization.high_after_hours =
                parse_env("COLLECTA_AUTHORIZATION_HIGH_AFTER_HOURS", &value)?;
        }
        if let Some(value) = read_env("COLLECTA_AUTHORIZATION_URGENT_AFTER_HOURS") {
            self.authorization.urgent_after_hours =
                parse_env("COLLECTA_AUTHORIZATION_URGENT_AFTER_HOURS", &value)?;
        }
        if let Some(value) = read_env("COLLECTA_AUTHORIZATION_DEFAULT_SUPERVISOR_ID") {
            self.authorization.default_supervisor_id = Some(value);
        }

        if let Some(value) = read_env("COLLECTA_FOLLOW_UP_MAX_OBSERVATION_CHARS") {
            self.follow_up.max_observation_chars =
                parse_env("COLLECTA_FOLLOW_UP_MAX_OBSERVATION_CHARS", &value)?;
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
        if let Some(ambiguity) = overrides.ambiguity {
            self.rules.ambiguity = ambiguity;
        }
        if let Some(unmatched) = overrides.unmatched {
            self.rules.unmatched = unmatched;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        validate_authorization(&self.authorization)?;
        validate_follow_up(&self.follow_up)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("collecta.toml"), PathBuf::from("config/collecta.toml")]
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
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

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

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_authorization(authorization: &AuthorizationConfig) -> Result<(), ConfigError> {
    if authorization.high_after_hours == 0 {
        return Err(ConfigError::Validation(
            "authorization.high_after_hours must be greater than zero".to_string(),
        ));
    }

    if authorization.urgent_after_hours <= authorization.high_after_hours {
        return Err(ConfigError::Validation(format!(
            "authorization.urgent_after_hours ({}) must be greater than authorization.high_after_hours ({})",
            authorization.urgent_after_hours, authorization.high_after_hours
        )));
    }

    if let Some(supervisor) = &authorization.default_supervisor_id {
        if supervisor.trim().is_empty() {
            return Err(ConfigError::Validation(
                "authorization.default_supervisor_id must not be blank when set".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_follow_up(follow_up: &FollowUpConfig) -> Result<(), ConfigError> {
    if follow_up.max_observation_chars == 0 || follow_up.max_observation_chars > 10_000 {
        return Err(ConfigError::Validation(
            "follow_up.max_observation_chars must be in range 1..=10000".to_string(),
        ));
    }

    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
    rules: Option<RulesPatch>,
    authorization: Option<AuthorizationPatch>,
    follow_up: Option<FollowUpPatch>,
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
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct RulesPatch {
    ambiguity: Option<AmbiguityPolicy>,
    unmatched: Option<UnmatchedPolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthorizationPatch {
    high_after_hours: Option<u32>,
    urgent_after_hours: Option<u32>,
    default_supervisor_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FollowUpPatch {
    max_observation_chars: Option<usize>,
}
