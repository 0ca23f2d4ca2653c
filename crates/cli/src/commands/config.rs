use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use collecta_core::config::{AppConfig, LoadOptions};
use serde::Serialize;
use toml::Value;

struct Entry {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for entry in entries(&config) {
        let source = field_source(
            entry.key,
            entry.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", entry.key, entry.value));
    }

    lines.join("\n")
}

fn entry(key: &'static str, value: String, env_keys: &'static [&'static str]) -> Entry {
    Entry { key, value, env_keys }
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    vec![
        entry("database.url", config.database.url.clone(), &["COLLECTA_DATABASE_URL"]),
        entry(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["COLLECTA_DATABASE_MAX_CONNECTIONS"],
        ),
        entry(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["COLLECTA_DATABASE_TIMEOUT_SECS"],
        ),
        entry(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["COLLECTA_SERVER_BIND_ADDRESS"],
        ),
        entry("server.port", config.server.port.to_string(), &["COLLECTA_SERVER_PORT"]),
        entry(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["COLLECTA_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        entry(
            "logging.level",
            config.logging.level.clone(),
            &["COLLECTA_LOGGING_LEVEL", "COLLECTA_LOG_LEVEL"],
        ),
        entry(
            "logging.format",
            config.logging.format.as_str().to_string(),
            &["COLLECTA_LOGGING_FORMAT", "COLLECTA_LOG_FORMAT"],
        ),
        entry("rules.ambiguity", label(&config.rules.ambiguity), &["COLLECTA_RULES_AMBIGUITY"]),
        entry("rules.unmatched", label(&config.rules.unmatched), &["COLLECTA_RULES_UNMATCHED"]),
        entry(
            "authorization.high_after_hours",
            config.authorization.high_after_hours.to_string(),
            &["COLLECTA_AUTHORIZATION_HIGH_AFTER_HOURS"],
        ),
        entry(
            "authorization.urgent_after_hours",
            config.authorization.urgent_after_hours.to_string(),
            &["COLLECTA_AUTHORIZATION_URGENT_AFTER_HOURS"],
        ),
        entry(
            "authorization.default_supervisor_id",
            config
                .authorization
                .default_supervisor_id
                .clone()
                .unwrap_or_else(|| "<unset>".to_string()),
            &["COLLECTA_AUTHORIZATION_DEFAULT_SUPERVISOR_ID"],
        ),
        entry(
            "follow_up.max_observation_chars",
            config.follow_up.max_observation_chars.to_string(),
            &["COLLECTA_FOLLOW_UP_MAX_OBSERVATION_CHARS"],
        ),
    ]
}

/// Renders a serde enum the way it is spelled in `collecta.toml`.
fn label<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| "<unknown>".to_string())
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("collecta.toml"), PathBuf::from("config/collecta.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use collecta_core::transitions::{AmbiguityPolicy, UnmatchedPolicy};
    use toml::Value;

    use super::{contains_path, field_source, label};

    #[test]
    fn file_source_is_reported_for_keys_present_in_the_document() {
        let doc = "[rules]\nambiguity = \"reject\"\n".parse::<Value>().expect("toml");

        assert!(contains_path(&doc, "rules.ambiguity"));
        assert!(!contains_path(&doc, "rules.unmatched"));
        assert_eq!(
            field_source(
                "rules.ambiguity",
                &["COLLECTA_TEST_UNSET_VARIABLE"],
                Some(&doc),
                Some(Path::new("collecta.toml")),
            ),
            "file (collecta.toml)"
        );
        assert_eq!(
            field_source("rules.unmatched", &[], Some(&doc), Some(Path::new("collecta.toml"))),
            "default"
        );
    }

    #[test]
    fn policies_render_in_their_config_spelling() {
        assert_eq!(label(&AmbiguityPolicy::TieBreak), "tie_break");
        assert_eq!(label(&UnmatchedPolicy::NoChange), "no_change");
    }
}
