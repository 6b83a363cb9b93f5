use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use datapilot_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use serde_json::{Map, Value as JsonValue};
use toml::Value;

use crate::commands::{prepare, CommandResult};

pub fn run(options: LoadOptions) -> CommandResult {
    let config_file_path = detect_config_path(options.config_path.as_deref());
    let (config, _runtime) = match prepare("config", options) {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: flag > env > file > default):".to_string()];
    let mut data = Map::new();
    for (key, value) in effective_values(&config) {
        let source = field_source(key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, &source));
        data.insert(key.to_string(), JsonValue::String(value));
    }

    CommandResult::success_with("config", lines.join("\n"), Some(JsonValue::Object(data)))
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String)> {
    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map_or_else(|| "<unset>".to_string(), |key| redact_token(key.expose_secret()));

    vec![
        ("database.url", config.database.url.clone()),
        ("database.max_connections", config.database.max_connections.to_string()),
        ("database.timeout_secs", config.database.timeout_secs.to_string()),
        ("database.read_only", config.database.read_only.to_string()),
        ("llm.provider", format!("{:?}", config.llm.provider)),
        ("llm.model", config.llm.model.clone()),
        ("llm.base_url", config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string())),
        ("llm.api_key", api_key),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string()),
        ("llm.max_retries", config.llm.max_retries.to_string()),
        ("agent.max_iterations", config.agent.max_iterations.to_string()),
        ("agent.max_execution_secs", config.agent.max_execution_secs.to_string()),
        ("agent.max_query_rows", config.agent.max_query_rows.to_string()),
        ("agent.query_timeout_secs", config.agent.query_timeout_secs.to_string()),
        ("cache.enabled", config.cache.enabled.to_string()),
        ("rate_limit.max_calls", config.rate_limit.max_calls.to_string()),
        ("rate_limit.window_secs", config.rate_limit.window_secs.to_string()),
        ("memory.enabled", config.memory.enabled.to_string()),
        ("memory.max_history", config.memory.max_history.to_string()),
        ("memory.session_dir", config.memory.session_dir.display().to_string()),
        ("features.visualization", config.features.visualization.to_string()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format)),
    ]
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    [PathBuf::from("datapilot.toml"), PathBuf::from("config/datapilot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn env_key(key_path: &str) -> String {
    format!("DATAPILOT_{}", key_path.replace('.', "_").to_ascii_uppercase())
}

fn field_source(
    key_path: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    let env_key = env_key(key_path);
    if env::var_os(&env_key).is_some() {
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

fn render_line(key: &str, value: &str, source: &str) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
