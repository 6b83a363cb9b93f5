use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub memory: MemoryConfig,
    pub features: FeatureConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
    pub read_only: bool,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub temperature: f32,
}

/// Turn budgets and SQL execution limits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentConfig {
    pub max_iterations: u32,
    pub max_execution_secs: u64,
    pub max_query_rows: usize,
    pub query_timeout_secs: u64,
    pub sql_max_attempts: u32,
    pub retry_base_delay_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_calls: u32,
    pub window_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryConfig {
    pub enabled: bool,
    pub max_history: usize,
    pub session_dir: PathBuf,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeatureConfig {
    pub visualization: bool,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
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
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub max_iterations: Option<u32>,
    pub memory_enabled: Option<bool>,
    pub visualization: Option<bool>,
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
                url: "sqlite://datapilot.db".to_string(),
                max_connections: 4,
                timeout_secs: 10,
                read_only: true,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434/v1".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 60,
                max_retries: 2,
                temperature: 0.0,
            },
            agent: AgentConfig {
                max_iterations: 10,
                max_execution_secs: 120,
                max_query_rows: 1000,
                query_timeout_secs: 30,
                sql_max_attempts: 3,
                retry_base_delay_ms: 200,
            },
            cache: CacheConfig { enabled: true, ttl_secs: 300, max_entries: 256 },
            rate_limit: RateLimitConfig { enabled: true, max_calls: 30, window_secs: 60 },
            memory: MemoryConfig {
                enabled: true,
                max_history: 10,
                session_dir: PathBuf::from(".datapilot/sessions"),
            },
            features: FeatureConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl AgentConfig {
    pub fn max_execution_time(&self) -> Duration {
        Duration::from_secs(self.max_execution_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl FromStr for LogFormat {
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("datapilot.toml"));
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
            if let Some(read_only) = database.read_only {
                self.database.read_only = read_only;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(max_iterations) = agent.max_iterations {
                self.agent.max_iterations = max_iterations;
            }
            if let Some(max_execution_secs) = agent.max_execution_secs {
                self.agent.max_execution_secs = max_execution_secs;
            }
            if let Some(max_query_rows) = agent.max_query_rows {
                self.agent.max_query_rows = max_query_rows;
            }
            if let Some(query_timeout_secs) = agent.query_timeout_secs {
                self.agent.query_timeout_secs = query_timeout_secs;
            }
            if let Some(sql_max_attempts) = agent.sql_max_attempts {
                self.agent.sql_max_attempts = sql_max_attempts;
            }
            if let Some(retry_base_delay_ms) = agent.retry_base_delay_ms {
                self.agent.retry_base_delay_ms = retry_base_delay_ms;
            }
        }

        if let Some(cache) = patch.cache {
            if let Some(enabled) = cache.enabled {
                self.cache.enabled = enabled;
            }
            if let Some(ttl_secs) = cache.ttl_secs {
                self.cache.ttl_secs = ttl_secs;
            }
            if let Some(max_entries) = cache.max_entries {
                self.cache.max_entries = max_entries;
            }
        }

        if let Some(rate_limit) = patch.rate_limit {
            if let Some(enabled) = rate_limit.enabled {
                self.rate_limit.enabled = enabled;
            }
            if let Some(max_calls) = rate_limit.max_calls {
                self.rate_limit.max_calls = max_calls;
            }
            if let Some(window_secs) = rate_limit.window_secs {
                self.rate_limit.window_secs = window_secs;
            }
        }

        if let Some(memory) = patch.memory {
            if let Some(enabled) = memory.enabled {
                self.memory.enabled = enabled;
            }
            if let Some(max_history) = memory.max_history {
                self.memory.max_history = max_history;
            }
            if let Some(session_dir) = memory.session_dir {
                self.memory.session_dir = session_dir;
            }
        }

        if let Some(features) = patch.features {
            if let Some(visualization) = features.visualization {
                self.features.visualization = visualization;
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
        if let Some(value) = read_env("DATAPILOT_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("DATAPILOT_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("DATAPILOT_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("DATAPILOT_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("DATAPILOT_DATABASE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("DATAPILOT_DATABASE_READ_ONLY") {
            self.database.read_only = parse_env("DATAPILOT_DATABASE_READ_ONLY", &value)?;
        }

        if let Some(value) = read_env("DATAPILOT_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("DATAPILOT_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("DATAPILOT_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("DATAPILOT_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("DATAPILOT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env("DATAPILOT_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("DATAPILOT_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_env("DATAPILOT_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("DATAPILOT_LLM_TEMPERATURE") {
            self.llm.temperature = parse_env("DATAPILOT_LLM_TEMPERATURE", &value)?;
        }

        if let Some(value) = read_env("DATAPILOT_AGENT_MAX_ITERATIONS") {
            self.agent.max_iterations = parse_env("DATAPILOT_AGENT_MAX_ITERATIONS", &value)?;
        }
        if let Some(value) = read_env("DATAPILOT_AGENT_MAX_EXECUTION_SECS") {
            self.agent.max_execution_secs =
                parse_env("DATAPILOT_AGENT_MAX_EXECUTION_SECS", &value)?;
        }
        if let Some(value) = read_env("DATAPILOT_AGENT_MAX_QUERY_ROWS") {
            self.agent.max_query_rows = parse_env("DATAPILOT_AGENT_MAX_QUERY_ROWS", &value)?;
        }
        if let Some(value) = read_env("DATAPILOT_AGENT_QUERY_TIMEOUT_SECS") {
            self.agent.query_timeout_secs =
                parse_env("DATAPILOT_AGENT_QUERY_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("DATAPILOT_AGENT_SQL_MAX_ATTEMPTS") {
            self.agent.sql_max_attempts = parse_env("DATAPILOT_AGENT_SQL_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("DATAPILOT_AGENT_RETRY_BASE_DELAY_MS") {
            self.agent.retry_base_delay_ms =
                parse_env("DATAPILOT_AGENT_RETRY_BASE_DELAY_MS", &value)?;
        }

        if let Some(value) = read_env("DATAPILOT_CACHE_ENABLED") {
            self.cache.enabled = parse_env("DATAPILOT_CACHE_ENABLED", &value)?;
        }
        if let Some(value) = read_env("DATAPILOT_CACHE_TTL_SECS") {
            self.cache.ttl_secs = parse_env("DATAPILOT_CACHE_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("DATAPILOT_CACHE_MAX_ENTRIES") {
            self.cache.max_entries = parse_env("DATAPILOT_CACHE_MAX_ENTRIES", &value)?;
        }

        if let Some(value) = read_env("DATAPILOT_RATE_LIMIT_ENABLED") {
            self.rate_limit.enabled = parse_env("DATAPILOT_RATE_LIMIT_ENABLED", &value)?;
        }
        if let Some(value) = read_env("DATAPILOT_RATE_LIMIT_MAX_CALLS") {
            self.rate_limit.max_calls = parse_env("DATAPILOT_RATE_LIMIT_MAX_CALLS", &value)?;
        }
        if let Some(value) = read_env("DATAPILOT_RATE_LIMIT_WINDOW_SECS") {
            self.rate_limit.window_secs = parse_env("DATAPILOT_RATE_LIMIT_WINDOW_SECS", &value)?;
        }

        if let Some(value) = read_env("DATAPILOT_MEMORY_ENABLED") {
            self.memory.enabled = parse_env("DATAPILOT_MEMORY_ENABLED", &value)?;
        }
        if let Some(value) = read_env("DATAPILOT_MEMORY_MAX_HISTORY") {
            self.memory.max_history = parse_env("DATAPILOT_MEMORY_MAX_HISTORY", &value)?;
        }
        if let Some(value) = read_env("DATAPILOT_MEMORY_SESSION_DIR") {
            self.memory.session_dir = PathBuf::from(value);
        }

        if let Some(value) = read_env("DATAPILOT_FEATURES_VISUALIZATION") {
            self.features.visualization = parse_env("DATAPILOT_FEATURES_VISUALIZATION", &value)?;
        }

        let log_level =
            read_env("DATAPILOT_LOGGING_LEVEL").or_else(|| read_env("DATAPILOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("DATAPILOT_LOGGING_FORMAT").or_else(|| read_env("DATAPILOT_LOG_FORMAT"));
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
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(max_iterations) = overrides.max_iterations {
            self.agent.max_iterations = max_iterations;
        }
        if let Some(enabled) = overrides.memory_enabled {
            self.memory.enabled = enabled;
        }
        if let Some(visualization) = overrides.visualization {
            self.features.visualization = visualization;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_agent(&self.agent)?;
        validate_cache(&self.cache)?;
        validate_rate_limit(&self.rate_limit)?;
        validate_memory(&self.memory)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("datapilot.toml"), PathBuf::from("config/datapilot.toml")]
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

const MAX_LLM_RETRIES: u32 = 10;

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.max_retries > MAX_LLM_RETRIES {
        return Err(ConfigError::Validation(format!(
            "llm.max_retries must be in range 0..={MAX_LLM_RETRIES}"
        )));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for the ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.max_iterations == 0 {
        return Err(ConfigError::Validation(
            "agent.max_iterations must be greater than zero".to_string(),
        ));
    }

    if agent.max_execution_secs == 0 {
        return Err(ConfigError::Validation(
            "agent.max_execution_secs must be greater than zero".to_string(),
        ));
    }

    if agent.max_query_rows == 0 || agent.max_query_rows > 100_000 {
        return Err(ConfigError::Validation(
            "agent.max_query_rows must be in range 1..=100000".to_string(),
        ));
    }

    if agent.query_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "agent.query_timeout_secs must be greater than zero".to_string(),
        ));
    }

    if agent.sql_max_attempts == 0 || agent.sql_max_attempts > 10 {
        return Err(ConfigError::Validation(
            "agent.sql_max_attempts must be in range 1..=10".to_string(),
        ));
    }

    Ok(())
}

fn validate_cache(cache: &CacheConfig) -> Result<(), ConfigError> {
    if cache.enabled && (cache.ttl_secs == 0 || cache.max_entries == 0) {
        return Err(ConfigError::Validation(
            "cache.ttl_secs and cache.max_entries must be greater than zero when the cache is enabled"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_rate_limit(rate_limit: &RateLimitConfig) -> Result<(), ConfigError> {
    if rate_limit.enabled && (rate_limit.max_calls == 0 || rate_limit.window_secs == 0) {
        return Err(ConfigError::Validation(
            "rate_limit.max_calls and rate_limit.window_secs must be greater than zero when rate limiting is enabled"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_memory(memory: &MemoryConfig) -> Result<(), ConfigError> {
    if memory.enabled && memory.max_history == 0 {
        return Err(ConfigError::Validation(
            "memory.max_history must be greater than zero when memory is enabled".to_string(),
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

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    agent: Option<AgentPatch>,
    cache: Option<CachePatch>,
    rate_limit: Option<RateLimitPatch>,
    memory: Option<MemoryPatch>,
    features: Option<FeaturePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
    read_only: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    max_iterations: Option<u32>,
    max_execution_secs: Option<u64>,
    max_query_rows: Option<usize>,
    query_timeout_secs: Option<u64>,
    sql_max_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CachePatch {
    enabled: Option<bool>,
    ttl_secs: Option<u64>,
    max_entries: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RateLimitPatch {
    enabled: Option<bool>,
    max_calls: Option<u32>,
    window_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct MemoryPatch {
    enabled: Option<bool>,
    max_history: Option<usize>,
    session_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct FeaturePatch {
    visualization: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
