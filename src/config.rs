//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` (or the path given with `-f`), then applies
//! `DIAGRAM_CHAT_WORK_DIR`, `DIAGRAM_CHAT_LOG_LEVEL`, `DIAGRAM_CHAT_BIND` and
//! `DIAGRAM_CHAT_MODEL` overrides. The LLM API key is env-only (`LLM_API_KEY`).

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;
use crate::llm::ModelParams;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address the axum listener binds to.
    pub bind: String,
    /// Allowed CORS origins. A single `"*"` allows any origin.
    pub cors_allow_origins: Vec<String>,
    /// Upper bound on one request, LLM round-trips included.
    pub request_timeout_seconds: u64,
}

/// OpenAI / OpenAI-compatible provider configuration (`[llm.openai]`).
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    /// Model name passed in the request body.
    pub model: String,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
}

/// LLM configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which provider is active (`"dummy"`, `"openai"`).
    pub provider: String,
    pub openai: OpenAiConfig,
    /// Sampling parameters used when a request does not carry its own.
    pub default_params: ModelParams,
}

impl LlmConfig {
    /// Model identifier reported in sessions and `/health`.
    pub fn model_id(&self) -> &str {
        match self.provider.as_str() {
            "dummy" => "dummy",
            _ => &self.openai.model,
        }
    }
}

/// Conversation behaviour.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Directory holding prompt template overrides.
    pub prompts_dir: PathBuf,
}

/// Where conversation turns are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Database file (already resolved against `work_dir`).
    pub path: PathBuf,
    /// Table name for turn rows. Always a plain SQL identifier.
    pub table: String,
}

/// Fully-resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub service_name: String,
    /// Working directory for persistent data (already expanded, no `~`).
    pub work_dir: PathBuf,
    pub log_level: String,
    /// Optional log file; stderr when absent.
    pub log_file: Option<PathBuf>,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    /// API key from `LLM_API_KEY`. `None` for keyless local models.
    pub llm_api_key: Option<String>,
    pub chat: ChatConfig,
    pub store: StoreConfig,
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    service: RawService,
    #[serde(default)]
    server: RawServer,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    chat: RawChat,
    #[serde(default)]
    store: RawStore,
}

#[derive(Deserialize)]
struct RawService {
    #[serde(default = "default_service_name")]
    name: String,
    #[serde(default = "default_work_dir")]
    work_dir: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
}

impl Default for RawService {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            work_dir: default_work_dir(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

#[derive(Deserialize)]
struct RawServer {
    #[serde(default = "default_bind")]
    bind: String,
    #[serde(default = "default_cors")]
    cors_allow_origins: Vec<String>,
    #[serde(default = "default_request_timeout")]
    request_timeout_seconds: u64,
}

impl Default for RawServer {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_allow_origins: default_cors(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

#[derive(Deserialize)]
struct RawLlm {
    /// `default = "..."` in `[llm]` names the active provider.
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default)]
    openai: RawOpenAi,
    #[serde(default)]
    params: ModelParams,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            openai: RawOpenAi::default(),
            params: ModelParams::default(),
        }
    }
}

#[derive(Deserialize)]
struct RawOpenAi {
    #[serde(default = "default_openai_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_openai_model")]
    model: String,
    #[serde(default = "default_openai_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawOpenAi {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            model: default_openai_model(),
            timeout_seconds: default_openai_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawChat {
    #[serde(default = "default_prompts_dir")]
    prompts_dir: String,
}

impl Default for RawChat {
    fn default() -> Self {
        Self { prompts_dir: default_prompts_dir() }
    }
}

#[derive(Deserialize)]
struct RawStore {
    #[serde(default = "default_store_backend")]
    backend: String,
    #[serde(default = "default_store_path")]
    path: String,
    #[serde(default = "default_store_table")]
    table: String,
}

impl Default for RawStore {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
            table: default_store_table(),
        }
    }
}

fn default_service_name() -> String { "diagram-chat".to_string() }
fn default_work_dir() -> String { "~/.diagram-chat".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_bind() -> String { "0.0.0.0:8000".to_string() }
fn default_cors() -> Vec<String> { vec!["*".to_string()] }
fn default_request_timeout() -> u64 { 120 }
fn default_llm_provider() -> String { "dummy".to_string() }
fn default_openai_api_base_url() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_openai_model() -> String { "gpt-4o-mini".to_string() }
fn default_openai_timeout_seconds() -> u64 { 60 }
fn default_prompts_dir() -> String { "config/prompts".to_string() }
fn default_store_backend() -> String { "sqlite".to_string() }
fn default_store_path() -> String { "chat_history.db".to_string() }
fn default_store_table() -> String { "chat_history".to_string() }

/// Env-var overrides, collected once so tests can pass them explicitly.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub work_dir: Option<String>,
    pub log_level: Option<String>,
    pub bind: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            work_dir: env::var("DIAGRAM_CHAT_WORK_DIR").ok(),
            log_level: env::var("DIAGRAM_CHAT_LOG_LEVEL").ok(),
            bind: env::var("DIAGRAM_CHAT_BIND").ok(),
            model: env::var("DIAGRAM_CHAT_MODEL").ok(),
            api_key: env::var("LLM_API_KEY").ok(),
        }
    }
}

/// Load config from `config_path`, or `config/default.toml`.
///
/// Without an explicit path a missing default file is not an error: the
/// built-in defaults are used.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let overrides = Overrides::from_env();
    match config_path {
        Some(path) => load_from(Path::new(path), &overrides),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            load_from(Path::new(DEFAULT_CONFIG_PATH), &overrides)
        }
        None => resolve(RawConfig::default(), &overrides),
    }
}

/// Load from an explicit path with explicit overrides.
pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;
    resolve(parsed, overrides)
}

fn resolve(parsed: RawConfig, overrides: &Overrides) -> Result<Config, AppError> {
    let s = parsed.service;
    let work_dir = expand_home(overrides.work_dir.as_deref().unwrap_or(&s.work_dir));
    let log_level = overrides.log_level.clone().unwrap_or(s.log_level);
    let log_file = s.log_file.map(|p| resolve_in(&work_dir, &p));

    let backend = match parsed.store.backend.as_str() {
        "memory" => StoreBackend::Memory,
        "sqlite" => StoreBackend::Sqlite,
        other => {
            return Err(AppError::Config(format!(
                "unknown store backend '{other}' (expected \"memory\" or \"sqlite\")"
            )));
        }
    };
    if !is_sql_identifier(&parsed.store.table) {
        return Err(AppError::Config(format!(
            "store table '{}' must be a plain identifier ([A-Za-z_][A-Za-z0-9_]*)",
            parsed.store.table
        )));
    }
    if parsed.server.request_timeout_seconds == 0 {
        return Err(AppError::Config("server.request_timeout_seconds must be > 0".into()));
    }

    let mut openai = parsed.llm.openai;
    if let Some(model) = &overrides.model {
        openai.model = model.clone();
    }

    Ok(Config {
        service_name: s.name,
        log_level,
        log_file,
        server: ServerConfig {
            bind: overrides.bind.clone().unwrap_or(parsed.server.bind),
            cors_allow_origins: parsed.server.cors_allow_origins,
            request_timeout_seconds: parsed.server.request_timeout_seconds,
        },
        llm: LlmConfig {
            provider: parsed.llm.provider,
            openai: OpenAiConfig {
                api_base_url: openai.api_base_url,
                model: openai.model,
                timeout_seconds: openai.timeout_seconds,
            },
            default_params: parsed.llm.params,
        },
        llm_api_key: overrides.api_key.clone(),
        chat: ChatConfig { prompts_dir: PathBuf::from(parsed.chat.prompts_dir) },
        store: StoreConfig {
            backend,
            path: resolve_in(&work_dir, &parsed.store.path),
            table: parsed.store.table,
        },
        work_dir,
    })
}

/// `path` as-is when absolute, otherwise joined onto `base`.
fn resolve_in(base: &Path, path: &str) -> PathBuf {
    let expanded = expand_home(path);
    if expanded.is_absolute() { expanded } else { base.join(expanded) }
}

pub(crate) fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

impl Config {
    /// Safe config for tests: dummy LLM, in-memory store, no API key.
    pub fn test_default(work_dir: &Path) -> Self {
        Self {
            service_name: "test".into(),
            work_dir: work_dir.to_path_buf(),
            log_level: "info".into(),
            log_file: None,
            server: ServerConfig {
                bind: "127.0.0.1:0".into(),
                cors_allow_origins: default_cors(),
                request_timeout_seconds: 5,
            },
            llm: LlmConfig {
                provider: "dummy".into(),
                openai: OpenAiConfig {
                    api_base_url: "http://localhost:0/v1/chat/completions".into(),
                    model: "test-model".into(),
                    timeout_seconds: 1,
                },
                default_params: ModelParams::default(),
            },
            llm_api_key: None,
            chat: ChatConfig { prompts_dir: work_dir.join("prompts") },
            store: StoreConfig {
                backend: StoreBackend::Memory,
                path: work_dir.join("chat_history.db"),
                table: default_store_table(),
            },
        }
    }
}
