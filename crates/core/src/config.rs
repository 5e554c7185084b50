use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::territory::{Salesperson, Territory};
use crate::vocabulary::{normalize_text, VocabularyExtras};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub crm: CrmConfig,
    pub knowledge: KnowledgeConfig,
    pub conversation: ConversationConfig,
    pub territories: Vec<Territory>,
    pub vocabulary: VocabularyExtras,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl LlmConfig {
    /// Configured base URL, or the provider's public endpoint.
    pub fn endpoint_base(&self) -> String {
        match &self.base_url {
            Some(base_url) => base_url.trim_end_matches('/').to_owned(),
            None => self.provider.default_base_url().to_owned(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CrmConfig {
    pub enabled: bool,
    pub api_url: String,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct KnowledgeConfig {
    pub documents_path: PathBuf,
    pub text_dirs: Vec<PathBuf>,
    pub top_k: usize,
    pub vector_store_url: Option<String>,
    pub vector_store_api_key: Option<SecretString>,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            documents_path: PathBuf::from("docs/rag_documents.json"),
            text_dirs: vec![PathBuf::from("docs")],
            top_k: 5,
            vector_store_url: None,
            vector_store_api_key: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConversationConfig {
    /// Consecutive turns without a new field before a lead is parked in follow-up.
    /// Unset disables the stall rule.
    pub stall_turns: Option<u32>,
    pub exploratory_min_turns: Option<u32>,
}

impl ConversationConfig {
    pub fn exploratory_threshold(&self) -> Option<u32> {
        self.exploratory_min_turns.or(self.stall_turns)
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openrouter")]
    OpenRouter,
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenRouter => "openrouter",
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::OpenRouter | Self::OpenAi)
    }
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
    pub llm_api_key: Option<String>,
    pub server_port: Option<u16>,
    pub crm_enabled: Option<bool>,
    pub crm_api_url: Option<String>,
    pub crm_api_key: Option<String>,
    pub documents_path: Option<PathBuf>,
    pub stall_turns: Option<u32>,
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
                url: "sqlite://leadflow.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::OpenRouter,
                api_key: None,
                base_url: None,
                model: "xiaomi/mimo-v2-flash:free".to_string(),
                timeout_secs: 30,
                max_retries: 2,
                max_tokens: 800,
                temperature: 0.7,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            crm: CrmConfig {
                enabled: false,
                api_url: "https://api.pilot.com/v1".to_string(),
                api_key: None,
                timeout_secs: 10,
            },
            knowledge: KnowledgeConfig::default(),
            conversation: ConversationConfig::default(),
            territories: Vec::new(),
            vocabulary: VocabularyExtras::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openrouter" => Ok(Self::OpenRouter),
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openrouter|openai|ollama)"
            ))),
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

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("leadflow.toml"));
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
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
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

        if let Some(crm) = patch.crm {
            if let Some(enabled) = crm.enabled {
                self.crm.enabled = enabled;
            }
            if let Some(api_url) = crm.api_url {
                self.crm.api_url = api_url;
            }
            if let Some(crm_api_key_value) = crm.api_key {
                self.crm.api_key = Some(secret_value(crm_api_key_value));
            }
            if let Some(timeout_secs) = crm.timeout_secs {
                self.crm.timeout_secs = timeout_secs;
            }
        }

        if let Some(knowledge) = patch.knowledge {
            if let Some(documents_path) = knowledge.documents_path {
                self.knowledge.documents_path = documents_path;
            }
            if let Some(text_dirs) = knowledge.text_dirs {
                self.knowledge.text_dirs = text_dirs;
            }
            if let Some(top_k) = knowledge.top_k {
                self.knowledge.top_k = top_k;
            }
            if let Some(vector_store_url) = knowledge.vector_store_url {
                self.knowledge.vector_store_url = Some(vector_store_url);
            }
            if let Some(vector_store_key_value) = knowledge.vector_store_api_key {
                self.knowledge.vector_store_api_key = Some(secret_value(vector_store_key_value));
            }
        }

        if let Some(conversation) = patch.conversation {
            if let Some(stall_turns) = conversation.stall_turns {
                self.conversation.stall_turns = Some(stall_turns);
            }
            if let Some(exploratory_min_turns) = conversation.exploratory_min_turns {
                self.conversation.exploratory_min_turns = Some(exploratory_min_turns);
            }
        }

        if let Some(territories) = patch.territories {
            self.territories = territories.into_iter().map(TerritoryPatch::into_territory).collect();
        }

        if let Some(vocabulary) = patch.vocabulary {
            if let Some(brands) = vocabulary.brands {
                self.vocabulary.brands = brands;
            }
            if let Some(implements) = vocabulary.implements {
                self.vocabulary.implements = implements;
            }
            if let Some(zones) = vocabulary.zones {
                self.vocabulary.zones = zones;
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
        if let Some(value) = read_env("LEADFLOW_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("LEADFLOW_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("LEADFLOW_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("LEADFLOW_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADFLOW_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        let llm_api_key =
            read_env("LEADFLOW_LLM_API_KEY").or_else(|| read_env("OPENROUTER_API_KEY"));
        if let Some(value) = llm_api_key {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("LEADFLOW_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("LEADFLOW_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("LEADFLOW_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("LEADFLOW_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("LEADFLOW_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("LEADFLOW_LLM_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("LEADFLOW_LLM_TEMPERATURE", &value)?;
        }

        if let Some(value) = read_env("LEADFLOW_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("LEADFLOW_SERVER_PORT") {
            self.server.port = parse_u16("LEADFLOW_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("LEADFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADFLOW_CRM_ENABLED") {
            self.crm.enabled = parse_bool("LEADFLOW_CRM_ENABLED", &value)?;
        }
        let crm_api_url = read_env("LEADFLOW_CRM_API_URL").or_else(|| read_env("PILOT_API_URL"));
        if let Some(value) = crm_api_url {
            self.crm.api_url = value;
        }
        let crm_api_key = read_env("LEADFLOW_CRM_API_KEY").or_else(|| read_env("PILOT_API_KEY"));
        if let Some(value) = crm_api_key {
            self.crm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("LEADFLOW_CRM_TIMEOUT_SECS") {
            self.crm.timeout_secs = parse_u64("LEADFLOW_CRM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADFLOW_KNOWLEDGE_DOCUMENTS_PATH") {
            self.knowledge.documents_path = PathBuf::from(value);
        }
        if let Some(value) = read_env("LEADFLOW_KNOWLEDGE_TOP_K") {
            self.knowledge.top_k = parse_usize("LEADFLOW_KNOWLEDGE_TOP_K", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_KNOWLEDGE_VECTOR_STORE_URL") {
            self.knowledge.vector_store_url = Some(value);
        }
        if let Some(value) = read_env("LEADFLOW_KNOWLEDGE_VECTOR_STORE_API_KEY") {
            self.knowledge.vector_store_api_key = Some(secret_value(value));
        }

        if let Some(value) = read_env("LEADFLOW_CONVERSATION_STALL_TURNS") {
            self.conversation.stall_turns =
                Some(parse_u32("LEADFLOW_CONVERSATION_STALL_TURNS", &value)?);
        }
        if let Some(value) = read_env("LEADFLOW_CONVERSATION_EXPLORATORY_MIN_TURNS") {
            self.conversation.exploratory_min_turns =
                Some(parse_u32("LEADFLOW_CONVERSATION_EXPLORATORY_MIN_TURNS", &value)?);
        }

        let log_level =
            read_env("LEADFLOW_LOGGING_LEVEL").or_else(|| read_env("LEADFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEADFLOW_LOGGING_FORMAT").or_else(|| read_env("LEADFLOW_LOG_FORMAT"));
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
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(enabled) = overrides.crm_enabled {
            self.crm.enabled = enabled;
        }
        if let Some(api_url) = overrides.crm_api_url {
            self.crm.api_url = api_url;
        }
        if let Some(crm_api_key) = overrides.crm_api_key {
            self.crm.api_key = Some(secret_value(crm_api_key));
        }
        if let Some(documents_path) = overrides.documents_path {
            self.knowledge.documents_path = documents_path;
        }
        if let Some(stall_turns) = overrides.stall_turns {
            self.conversation.stall_turns = Some(stall_turns);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_crm(&self.crm)?;
        validate_knowledge(&self.knowledge)?;
        validate_conversation(&self.conversation)?;
        validate_territories(&self.territories)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("leadflow.toml"), PathBuf::from("config/leadflow.toml")]
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

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation("llm.max_tokens must be greater than zero".to_string()));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if llm.provider.requires_api_key() {
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "llm.api_key is required for openrouter/openai providers (set LEADFLOW_LLM_API_KEY or OPENROUTER_API_KEY)"
                    .to_string(),
            ));
        }
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
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

fn validate_crm(crm: &CrmConfig) -> Result<(), ConfigError> {
    if crm.enabled {
        let missing = crm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "crm.api_key is required when crm.enabled is true (set LEADFLOW_CRM_API_KEY or PILOT_API_KEY)"
                    .to_string(),
            ));
        }
    }

    if !crm.api_url.starts_with("http://") && !crm.api_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "crm.api_url must start with http:// or https://".to_string(),
        ));
    }

    if crm.timeout_secs == 0 || crm.timeout_secs > 120 {
        return Err(ConfigError::Validation("crm.timeout_secs must be in range 1..=120".to_string()));
    }

    Ok(())
}

fn validate_knowledge(knowledge: &KnowledgeConfig) -> Result<(), ConfigError> {
    if knowledge.top_k == 0 {
        return Err(ConfigError::Validation(
            "knowledge.top_k must be greater than zero".to_string(),
        ));
    }

    if let Some(url) = &knowledge.vector_store_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "knowledge.vector_store_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    if conversation.stall_turns == Some(0) {
        return Err(ConfigError::Validation(
            "conversation.stall_turns must be greater than zero".to_string(),
        ));
    }

    if conversation.exploratory_min_turns == Some(0) {
        return Err(ConfigError::Validation(
            "conversation.exploratory_min_turns must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_territories(territories: &[Territory]) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for territory in territories {
        let zone = normalize_text(&territory.zone);
        if zone.is_empty() {
            return Err(ConfigError::Validation(
                "territories[].zone must not be empty".to_string(),
            ));
        }
        if territory.salesperson.id.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "territory `{}` needs a salesperson_id",
                territory.zone
            )));
        }
        let keys = std::iter::once(zone).chain(territory.aliases.iter().map(|a| normalize_text(a)));
        for key in keys {
            if !seen.insert(key.clone()) {
                return Err(ConfigError::Validation(format!(
                    "zone `{key}` is mapped by more than one territory"
                )));
            }
        }
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

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    crm: Option<CrmPatch>,
    knowledge: Option<KnowledgePatch>,
    conversation: Option<ConversationPatch>,
    territories: Option<Vec<TerritoryPatch>>,
    vocabulary: Option<VocabularyPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CrmPatch {
    enabled: Option<bool>,
    api_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct KnowledgePatch {
    documents_path: Option<PathBuf>,
    text_dirs: Option<Vec<PathBuf>>,
    top_k: Option<usize>,
    vector_store_url: Option<String>,
    vector_store_api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    stall_turns: Option<u32>,
    exploratory_min_turns: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TerritoryPatch {
    zone: String,
    salesperson_id: String,
    salesperson_name: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

impl TerritoryPatch {
    fn into_territory(self) -> Territory {
        let name = self.salesperson_name.unwrap_or_else(|| self.salesperson_id.clone());
        Territory {
            zone: self.zone,
            aliases: self.aliases,
            salesperson: Salesperson { id: self.salesperson_id, name },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct VocabularyPatch {
    brands: Option<Vec<String>>,
    implements: Option<Vec<String>>,
    zones: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
