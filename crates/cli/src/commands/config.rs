use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use leadflow_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct ConfigField {
    key: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

impl ConfigField {
    fn new(key: &'static str, env_keys: &'static [&'static str], value: impl Into<String>) -> Self {
        Self { key, env_keys, value: value.into() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }

    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<ConfigField> {
    let optional = |value: Option<&str>| value.unwrap_or("<unset>").to_string();
    vec![
        ConfigField::new("database.url", &["LEADFLOW_DATABASE_URL"], config.database.url.clone()),
        ConfigField::new(
            "database.max_connections",
            &["LEADFLOW_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        ConfigField::new("llm.provider", &["LEADFLOW_LLM_PROVIDER"], config.llm.provider.as_str()),
        ConfigField::new("llm.model", &["LEADFLOW_LLM_MODEL"], config.llm.model.clone()),
        ConfigField::new(
            "llm.base_url",
            &["LEADFLOW_LLM_BASE_URL"],
            optional(config.llm.base_url.as_deref()),
        ),
        ConfigField::new(
            "llm.api_key",
            &["LEADFLOW_LLM_API_KEY", "OPENROUTER_API_KEY"],
            redact_secret(config.llm.api_key.as_ref()),
        ),
        ConfigField::new(
            "server.bind_address",
            &["LEADFLOW_SERVER_BIND_ADDRESS"],
            config.server.bind_address.clone(),
        ),
        ConfigField::new("server.port", &["LEADFLOW_SERVER_PORT"], config.server.port.to_string()),
        ConfigField::new("crm.enabled", &["LEADFLOW_CRM_ENABLED"], config.crm.enabled.to_string()),
        ConfigField::new("crm.api_url", &["LEADFLOW_CRM_API_URL"], config.crm.api_url.clone()),
        ConfigField::new(
            "crm.api_key",
            &["LEADFLOW_CRM_API_KEY", "PILOT_API_KEY"],
            redact_secret(config.crm.api_key.as_ref()),
        ),
        ConfigField::new(
            "knowledge.documents_path",
            &["LEADFLOW_KNOWLEDGE_DOCUMENTS_PATH"],
            config.knowledge.documents_path.display().to_string(),
        ),
        ConfigField::new(
            "knowledge.top_k",
            &["LEADFLOW_KNOWLEDGE_TOP_K"],
            config.knowledge.top_k.to_string(),
        ),
        ConfigField::new(
            "conversation.stall_turns",
            &["LEADFLOW_CONVERSATION_STALL_TURNS"],
            config
                .conversation
                .stall_turns
                .map_or_else(|| "<unset: stall rule disabled>".to_string(), |turns| turns.to_string()),
        ),
        ConfigField::new(
            "territories",
            &[],
            format!("{} configured", config.territories.len()),
        ),
        ConfigField::new(
            "logging.level",
            &["LEADFLOW_LOGGING_LEVEL", "LEADFLOW_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        ConfigField::new(
            "logging.format",
            &["LEADFLOW_LOGGING_FORMAT", "LEADFLOW_LOG_FORMAT"],
            format!("{:?}", config.logging.format).to_lowercase(),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("leadflow.toml"), PathBuf::from("config/leadflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
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

fn redact_secret(secret: Option<&SecretString>) -> String {
    match secret.map(|value| value.expose_secret().trim().to_string()) {
        None => "<unset>".to_string(),
        Some(value) if value.is_empty() => "<empty>".to_string(),
        Some(value) => match value.split_once('-') {
            Some((prefix, _)) if prefix.len() <= 4 => format!("{prefix}-***"),
            _ => "<redacted>".to_string(),
        },
    }
}
