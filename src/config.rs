use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::auth::{DEFAULT_LOGIN_BASE, DEFAULT_SCOPE};
use crate::classifier::Rubric;
use crate::client::DEFAULT_API_BASE;
use crate::error::{LeadMachineError, Result};
use crate::sanitize::{TextBudgets, DEFAULT_BODY_CHAR_BUDGET, DEFAULT_PREVIEW_CHAR_BUDGET};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub mailbox: MailboxConfig,
    #[serde(default)]
    pub folders: FolderConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    /// Mailbox the pipeline works on (`SENDER_EMAIL`)
    #[serde(default)]
    pub user_email: String,
    /// Recipients of forwarded leads (`ADMIN_EMAILS`)
    #[serde(default)]
    pub admin_emails: Vec<String>,
    /// Directory tenant (`GRAPH_TENANT_ID`)
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_login_base")]
    pub login_base: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_mailbox_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            user_email: String::new(),
            admin_emails: Vec::new(),
            tenant_id: String::new(),
            api_base: default_api_base(),
            login_base: default_login_base(),
            scope: default_scope(),
            request_timeout_secs: default_mailbox_timeout(),
        }
    }
}

impl MailboxConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Display names of the pipeline folders
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FolderConfig {
    /// Top-level folder, matched exactly
    #[serde(default = "default_inbox")]
    pub inbox: String,
    /// Child of the inbox holding unprocessed candidates, matched case-insensitively
    #[serde(default = "default_source")]
    pub source: String,
    /// Child of the source folder holding processed messages, matched case-insensitively
    #[serde(default = "default_archive")]
    pub archive: String,
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            inbox: default_inbox(),
            source: default_source(),
            archive: default_archive(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierBackend {
    /// Hosted chat-completion API
    #[default]
    Hosted,
    /// Local model runtime with an Ollama-compatible API
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub backend: ClassifierBackend,
    /// Model name, defaults per backend when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// API root, defaults per backend when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_body_char_budget")]
    pub body_char_budget: usize,
    #[serde(default = "default_preview_char_budget")]
    pub preview_char_budget: usize,
    #[serde(default = "default_classifier_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub rubric: Rubric,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            backend: ClassifierBackend::default(),
            model: None,
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            body_char_budget: default_body_char_budget(),
            preview_char_budget: default_preview_char_budget(),
            request_timeout_secs: default_classifier_timeout(),
            rubric: Rubric::default(),
        }
    }
}

impl ClassifierConfig {
    pub fn effective_model(&self) -> &str {
        match (&self.model, self.backend) {
            (Some(model), _) => model,
            (None, ClassifierBackend::Hosted) => "gpt-4o-mini",
            (None, ClassifierBackend::Local) => "llama3.1",
        }
    }

    pub fn effective_base_url(&self) -> &str {
        let url = match (&self.base_url, self.backend) {
            (Some(url), _) => url.as_str(),
            (None, ClassifierBackend::Hosted) => "https://api.openai.com/v1",
            (None, ClassifierBackend::Local) => "http://localhost:11434",
        };
        url.trim_end_matches('/')
    }

    pub fn budgets(&self) -> TextBudgets {
        TextBudgets {
            body_chars: self.body_char_budget,
            preview_chars: self.preview_char_budget,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Messages fetched per run when no limit is given
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

/// Which commands the required settings are checked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Mailbox access only (setup, status, restore)
    Mailbox,
    /// Mailbox access plus forwarding and classification (process, daemon)
    Pipeline,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_login_base() -> String {
    DEFAULT_LOGIN_BASE.to_string()
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

fn default_mailbox_timeout() -> u64 {
    30
}

fn default_inbox() -> String {
    "Inbox".to_string()
}

fn default_source() -> String {
    "leadmachine".to_string()
}

fn default_archive() -> String {
    "processed".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    300
}

fn default_body_char_budget() -> usize {
    DEFAULT_BODY_CHAR_BUDGET
}

fn default_preview_char_budget() -> usize {
    DEFAULT_PREVIEW_CHAR_BUDGET
}

fn default_classifier_timeout() -> u64 {
    120
}

fn default_limit() -> usize {
    50
}

fn default_interval_secs() -> u64 {
    300
}

/// Split a comma separated address list, dropping blanks
pub fn parse_address_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Parse the config file without validating it.
    ///
    /// Call [`Config::validate`] after [`Config::apply_env_overrides`] so
    /// environment values are checked too.
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            LeadMachineError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            LeadMachineError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                LeadMachineError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| {
            LeadMachineError::ConfigError(format!("Failed to serialize config: {}", e))
        })?;

        tokio::fs::write(path, content).await.map_err(|e| {
            LeadMachineError::ConfigError(format!("Failed to write config file: {}", e))
        })?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Override identity fields from the environment
    ///
    /// # Environment Variables
    /// - `GRAPH_TENANT_ID`: directory tenant
    /// - `SENDER_EMAIL`: mailbox to process
    /// - `ADMIN_EMAILS`: comma separated lead recipients
    pub fn apply_env_overrides(&mut self) {
        if let Some(tenant) = env_value("GRAPH_TENANT_ID") {
            self.mailbox.tenant_id = tenant;
        }
        if let Some(user) = env_value("SENDER_EMAIL") {
            self.mailbox.user_email = user;
        }
        if let Some(admins) = env_value("ADMIN_EMAILS") {
            self.mailbox.admin_emails = parse_address_list(&admins);
        }
    }

    /// Check that every setting the given commands need is present.
    ///
    /// Reports all missing keys at once rather than the first one.
    pub fn check_required(&self, requirement: Requirement) -> Result<()> {
        let mut missing = Vec::new();

        if env_value("GRAPH_CLIENT_ID").is_none() {
            missing.push("GRAPH_CLIENT_ID");
        }
        if env_value("GRAPH_CLIENT_SECRET").is_none() {
            missing.push("GRAPH_CLIENT_SECRET");
        }
        if self.mailbox.tenant_id.trim().is_empty() {
            missing.push("GRAPH_TENANT_ID");
        }
        if self.mailbox.user_email.trim().is_empty() {
            missing.push("SENDER_EMAIL");
        }

        if requirement == Requirement::Pipeline {
            if self.mailbox.admin_emails.is_empty() {
                missing.push("ADMIN_EMAILS");
            }
            if self.classifier.backend == ClassifierBackend::Hosted
                && env_value("OPENAI_API_KEY").is_none()
            {
                missing.push("OPENAI_API_KEY");
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(LeadMachineError::ConfigError(format!(
                "missing required settings: {}",
                missing.join(", ")
            )))
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let mailbox = &self.mailbox;
        if mailbox.request_timeout_secs == 0 || mailbox.request_timeout_secs > 300 {
            return Err(LeadMachineError::ConfigError(
                "mailbox.request_timeout_secs must be between 1 and 300".to_string(),
            ));
        }
        for (name, url) in [
            ("mailbox.api_base", &mailbox.api_base),
            ("mailbox.login_base", &mailbox.login_base),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(LeadMachineError::ConfigError(format!(
                    "{} must be an http(s) URL, got '{}'",
                    name, url
                )));
            }
        }
        if mailbox.scope.trim().is_empty() {
            return Err(LeadMachineError::ConfigError(
                "mailbox.scope cannot be empty".to_string(),
            ));
        }
        for address in &mailbox.admin_emails {
            if !address.contains('@') {
                return Err(LeadMachineError::ConfigError(format!(
                    "mailbox.admin_emails contains an invalid address: '{}'",
                    address
                )));
            }
        }

        for (name, value) in [
            ("folders.inbox", &self.folders.inbox),
            ("folders.source", &self.folders.source),
            ("folders.archive", &self.folders.archive),
        ] {
            if value.trim().is_empty() {
                return Err(LeadMachineError::ConfigError(format!(
                    "{} cannot be empty",
                    name
                )));
            }
        }

        let classifier = &self.classifier;
        if !(0.0..=2.0).contains(&classifier.temperature) {
            return Err(LeadMachineError::ConfigError(
                "classifier.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }
        if classifier.max_tokens == 0 {
            return Err(LeadMachineError::ConfigError(
                "classifier.max_tokens must be greater than 0".to_string(),
            ));
        }
        if classifier.body_char_budget == 0 || classifier.preview_char_budget == 0 {
            return Err(LeadMachineError::ConfigError(
                "classifier character budgets must be greater than 0".to_string(),
            ));
        }
        if classifier.request_timeout_secs == 0 {
            return Err(LeadMachineError::ConfigError(
                "classifier.request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if let Some(model) = &classifier.model {
            if model.trim().is_empty() {
                return Err(LeadMachineError::ConfigError(
                    "classifier.model cannot be empty".to_string(),
                ));
            }
        }

        if self.processing.default_limit == 0 || self.processing.default_limit > 1000 {
            return Err(LeadMachineError::ConfigError(
                "processing.default_limit must be between 1 and 1000".to_string(),
            ));
        }

        if self.daemon.interval_secs == 0 {
            return Err(LeadMachineError::ConfigError(
                "daemon.interval_secs must be at least 1".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let mut config = Self::default();
        config.mailbox.user_email = "leads@example.com".to_string();
        config.mailbox.admin_emails = vec!["sales@example.com".to_string()];
        config.save(path).await
    }
}
