//! Language model backends for lead classification
//!
//! [`OpenAiClassifier`] talks to a hosted chat-completion API.
//! [`LocalModelClassifier`] talks to a model runtime on the same machine that
//! exposes an Ollama-compatible API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, info};

use crate::classifier::{parse_decision, LeadClassifier, PromptBuilder};
use crate::config::ClassifierConfig;
use crate::error::{truncate_body, ClassifierError, Result};
use crate::models::{LeadDecision, Message};

/// Read the hosted backend key from `OPENAI_API_KEY`
pub fn api_key_from_env() -> Option<SecretString> {
    env::var("OPENAI_API_KEY")
        .ok()
        .filter(|key| !key.trim().is_empty())
        .map(SecretString::from)
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

fn chat_messages<'a>(system: &'a str, user: &'a str) -> Vec<ChatMessage<'a>> {
    vec![
        ChatMessage {
            role: "system",
            content: system,
        },
        ChatMessage {
            role: "user",
            content: user,
        },
    ]
}

fn build_http(config: &ClassifierConfig) -> std::result::Result<reqwest::Client, ClassifierError> {
    reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()
        .map_err(|e| ClassifierError::Unavailable(format!("failed to build HTTP client: {}", e)))
}

async fn read_error_body(response: reqwest::Response) -> ClassifierError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ClassifierError::Unavailable(format!(
        "backend returned status {}: {}",
        status,
        truncate_body(&body, 300)
    ))
}

// --- Hosted chat-completion backend ---

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Classifier backed by a hosted chat-completion endpoint
pub struct OpenAiClassifier {
    http: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
    temperature: f32,
    max_tokens: u32,
    prompts: PromptBuilder,
}

impl OpenAiClassifier {
    pub fn new(
        config: &ClassifierConfig,
        api_key: SecretString,
        prompts: PromptBuilder,
    ) -> Result<Self> {
        Ok(Self {
            http: build_http(config)?,
            endpoint: format!("{}/chat/completions", config.effective_base_url()),
            api_key,
            model: config.effective_model().to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            prompts,
        })
    }

    async fn complete(&self, message: &Message) -> std::result::Result<String, ClassifierError> {
        let system = self.prompts.system_prompt();
        let user = self.prompts.user_prompt(message);
        let request = CompletionRequest {
            model: &self.model,
            messages: chat_messages(&system, &user),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| ClassifierError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(read_error_body(response).await);
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::InvalidResponse(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ClassifierError::InvalidResponse("completion has no content".to_string()))
    }
}

#[async_trait]
impl LeadClassifier for OpenAiClassifier {
    async fn classify(&self, message: &Message) -> Result<LeadDecision> {
        debug!("Classifying message {} with {}", message.id, self.model);
        let content = self.complete(message).await?;
        Ok(parse_decision(&content)?)
    }

    fn backend_name(&self) -> &'static str {
        "hosted"
    }
}

// --- Local model runtime backend ---

#[derive(Debug, Serialize)]
struct LocalChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    format: &'static str,
    options: LocalOptions,
}

#[derive(Debug, Serialize)]
struct LocalOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct LocalChatResponse {
    #[serde(default)]
    message: Option<LocalChatMessage>,
}

#[derive(Debug, Deserialize)]
struct LocalChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<InstalledModel>,
}

#[derive(Debug, Deserialize)]
struct InstalledModel {
    name: String,
}

/// Whether an installed model tag satisfies the requested model name.
/// A bare name matches any tag of that model, e.g. `llama3.1` matches `llama3.1:latest`.
fn model_matches(installed: &str, wanted: &str) -> bool {
    installed == wanted
        || (!wanted.contains(':')
            && installed
                .strip_prefix(wanted)
                .is_some_and(|rest| rest.starts_with(':')))
}

/// Classifier backed by a local model runtime
pub struct LocalModelClassifier {
    http: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    prompts: PromptBuilder,
}

impl LocalModelClassifier {
    /// Probe the runtime and make sure the model is installed
    pub async fn connect(config: &ClassifierConfig, prompts: PromptBuilder) -> Result<Self> {
        let classifier = Self {
            http: build_http(config)?,
            base_url: config.effective_base_url().to_string(),
            model: config.effective_model().to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            prompts,
        };
        classifier.probe().await?;
        info!("Local model runtime at {} serves {}", classifier.base_url, classifier.model);
        Ok(classifier)
    }

    async fn probe(&self) -> std::result::Result<(), ClassifierError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.http.get(&url).send().await.map_err(|e| {
            ClassifierError::Unavailable(format!(
                "local model runtime not reachable at {}: {}",
                self.base_url, e
            ))
        })?;

        if !response.status().is_success() {
            return Err(read_error_body(response).await);
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::Unavailable(format!("unreadable model list: {}", e)))?;

        if tags.models.iter().any(|m| model_matches(&m.name, &self.model)) {
            Ok(())
        } else {
            Err(ClassifierError::Unavailable(format!(
                "model '{}' is not installed in the local runtime",
                self.model
            )))
        }
    }

    async fn chat(&self, message: &Message) -> std::result::Result<String, ClassifierError> {
        let system = self.prompts.system_prompt();
        let user = self.prompts.user_prompt(message);
        let request = LocalChatRequest {
            model: &self.model,
            messages: chat_messages(&system, &user),
            stream: false,
            format: "json",
            options: LocalOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| ClassifierError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(read_error_body(response).await);
        }

        let body: LocalChatResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::InvalidResponse(e.to_string()))?;

        body.message
            .map(|m| m.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ClassifierError::InvalidResponse("reply has no content".to_string()))
    }
}

#[async_trait]
impl LeadClassifier for LocalModelClassifier {
    async fn classify(&self, message: &Message) -> Result<LeadDecision> {
        debug!("Classifying message {} with local {}", message.id, self.model);
        let content = self.chat(message).await?;
        Ok(parse_decision(&content)?)
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
