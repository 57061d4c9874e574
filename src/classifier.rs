//! Lead classification: rubric, prompt construction and decision parsing
//!
//! The language model backends live in [`crate::llm`]; this module owns the
//! parts they share and the [`LeadClassifier`] seam the pipeline depends on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::info;

use crate::config::{ClassifierBackend, ClassifierConfig};
use crate::error::{ClassifierError, Result};
use crate::llm::{LocalModelClassifier, OpenAiClassifier};
use crate::models::{LeadDecision, Message};
use crate::sanitize::{message_text, TextBudgets};

/// Decides whether a message is a sales lead
#[async_trait]
pub trait LeadClassifier: Send + Sync {
    /// Classify one message. Failures are scoped to that message.
    async fn classify(&self, message: &Message) -> Result<LeadDecision>;

    /// Short backend label for logs
    fn backend_name(&self) -> &'static str;
}

/// What counts as a lead, fixed for the lifetime of a classifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rubric {
    /// Offering the leads are qualified for
    #[serde(default = "default_product_name")]
    pub product_name: String,
    #[serde(default = "default_description")]
    pub description: String,
    /// Traits of a company that would buy the offering
    #[serde(default = "default_qualifying_signals")]
    pub qualifying_signals: Vec<String>,
    /// Concrete things to look for in the message
    #[serde(default = "default_focus_points")]
    pub focus_points: Vec<String>,
}

impl Default for Rubric {
    fn default() -> Self {
        Self {
            product_name: default_product_name(),
            description: default_description(),
            qualifying_signals: default_qualifying_signals(),
            focus_points: default_focus_points(),
        }
    }
}

fn default_product_name() -> String {
    "CPQ (Configure, Price, Quote) implementation".to_string()
}

fn default_description() -> String {
    "CPQ systems are used for complex product configuration, rule-based pricing and \
     discounting, quote generation and sales automation."
        .to_string()
}

fn default_qualifying_signals() -> Vec<String> {
    vec![
        "sells complex products or services".to_string(),
        "needs custom configurations".to_string(),
        "has many product variants and options".to_string(),
        "uses pricing rules and discount structures".to_string(),
        "wants to automate the sales process".to_string(),
        "needs ERP integration".to_string(),
    ]
}

fn default_focus_points() -> Vec<String> {
    vec![
        "companies looking for ERP, CRM or sales automation".to_string(),
        "mentions of complex products or configurations".to_string(),
        "questions about price calculations or quotes".to_string(),
        "B2B context with tailored solutions".to_string(),
    ]
}

/// Builds system and user prompts from a rubric and text budgets
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    rubric: Rubric,
    budgets: TextBudgets,
}

impl PromptBuilder {
    pub fn new(rubric: Rubric, budgets: TextBudgets) -> Self {
        Self { rubric, budgets }
    }

    pub fn system_prompt(&self) -> String {
        let mut prompt = format!(
            "You are an assistant that identifies potential leads for a {}.\n\n{}\n",
            self.rubric.product_name, self.rubric.description
        );

        if !self.rubric.qualifying_signals.is_empty() {
            prompt.push_str("\nTypical leads are companies that:\n");
            for signal in &self.rubric.qualifying_signals {
                let _ = writeln!(prompt, "- {}", signal);
            }
        }

        prompt.push_str(
            "\nAlways give a clear yes or no verdict with a short, concrete explanation. \
             Respond with a single JSON object and nothing else.",
        );
        prompt
    }

    pub fn user_prompt(&self, message: &Message) -> String {
        let sender = match message.sender_name() {
            Some(name) => format!("{} <{}>", name, message.sender_address()),
            None => message.sender_address().to_string(),
        };
        let content = message_text(message, &self.budgets);

        let mut prompt = format!(
            "Analyze this email and decide whether it is a potential lead for a {}.\n\n\
             From: {}\nSubject: {}\n\nContent:\n{}\n\n",
            self.rubric.product_name, sender, message.subject, content
        );

        if !self.rubric.focus_points.is_empty() {
            prompt.push_str("Pay particular attention to:\n");
            for point in &self.rubric.focus_points {
                let _ = writeln!(prompt, "- {}", point);
            }
            prompt.push('\n');
        }

        prompt.push_str(
            "Answer with a JSON object of the form \
             {\"isLead\": true or false, \"reasoning\": \"2-3 sentences explaining why\", \
             \"summary\": \"one-line summary of the request, empty if not a lead\"}",
        );
        prompt
    }
}

/// Parse a model reply into a decision.
///
/// Tolerates code fences and prose around the object: the text from the
/// first `{` to the last `}` is decoded.
pub fn parse_decision(raw: &str) -> std::result::Result<LeadDecision, ClassifierError> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => {
            return Err(ClassifierError::InvalidResponse(format!(
                "no JSON object in reply: {}",
                crate::error::truncate_body(raw, 200)
            )))
        }
    };

    let mut decision: LeadDecision = serde_json::from_str(json)
        .map_err(|e| ClassifierError::InvalidResponse(format!("undecodable decision: {}", e)))?;

    decision.reasoning = decision.reasoning.trim().to_string();
    decision.summary = decision
        .summary
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    Ok(decision)
}

/// Build the configured classifier backend.
///
/// The local backend probes its runtime here, so a missing runtime or model
/// fails at startup instead of on every message.
pub async fn create_classifier(
    config: &ClassifierConfig,
    api_key: Option<secrecy::SecretString>,
) -> Result<Arc<dyn LeadClassifier>> {
    let prompts = PromptBuilder::new(config.rubric.clone(), config.budgets());

    let classifier: Arc<dyn LeadClassifier> = match config.backend {
        ClassifierBackend::Hosted => {
            let api_key = api_key.ok_or_else(|| {
                ClassifierError::Unavailable("OPENAI_API_KEY is not set".to_string())
            })?;
            Arc::new(OpenAiClassifier::new(config, api_key, prompts)?)
        }
        ClassifierBackend::Local => Arc::new(LocalModelClassifier::connect(config, prompts).await?),
    };

    info!(
        "Using {} classifier with model {}",
        classifier.backend_name(),
        config.effective_model()
    );
    Ok(classifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BodyContentType, EmailAddress, MessageBody, Recipient};
    use chrono::Utc;

    fn message() -> Message {
        Message {
            id: "m1".to_string(),
            subject: "Quote for 40 configurable machines".to_string(),
            from: Some(Recipient {
                email_address: EmailAddress {
                    address: "jane@factory.test".to_string(),
                    name: Some("Jane Buyer".to_string()),
                },
            }),
            received_date_time: Utc::now(),
            body_preview: "preview".to_string(),
            body: Some(MessageBody {
                content_type: BodyContentType::Html,
                content: "<p>We need&nbsp;pricing rules</p>".to_string(),
            }),
            is_read: false,
        }
    }

    #[test]
    fn test_parse_plain_json() {
        let decision =
            parse_decision(r#"{"isLead": true, "reasoning": "Asks for quotes", "summary": "Quote request"}"#)
                .unwrap();
        assert!(decision.is_lead);
        assert_eq!(decision.reasoning, "Asks for quotes");
        assert_eq!(decision.summary.as_deref(), Some("Quote request"));
    }

    #[test]
    fn test_parse_fenced_reply_with_prose() {
        let raw = "Sure! Here is my analysis:\n```json\n{\"isLead\": false, \"reasoning\": \" Newsletter \"}\n```\nHope that helps.";
        let decision = parse_decision(raw).unwrap();
        assert!(!decision.is_lead);
        assert_eq!(decision.reasoning, "Newsletter");
        assert_eq!(decision.summary, None);
    }

    #[test]
    fn test_parse_empty_summary_becomes_none() {
        let decision =
            parse_decision(r#"{"is_lead": false, "reasoning": "spam", "summary": "   "}"#).unwrap();
        assert_eq!(decision.summary, None);
    }

    #[test]
    fn test_parse_rejects_missing_object() {
        let err = parse_decision("I think this is a lead.").unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidResponse(_)));
    }

    #[test]
    fn test_parse_rejects_missing_flag() {
        let err = parse_decision(r#"{"reasoning": "no flag"}"#).unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidResponse(_)));
    }

    #[test]
    fn test_system_prompt_includes_rubric() {
        let prompts = PromptBuilder::new(Rubric::default(), TextBudgets::default());
        let system = prompts.system_prompt();
        assert!(system.contains("CPQ"));
        assert!(system.contains("- needs ERP integration"));
        assert!(system.contains("JSON"));
    }

    #[test]
    fn test_user_prompt_embeds_sender_subject_and_sanitized_body() {
        let prompts = PromptBuilder::new(Rubric::default(), TextBudgets::default());
        let user = prompts.user_prompt(&message());
        assert!(user.contains("From: Jane Buyer <jane@factory.test>"));
        assert!(user.contains("Subject: Quote for 40 configurable machines"));
        assert!(user.contains("We need pricing rules"));
        assert!(!user.contains("<p>"));
        assert!(user.contains("\"isLead\""));
    }

    #[test]
    fn test_custom_rubric_deserializes_with_defaults() {
        let rubric: Rubric = toml::from_str(
            r#"
product_name = "solar panel installation"
qualifying_signals = ["owns a roof"]
"#,
        )
        .unwrap();
        assert_eq!(rubric.product_name, "solar panel installation");
        assert_eq!(rubric.qualifying_signals, vec!["owns a roof".to_string()]);
        assert_eq!(rubric.focus_points, default_focus_points());
    }
}
