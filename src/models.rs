use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Mailbox folder as returned by the folder listing endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub parent_folder_id: Option<String>,
    #[serde(default)]
    pub total_item_count: Option<u32>,
    #[serde(default)]
    pub unread_item_count: Option<u32>,
}

/// Mailbox message with the fields the pipeline selects
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default, deserialize_with = "deserializers::null_as_default")]
    pub subject: String,
    #[serde(default)]
    pub from: Option<Recipient>,
    pub received_date_time: DateTime<Utc>,
    #[serde(default, deserialize_with = "deserializers::null_as_default")]
    pub body_preview: String,
    #[serde(default)]
    pub body: Option<MessageBody>,
    #[serde(default)]
    pub is_read: bool,
}

impl Message {
    /// Sender address, or an empty string when the service omitted it
    pub fn sender_address(&self) -> &str {
        self.from
            .as_ref()
            .map(|r| r.email_address.address.as_str())
            .unwrap_or("")
    }

    /// Sender display name when present
    pub fn sender_name(&self) -> Option<&str> {
        self.from
            .as_ref()
            .and_then(|r| r.email_address.name.as_deref())
            .filter(|name| !name.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody {
    pub content_type: BodyContentType,
    #[serde(default, deserialize_with = "deserializers::null_as_default")]
    pub content: String,
}

/// Body content type. The service spells these in lowercase, but accepts any case.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BodyContentType {
    #[serde(alias = "Text", alias = "TEXT")]
    Text,
    #[serde(alias = "Html", alias = "HTML")]
    Html,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub email_address: EmailAddress,
}

impl Recipient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            email_address: EmailAddress {
                address: address.into(),
                name: None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailAddress {
    #[serde(default, deserialize_with = "deserializers::null_as_default")]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Classifier verdict for a single message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeadDecision {
    #[serde(rename = "isLead", alias = "is_lead")]
    pub is_lead: bool,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Folder ids the pipeline works with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFolders {
    pub inbox_id: String,
    /// Folder holding unprocessed candidates
    pub source_id: String,
    /// Folder holding processed messages
    pub archive_id: String,
}

/// What happened to one successfully processed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOutcome {
    pub is_lead: bool,
    /// Side effects were skipped
    pub dry_run: bool,
    /// Id assigned by the service after the archive move (None in dry run)
    pub archived_id: Option<String>,
}

/// Counters for a single pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingStats {
    pub total_processed: usize,
    pub leads_forwarded: usize,
    pub errors: usize,
}

impl ProcessingStats {
    /// Fold one message result into the counters.
    ///
    /// A lead counts as forwarded in dry run too, so the counters reflect
    /// the decisions rather than the side effects.
    pub fn record(&mut self, outcome: &Result<MessageOutcome>) {
        match outcome {
            Ok(outcome) => {
                self.total_processed += 1;
                if outcome.is_lead {
                    self.leads_forwarded += 1;
                }
            }
            Err(_) => self.errors += 1,
        }
    }

    /// Add another run's counters (used by the daemon totals)
    pub fn merge(&mut self, other: &ProcessingStats) {
        self.total_processed += other.total_processed;
        self.leads_forwarded += other.leads_forwarded;
        self.errors += other.errors;
    }
}

impl fmt::Display for ProcessingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processed: {}, Leads: {}, Errors: {}",
            self.total_processed, self.leads_forwarded, self.errors
        )
    }
}

/// Snapshot of the pipeline folders for the status command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxStatus {
    pub source: Folder,
    pub archive: Folder,
    /// Recent Sent Items that carry the lead forwarding marker
    pub recent_forwarded_leads: usize,
}

/// Custom deserializers for mailbox API payloads
pub mod deserializers {
    use serde::{Deserialize, Deserializer};

    /// Treat an explicit JSON null as the type's default value
    pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Default + Deserialize<'de>,
    {
        let opt: Option<T> = Option::deserialize(deserializer)?;
        Ok(opt.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClassifierError, LeadMachineError};
    use serde_json::json;

    #[test]
    fn test_message_deserializes_graph_payload() {
        let payload = json!({
            "id": "AAMkAD1",
            "subject": "Quote request",
            "from": { "emailAddress": { "address": "buyer@acme.test", "name": "Buyer" } },
            "receivedDateTime": "2025-03-01T09:30:00Z",
            "bodyPreview": "Hello",
            "body": { "contentType": "html", "content": "<p>Hello</p>" },
            "isRead": false
        });

        let message: Message = serde_json::from_value(payload).unwrap();
        assert_eq!(message.id, "AAMkAD1");
        assert_eq!(message.sender_address(), "buyer@acme.test");
        assert_eq!(message.sender_name(), Some("Buyer"));
        assert_eq!(
            message.body.as_ref().map(|b| b.content_type),
            Some(BodyContentType::Html)
        );
    }

    #[test]
    fn test_message_tolerates_nulls_and_missing_sender() {
        let payload = json!({
            "id": "AAMkAD2",
            "subject": null,
            "receivedDateTime": "2025-03-01T09:30:00Z",
            "bodyPreview": null
        });

        let message: Message = serde_json::from_value(payload).unwrap();
        assert_eq!(message.subject, "");
        assert_eq!(message.body_preview, "");
        assert_eq!(message.sender_address(), "");
        assert!(message.body.is_none());
        assert!(!message.is_read);
    }

    #[test]
    fn test_folder_deserializes_optional_counts() {
        let folder: Folder = serde_json::from_value(json!({
            "id": "f1",
            "displayName": "Inbox"
        }))
        .unwrap();
        assert_eq!(folder.display_name, "Inbox");
        assert_eq!(folder.parent_folder_id, None);
        assert_eq!(folder.total_item_count, None);
    }

    #[test]
    fn test_lead_decision_accepts_snake_case_alias() {
        let decision: LeadDecision =
            serde_json::from_str(r#"{"is_lead": true, "reasoning": "asks for a quote"}"#).unwrap();
        assert!(decision.is_lead);
        assert_eq!(decision.summary, None);
    }

    #[test]
    fn test_stats_record_and_display() {
        let mut stats = ProcessingStats::default();
        stats.record(&Ok(MessageOutcome {
            is_lead: true,
            dry_run: false,
            archived_id: Some("new-id".to_string()),
        }));
        stats.record(&Ok(MessageOutcome {
            is_lead: false,
            dry_run: true,
            archived_id: None,
        }));
        stats.record(&Err(LeadMachineError::Classifier(
            ClassifierError::InvalidResponse("garbage".to_string()),
        )));

        assert_eq!(stats.total_processed, 2);
        assert_eq!(stats.leads_forwarded, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.to_string(), "Processed: 2, Leads: 1, Errors: 1");
    }

    #[test]
    fn test_stats_merge() {
        let mut total = ProcessingStats::default();
        total.merge(&ProcessingStats {
            total_processed: 3,
            leads_forwarded: 1,
            errors: 0,
        });
        total.merge(&ProcessingStats {
            total_processed: 1,
            leads_forwarded: 0,
            errors: 2,
        });
        assert_eq!(
            total,
            ProcessingStats {
                total_processed: 4,
                leads_forwarded: 1,
                errors: 2
            }
        );
    }
}
