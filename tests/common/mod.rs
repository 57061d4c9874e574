//! Common test utilities and fixtures

#![allow(dead_code)]

use chrono::{Duration, TimeZone, Utc};
use leadmachine::classifier::LeadClassifier;
use leadmachine::client::MailboxClient;
use leadmachine::error::Result;
use leadmachine::models::{
    BodyContentType, EmailAddress, Folder, LeadDecision, Message, MessageBody, Recipient,
};
use mockall::mock;
use serde_json::json;

pub const INBOX_ID: &str = "inbox-id";
pub const SOURCE_ID: &str = "leadmachine-id";
pub const ARCHIVE_ID: &str = "processed-id";

/// Create a folder with no counts
pub fn create_test_folder(id: &str, name: &str) -> Folder {
    Folder {
        id: id.to_string(),
        display_name: name.to_string(),
        parent_folder_id: None,
        total_item_count: None,
        unread_item_count: None,
    }
}

/// Create a test message; a higher `age_minutes` means an older message
pub fn create_test_message(id: &str, sender: &str, subject: &str, age_minutes: i64) -> Message {
    let base = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
    Message {
        id: id.to_string(),
        subject: subject.to_string(),
        from: Some(Recipient {
            email_address: EmailAddress {
                address: sender.to_string(),
                name: None,
            },
        }),
        received_date_time: base - Duration::minutes(age_minutes),
        body_preview: format!("Preview of {}", subject),
        body: Some(MessageBody {
            content_type: BodyContentType::Html,
            content: format!("<p>{}</p>", subject),
        }),
        is_read: false,
    }
}

/// Create `count` messages ordered newest first, with ids `msg-0`, `msg-1`, ...
pub fn create_test_messages(count: usize) -> Vec<Message> {
    (0..count)
        .map(|i| {
            create_test_message(
                &format!("msg-{}", i),
                "someone@example.com",
                &format!("Message {}", i),
                i as i64 * 10,
            )
        })
        .collect()
}

pub fn lead_decision(reasoning: &str) -> LeadDecision {
    LeadDecision {
        is_lead: true,
        reasoning: reasoning.to_string(),
        summary: Some("Potential customer".to_string()),
    }
}

pub fn no_lead_decision(reasoning: &str) -> LeadDecision {
    LeadDecision {
        is_lead: false,
        reasoning: reasoning.to_string(),
        summary: None,
    }
}

/// Expect the standard Inbox → leadmachine → processed topology to be listed once
pub fn expect_topology(mock: &mut MockMailboxClient) {
    mock.expect_list_folders().times(1).returning(|| {
        Ok(vec![
            create_test_folder("drafts-id", "Drafts"),
            create_test_folder(INBOX_ID, "Inbox"),
        ])
    });
    mock.expect_list_child_folders()
        .withf(|parent| parent == INBOX_ID)
        .times(1)
        .returning(|_| Ok(vec![create_test_folder(SOURCE_ID, "LeadMachine")]));
    mock.expect_list_child_folders()
        .withf(|parent| parent == SOURCE_ID)
        .times(1)
        .returning(|_| Ok(vec![create_test_folder(ARCHIVE_ID, "Processed")]));
}

/// Graph-style JSON for a message
pub fn graph_message_json(id: &str, subject: &str, body: &str, received: &str) -> serde_json::Value {
    json!({
        "id": id,
        "subject": subject,
        "from": { "emailAddress": { "address": "prospect@example.com", "name": "Prospect" } },
        "receivedDateTime": received,
        "bodyPreview": body,
        "body": { "contentType": "html", "content": format!("<p>{}</p>", body) },
        "isRead": false
    })
}

/// Token endpoint response
pub fn token_json(token: &str) -> serde_json::Value {
    json!({
        "token_type": "Bearer",
        "expires_in": 3600,
        "access_token": token
    })
}

// Mock implementation of MailboxClient for testing
mock! {
    pub MailboxClient {}

    #[async_trait::async_trait]
    impl MailboxClient for MailboxClient {
        async fn list_folders(&self) -> Result<Vec<Folder>>;
        async fn list_child_folders(&self, parent_id: &str) -> Result<Vec<Folder>>;
        async fn list_messages(&self, folder_id: &str, limit: usize) -> Result<Vec<Message>>;
        async fn move_message(&self, message_id: &str, destination_id: &str) -> Result<String>;
        async fn forward_message(
            &self,
            message_id: &str,
            recipients: &[String],
            comment: &str,
        ) -> Result<()>;
        async fn create_child_folder(&self, parent_id: &str, display_name: &str) -> Result<Folder>;
    }
}

// Mock implementation of LeadClassifier for testing
mock! {
    pub LeadClassifier {}

    #[async_trait::async_trait]
    impl LeadClassifier for LeadClassifier {
        async fn classify(&self, message: &Message) -> Result<LeadDecision>;
        fn backend_name(&self) -> &'static str;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_messages_newest_first() {
        let messages = create_test_messages(3);
        assert_eq!(messages[0].id, "msg-0");
        assert!(messages[0].received_date_time > messages[1].received_date_time);
        assert!(messages[1].received_date_time > messages[2].received_date_time);
    }

    #[test]
    fn test_graph_message_json_deserializes() {
        let message: Message = serde_json::from_value(graph_message_json(
            "m1",
            "Hello",
            "body",
            "2025-03-01T12:00:00Z",
        ))
        .unwrap();
        assert_eq!(message.sender_address(), "prospect@example.com");
    }
}
