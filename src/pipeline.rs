//! Lead processing pipeline
//!
//! Resolves the folder topology once per instance, then runs
//! classify → forward → archive over the newest messages in the source
//! folder. Per-message failures are counted and never abort a run.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::classifier::LeadClassifier;
use crate::client::{MailboxClient, SENT_ITEMS};
use crate::config::FolderConfig;
use crate::error::{FolderError, LeadMachineError, Result};
use crate::models::{
    Folder, LeadDecision, MailboxStatus, Message, MessageOutcome, ProcessingStats,
    ResolvedFolders,
};

/// First line of every forwarded lead comment
pub const FORWARD_MARKER: &str = "=== LEAD ANALYSIS ===";

/// Messages considered by a restore
pub const RESTORE_SNAPSHOT_SIZE: usize = 50;

/// Sent Items scanned by the status report
pub const SENT_ITEMS_SCAN_SIZE: usize = 10;

pub const DEFAULT_PROCESS_LIMIT: usize = 50;

/// Build the comment attached to a forwarded lead
pub fn build_forward_comment(decision: &LeadDecision) -> String {
    let mut comment = format!(
        "{}\n\nThis message was classified as a potential lead.\n\nReason: {}\n",
        FORWARD_MARKER, decision.reasoning
    );
    if let Some(summary) = &decision.summary {
        comment.push_str(&format!("Summary: {}\n", summary));
    }
    comment.push_str("\n=== ORIGINAL EMAIL BELOW ===");
    comment
}

/// Result of [`LeadPipeline::ensure_folders`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderSetup {
    pub folders: ResolvedFolders,
    /// Display names of folders created by this call
    pub created: Vec<String>,
}

fn find_exact<'a>(folders: &'a [Folder], name: &str) -> Option<&'a Folder> {
    folders.iter().find(|f| f.display_name == name)
}

fn find_ignore_case<'a>(folders: &'a [Folder], name: &str) -> Option<&'a Folder> {
    folders
        .iter()
        .find(|f| f.display_name.to_lowercase() == name.to_lowercase())
}

pub struct LeadPipeline {
    client: Arc<dyn MailboxClient>,
    classifier: Option<Arc<dyn LeadClassifier>>,
    folders: FolderConfig,
    recipients: Vec<String>,
    default_limit: usize,
    resolved: Mutex<Option<ResolvedFolders>>,
}

impl LeadPipeline {
    /// Create a pipeline that can resolve, set up, report on and restore folders.
    /// Processing additionally needs [`LeadPipeline::with_classifier`].
    pub fn new(client: Arc<dyn MailboxClient>, folders: FolderConfig) -> Self {
        Self {
            client,
            classifier: None,
            folders,
            recipients: Vec::new(),
            default_limit: DEFAULT_PROCESS_LIMIT,
            resolved: Mutex::new(None),
        }
    }

    /// Attach the classifier and the addresses leads are forwarded to
    pub fn with_classifier(
        mut self,
        classifier: Arc<dyn LeadClassifier>,
        recipients: Vec<String>,
    ) -> Self {
        self.classifier = Some(classifier);
        self.recipients = recipients;
        self
    }

    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    /// Find the inbox, source and archive folders and their current counts
    async fn lookup_folders(&self) -> Result<(Folder, Folder, Folder)> {
        debug!("Resolving pipeline folders");

        let top_level = self.client.list_folders().await?;
        let inbox = find_exact(&top_level, &self.folders.inbox)
            .cloned()
            .ok_or(FolderError::InboxNotFound)?;

        let inbox_children = self.client.list_child_folders(&inbox.id).await?;
        let source = find_ignore_case(&inbox_children, &self.folders.source)
            .cloned()
            .ok_or(FolderError::LeadmachineFolderNotFound)?;

        let source_children = self.client.list_child_folders(&source.id).await?;
        let archive = find_ignore_case(&source_children, &self.folders.archive)
            .cloned()
            .ok_or(FolderError::ProcessedFolderNotFound)?;

        Ok((inbox, source, archive))
    }

    /// Resolve folder ids, hitting the service only on the first call
    pub async fn resolve_folders(&self) -> Result<ResolvedFolders> {
        let mut cache = self.resolved.lock().await;
        if let Some(resolved) = cache.as_ref() {
            return Ok(resolved.clone());
        }

        let (inbox, source, archive) = self.lookup_folders().await?;
        let resolved = ResolvedFolders {
            inbox_id: inbox.id,
            source_id: source.id,
            archive_id: archive.id,
        };
        info!(
            "Resolved folders: {} -> {} -> {}",
            self.folders.inbox, self.folders.source, self.folders.archive
        );
        *cache = Some(resolved.clone());
        Ok(resolved)
    }

    /// Classify and route the newest messages in the source folder.
    ///
    /// Folder resolution, the message fetch and authentication failures are
    /// fatal to the run; every other failure is counted against the message
    /// and the run continues.
    pub async fn process_emails(
        &self,
        dry_run: bool,
        limit: Option<usize>,
    ) -> Result<ProcessingStats> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", run_id = %run_id, dry_run);
        self.run_batch(dry_run, limit).instrument(span).await
    }

    async fn run_batch(&self, dry_run: bool, limit: Option<usize>) -> Result<ProcessingStats> {
        let classifier = self.classifier.as_ref().ok_or_else(|| {
            LeadMachineError::ConfigError("no lead classifier configured".to_string())
        })?;

        info!("Starting email processing (dry_run={})", dry_run);
        let folders = self.resolve_folders().await?;

        let limit = limit.unwrap_or(self.default_limit);
        let mut messages = self.client.list_messages(&folders.source_id, limit).await?;
        messages.truncate(limit);
        info!("Found {} emails to process", messages.len());

        let mut stats = ProcessingStats::default();
        for message in &messages {
            let outcome = match self
                .process_message(classifier.as_ref(), message, &folders, dry_run)
                .await
            {
                Err(e) if e.is_fatal_to_run() => {
                    error!(subject = %message.subject, error = %e, "Aborting run");
                    return Err(e);
                }
                other => other,
            };
            match &outcome {
                Ok(result) => info!(
                    subject = %message.subject,
                    is_lead = result.is_lead,
                    "Processed message"
                ),
                Err(e) => error!(subject = %message.subject, error = %e, "Failed to process message"),
            }
            stats.record(&outcome);
        }

        info!("Processing complete. {}", stats);
        Ok(stats)
    }

    async fn process_message(
        &self,
        classifier: &dyn LeadClassifier,
        message: &Message,
        folders: &ResolvedFolders,
        dry_run: bool,
    ) -> Result<MessageOutcome> {
        let decision = classifier.classify(message).await?;

        if decision.is_lead {
            info!(subject = %message.subject, reasoning = %decision.reasoning, "Lead detected");
            let comment = build_forward_comment(&decision);
            if dry_run {
                info!("[dry run] Would forward to {}", self.recipients.join(", "));
            } else {
                self.client
                    .forward_message(&message.id, &self.recipients, &comment)
                    .await?;
            }
        }

        let archived_id = if dry_run {
            None
        } else {
            Some(
                self.client
                    .move_message(&message.id, &folders.archive_id)
                    .await?,
            )
        };

        Ok(MessageOutcome {
            is_lead: decision.is_lead,
            dry_run,
            archived_id,
        })
    }

    /// Move archived messages back to the source folder for reprocessing.
    ///
    /// Works on a snapshot of the newest archived messages: `count` of them
    /// when given, all when `all` is set, otherwise only the newest one.
    /// Returns the number moved; the first failed move aborts the restore.
    pub async fn restore_emails(&self, count: Option<usize>, all: bool) -> Result<usize> {
        info!("Restoring emails from the archive folder");
        let folders = self.resolve_folders().await?;

        let mut messages = self
            .client
            .list_messages(&folders.archive_id, RESTORE_SNAPSHOT_SIZE)
            .await?;

        match count {
            Some(count) => messages.truncate(count),
            None if !all => messages.truncate(1),
            None => {}
        }

        info!("Restoring {} emails", messages.len());
        for message in &messages {
            self.client
                .move_message(&message.id, &folders.source_id)
                .await?;
            info!(subject = %message.subject, "Restored message");
        }

        Ok(messages.len())
    }

    async fn ensure_child(
        &self,
        parent_id: &str,
        name: &str,
        missing: FolderError,
        created: &mut Vec<String>,
    ) -> Result<Folder> {
        let children = self.client.list_child_folders(parent_id).await?;
        if let Some(existing) = find_ignore_case(&children, name) {
            return Ok(existing.clone());
        }

        match self.client.create_child_folder(parent_id, name).await {
            Ok(folder) => {
                info!("Created folder '{}'", name);
                created.push(name.to_string());
                Ok(folder)
            }
            Err(e) if e.is_conflict() => {
                warn!("Folder '{}' already exists, looking it up again", name);
                let children = self.client.list_child_folders(parent_id).await?;
                find_ignore_case(&children, name)
                    .cloned()
                    .ok_or_else(|| missing.into())
            }
            Err(e) => Err(e),
        }
    }

    /// Create the source and archive folders when they are missing
    pub async fn ensure_folders(&self) -> Result<FolderSetup> {
        let top_level = self.client.list_folders().await?;
        let inbox = find_exact(&top_level, &self.folders.inbox)
            .cloned()
            .ok_or(FolderError::InboxNotFound)?;

        let mut created = Vec::new();
        let source = self
            .ensure_child(
                &inbox.id,
                &self.folders.source,
                FolderError::LeadmachineFolderNotFound,
                &mut created,
            )
            .await?;
        let archive = self
            .ensure_child(
                &source.id,
                &self.folders.archive,
                FolderError::ProcessedFolderNotFound,
                &mut created,
            )
            .await?;

        let folders = ResolvedFolders {
            inbox_id: inbox.id,
            source_id: source.id,
            archive_id: archive.id,
        };
        *self.resolved.lock().await = Some(folders.clone());

        Ok(FolderSetup { folders, created })
    }

    /// Report folder counts and how many recent Sent Items are forwarded leads
    pub async fn mailbox_status(&self) -> Result<MailboxStatus> {
        let (inbox, source, archive) = self.lookup_folders().await?;
        *self.resolved.lock().await = Some(ResolvedFolders {
            inbox_id: inbox.id,
            source_id: source.id.clone(),
            archive_id: archive.id.clone(),
        });

        let sent = self
            .client
            .list_messages(SENT_ITEMS, SENT_ITEMS_SCAN_SIZE)
            .await?;
        let recent_forwarded_leads = sent
            .iter()
            .filter(|m| {
                m.body_preview.contains(FORWARD_MARKER)
                    || m.body
                        .as_ref()
                        .is_some_and(|b| b.content.contains(FORWARD_MARKER))
            })
            .count();

        Ok(MailboxStatus {
            source,
            archive,
            recent_forwarded_leads,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_comment_with_summary() {
        let comment = build_forward_comment(&LeadDecision {
            is_lead: true,
            reasoning: "Asks for a configurator".to_string(),
            summary: Some("Manufacturer, 300 variants".to_string()),
        });
        assert!(comment.starts_with(FORWARD_MARKER));
        assert!(comment.contains("Reason: Asks for a configurator"));
        assert!(comment.contains("Summary: Manufacturer, 300 variants"));
        assert!(comment.ends_with("=== ORIGINAL EMAIL BELOW ==="));
    }

    #[test]
    fn test_forward_comment_without_summary() {
        let comment = build_forward_comment(&LeadDecision {
            is_lead: true,
            reasoning: "Quote request".to_string(),
            summary: None,
        });
        assert!(!comment.contains("Summary:"));
    }

    #[test]
    fn test_folder_matching_case_rules() {
        let folders = vec![
            Folder {
                id: "1".to_string(),
                display_name: "inbox".to_string(),
                parent_folder_id: None,
                total_item_count: None,
                unread_item_count: None,
            },
            Folder {
                id: "2".to_string(),
                display_name: "LeadMachine".to_string(),
                parent_folder_id: None,
                total_item_count: None,
                unread_item_count: None,
            },
        ];
        assert!(find_exact(&folders, "Inbox").is_none());
        assert_eq!(
            find_ignore_case(&folders, "leadmachine").map(|f| f.id.as_str()),
            Some("2")
        );
    }
}
