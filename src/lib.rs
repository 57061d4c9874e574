//! LeadMachine
//!
//! Mailbox lead triage: scans a mailbox folder, asks a language model
//! whether each message is a sales lead, forwards leads to stakeholders and
//! archives everything it has looked at.
//!
//! # Overview
//!
//! - **Authentication**: client-credentials tokens with expiry-aware caching
//! - **Mailbox client**: typed folder and message operations over the REST API
//! - **Classification**: hosted or local language model behind one trait
//! - **Pipeline**: folder resolution, classify → forward → archive, restore
//! - **Daemon**: repeating runs with graceful shutdown
//!
//! # Example Usage
//!
//! ```no_run
//! use leadmachine::{cli, config::Requirement};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = cli::load_config("config.toml".as_ref(), Requirement::Pipeline).await?;
//!     let pipeline = cli::build_lead_pipeline(&config).await?;
//!
//!     let stats = pipeline.process_emails(true, Some(10)).await?;
//!     println!("{}", stats);
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - Token acquisition and caching
//! - [`client`] - Mailbox REST client
//! - [`sanitize`] - Message body to prompt text
//! - [`classifier`] - Classifier trait, rubric, prompts and reply parsing
//! - [`llm`] - Hosted and local model backends
//! - [`pipeline`] - Lead processing, restore, setup and status
//! - [`daemon`] - Unattended polling loop
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`models`] - Core data structures

pub mod auth;
pub mod classifier;
pub mod cli;
pub mod client;
pub mod config;
pub mod daemon;
pub mod error;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod sanitize;

// Re-export commonly used types for convenience
pub use error::{LeadMachineError, Result};

// Core data models
pub use models::{
    Folder, LeadDecision, MailboxStatus, Message, MessageOutcome, ProcessingStats,
    ResolvedFolders,
};

// Client and classifier seams
pub use classifier::{LeadClassifier, Rubric};
pub use client::{GraphMailboxClient, MailboxClient};

// Config types
pub use config::{ClassifierBackend, Config, FolderConfig};

// Pipeline
pub use daemon::{run_daemon, DaemonSummary};
pub use pipeline::{FolderSetup, LeadPipeline};

// CLI types (for binary usage)
pub use cli::{Cli, Commands, ProgressReporter};
