use thiserror::Error;

/// Type alias for Result with LeadMachineError
pub type Result<T> = std::result::Result<T, LeadMachineError>;

/// Top-level error type for the lead processing pipeline
#[derive(Error, Debug)]
pub enum LeadMachineError {
    /// Token endpoint unreachable or credentials rejected
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Mailbox REST API call failed
    #[error("Mailbox API error: {0}")]
    Api(#[from] ApiError),

    /// Lead classifier backend failed
    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    /// Required mailbox folder is missing
    #[error("Folder error: {0}")]
    Folder(#[from] FolderError),

    /// Configuration missing or invalid
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error (config file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors raised while obtaining a bearer token
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The token endpoint response could not be interpreted
    #[error("Invalid response from authentication server: {0}")]
    InvalidResponse(String),

    /// The token endpoint returned a non-200 status
    #[error("Authentication failed with status code {0}")]
    Failed(u16),
}

/// Errors raised by the mailbox REST client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Request URL could not be built
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Transport failure or a body that could not be decoded
    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    /// Request exceeded the configured timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Server returned a non-2xx status
    #[error("Request failed ({status}): {message}")]
    RequestFailed { status: u16, message: String },
}

/// Errors raised by a lead classifier backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifierError {
    /// Backend could not be reached or initialized
    #[error("Classifier backend unavailable: {0}")]
    Unavailable(String),

    /// Backend output could not be parsed into a decision
    #[error("Invalid classifier response: {0}")]
    InvalidResponse(String),
}

/// Errors raised while resolving the pipeline folders
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FolderError {
    #[error("Inbox folder not found")]
    InboxNotFound,

    #[error("leadmachine folder not found under Inbox")]
    LeadmachineFolderNotFound,

    #[error("processed folder not found under leadmachine")]
    ProcessedFolderNotFound,
}

impl LeadMachineError {
    /// Check if an error raised while handling one message must abort the run.
    ///
    /// Only authentication failures qualify: every later message would hit
    /// the token endpoint again. API and classifier errors stay scoped to
    /// the message that raised them.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(self, LeadMachineError::Auth(_))
    }

    /// Check if the error is a 409 Conflict from the mailbox API
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            LeadMachineError::Api(ApiError::RequestFailed { status: 409, .. })
        )
    }

    /// HTTP status code carried by the error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            LeadMachineError::Auth(AuthError::Failed(status)) => Some(*status),
            LeadMachineError::Api(ApiError::RequestFailed { status, .. }) => Some(*status),
            _ => None,
        }
    }
}

/// Shorten a server response body so it can be logged without flooding output
pub(crate) fn truncate_body(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        format!("{}...", trimmed.chars().take(max_chars).collect::<String>())
    }
}
