//! Mailbox REST client for the Graph mail API

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::TokenProvider;
use crate::error::{truncate_body, ApiError, LeadMachineError, Result};
use crate::models::{Folder, Message, Recipient};

/// Default API root
pub const DEFAULT_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Well-known folder name for sent mail
pub const SENT_ITEMS: &str = "sentitems";

const FOLDER_SELECT_FIELDS: &str = "id,displayName,parentFolderId,totalItemCount,unreadItemCount";
const MESSAGE_SELECT_FIELDS: &str = "id,subject,from,receivedDateTime,body,bodyPreview,isRead";
const FOLDER_PAGE_SIZE: &str = "50";

/// Longest server body kept in an error message
const ERROR_BODY_MAX_CHARS: usize = 500;

/// Trait defining mailbox operations for easier testing
#[async_trait]
pub trait MailboxClient: Send + Sync {
    /// List top-level mail folders
    async fn list_folders(&self) -> Result<Vec<Folder>>;

    /// List the direct children of a folder
    async fn list_child_folders(&self, parent_id: &str) -> Result<Vec<Folder>>;

    /// List up to `limit` messages, newest first. Accepts well-known names such as `sentitems`.
    async fn list_messages(&self, folder_id: &str, limit: usize) -> Result<Vec<Message>>;

    /// Move a message and return its new id
    async fn move_message(&self, message_id: &str, destination_id: &str) -> Result<String>;

    /// Forward a message with a comment to the given recipients
    async fn forward_message(
        &self,
        message_id: &str,
        recipients: &[String],
        comment: &str,
    ) -> Result<()>;

    /// Create a child folder. A 409 means a folder with that name already exists.
    async fn create_child_folder(&self, parent_id: &str, display_name: &str) -> Result<Folder>;
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MoveRequest<'a> {
    destination_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct MovedMessage {
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ForwardRequest<'a> {
    comment: &'a str,
    to_recipients: Vec<Recipient>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateFolderRequest<'a> {
    display_name: &'a str,
}

/// Production client talking to `{api_base}/users/{mailbox}`
pub struct GraphMailboxClient {
    http: reqwest::Client,
    tokens: TokenProvider,
    base_url: String,
}

impl GraphMailboxClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `tokens` - Token provider used for every request
    /// * `api_base` - API root, e.g. `https://graph.microsoft.com/v1.0`
    /// * `mailbox` - Mailbox user principal name
    /// * `timeout` - Per-request timeout
    pub fn new(
        tokens: TokenProvider,
        api_base: &str,
        mailbox: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::InvalidResponse(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            tokens,
            base_url: format!("{}/users/{}", api_base.trim_end_matches('/'), mailbox),
        })
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> std::result::Result<Url, ApiError> {
        let raw = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut url = Url::parse(&raw).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", raw, e)))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Execute an authenticated request and return the raw response body
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
    ) -> Result<String> {
        let url = self.url(path, query)?;
        let token = self.tokens.get_token().await?;

        debug!("{} {}", method, url.path());

        let mut request = self
            .http
            .request(method.clone(), url)
            .bearer_auth(token.expose_secret());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(e, &method, path))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(e, &method, path))?;

        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                self.tokens.invalidate().await;
            }
            warn!("{} {} failed with status {}", method, path, status.as_u16());
            return Err(ApiError::RequestFailed {
                status: status.as_u16(),
                message: truncate_body(&text, ERROR_BODY_MAX_CHARS),
            }
            .into());
        }

        Ok(text)
    }

    /// Execute an authenticated request and decode the JSON response
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
    ) -> Result<T> {
        let text = self.send(method, path, query, body).await?;
        serde_json::from_str(&text).map_err(|e| {
            LeadMachineError::from(ApiError::InvalidResponse(format!(
                "failed to decode response from {}: {}",
                path, e
            )))
        })
    }

    /// Execute an authenticated request whose success response carries no payload
    pub async fn request_no_content(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<()> {
        self.send(method, path, &[], body).await.map(|_| ())
    }

    async fn list_folder_page(&self, path: &str) -> Result<Vec<Folder>> {
        let page: Page<Folder> = self
            .request(
                Method::GET,
                path,
                &[("$select", FOLDER_SELECT_FIELDS), ("$top", FOLDER_PAGE_SIZE)],
                None,
            )
            .await?;
        if page.next_link.is_some() {
            debug!("{} has more than {} folders, ignoring the rest", path, FOLDER_PAGE_SIZE);
        }
        Ok(page.value)
    }
}

fn transport_error(error: reqwest::Error, method: &Method, path: &str) -> ApiError {
    if error.is_timeout() {
        ApiError::Timeout(format!("{} {}", method, path))
    } else {
        ApiError::InvalidResponse(format!("{} {}: {}", method, path, error))
    }
}

fn to_json<T: Serialize>(value: &T) -> std::result::Result<serde_json::Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl MailboxClient for GraphMailboxClient {
    async fn list_folders(&self) -> Result<Vec<Folder>> {
        self.list_folder_page("mailFolders").await
    }

    async fn list_child_folders(&self, parent_id: &str) -> Result<Vec<Folder>> {
        self.list_folder_page(&format!("mailFolders/{}/childFolders", parent_id))
            .await
    }

    async fn list_messages(&self, folder_id: &str, limit: usize) -> Result<Vec<Message>> {
        let top = limit.to_string();
        let page: Page<Message> = self
            .request(
                Method::GET,
                &format!("mailFolders/{}/messages", folder_id),
                &[
                    ("$select", MESSAGE_SELECT_FIELDS),
                    ("$top", top.as_str()),
                    ("$orderby", "receivedDateTime DESC"),
                ],
                None,
            )
            .await?;
        debug!("Fetched {} messages from folder {}", page.value.len(), folder_id);
        Ok(page.value)
    }

    async fn move_message(&self, message_id: &str, destination_id: &str) -> Result<String> {
        let body = to_json(&MoveRequest { destination_id })?;
        let moved: MovedMessage = self
            .request(
                Method::POST,
                &format!("messages/{}/move", message_id),
                &[],
                Some(&body),
            )
            .await?;
        Ok(moved.id)
    }

    async fn forward_message(
        &self,
        message_id: &str,
        recipients: &[String],
        comment: &str,
    ) -> Result<()> {
        let body = to_json(&ForwardRequest {
            comment,
            to_recipients: recipients.iter().map(Recipient::new).collect(),
        })?;
        self.request_no_content(
            Method::POST,
            &format!("messages/{}/forward", message_id),
            Some(&body),
        )
        .await
    }

    async fn create_child_folder(&self, parent_id: &str, display_name: &str) -> Result<Folder> {
        let body = to_json(&CreateFolderRequest { display_name })?;
        self.request(
            Method::POST,
            &format!("mailFolders/{}/childFolders", parent_id),
            &[],
            Some(&body),
        )
        .await
    }
}

// Forward through Arc so one client can be shared by the pipeline and the CLI
#[async_trait]
impl<T: MailboxClient + ?Sized> MailboxClient for Arc<T> {
    async fn list_folders(&self) -> Result<Vec<Folder>> {
        self.as_ref().list_folders().await
    }

    async fn list_child_folders(&self, parent_id: &str) -> Result<Vec<Folder>> {
        self.as_ref().list_child_folders(parent_id).await
    }

    async fn list_messages(&self, folder_id: &str, limit: usize) -> Result<Vec<Message>> {
        self.as_ref().list_messages(folder_id, limit).await
    }

    async fn move_message(&self, message_id: &str, destination_id: &str) -> Result<String> {
        self.as_ref().move_message(message_id, destination_id).await
    }

    async fn forward_message(
        &self,
        message_id: &str,
        recipients: &[String],
        comment: &str,
    ) -> Result<()> {
        self.as_ref()
            .forward_message(message_id, recipients, comment)
            .await
    }

    async fn create_child_folder(&self, parent_id: &str, display_name: &str) -> Result<Folder> {
        self.as_ref().create_child_folder(parent_id, display_name).await
    }
}
