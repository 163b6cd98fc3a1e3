use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("email request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("email provider rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("email circuit breaker is open")]
    CircuitOpen,

    #[error("notification timed out")]
    Timeout,

    #[error("could not prepare attachment: {0}")]
    Attachment(String),

    #[error("recipient {0} not found")]
    RecipientNotFound(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub name: String,
    pub address: String,
}

impl Mailbox {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    /// Shared across every recipient of one fan-out.
    pub content: Arc<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub from: Mailbox,
    pub to: Mailbox,
    pub subject: String,
    pub html_body: String,
    pub attachment: Option<EmailAttachment>,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError>;
}
