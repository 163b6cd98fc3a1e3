//! HTTP client for a SendGrid-compatible `/v3/mail/send` endpoint.

use async_trait::async_trait;
use base64::Engine;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::ports::{EmailMessage, EmailSender, Mailbox, NotificationError};

const SEND_PATH: &str = "/v3/mail/send";

#[derive(Clone)]
pub struct HttpEmailSender {
    client: Client,
    base_url: String,
    api_key: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl HttpEmailSender {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self::with_circuit_breaker(base_url, api_key, 5, 60)
    }

    pub fn with_circuit_breaker(
        base_url: String,
        api_key: String,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        Self {
            client,
            base_url,
            api_key,
            circuit_breaker,
        }
    }

    pub fn circuit_state(&self) -> &'static str {
        if self.circuit_breaker.is_call_permitted() {
            "closed"
        } else {
            "open"
        }
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), SEND_PATH);
        let payload = SendRequest::from_message(message);
        let client = self.client.clone();
        let api_key = self.api_key.clone();

        let result = self
            .circuit_breaker
            .call(async move {
                let response = client
                    .post(&url)
                    .bearer_auth(api_key)
                    .json(&payload)
                    .send()
                    .await?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(NotificationError::Rejected {
                        status: status.as_u16(),
                        body,
                    });
                }
                Ok(())
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(FailsafeError::Rejected) => Err(NotificationError::CircuitOpen),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendRequest {
    personalizations: Vec<Personalization>,
    from: Address,
    content: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize)]
struct Personalization {
    to: Vec<Address>,
    subject: String,
}

#[derive(Debug, Serialize)]
struct Address {
    email: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(rename = "type")]
    content_type: &'static str,
    value: String,
}

#[derive(Debug, Serialize)]
struct Attachment {
    content: String,
    filename: String,
    #[serde(rename = "type")]
    content_type: String,
    disposition: &'static str,
}

impl From<&Mailbox> for Address {
    fn from(mailbox: &Mailbox) -> Self {
        Address {
            email: mailbox.address.clone(),
            name: mailbox.name.clone(),
        }
    }
}

impl SendRequest {
    fn from_message(message: &EmailMessage) -> Self {
        let attachments = message
            .attachment
            .iter()
            .map(|a| Attachment {
                content: base64::engine::general_purpose::STANDARD.encode(a.content.as_slice()),
                filename: a.filename.clone(),
                content_type: a.content_type.clone(),
                disposition: "attachment",
            })
            .collect();

        SendRequest {
            personalizations: vec![Personalization {
                to: vec![Address::from(&message.to)],
                subject: message.subject.clone(),
            }],
            from: Address::from(&message.from),
            content: vec![Content {
                content_type: "text/html",
                value: message.html_body.clone(),
            }],
            attachments,
        }
    }
}
