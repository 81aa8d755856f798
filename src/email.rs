//! Transactional email. Sending never returns an error: the outcome says
//! whether the message went out, and callers carry on either way.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmailOutcome {
    pub sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EmailOutcome {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            sent: false,
            id: None,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: EmailMessage) -> EmailOutcome;

    /// Default sender address.
    fn from_address(&self) -> &str;
}

/// Sends through the Resend HTTP API.
pub struct ResendMailer {
    client: reqwest::Client,
    api_key: String,
    from: String,
}

impl ResendMailer {
    pub fn new(client: reqwest::Client, api_key: &str, from: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_owned(),
            from: from.to_owned(),
        }
    }
}

#[derive(Deserialize)]
struct ResendReply {
    id: Option<String>,
}

#[async_trait]
impl EmailSender for ResendMailer {
    async fn send(&self, message: EmailMessage) -> EmailOutcome {
        let result = self
            .client
            .post(RESEND_ENDPOINT)
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(&self.api_key)
            .json(&message)
            .send()
            .await
            .and_then(|r| r.error_for_status());

        let reply = match result {
            Ok(r) => r.json::<ResendReply>().await,
            Err(e) => Err(e),
        };

        match reply {
            Ok(reply) => {
                info!(to = ?message.to, subject = %message.subject, "email sent");
                EmailOutcome {
                    sent: true,
                    id: reply.id,
                    error: None,
                }
            }
            Err(e) => {
                warn!(to = ?message.to, subject = %message.subject, error = %e, "email send failed");
                EmailOutcome::failed(e.to_string())
            }
        }
    }

    fn from_address(&self) -> &str {
        &self.from
    }
}

/// Used when no provider is configured: logs the message and reports it unsent.
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: &str) -> Self {
        Self {
            from: from.to_owned(),
        }
    }
}

#[async_trait]
impl EmailSender for LogMailer {
    async fn send(&self, message: EmailMessage) -> EmailOutcome {
        info!(to = ?message.to, subject = %message.subject, "email provider not configured, skipping send");
        EmailOutcome::failed("email provider not configured")
    }

    fn from_address(&self) -> &str {
        &self.from
    }
}

/// Receipt sent after a captured payment.
pub fn payment_receipt(from: &str, to: &str, payment_id: &str, amount_minor: u64, currency: &str) -> EmailMessage {
    let amount = format!("{}.{:02}", amount_minor / 100, amount_minor % 100);
    EmailMessage {
        from: from.to_owned(),
        to: vec![to.to_owned()],
        subject: "Payment received".to_owned(),
        html: format!(
            "<p>Thanks! We received your payment of <strong>{currency} {amount}</strong>.</p>\
             <p>Payment reference: <code>{payment_id}</code></p>"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_mailer_reports_unsent() {
        let mailer = LogMailer::new("noreply@example.org");
        let outcome = mailer
            .send(payment_receipt(mailer.from_address(), "a@b.c", "pay_1", 49_900, "INR"))
            .await;
        assert!(!outcome.sent);
        assert!(outcome.error.is_some());
    }

    #[test]
    fn receipt_formats_minor_units() {
        let msg = payment_receipt("f@x.y", "t@x.y", "pay_9", 123_405, "INR");
        assert!(msg.html.contains("INR 1234.05"));
        assert!(msg.html.contains("pay_9"));
        assert_eq!(msg.to, vec!["t@x.y".to_owned()]);
    }
}
