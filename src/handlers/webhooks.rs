use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::email::{payment_receipt, EmailOutcome};
use crate::metrics::now_ms;
use crate::metrics::security::{NewSecurityEvent, SecurityCategory, Severity};
use crate::middleware::QueryTiming;
use crate::payments::{PaymentRecord, Transition, WebhookEnvelope, WebhookEvent};
use crate::signature;
use crate::AppState;

use super::{client_ip, AppError};

const SIGNATURE_HEADER: &str = "x-razorpay-signature";
const EVENT_ID_HEADER: &str = "x-razorpay-event-id";

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Processed,
    AlreadyProcessed,
    Stale,
    Duplicate,
    Ignored,
    InvalidPayload,
    Error,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: WebhookStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<Transition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailOutcome>,
}

impl WebhookResponse {
    fn status(status: WebhookStatus) -> Self {
        Self {
            status,
            event: None,
            transition: None,
            email: None,
        }
    }
}

// ─── POST /api/webhooks/razorpay ─────────────────────────────────
/// Authenticated by an HMAC-SHA256 of the raw body. Once the signature
/// checks out the gateway always gets a 200 so it does not retry a
/// delivery we have already decided about.

pub async fn razorpay_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let Some(secret) = state.config.razorpay_webhook_secret.as_deref() else {
        return Err(AppError::Config("RAZORPAY_WEBHOOK_SECRET is not set".into()));
    };

    let presented = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !signature::verify(secret, &body, presented) {
        let reason = if presented.is_empty() {
            "missing webhook signature"
        } else {
            "webhook signature mismatch"
        };
        state.security.record_event(
            NewSecurityEvent::new(
                SecurityCategory::SuspiciousActivity,
                Severity::High,
                client_ip(&headers),
                reason,
            )
            .with_metadata("endpoint", "/api/webhooks/razorpay"),
        );
        return Err(AppError::InvalidSignature);
    }

    let envelope: WebhookEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "webhook body is not a valid envelope");
            return Ok(Json(WebhookResponse::status(WebhookStatus::InvalidPayload)).into_response());
        }
    };

    let event_id = headers
        .get(EVENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|id| !id.is_empty())
        .map(str::to_owned);

    let started = Instant::now();
    let (outcome, claimed) = process(&state, &envelope, event_id.as_deref()).await;
    let db_ms = started.elapsed().as_secs_f64() * 1000.0;

    // A delivery that failed part-way must be retryable
    if claimed && matches!(outcome.status, WebhookStatus::Error | WebhookStatus::InvalidPayload) {
        if let Some(id) = &event_id {
            if let Err(e) = state.payments.release_event(id).await {
                warn!(event_id = %id, error = %e, "failed to release webhook event id");
            }
        }
    }

    let mut response = Json(outcome).into_response();
    response.extensions_mut().insert(QueryTiming {
        db_ms: Some(db_ms),
        cache_hit: None,
    });
    Ok(response)
}

/// Apply a verified delivery. Returns the outcome and whether this call
/// claimed the event id.
async fn process(
    state: &AppState,
    envelope: &WebhookEnvelope,
    event_id: Option<&str>,
) -> (WebhookResponse, bool) {
    let mut claimed = false;
    if let Some(id) = event_id {
        match state.payments.claim_event(id).await {
            Ok(true) => claimed = true,
            Ok(false) => {
                info!(event_id = id, "duplicate webhook delivery");
                return (WebhookResponse::status(WebhookStatus::Duplicate), false);
            }
            // Without the store we cannot dedupe; the status ledger still
            // refuses to move terminal payments
            Err(e) => warn!(event_id = id, error = %e, "webhook dedupe unavailable"),
        }
    }

    let event = WebhookEvent::parse(&envelope.event);
    if event.target_status().is_none() {
        info!(event = %envelope.event, "ignoring webhook event");
        let mut outcome = WebhookResponse::status(WebhookStatus::Ignored);
        outcome.event = Some(envelope.event.clone());
        return (outcome, claimed);
    }

    let Some(record) = PaymentRecord::from_webhook(envelope, now_ms()) else {
        warn!(event = %envelope.event, "webhook payload lacks its entity");
        let mut outcome = WebhookResponse::status(WebhookStatus::InvalidPayload);
        outcome.event = Some(envelope.event.clone());
        return (outcome, claimed);
    };

    let transition = match state.payments.apply(&record).await {
        Ok(transition) => transition,
        Err(e) => {
            error!(payment = %record.id, event = %envelope.event, error = %e, "failed to store payment status");
            let mut outcome = WebhookResponse::status(WebhookStatus::Error);
            outcome.event = Some(envelope.event.clone());
            return (outcome, claimed);
        }
    };

    let status = match transition {
        Transition::Applied { .. } => WebhookStatus::Processed,
        Transition::Unchanged { .. } => WebhookStatus::AlreadyProcessed,
        Transition::Stale { .. } => WebhookStatus::Stale,
    };
    info!(payment = %record.id, event = %envelope.event, ?transition, "webhook applied");

    let email = match (&event, &transition) {
        (WebhookEvent::PaymentCaptured, Transition::Applied { .. }) => {
            send_receipt(state, envelope).await
        }
        _ => None,
    };

    let outcome = WebhookResponse {
        status,
        event: Some(envelope.event.clone()),
        transition: Some(transition),
        email,
    };
    (outcome, claimed)
}

async fn send_receipt(state: &AppState, envelope: &WebhookEnvelope) -> Option<EmailOutcome> {
    let payment = &envelope.payload.payment.as_ref()?.entity;
    let to = payment.email.as_deref().filter(|e| !e.is_empty())?;

    let message = payment_receipt(
        state.mailer.from_address(),
        to,
        &payment.id,
        payment.amount,
        &payment.currency,
    );
    let outcome = state.mailer.send(message).await;
    if !outcome.sent {
        warn!(payment = %payment.id, error = ?outcome.error, "receipt email not sent");
    }
    Some(outcome)
}
