//! Payment gateway webhook payloads and the idempotent status ledger.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::{KvStore, StoreError};

/// How long a delivered webhook event id is remembered.
pub const EVENT_DEDUPE_TTL: Duration = Duration::from_secs(24 * 3_600);

// ─── Webhook payload ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    PaymentAuthorized,
    PaymentCaptured,
    PaymentFailed,
    OrderPaid,
    Other(String),
}

impl WebhookEvent {
    pub fn parse(name: &str) -> Self {
        match name {
            "payment.authorized" => Self::PaymentAuthorized,
            "payment.captured" => Self::PaymentCaptured,
            "payment.failed" => Self::PaymentFailed,
            "order.paid" => Self::OrderPaid,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Status a recognised event moves its payment to.
    pub fn target_status(&self) -> Option<PaymentStatus> {
        match self {
            Self::PaymentAuthorized => Some(PaymentStatus::Authorized),
            Self::PaymentCaptured => Some(PaymentStatus::Captured),
            Self::PaymentFailed => Some(PaymentStatus::Failed),
            Self::OrderPaid => Some(PaymentStatus::Paid),
            Self::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    #[serde(default)]
    pub payload: WebhookPayload,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub payment: Option<Entity<PaymentEntity>>,
    #[serde(default)]
    pub order: Option<Entity<OrderEntity>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Entity<T> {
    pub entity: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    /// Minor units (paise)
    #[serde(default)]
    pub amount: u64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderEntity {
    pub id: String,
    #[serde(default)]
    pub amount: u64,
    #[serde(default)]
    pub currency: String,
}

// ─── Status ledger ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Created,
    Authorized,
    Failed,
    Captured,
    Paid,
}

impl PaymentStatus {
    /// Terminal states are never left once reached.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Captured | Self::Paid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Payment id, or order id for order-level events
    pub id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    pub status: PaymentStatus,
    pub amount: u64,
    pub currency: String,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub last_event: String,
    pub updated_at: i64,
}

impl PaymentRecord {
    /// Build the record a recognised webhook event describes, if the
    /// payload carries the entity that event needs.
    pub fn from_webhook(envelope: &WebhookEnvelope, now_ms: i64) -> Option<Self> {
        let event = WebhookEvent::parse(&envelope.event);
        let status = event.target_status()?;

        match event {
            WebhookEvent::OrderPaid => {
                let order = &envelope.payload.order.as_ref()?.entity;
                Some(Self {
                    id: order.id.clone(),
                    order_id: Some(order.id.clone()),
                    status,
                    amount: order.amount,
                    currency: order.currency.clone(),
                    failure_reason: None,
                    last_event: envelope.event.clone(),
                    updated_at: now_ms,
                })
            }
            _ => {
                let payment = &envelope.payload.payment.as_ref()?.entity;
                Some(Self {
                    id: payment.id.clone(),
                    order_id: payment.order_id.clone(),
                    status,
                    amount: payment.amount,
                    currency: payment.currency.clone(),
                    failure_reason: payment.error_description.clone(),
                    last_event: envelope.event.clone(),
                    updated_at: now_ms,
                })
            }
        }
    }
}

/// What applying a webhook did to the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Transition {
    Applied {
        from: Option<PaymentStatus>,
        to: PaymentStatus,
    },
    /// The record already has this status
    Unchanged { status: PaymentStatus },
    /// The record is terminal and the event would move it elsewhere
    Stale { current: PaymentStatus },
}

/// Payment statuses kept in the key-value store.
#[derive(Clone)]
pub struct PaymentLedger {
    store: Arc<dyn KvStore>,
}

impl PaymentLedger {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn record_key(id: &str) -> String {
        format!("payment:{id}")
    }

    fn event_key(event_id: &str) -> String {
        format!("webhook_event:{event_id}")
    }

    pub async fn get(&self, id: &str) -> Result<Option<PaymentRecord>, StoreError> {
        match self.store.get(&Self::record_key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Move the stored record to `next.status`, unless it already has that
    /// status or sits in a terminal state.
    pub async fn apply(&self, next: &PaymentRecord) -> Result<Transition, StoreError> {
        let current = self.get(&next.id).await?;
        let from = current.as_ref().map(|r| r.status);

        match from {
            Some(status) if status == next.status => return Ok(Transition::Unchanged { status }),
            Some(status) if status.is_terminal() => return Ok(Transition::Stale { current: status }),
            _ => {}
        }

        let raw = serde_json::to_string(next)?;
        self.store.set(&Self::record_key(&next.id), &raw, None).await?;
        Ok(Transition::Applied {
            from,
            to: next.status,
        })
    }

    /// Remember a delivery id. Returns false when it was seen before.
    pub async fn claim_event(&self, event_id: &str) -> Result<bool, StoreError> {
        self.store
            .set_if_absent(&Self::event_key(event_id), "1", EVENT_DEDUPE_TTL)
            .await
    }

    /// Forget a delivery id so a redelivery is processed again.
    pub async fn release_event(&self, event_id: &str) -> Result<(), StoreError> {
        self.store.delete(&Self::event_key(event_id)).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn envelope(json: &str) -> WebhookEnvelope {
        serde_json::from_str(json).unwrap()
    }

    fn captured() -> WebhookEnvelope {
        envelope(
            r#"{"event":"payment.captured","payload":{"payment":{"entity":{
                "id":"pay_1","order_id":"order_1","amount":49900,"currency":"INR",
                "email":"member@example.org"}}}}"#,
        )
    }

    fn ledger() -> PaymentLedger {
        PaymentLedger::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn recognises_gateway_events() {
        assert_eq!(WebhookEvent::parse("payment.captured"), WebhookEvent::PaymentCaptured);
        assert_eq!(WebhookEvent::parse("order.paid"), WebhookEvent::OrderPaid);
        assert_eq!(
            WebhookEvent::parse("refund.created"),
            WebhookEvent::Other("refund.created".into())
        );
        assert_eq!(WebhookEvent::parse("refund.created").target_status(), None);
    }

    #[test]
    fn record_from_payment_and_order_events() {
        let rec = PaymentRecord::from_webhook(&captured(), 7).unwrap();
        assert_eq!(rec.id, "pay_1");
        assert_eq!(rec.order_id.as_deref(), Some("order_1"));
        assert_eq!(rec.status, PaymentStatus::Captured);
        assert_eq!(rec.amount, 49_900);

        let paid = envelope(
            r#"{"event":"order.paid","payload":{"order":{"entity":{"id":"order_1","amount":100,"currency":"INR"}}}}"#,
        );
        let rec = PaymentRecord::from_webhook(&paid, 7).unwrap();
        assert_eq!(rec.id, "order_1");
        assert_eq!(rec.status, PaymentStatus::Paid);

        let missing = envelope(r#"{"event":"payment.failed","payload":{}}"#);
        assert!(PaymentRecord::from_webhook(&missing, 7).is_none());
    }

    #[tokio::test]
    async fn apply_is_idempotent() {
        let ledger = ledger();
        let rec = PaymentRecord::from_webhook(&captured(), 1).unwrap();

        assert_eq!(
            ledger.apply(&rec).await.unwrap(),
            Transition::Applied {
                from: None,
                to: PaymentStatus::Captured
            }
        );
        assert_eq!(
            ledger.apply(&rec).await.unwrap(),
            Transition::Unchanged {
                status: PaymentStatus::Captured
            }
        );
        assert_eq!(ledger.get("pay_1").await.unwrap().unwrap().status, PaymentStatus::Captured);
    }

    #[tokio::test]
    async fn terminal_status_is_never_left() {
        let ledger = ledger();
        let mut rec = PaymentRecord::from_webhook(&captured(), 1).unwrap();
        ledger.apply(&rec).await.unwrap();

        rec.status = PaymentStatus::Authorized;
        assert_eq!(
            ledger.apply(&rec).await.unwrap(),
            Transition::Stale {
                current: PaymentStatus::Captured
            }
        );
        assert_eq!(ledger.get("pay_1").await.unwrap().unwrap().status, PaymentStatus::Captured);
    }

    #[tokio::test]
    async fn failed_payment_can_still_be_captured() {
        let ledger = ledger();
        let mut rec = PaymentRecord::from_webhook(&captured(), 1).unwrap();
        rec.status = PaymentStatus::Failed;
        ledger.apply(&rec).await.unwrap();

        rec.status = PaymentStatus::Captured;
        assert!(matches!(
            ledger.apply(&rec).await.unwrap(),
            Transition::Applied {
                from: Some(PaymentStatus::Failed),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn event_ids_are_claimed_once() {
        let ledger = ledger();
        assert!(ledger.claim_event("evt_1").await.unwrap());
        assert!(!ledger.claim_event("evt_1").await.unwrap());
        ledger.release_event("evt_1").await.unwrap();
        assert!(ledger.claim_event("evt_1").await.unwrap());
    }
}
