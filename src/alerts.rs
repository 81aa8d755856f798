//! Best-effort forwarding of serious security events to an external sink.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::metrics::SecurityEvent;

const FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

/// Cheap handle the security monitor pushes events into.
#[derive(Clone)]
pub struct AlertSender {
    tx: mpsc::UnboundedSender<SecurityEvent>,
}

impl AlertSender {
    /// A sender plus the raw receiving end, for callers that drain it themselves.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SecurityEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue an event for forwarding. Never fails; a closed sink is logged.
    pub fn forward(&self, event: &SecurityEvent) {
        if let Err(e) = self.tx.send(event.clone()) {
            warn!(id = %e.0.id, "security alert sink is closed, dropping alert");
        }
    }
}

/// Spawn the task that POSTs every queued event to `url` as JSON.
pub fn spawn_forwarder(url: String, client: reqwest::Client) -> (AlertSender, JoinHandle<()>) {
    let (sender, rx) = AlertSender::channel();
    let handle = tokio::spawn(run(rx, url, client));
    (sender, handle)
}

async fn run(mut rx: mpsc::UnboundedReceiver<SecurityEvent>, url: String, client: reqwest::Client) {
    while let Some(event) = rx.recv().await {
        let result = client
            .post(&url)
            .timeout(FORWARD_TIMEOUT)
            .json(&event)
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(_) => debug!(id = %event.id, "forwarded security alert"),
            Err(e) => warn!(id = %event.id, error = %e, "failed to forward security alert"),
        }
    }
}
