//! Best-effort buyer notifications.
//!
//! Notifications are dispatched on a spawned task after the store commit, so
//! a failing notifier never affects the operation that triggered it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::TransferId;
use serde::Serialize;
use thiserror::Error;

/// Something a buyer should be told about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    TicketsIssued {
        order_number: String,
        email: String,
        ticket_numbers: Vec<String>,
    },
    TransferOffered {
        transfer_id: TransferId,
        ticket_number: String,
        recipient_email: String,
        expires_at: DateTime<Utc>,
    },
    TransferAccepted {
        ticket_number: String,
        recipient_email: String,
    },
    OrderCancelled {
        order_number: String,
        email: String,
    },
    OrderRefunded {
        order_number: String,
        email: String,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::TicketsIssued { .. } => "tickets_issued",
            Notification::TransferOffered { .. } => "transfer_offered",
            Notification::TransferAccepted { .. } => "transfer_accepted",
            Notification::OrderCancelled { .. } => "order_cancelled",
            Notification::OrderRefunded { .. } => "order_refunded",
        }
    }
}

#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Delivery channel for notifications (email, push, ...).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the structured log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload =
            serde_json::to_string(notification).map_err(|e| NotifyError(e.to_string()))?;
        tracing::info!(kind = notification.kind(), %payload, "Notification dispatched");
        Ok(())
    }
}

/// Keeps every notification in memory for assertions.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the notifications received so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Waits up to a second for at least `count` notifications.
    pub async fn wait_for(&self, count: usize) -> Vec<Notification> {
        for _ in 0..100 {
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification.clone());
        Ok(())
    }
}

/// Sends `notification` in the background, logging failures.
pub fn dispatch(notifier: &Arc<dyn Notifier>, notification: Notification) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&notification).await {
            metrics::counter!("notifications_failed_total", "kind" => notification.kind())
                .increment(1);
            tracing::warn!(kind = notification.kind(), error = %e, "Notification failed");
        }
    });
}
