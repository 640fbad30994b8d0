pub mod reconciliation;

use crate::services::notifications::NotificationService;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Domain events emitted by the services and consumed by the in-process
/// event loop. Delivery is at-most-once; anything that must survive a
/// crash goes through the reconciliation queue instead.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Event {
    CheckoutLinkIssued {
        recommendation_id: Uuid,
        expires_at: chrono::DateTime<chrono::Utc>,
    },
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        from: String,
        to: String,
    },
    PaymentEventIgnored {
        reason: String,
    },
}

pub type EventSender = mpsc::Sender<Event>;
pub type EventReceiver = mpsc::Receiver<Event>;

pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity)
}

/// Drives notifications off the event stream. Runs until the sender side
/// is dropped.
pub async fn process_events(
    mut rx: EventReceiver,
    notifications: Option<Arc<NotificationService>>,
) {
    info!("Event processor started");
    while let Some(event) = rx.recv().await {
        match event {
            Event::CheckoutLinkIssued {
                recommendation_id,
                expires_at,
            } => {
                debug!(%recommendation_id, %expires_at, "checkout link issued");
            }
            Event::OrderCreated(order_id) => {
                info!(%order_id, "order created");
                if let Some(notifier) = &notifications {
                    if let Err(e) = notifier.notify_order_status(order_id).await {
                        error!(%order_id, error = %e, "order notification failed");
                    }
                }
            }
            Event::OrderStatusChanged { order_id, from, to } => {
                info!(%order_id, %from, %to, "order status changed");
                if let Some(notifier) = &notifications {
                    if let Err(e) = notifier.notify_order_status(order_id).await {
                        error!(%order_id, error = %e, "status notification failed");
                    }
                }
            }
            Event::PaymentEventIgnored { reason } => {
                debug!(%reason, "payment event ignored");
            }
        }
    }
    info!("Event processor stopped");
}
