use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Capacity of the in-process domain event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiving end of its channel
    pub fn channel() -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when nobody is listening
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Domain events raised by the checkout and settlement flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    CheckoutCreated {
        checkout_id: Uuid,
        session_id: String,
        buyer_id: Uuid,
        total_minor_units: i64,
        currency: String,
    },
    CheckoutSucceeded {
        checkout_id: Uuid,
        session_id: String,
    },
    CheckoutFailed {
        checkout_id: Uuid,
        session_id: String,
    },
    CheckoutCancelled {
        checkout_id: Uuid,
        session_id: String,
    },
    CheckoutRefunded {
        checkout_id: Uuid,
        session_id: String,
    },
    OrderCreated {
        order_id: Uuid,
        checkout_id: Uuid,
    },
    /// Payment settled but no order could be created
    FulfillmentFailed {
        checkout_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::CheckoutCreated { .. } => "checkout.created",
            Event::CheckoutSucceeded { .. } => "checkout.succeeded",
            Event::CheckoutFailed { .. } => "checkout.failed",
            Event::CheckoutCancelled { .. } => "checkout.cancelled",
            Event::CheckoutRefunded { .. } => "checkout.refunded",
            Event::OrderCreated { .. } => "order.created",
            Event::FulfillmentFailed { .. } => "fulfillment.failed",
        }
    }
}

// Drains the channel and logs every event until all senders are gone.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::FulfillmentFailed {
                checkout_id,
                reason,
                ..
            } => {
                error!(
                    event = event.name(),
                    checkout_id = %checkout_id,
                    alert = "settled_unfulfilled",
                    "Fulfillment failed for a settled checkout: {}",
                    reason
                );
            }
            other => {
                info!(event = other.name(), payload = ?other, "Domain event");
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_flow_through_the_channel() {
        let (sender, mut rx) = EventSender::channel();
        let order_id = Uuid::new_v4();
        let checkout_id = Uuid::new_v4();

        sender
            .send(Event::OrderCreated {
                order_id,
                checkout_id,
            })
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.name(), "order.created");
        assert_eq!(
            received,
            Event::OrderCreated {
                order_id,
                checkout_id
            }
        );
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_dropped() {
        let (sender, rx) = EventSender::channel();
        drop(rx);
        let result = sender
            .send(Event::CheckoutFailed {
                checkout_id: Uuid::new_v4(),
                session_id: "sess".into(),
            })
            .await;
        assert!(result.is_err());

        // never panics
        sender
            .send_or_log(Event::CheckoutCancelled {
                checkout_id: Uuid::new_v4(),
                session_id: "sess".into(),
            })
            .await;
    }
}
