use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Capacity of the bounded domain-event channel.
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

    /// Creates a sender together with the receiver that [`process_events`] drains.
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

    /// Sends an event, logging instead of failing when the processor is gone.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(err) = self.send(event).await {
            warn!(error = %err, "dropping domain event");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated { cart_id: Uuid, user_id: Uuid },
    CartItemAdded { cart_id: Uuid, product_id: Uuid, quantity: i32 },
    CartItemUpdated { cart_id: Uuid, item_id: Uuid, quantity: i32 },
    CartItemRemoved { cart_id: Uuid, item_id: Uuid },
    CartCleared(Uuid),

    // Order events
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        total_price: Decimal,
    },
    PaymentSessionCreated {
        order_id: Uuid,
        payment_order_id: String,
    },
    PaymentPending {
        order_id: Uuid,
        payment_order_id: String,
    },
    OrderPaid {
        order_id: Uuid,
        payment_id: Option<String>,
        paid_at: DateTime<Utc>,
    },
    OrderDelivered(Uuid),

    // Inventory events
    StockDecremented { product_id: Uuid, quantity: i32 },
}

/// Drains the event channel, logging each event until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");
    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderPaid {
                order_id,
                payment_id,
                ..
            } => {
                info!(%order_id, payment_id = ?payment_id, "order paid");
            }
            Event::PaymentPending {
                order_id,
                payment_order_id,
            } => {
                info!(%order_id, %payment_order_id, "payment still pending");
            }
            Event::StockDecremented {
                product_id,
                quantity,
            } => {
                info!(%product_id, quantity, "stock decremented");
            }
            other => info!(event = ?other, "domain event"),
        }
    }
    warn!("Event processing loop has ended");
}
