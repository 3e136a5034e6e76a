use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted after state transitions commit. Consumers are
/// best-effort; the transactional store is the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemAdded {
        cart_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    CartItemRemoved {
        cart_id: Uuid,
        product_id: Uuid,
    },
    CartCleared(Uuid),

    // Checkout events
    OrderCreated(Uuid),
    CheckoutCompleted {
        cart_id: Uuid,
        order_id: Uuid,
        total_amount: Decimal,
    },
    CouponRedeemed {
        coupon_id: Uuid,
        order_id: Uuid,
        amount_discounted: Decimal,
    },

    // Payment events
    PaymentCreated {
        payment_id: Uuid,
        order_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing if the channel is
    /// closed. Used after commit, where the state change already happened.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping event: {}", e);
        }
    }
}

/// Spawns the event processing loop and returns its handle.
///
/// The caller owns the handle and joins it on shutdown; the loop exits
/// once every `EventSender` clone has been dropped.
pub fn spawn_event_processor(rx: mpsc::Receiver<Event>) -> JoinHandle<()> {
    tokio::spawn(process_events(rx))
}

async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(%order_id, "order created");
            }
            Event::CheckoutCompleted {
                cart_id,
                order_id,
                total_amount,
            } => {
                info!(%cart_id, %order_id, %total_amount, "checkout completed");
            }
            Event::CouponRedeemed {
                coupon_id,
                order_id,
                amount_discounted,
            } => {
                info!(%coupon_id, %order_id, %amount_discounted, "coupon redeemed");
            }
            Event::PaymentCreated {
                payment_id,
                order_id,
            } => {
                info!(%payment_id, %order_id, "payment opened");
            }
            other => {
                info!(event = ?other, "event received");
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn processor_drains_and_exits_when_senders_drop() {
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let handle = spawn_event_processor(rx);

        sender.send_or_log(Event::CartCreated(Uuid::new_v4())).await;
        sender.send_or_log(Event::OrderCreated(Uuid::new_v4())).await;
        drop(sender);

        handle.await.expect("event processor panicked");
    }

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        let sender = EventSender::new(tx);
        drop(rx);

        // Must not panic or error out.
        sender.send_or_log(Event::CartCleared(Uuid::new_v4())).await;
    }
}
