use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::order::{OrderStatus, PaymentMethod, PaymentStatus};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated(Uuid),
    CheckoutCompleted {
        order_id: Uuid,
        payment_method: PaymentMethod,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },

    // Payment events
    PaymentConfirmed {
        order_id: Uuid,
        provider_payment_id: Option<String>,
    },
    PaymentFailed {
        order_id: Uuid,
        final_status: PaymentStatus,
    },

    // Stock events
    StockDecremented {
        product_id: Uuid,
        color: String,
        size: String,
        quantity: i32,
        remaining: i32,
    },
    StockDepleted {
        product_id: Uuid,
        color: String,
        size: String,
        requested: i32,
        available: i32,
    },

    // Settlement completed with one or more failed stock lines;
    // requires manual reconciliation
    SettlementIncomplete {
        order_id: Uuid,
        failed_lines: usize,
    },
}

/// Event processing loop; consumes the channel for the process lifetime
/// and records every domain event in the structured log.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::SettlementIncomplete {
                order_id,
                failed_lines,
            } => {
                // Surfaced at warn here as well so the condition is visible
                // even when the settlement log line is filtered out
                warn!(
                    order_id = %order_id,
                    failed_lines = failed_lines,
                    "settlement completed with unapplied stock decrements"
                );
            }
            other => {
                info!(event = ?other, "domain event");
            }
        }
    }

    info!("Event processing loop stopped");
}
