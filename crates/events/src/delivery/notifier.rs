//! Forwards bus events to a configured webhook.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::bus::PlatformEvent;
use crate::delivery::webhook::WebhookDelivery;

/// Subscribes to the bus and delivers matching events to one webhook URL.
///
/// Delivery is best-effort: each event is sent on its own task so a slow
/// endpoint never stalls the bus, and failures are only logged.
pub struct WebhookNotifier {
    url: String,
    delivery: Arc<WebhookDelivery>,
    /// Event types to forward; empty forwards everything.
    event_types: Vec<String>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, delivery: WebhookDelivery) -> Self {
        Self {
            url: url.into(),
            delivery: Arc::new(delivery),
            event_types: Vec::new(),
        }
    }

    /// Restrict forwarding to the given event types.
    pub fn only(mut self, event_types: &[&str]) -> Self {
        self.event_types = event_types.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn accepts(&self, event: &PlatformEvent) -> bool {
        self.event_types.is_empty() || self.event_types.iter().any(|t| *t == event.event_type)
    }

    /// Run until the bus is dropped.
    pub async fn run(self, mut receiver: broadcast::Receiver<PlatformEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) if self.accepts(&event) => {
                    let delivery = Arc::clone(&self.delivery);
                    let url = self.url.clone();
                    tokio::spawn(async move {
                        if let Err(e) = delivery.deliver(&url, &event).await {
                            tracing::warn!(
                                error = %e,
                                event_type = %event.event_type,
                                "Dropping undeliverable webhook event"
                            );
                        }
                    });
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Webhook notifier lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, webhook notifier shutting down");
                    break;
                }
            }
        }
    }
}
