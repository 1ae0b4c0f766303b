//! Quorum domain events and notification delivery.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`PlatformEvent`]: the domain event envelope; [`names`] lists the
//!   event types the engine emits.
//! - [`EventPersistence`]: background service that durably writes every
//!   event to the `events` table.
//! - [`delivery`]: best-effort webhook delivery and the notifier that
//!   forwards bus events to it.

pub mod bus;
pub mod delivery;
pub mod persistence;

pub use bus::{names, EventBus, PlatformEvent};
pub use delivery::notifier::WebhookNotifier;
pub use delivery::webhook::{WebhookDelivery, WebhookError};
pub use persistence::EventPersistence;
