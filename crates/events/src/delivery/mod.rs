//! External delivery of domain events.

pub mod notifier;
pub mod webhook;
