//! Background worker for the Quorum assignment engine.
//!
//! - [`config`]: environment configuration.
//! - [`dispatch`]: maps a job name and its arguments to an engine call.
//! - [`runner`]: job runners claiming from the durable queue.
//! - [`scheduler`]: periodic maintenance passes per active project.

pub mod config;
pub mod dispatch;
pub mod runner;
pub mod scheduler;
