//! Request fulfillment.
//!
//! The [`FulfillmentController`] claims the next eligible request, downloads
//! its payload, relays it, and records the outcome. The
//! [`FulfillmentScheduler`] runs attempts on a fixed cadence:
//! - One attempt per tick, each on its own task
//! - Concurrency bounded by `max_concurrent_attempts` (ticks with no free slot are skipped)
//! - Graceful drain on stop, then cancellation

mod config;
mod controller;
mod scheduler;
mod types;

pub use config::FulfillmentConfig;
pub use controller::FulfillmentController;
pub use scheduler::FulfillmentScheduler;
pub use types::*;
