//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Expiry sweep: drops expired memory entries at configured intervals
//! - Counter reset: discards hit counts of `"increasing"` routes

mod cleanup;
mod counter_reset;

pub use cleanup::spawn_cleanup_task;
pub use counter_reset::spawn_counter_reset_task;
