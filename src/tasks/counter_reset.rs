//! Hit Counter Reset Task
//!
//! Discards every hit count on a fixed interval, independent of requests.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::policy::HitCounter;

/// Spawns the task that resets `counter` every `period`.
///
/// The first reset happens one full period after spawning.
pub fn spawn_counter_reset_task(counter: Arc<HitCounter>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            counter.reset();
            debug!("hit counters reset");
        }
    })
}
