use chrono::{DateTime, FixedOffset, Local};
use stepwise_core::service::clock::Clock;

/// Wall clock in the host's local offset.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}
