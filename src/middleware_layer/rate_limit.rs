use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces remote calls by a minimum interval.
///
/// Each caller reserves the next free slot under a fair mutex, so slots are
/// handed out in the order callers reach [`admit`](Self::admit) (FIFO), then
/// sleeps until its slot with the lock released. A caller dropped while
/// sleeping only wastes its own slot. The interval is measured between
/// admissions, not completions.
///
/// The gateway admits after a session is obtained, so requests that were
/// waiting on an acquisition reach the spacer together, in the order their
/// waits resolve rather than the order `generate` was called.
pub struct RequestSpacer {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RequestSpacer {
    /// Creates a new `RequestSpacer`.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Waits until the caller may issue its call.
    pub async fn admit(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next = Some(slot + self.min_interval);
            slot
        };

        let now = Instant::now();
        if slot > now {
            tracing::debug!("⏳ Spacing request, waiting {:?}", slot - now);
            tokio::time::sleep_until(slot).await;
        }
    }
}
