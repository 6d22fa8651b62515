//! Cancellable one-shot timers owned by a session task.
//!
//! A [`TimerSlot`] holds at most one armed timer. Arming replaces the
//! previous timer and disarming drops it on the spot, so a disarmed timer
//! can never fire afterwards.

use std::pin::Pin;
use std::time::Duration;

use quotation_core::recalc::TimerHandle;
use tokio::time::Sleep;

#[derive(Default)]
pub struct TimerSlot {
    armed: Option<(TimerHandle, Pin<Box<Sleep>>)>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the slot, replacing any timer that was already armed.
    pub fn arm(&mut self, handle: TimerHandle, after: Duration) {
        self.armed = Some((handle, Box::pin(tokio::time::sleep(after))));
    }

    /// Drop the armed timer.
    pub fn disarm(&mut self) {
        self.armed = None;
    }

    #[cfg(test)]
    fn handle(&self) -> Option<TimerHandle> {
        self.armed.as_ref().map(|(handle, _)| *handle)
    }

    #[cfg(test)]
    fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Wait for the armed timer to expire and return its handle.
    ///
    /// Pends forever while the slot is empty. The slot is cleared when the
    /// timer fires. Cancel-safe: dropping the future keeps the timer armed.
    pub async fn fired(&mut self) -> TimerHandle {
        loop {
            match self.armed.as_mut() {
                Some((_, sleep)) => {
                    sleep.as_mut().await;
                    if let Some((handle, _)) = self.armed.take() {
                        return handle;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        }
    }
}
