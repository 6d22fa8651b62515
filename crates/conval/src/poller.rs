//! Queue status poller.
//!
//! [`QueuePoller`] issues `GET /conval/status` on a fixed cadence while it
//! is running. It never interprets the result; the session feeds every
//! outcome into the state machine, which decides when polling stops.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use quotation_core::job::QueueStatus;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::api::{ConvalBackend, ConvalError};

/// Shortest cadence the poller runs at; a zero period is raised to this.
const MIN_POLL_PERIOD: Duration = Duration::from_millis(1);

pub struct QueuePoller {
    backend: Arc<dyn ConvalBackend>,
    period: Duration,
    /// `Some` while polling is live. Checked before every tick.
    ticker: Option<Interval>,
    in_flight: Option<BoxFuture<'static, Result<QueueStatus, ConvalError>>>,
}

impl QueuePoller {
    pub fn new(backend: Arc<dyn ConvalBackend>, period: Duration) -> Self {
        if period.is_zero() {
            tracing::warn!(
                min_period_ms = MIN_POLL_PERIOD.as_millis() as u64,
                "Zero poll interval configured, using minimum period",
            );
        }
        Self {
            backend,
            period: period.max(MIN_POLL_PERIOD),
            ticker: None,
            in_flight: None,
        }
    }

    /// Start polling. The first request goes out one period from now.
    pub fn start(&mut self) {
        if self.ticker.is_some() {
            return;
        }
        let mut ticker = tokio::time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        tracing::debug!(period_ms = self.period.as_millis() as u64, "Queue polling started");
    }

    /// Stop polling and drop any request still in flight.
    pub fn stop(&mut self) {
        if self.ticker.take().is_some() {
            tracing::debug!("Queue polling stopped");
        }
        self.in_flight = None;
    }

    /// Wait for the next poll result.
    ///
    /// Pends forever while stopped. Cancel-safe: an interrupted wait
    /// resumes the same tick or request on the next call.
    pub async fn next(&mut self) -> Result<QueueStatus, ConvalError> {
        loop {
            if let Some(request) = self.in_flight.as_mut() {
                let result = request.await;
                self.in_flight = None;
                return result;
            }

            match self.ticker.as_mut() {
                Some(ticker) => {
                    ticker.tick().await;
                }
                None => std::future::pending::<()>().await,
            }

            let backend = Arc::clone(&self.backend);
            self.in_flight = Some(Box::pin(async move { backend.queue_status().await }));
        }
    }
}
