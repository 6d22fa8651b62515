//! Reload of the read-side data that depends on a recalculation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use quotation_core::job::DependentData;
use quotation_core::types::{CorrelationKey, SheetIndex};

use crate::api::{ConvalBackend, ConvalError};

pub struct DataRefresher {
    backend: Arc<dyn ConvalBackend>,
}

impl DataRefresher {
    pub fn new(backend: Arc<dyn ConvalBackend>) -> Self {
        Self { backend }
    }

    /// Build the refresh future for one estimate sheet.
    ///
    /// With `settle` set, the fetch starts only after that delay so the
    /// engine's writes are visible in storage.
    pub fn refresh(
        &self,
        correlation_key: CorrelationKey,
        sheet_index: SheetIndex,
        settle: Option<Duration>,
    ) -> BoxFuture<'static, Result<DependentData, ConvalError>> {
        let backend = Arc::clone(&self.backend);
        Box::pin(async move {
            if let Some(delay) = settle {
                tracing::debug!(
                    correlation_key = %correlation_key,
                    settle_ms = delay.as_millis() as u64,
                    "Waiting before data refresh",
                );
                tokio::time::sleep(delay).await;
            }
            fetch(backend.as_ref(), &correlation_key, sheet_index).await
        })
    }
}

/// Fetch both read-side resources concurrently.
pub async fn fetch(
    backend: &dyn ConvalBackend,
    correlation_key: &str,
    sheet_index: SheetIndex,
) -> Result<DependentData, ConvalError> {
    let (customer, engine) = futures::try_join!(
        backend.customer_data(correlation_key, sheet_index),
        backend.engine_data(correlation_key, sheet_index)
    )?;

    Ok(DependentData {
        customer,
        engine,
        fetched_at: Utc::now(),
    })
}
