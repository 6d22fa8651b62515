//! Binding of the active estimate to its recalculation session.
//!
//! [`RecalcController`] holds at most one [`RecalcSession`]. Binding a
//! different estimate (or sheet) shuts the previous session down and waits
//! for its task to exit before the new one is spawned, so a stale poller
//! or timer can never act on the new estimate's state.

use std::sync::Arc;

use quotation_core::error::CoreError;
use quotation_core::timing::RecalcTimings;
use quotation_core::types::SheetIndex;
use tokio_util::sync::CancellationToken;

use crate::api::ConvalBackend;
use crate::session::RecalcSession;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Invalid estimate: {0}")]
    InvalidKey(#[from] CoreError),

    #[error("No estimate is bound")]
    NotBound,
}

pub struct RecalcController {
    backend: Arc<dyn ConvalBackend>,
    timings: RecalcTimings,
    current: Option<RecalcSession>,
    /// Master token; each session runs on a child of it.
    cancel: CancellationToken,
}

impl RecalcController {
    pub fn new(backend: Arc<dyn ConvalBackend>, timings: RecalcTimings) -> Self {
        Self {
            backend,
            timings,
            current: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Bind an estimate sheet, reusing the current session if it already
    /// belongs to the same estimate and sheet.
    pub async fn bind(
        &mut self,
        correlation_key: &str,
        sheet_index: SheetIndex,
    ) -> Result<&RecalcSession, ControllerError> {
        let already_bound = self.current.as_ref().is_some_and(|session| {
            session.correlation_key() == correlation_key && session.sheet_index() == sheet_index
        });

        if !already_bound {
            self.unbind().await;
            let session = RecalcSession::spawn(
                Arc::clone(&self.backend),
                correlation_key,
                sheet_index,
                self.timings.clone(),
                self.cancel.child_token(),
            )?;
            self.current = Some(session);
        }

        self.current.as_ref().ok_or(ControllerError::NotBound)
    }

    pub fn session(&self) -> Result<&RecalcSession, ControllerError> {
        self.current.as_ref().ok_or(ControllerError::NotBound)
    }

    /// Tear down the current session, if any.
    pub async fn unbind(&mut self) {
        if let Some(previous) = self.current.take() {
            tracing::info!(
                correlation_key = %previous.correlation_key(),
                sheet_index = previous.sheet_index(),
                "Unbinding recalculation session",
            );
            previous.shutdown().await;
        }
    }

    /// Stop every session created by this controller.
    pub async fn shutdown(&mut self) {
        tracing::info!("Shutting down recalculation controller");
        self.cancel.cancel();
        self.unbind().await;
    }
}
