//! Per-estimate recalculation session.
//!
//! A [`RecalcSession`] is one spawned task that owns the
//! [`RecalcMachine`] for a single estimate together with everything that
//! can change it: the submit request, the queue poller, the safety-net
//! timeout, the poll-failure fallback and the data refresh. All of them
//! are polled from one `tokio::select!` loop, so the state is only ever
//! touched from that task and no locking is needed.
//!
//! Callers talk to the task over a command channel and observe it through
//! a [`watch`] of [`InFlightSnapshot`] plus a [`broadcast`] of
//! [`RecalcEvent`]s. Cancelling the session's token (or dropping the
//! session) ends the loop; nothing is polled or fired after that.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use quotation_core::error::CoreError;
use quotation_core::job::{validate_correlation_key, DependentData, JobRequest, JobSubmissionResult};
use quotation_core::recalc::{
    Effect, InFlightSnapshot, RecalcEvent, RecalcInput, RecalcMachine, SubmitRejection, Trigger,
};
use quotation_core::timing::RecalcTimings;
use quotation_core::types::{CorrelationKey, SheetIndex};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::api::{ConvalBackend, ConvalError};
use crate::poller::QueuePoller;
use crate::refresher::DataRefresher;
use crate::timer::TimerSlot;

/// Broadcast channel capacity for session events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Pending commands per session.
const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// How long [`RecalcSession::shutdown`] waits for the task before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Errors returned to callers of a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Submission rejected: {0}")]
    Rejected(#[from] SubmitRejection),

    /// The session task has stopped.
    #[error("Recalculation session is closed")]
    Closed,
}

enum SessionCommand {
    Submit {
        trigger: Trigger,
        payload: serde_json::Value,
        reply: oneshot::Sender<Result<(), SubmitRejection>>,
    },
}

/// Handle to the recalculation task of one estimate sheet.
#[derive(Debug)]
pub struct RecalcSession {
    correlation_key: CorrelationKey,
    sheet_index: SheetIndex,
    commands: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<RecalcEvent>,
    state: watch::Receiver<InFlightSnapshot>,
    cancel: CancellationToken,
    task_handle: tokio::task::JoinHandle<()>,
}

impl RecalcSession {
    /// Validate the estimate number and spawn the session task.
    pub fn spawn(
        backend: Arc<dyn ConvalBackend>,
        correlation_key: impl Into<CorrelationKey>,
        sheet_index: SheetIndex,
        timings: RecalcTimings,
        cancel: CancellationToken,
    ) -> Result<Self, CoreError> {
        let correlation_key = correlation_key.into();
        validate_correlation_key(&correlation_key)?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let machine = RecalcMachine::new(timings);
        let (state_tx, state_rx) = watch::channel(machine.snapshot());

        let task = SessionTask {
            correlation_key: correlation_key.clone(),
            sheet_index,
            poller: QueuePoller::new(Arc::clone(&backend), machine.timings().poll_interval),
            refresher: DataRefresher::new(Arc::clone(&backend)),
            backend,
            machine,
            payload: serde_json::Value::Null,
            submit_in_flight: None,
            refresh_in_flight: None,
            timeout: TimerSlot::new(),
            fallback: TimerSlot::new(),
            events: event_tx.clone(),
            state: state_tx,
        };

        let task_cancel = cancel.clone();
        let task_handle = tokio::spawn(task.run(command_rx, task_cancel));

        Ok(Self {
            correlation_key,
            sheet_index,
            commands: command_tx,
            events: event_tx,
            state: state_rx,
            cancel,
            task_handle,
        })
    }

    pub fn correlation_key(&self) -> &str {
        &self.correlation_key
    }

    pub fn sheet_index(&self) -> SheetIndex {
        self.sheet_index
    }

    /// Dependent data finished loading; fire the automatic recalculation
    /// unless it already ran for this estimate.
    pub async fn data_loaded(&self, payload: serde_json::Value) -> Result<(), SessionError> {
        self.send_submit(Trigger::Auto, payload).await
    }

    /// User-initiated recalculation. Not limited by the auto-trigger gate.
    pub async fn submit(&self, payload: serde_json::Value) -> Result<(), SessionError> {
        self.send_submit(Trigger::Manual, payload).await
    }

    pub fn snapshot(&self) -> InFlightSnapshot {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<InFlightSnapshot> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecalcEvent> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.task_handle.is_finished()
    }

    /// Stop the session and wait for its task to exit.
    ///
    /// Timers are disarmed and polling stops as soon as the task observes
    /// the cancellation; the task is aborted if it has not exited within
    /// a few seconds.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let abort = self.task_handle.abort_handle();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.task_handle)
            .await
            .is_err()
        {
            tracing::warn!(
                correlation_key = %self.correlation_key,
                "Session task did not stop in time, aborting",
            );
            abort.abort();
        }
    }

    // ---- private helpers ----

    async fn send_submit(
        &self,
        trigger: Trigger,
        payload: serde_json::Value,
    ) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SessionCommand::Submit {
                trigger,
                payload,
                reply,
            })
            .await
            .map_err(|_| SessionError::Closed)?;

        response.await.map_err(|_| SessionError::Closed)??;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

struct SessionTask {
    correlation_key: CorrelationKey,
    sheet_index: SheetIndex,
    backend: Arc<dyn ConvalBackend>,
    machine: RecalcMachine,
    /// Payload of the accepted submission, consumed when the request is built.
    payload: serde_json::Value,
    submit_in_flight: Option<BoxFuture<'static, Result<JobSubmissionResult, ConvalError>>>,
    poller: QueuePoller,
    timeout: TimerSlot,
    fallback: TimerSlot,
    refresher: DataRefresher,
    refresh_in_flight: Option<BoxFuture<'static, Result<DependentData, ConvalError>>>,
    events: broadcast::Sender<RecalcEvent>,
    state: watch::Sender<InFlightSnapshot>,
}

impl SessionTask {
    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>, cancel: CancellationToken) {
        tracing::info!(
            correlation_key = %self.correlation_key,
            sheet_index = self.sheet_index,
            "Recalculation session started",
        );

        loop {
            // Cancellation is checked first so nothing is polled or fired
            // once the session has been torn down.
            let effects = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                handle = self.timeout.fired() => {
                    self.machine.apply(RecalcInput::TimeoutExpired(handle))
                }
                handle = self.fallback.fired() => {
                    self.machine.apply(RecalcInput::FallbackExpired(handle))
                }
                result = wait_for(&mut self.submit_in_flight) => match result {
                    Ok(result) => self.machine.apply(RecalcInput::SubmitSucceeded(result)),
                    Err(e) => self.machine.apply(RecalcInput::SubmitFailed(e.to_string())),
                },
                result = self.poller.next() => match result {
                    Ok(status) => {
                        tracing::debug!(
                            correlation_key = %self.correlation_key,
                            processing = status.processing,
                            queue_count = status.queue_count,
                            "Queue status polled",
                        );
                        self.machine.apply(RecalcInput::PollSucceeded(status))
                    }
                    Err(e) => self.machine.apply(RecalcInput::PollFailed(e.to_string())),
                },
                result = wait_for(&mut self.refresh_in_flight) => match result {
                    Ok(data) => self.machine.apply(RecalcInput::RefreshSucceeded(data)),
                    Err(e) => self.machine.apply(RecalcInput::RefreshFailed(e.to_string())),
                },
            };

            self.execute(effects);
            self.state.send_replace(self.machine.snapshot());
        }

        self.poller.stop();
        self.timeout.disarm();
        self.fallback.disarm();
        tracing::info!(
            correlation_key = %self.correlation_key,
            "Recalculation session stopped",
        );
    }

    fn handle_command(&mut self, command: SessionCommand) -> Vec<Effect> {
        match command {
            SessionCommand::Submit {
                trigger,
                payload,
                reply,
            } => match self.machine.request_submit(trigger) {
                Ok(effects) => {
                    self.payload = payload;
                    let _ = reply.send(Ok(()));
                    effects
                }
                Err(rejection) => {
                    tracing::debug!(
                        correlation_key = %self.correlation_key,
                        ?trigger,
                        reason = %rejection,
                        "Submission not issued",
                    );
                    let _ = reply.send(Err(rejection));
                    Vec::new()
                }
            },
        }
    }

    fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Submit => {
                    let request = JobRequest::new(
                        self.correlation_key.clone(),
                        self.sheet_index,
                        std::mem::take(&mut self.payload),
                    );
                    let backend = Arc::clone(&self.backend);
                    self.submit_in_flight =
                        Some(Box::pin(async move { backend.submit(&request).await }));
                }
                Effect::ArmTimeout { handle, after } => {
                    tracing::debug!(
                        correlation_key = %self.correlation_key,
                        %handle,
                        timeout_ms = after.as_millis() as u64,
                        "Safety-net timeout armed",
                    );
                    self.timeout.arm(handle, after);
                }
                Effect::DisarmTimeout(handle) => {
                    tracing::debug!(correlation_key = %self.correlation_key, %handle, "Safety-net timeout disarmed");
                    self.timeout.disarm();
                }
                Effect::StartPolling => self.poller.start(),
                Effect::StopPolling => self.poller.stop(),
                Effect::ArmFallback { handle, after } => self.fallback.arm(handle, after),
                Effect::DisarmFallback(_) => {
                    self.fallback.disarm();
                }
                Effect::Refresh { settle } => {
                    self.refresh_in_flight = Some(self.refresher.refresh(
                        self.correlation_key.clone(),
                        self.sheet_index,
                        settle,
                    ));
                }
                Effect::Publish(event) => {
                    log_event(&self.correlation_key, &event);
                    // No subscribers is fine.
                    let _ = self.events.send(event);
                }
            }
        }
    }
}

/// Await an optional in-flight future, clearing the slot once it resolves.
///
/// Pends forever on an empty slot so the `select!` branch stays idle.
async fn wait_for<T>(slot: &mut Option<BoxFuture<'static, T>>) -> T {
    match slot.as_mut() {
        Some(fut) => {
            let output = fut.await;
            *slot = None;
            output
        }
        None => std::future::pending().await,
    }
}

fn log_event(correlation_key: &str, event: &RecalcEvent) {
    match event {
        RecalcEvent::Submitted { trigger } => {
            tracing::info!(correlation_key, ?trigger, "CONVAL recalculation submitted");
        }
        RecalcEvent::Queued {
            queue_count,
            timeout_ms,
        } => {
            tracing::info!(
                correlation_key,
                queue_count,
                timeout_ms,
                "Recalculation queued, polling queue status",
            );
        }
        RecalcEvent::QueueProgress {
            queue_count,
            processing,
        } => {
            tracing::debug!(correlation_key, queue_count, processing, "Recalculation still running");
        }
        RecalcEvent::Completed { immediate } => {
            tracing::info!(correlation_key, immediate, "Recalculation completed");
        }
        RecalcEvent::TimedOut => {
            tracing::warn!(correlation_key, "Recalculation timed out, in-flight state cleared");
        }
        RecalcEvent::PollFailed { error } => {
            tracing::warn!(correlation_key, error = %error, "Queue status poll failed");
        }
        RecalcEvent::PollFallbackReset => {
            tracing::warn!(correlation_key, "Queue polling kept failing, in-flight state cleared");
        }
        RecalcEvent::SubmitFailed { error } => {
            tracing::error!(correlation_key, error = %error, "Recalculation submission failed");
        }
        RecalcEvent::Refreshed { .. } => {
            tracing::info!(correlation_key, "Dependent data refreshed");
        }
        RecalcEvent::RefreshFailed { error } => {
            tracing::warn!(correlation_key, error = %error, "Dependent data refresh failed");
        }
    }
}
