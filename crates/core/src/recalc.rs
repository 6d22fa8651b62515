//! Recalculation state machine.
//!
//! [`RecalcMachine`] owns the in-flight state of one estimate and is the
//! only place that mutates it. Submission results, poll ticks, timer
//! expiries and refresh outcomes are all fed through
//! [`RecalcMachine::apply`], which returns the [`Effect`]s the driver must
//! carry out (arm/disarm timers, start/stop polling, refresh data,
//! publish events).
//!
//! Polling and the safety-net timeout race to resolve the same job. Both
//! land in `apply`, and whichever arrives second finds the machine no
//! longer `Queued` (or holding a different timer handle) and is ignored.
//!
//! ```text
//!            request_submit
//!   Idle ───────────────────▶ Submitting ──completed──▶ Idle (+refresh)
//!    ▲                            │
//!    │ timeout / fallback /       │ queued
//!    │ submit failure             ▼
//!    └──────────────────────── Queued ──queue empty──▶ Resolving ──refreshed──▶ Idle
//! ```

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::gate::AutoTriggerGate;
use crate::job::{Classification, DependentData, JobSubmissionResult, QueueStatus};
use crate::timing::RecalcTimings;

// ---------------------------------------------------------------------------
// Phase / handles / triggers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    /// The submission request is on the wire.
    Submitting,
    /// The engine accepted the job but has not finished it.
    Queued,
    /// Completion confirmed by polling; dependent data is being reloaded.
    Resolving,
}

/// Opaque token identifying one armed timer.
///
/// Handles are never reused within a machine, so an expiry carrying an
/// old handle can always be told apart from the current timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Who asked for a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Fired by the data-load path, at most once per estimate.
    Auto,
    /// Requested by the user; not limited by the auto-trigger gate.
    Manual,
}

/// Why a submission request was not issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitRejection {
    #[error("automatic recalculation already triggered for this estimate")]
    AlreadyTriggered,

    #[error("a recalculation request is already being submitted")]
    Busy,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Caller-visible flags of the job bound to one estimate.
#[derive(Debug, Default)]
pub struct InFlightState {
    pub processing: bool,
    pub queued: bool,
    pub auto_trigger: AutoTriggerGate,
    /// The armed safety-net timer, if any. Never more than one.
    pub active_timeout: Option<TimerHandle>,
}

impl InFlightState {
    pub fn is_outstanding(&self) -> bool {
        self.processing || self.queued
    }
}

/// Read-only copy of the machine state, published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InFlightSnapshot {
    pub phase: Phase,
    pub processing: bool,
    pub queued: bool,
    pub auto_triggered: bool,
    pub timeout_armed: bool,
}

// ---------------------------------------------------------------------------
// Inputs / effects / events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum RecalcInput {
    SubmitSucceeded(JobSubmissionResult),
    SubmitFailed(String),
    PollSucceeded(QueueStatus),
    PollFailed(String),
    TimeoutExpired(TimerHandle),
    FallbackExpired(TimerHandle),
    RefreshSucceeded(DependentData),
    RefreshFailed(String),
}

/// Work the driver must perform after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send the recalculation request.
    Submit,
    ArmTimeout { handle: TimerHandle, after: Duration },
    DisarmTimeout(TimerHandle),
    StartPolling,
    StopPolling,
    ArmFallback { handle: TimerHandle, after: Duration },
    DisarmFallback(TimerHandle),
    /// Reload dependent data, optionally after a settling delay.
    Refresh { settle: Option<Duration> },
    Publish(RecalcEvent),
}

/// Observable outcome of a transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecalcEvent {
    Submitted { trigger: Trigger },
    Queued { queue_count: u32, timeout_ms: u64 },
    QueueProgress { queue_count: u32, processing: bool },
    /// `immediate` is true when the engine finished within the submit call.
    Completed { immediate: bool },
    TimedOut,
    PollFailed { error: String },
    PollFallbackReset,
    SubmitFailed { error: String },
    Refreshed { data: DependentData },
    RefreshFailed { error: String },
}

// ---------------------------------------------------------------------------
// RecalcMachine
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct RecalcMachine {
    timings: RecalcTimings,
    phase: Phase,
    state: InFlightState,
    /// Pending poll-failure fallback reset.
    fallback: Option<TimerHandle>,
    next_handle: u64,
}

impl RecalcMachine {
    pub fn new(timings: RecalcTimings) -> Self {
        Self {
            timings,
            phase: Phase::Idle,
            state: InFlightState::default(),
            fallback: None,
            next_handle: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &InFlightState {
        &self.state
    }

    pub fn timings(&self) -> &RecalcTimings {
        &self.timings
    }

    /// Whether the queue poller should be running.
    pub fn should_poll(&self) -> bool {
        self.phase == Phase::Queued && self.state.is_outstanding()
    }

    pub fn snapshot(&self) -> InFlightSnapshot {
        InFlightSnapshot {
            phase: self.phase,
            processing: self.state.processing,
            queued: self.state.queued,
            auto_triggered: self.state.auto_trigger.is_triggered(),
            timeout_armed: self.state.active_timeout.is_some(),
        }
    }

    /// Ask for a new submission.
    ///
    /// Automatic requests consume the auto-trigger gate even when they are
    /// then rejected as busy, so a data load can never submit twice.
    pub fn request_submit(&mut self, trigger: Trigger) -> Result<Vec<Effect>, SubmitRejection> {
        if trigger == Trigger::Auto && !self.state.auto_trigger.claim() {
            return Err(SubmitRejection::AlreadyTriggered);
        }
        if self.phase == Phase::Submitting {
            return Err(SubmitRejection::Busy);
        }

        let mut effects = Vec::new();
        self.disarm_timeout(&mut effects);
        self.disarm_fallback(&mut effects);
        if self.phase == Phase::Queued {
            effects.push(Effect::StopPolling);
        }

        self.phase = Phase::Submitting;
        self.state.processing = true;
        self.state.queued = false;

        effects.push(Effect::Submit);
        effects.push(Effect::Publish(RecalcEvent::Submitted { trigger }));
        Ok(effects)
    }

    /// Feed one event into the machine.
    ///
    /// Inputs that do not match the current phase (a late poll result, an
    /// expiry for a disarmed timer) produce no effects.
    pub fn apply(&mut self, input: RecalcInput) -> Vec<Effect> {
        let mut effects = Vec::new();

        match input {
            RecalcInput::SubmitSucceeded(result) => {
                if self.phase != Phase::Submitting {
                    return effects;
                }
                match Classification::of(&result) {
                    Classification::Completed => {
                        self.phase = Phase::Idle;
                        self.state.processing = false;
                        self.state.queued = false;
                        effects.push(Effect::Publish(RecalcEvent::Completed { immediate: true }));
                        effects.push(Effect::Refresh { settle: None });
                    }
                    Classification::Queued { queue_depth } => {
                        self.disarm_timeout(&mut effects);
                        let handle = self.allocate_handle();
                        let after = self.timings.estimate_timeout(queue_depth);
                        self.state.active_timeout = Some(handle);

                        self.phase = Phase::Queued;
                        self.state.processing = true;
                        self.state.queued = result.queued || queue_depth > 0;

                        effects.push(Effect::ArmTimeout { handle, after });
                        effects.push(Effect::StartPolling);
                        effects.push(Effect::Publish(RecalcEvent::Queued {
                            queue_count: queue_depth,
                            timeout_ms: after.as_millis() as u64,
                        }));
                    }
                }
            }

            RecalcInput::SubmitFailed(error) => {
                if self.phase != Phase::Submitting {
                    return effects;
                }
                self.reset_to_idle(&mut effects);
                effects.push(Effect::Publish(RecalcEvent::SubmitFailed { error }));
            }

            RecalcInput::PollSucceeded(status) => {
                if !self.should_poll() {
                    return effects;
                }
                if status.is_busy() {
                    self.state.processing = true;
                    self.state.queued = status.queue_count > 0;
                    self.disarm_fallback(&mut effects);
                    effects.push(Effect::Publish(RecalcEvent::QueueProgress {
                        queue_count: status.queue_count,
                        processing: status.processing,
                    }));
                } else {
                    self.disarm_timeout(&mut effects);
                    self.disarm_fallback(&mut effects);
                    effects.push(Effect::StopPolling);
                    self.phase = Phase::Resolving;
                    self.state.processing = false;
                    self.state.queued = false;
                    effects.push(Effect::Publish(RecalcEvent::Completed { immediate: false }));
                    effects.push(Effect::Refresh {
                        settle: Some(self.timings.settle_delay),
                    });
                }
            }

            RecalcInput::PollFailed(error) => {
                if !self.should_poll() {
                    return effects;
                }
                // The first failure sets the deadline; later ones must not push it out.
                if self.fallback.is_none() {
                    let handle = self.allocate_handle();
                    self.fallback = Some(handle);
                    effects.push(Effect::ArmFallback {
                        handle,
                        after: self.timings.poll_fallback,
                    });
                }
                effects.push(Effect::Publish(RecalcEvent::PollFailed { error }));
            }

            RecalcInput::TimeoutExpired(handle) => {
                if self.state.active_timeout != Some(handle) {
                    return effects;
                }
                self.state.active_timeout = None;
                if self.phase == Phase::Queued {
                    self.reset_to_idle(&mut effects);
                    effects.push(Effect::Publish(RecalcEvent::TimedOut));
                }
            }

            RecalcInput::FallbackExpired(handle) => {
                if self.fallback != Some(handle) {
                    return effects;
                }
                self.fallback = None;
                if self.phase == Phase::Queued {
                    self.reset_to_idle(&mut effects);
                    effects.push(Effect::Publish(RecalcEvent::PollFallbackReset));
                }
            }

            RecalcInput::RefreshSucceeded(data) => {
                if self.phase == Phase::Resolving {
                    self.phase = Phase::Idle;
                }
                effects.push(Effect::Publish(RecalcEvent::Refreshed { data }));
            }

            RecalcInput::RefreshFailed(error) => {
                if self.phase == Phase::Resolving {
                    self.phase = Phase::Idle;
                }
                effects.push(Effect::Publish(RecalcEvent::RefreshFailed { error }));
            }
        }

        effects
    }

    // ---- private helpers ----

    fn allocate_handle(&mut self) -> TimerHandle {
        self.next_handle += 1;
        TimerHandle(self.next_handle)
    }

    fn disarm_timeout(&mut self, effects: &mut Vec<Effect>) {
        if let Some(handle) = self.state.active_timeout.take() {
            effects.push(Effect::DisarmTimeout(handle));
        }
    }

    fn disarm_fallback(&mut self, effects: &mut Vec<Effect>) {
        if let Some(handle) = self.fallback.take() {
            effects.push(Effect::DisarmFallback(handle));
        }
    }

    fn reset_to_idle(&mut self, effects: &mut Vec<Effect>) {
        self.disarm_timeout(effects);
        self.disarm_fallback(effects);
        effects.push(Effect::StopPolling);
        self.phase = Phase::Idle;
        self.state.processing = false;
        self.state.queued = false;
    }
}
