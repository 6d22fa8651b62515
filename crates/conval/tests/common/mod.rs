#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use quotation_conval::api::{ConvalBackend, ConvalError};
use quotation_core::job::{JobRequest, JobSubmissionResult, QueueStatus};
use quotation_core::recalc::RecalcEvent;
use quotation_core::types::SheetIndex;

/// Scripted answer of one `GET /conval/status` call.
#[derive(Debug, Clone, Copy)]
pub enum PollStep {
    Busy(u32),
    Idle,
    Fail,
}

/// In-memory [`ConvalBackend`] that replays scripted responses and
/// counts every call.
pub struct ScriptedBackend {
    submits: Mutex<VecDeque<Result<JobSubmissionResult, ConvalError>>>,
    polls: Mutex<VecDeque<PollStep>>,
    /// Answer once the poll script runs out.
    default_poll: PollStep,
    refresh_fails: AtomicBool,
    requests: Mutex<Vec<JobRequest>>,
    pub submit_calls: AtomicUsize,
    pub poll_calls: AtomicUsize,
    pub customer_calls: AtomicUsize,
    pub engine_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            submits: Mutex::new(VecDeque::new()),
            polls: Mutex::new(VecDeque::new()),
            default_poll: PollStep::Idle,
            refresh_fails: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
            submit_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            customer_calls: AtomicUsize::new(0),
            engine_calls: AtomicUsize::new(0),
        }
    }

    /// Queue a successful submission response.
    pub fn submit_returns(self, queued: bool, queue_count: u32, processing: bool) -> Self {
        self.submits.lock().unwrap().push_back(Ok(JobSubmissionResult {
            queued,
            queue_depth_at_submission: queue_count,
            processing,
            message: "accepted".to_string(),
        }));
        self
    }

    pub fn submit_fails(self, error: ConvalError) -> Self {
        self.submits.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn polls(self, steps: impl IntoIterator<Item = PollStep>) -> Self {
        self.polls.lock().unwrap().extend(steps);
        self
    }

    pub fn default_poll(mut self, step: PollStep) -> Self {
        self.default_poll = step;
        self
    }

    pub fn refresh_fails(self) -> Self {
        self.refresh_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn submits(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn polls_made(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.customer_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<JobRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConvalBackend for ScriptedBackend {
    async fn submit(&self, request: &JobRequest) -> Result<JobSubmissionResult, ConvalError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        // An unscripted submission completes immediately.
        self.submits
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(JobSubmissionResult::default()))
    }

    async fn queue_status(&self) -> Result<QueueStatus, ConvalError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default_poll);

        match step {
            PollStep::Busy(queue_count) => Ok(QueueStatus {
                processing: true,
                queue_count,
            }),
            PollStep::Idle => Ok(QueueStatus::default()),
            PollStep::Fail => Err(ConvalError::Transport("connection reset".to_string())),
        }
    }

    async fn customer_data(
        &self,
        correlation_key: &str,
        sheet_index: SheetIndex,
    ) -> Result<serde_json::Value, ConvalError> {
        self.customer_calls.fetch_add(1, Ordering::SeqCst);
        if self.refresh_fails.load(Ordering::SeqCst) {
            return Err(ConvalError::Server {
                status: 503,
                body: "storage unavailable".to_string(),
            });
        }
        Ok(serde_json::json!({ "customer": "ACME", "estimate": correlation_key, "sheet": sheet_index }))
    }

    async fn engine_data(
        &self,
        correlation_key: &str,
        sheet_index: SheetIndex,
    ) -> Result<serde_json::Value, ConvalError> {
        self.engine_calls.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::json!({ "estimate": correlation_key, "sheet": sheet_index, "kv": 12.5 }))
    }
}

/// Upper bound for any single wait in a paused-time test.
pub const EVENT_WAIT: Duration = Duration::from_secs(3600);

/// Receive events until one matches `done`, returning everything seen.
pub async fn collect_until(
    rx: &mut broadcast::Receiver<RecalcEvent>,
    done: impl Fn(&RecalcEvent) -> bool,
) -> Vec<RecalcEvent> {
    let mut seen = Vec::new();
    loop {
        let event = match tokio::time::timeout(EVENT_WAIT, rx.recv())
            .await
            .expect("timed out waiting for session event")
        {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
        };
        let finished = done(&event);
        seen.push(event);
        if finished {
            return seen;
        }
    }
}

pub fn backend(scripted: ScriptedBackend) -> (Arc<ScriptedBackend>, Arc<dyn ConvalBackend>) {
    let scripted = Arc::new(scripted);
    let dynamic: Arc<dyn ConvalBackend> = scripted.clone();
    (scripted, dynamic)
}
