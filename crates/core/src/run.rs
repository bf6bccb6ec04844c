use std::fmt::{self, Debug, Display};
use std::sync::Arc;

use simpleagent_model::ToolCallRequest;
use tokio::sync::mpsc;

use crate::tool::ToolResult;

/// Why a run failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The model kept requesting tools until the step budget ran out.
    StepBudgetExceeded,
    /// The model call failed and could not be retried.
    Model,
    /// The run's bookkeeping reached an impossible state.
    InvariantViolation,
    /// The model answered with something that cannot be acted upon.
    MalformedResponse,
    /// The run was cancelled.
    Cancelled,
    /// The session was still busy with an earlier submission.
    SessionBusy,
    /// The agent stopped or one of its tasks crashed.
    Internal,
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::StepBudgetExceeded => "step budget exceeded",
            FailureKind::Model => "model failure",
            FailureKind::InvariantViolation => "invariant violation",
            FailureKind::MalformedResponse => "malformed model response",
            FailureKind::Cancelled => "cancelled",
            FailureKind::SessionBusy => "session busy",
            FailureKind::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// A failed run with a human-readable reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    /// The category of the failure.
    pub kind: FailureKind,
    /// What happened.
    pub detail: String,
}

impl Failure {
    #[inline]
    pub(crate) fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

/// The terminal value of a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunResult {
    /// The model answered without requesting tools.
    FinalAnswer(String),
    /// The run ended without an answer.
    Failure(Failure),
}

impl RunResult {
    #[inline]
    pub(crate) fn failure(
        kind: FailureKind,
        detail: impl Into<String>,
    ) -> Self {
        Self::Failure(Failure::new(kind, detail))
    }
}

/// Progress of a run, in the order things happen.
#[derive(Clone, Debug, PartialEq)]
pub enum RunEvent {
    /// A piece of model output text.
    Delta(String),
    /// A tool call was dispatched.
    ToolCall(ToolCallRequest),
    /// A tool call resolved.
    ToolResult {
        /// Id of the request.
        id: String,
        /// Name of the called tool.
        name: String,
        /// The payload or fault.
        outcome: ToolResult,
    },
    /// The run ended. Always the last event.
    Finished(RunResult),
}

/// The output side of one submission.
///
/// Events arrive in order and the stream always ends with
/// [`RunEvent::Finished`]. Dropping a `Run` does not cancel it.
pub struct Run {
    pub(crate) events: mpsc::UnboundedReceiver<RunEvent>,
    pub(crate) cancel_handle: CancelHandle,
    pub(crate) finished: bool,
}

impl Run {
    /// Waits for the next event, returning `None` after the run finished.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        if self.finished {
            return None;
        }
        let event = match self.events.recv().await {
            Some(event) => event,
            // The agent went away without reporting an outcome.
            None => RunEvent::Finished(RunResult::failure(
                FailureKind::Internal,
                "the agent stopped before the run finished",
            )),
        };
        if matches!(event, RunEvent::Finished(_)) {
            self.finished = true;
        }
        Some(event)
    }

    /// Drains the remaining events and returns the result.
    pub async fn result(mut self) -> RunResult {
        while let Some(event) = self.next_event().await {
            if let RunEvent::Finished(result) = event {
                return result;
            }
        }
        RunResult::failure(
            FailureKind::Internal,
            "the run result was already taken",
        )
    }

    /// Cancels the run.
    ///
    /// In-flight model and tool calls are aborted, and the run finishes
    /// with a [`FailureKind::Cancelled`] failure. Cancelling a finished run
    /// does nothing.
    #[inline]
    pub fn cancel(&self) {
        self.cancel_handle.cancel();
    }

    /// Returns a handle that cancels this run from elsewhere.
    #[inline]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel_handle.clone()
    }
}

/// Cancels the run it was taken from.
#[derive(Clone)]
pub struct CancelHandle(pub(crate) Arc<dyn Fn() + Send + Sync>);

impl CancelHandle {
    /// See [`Run::cancel`].
    #[inline]
    pub fn cancel(&self) {
        (self.0)();
    }
}

impl Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CancelHandle")
    }
}

impl Debug for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Run")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
