use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use simpleagent_actor::{ActorState, Addr, Message};
use simpleagent_model::{ModelFinishReason, ModelRequest, ToolCallRequest};
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio::time::timeout;
use tracing::Instrument;

use super::AgentState;
use crate::conversation::{Conversation, Turn};
use crate::model_client::{DeltaFn, ModelError, ModelReply};
use crate::run::{FailureKind, RunEvent, RunResult};
use crate::tool::{BoxToolFuture, Error as ToolError, ToolResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for the model.
    Reasoning,
    /// Waiting for the tools requested by the last assistant turn.
    Acting,
    Done,
    Failed,
}

/// Bookkeeping of the active run.
pub struct RunContext {
    id: u64,
    stage: Stage,
    events: mpsc::UnboundedSender<RunEvent>,
    /// Conversation length before the run's user turn.
    rollback_len: usize,
    /// Model calls made so far.
    steps: usize,
    /// Tool calls of the current `Acting` stage, in request order.
    calls: Vec<PendingCall>,
}

impl RunContext {
    #[inline]
    fn emit(&self, event: RunEvent) {
        self.events.send(event).ok();
    }

    fn set_stage(&mut self, stage: Stage) {
        trace!("run {}: {:?} -> {:?}", self.id, self.stage, stage);
        self.stage = stage;
    }
}

struct PendingCall {
    request: ToolCallRequest,
    outcome: Option<ToolResult>,
}

pub struct RunningTask {
    run_id: u64,
    abort: AbortHandle,
}

impl AgentState {
    #[inline]
    fn active_run(&self, run_id: u64) -> Option<&RunContext> {
        self.run.as_ref().filter(|run| run.id == run_id)
    }

    fn start_run(&mut self, msg: StartRun, addr: &Addr<Self>) {
        let StartRun {
            run_id,
            input,
            events,
        } = msg;
        if let Some(run) = &self.run {
            debug!("rejecting run {run_id}, run {} is still active", run.id);
            events
                .send(RunEvent::Finished(RunResult::failure(
                    FailureKind::SessionBusy,
                    "the previous submission has not finished yet",
                )))
                .ok();
            return;
        }

        debug!("run {run_id} started");
        let rollback_len = self.conversation.len();
        self.conversation.push(Turn::User(input));
        self.run = Some(RunContext {
            id: run_id,
            stage: Stage::Reasoning,
            events,
            rollback_len,
            steps: 0,
            calls: vec![],
        });
        self.reason(addr);
    }

    /// Asks the model for the next step.
    fn reason(&mut self, addr: &Addr<Self>) {
        let Some(run) = &self.run else {
            return;
        };
        let (run_id, steps) = (run.id, run.steps);
        if steps >= self.options.max_steps {
            self.finish(RunResult::failure(
                FailureKind::StepBudgetExceeded,
                format!("no final answer after {steps} model calls"),
            ));
            return;
        }
        if let Err(err) = self.conversation.check_turn_order() {
            self.finish(RunResult::failure(
                FailureKind::InvariantViolation,
                format!("conversation out of order, {err}"),
            ));
            return;
        }

        let request = ModelRequest {
            messages: self
                .conversation
                .to_model_messages(self.system_prompt.as_deref()),
            tools: self.model_tools.clone(),
        };
        let events = run.events.clone();
        let on_delta: DeltaFn = Arc::new(move |delta| {
            events.send(RunEvent::Delta(delta)).ok();
        });
        if let Some(run) = &mut self.run {
            run.steps += 1;
        }

        let model_client = self.model_client.clone();
        let weak = addr.downgrade();
        let step = steps + 1;
        self.spawn_task(
            run_id,
            async move {
                let result = model_client.infer(request, on_delta).await;
                weak.send(ModelFinished { run_id, result }).ok();
            }
            .instrument(debug_span!("reasoning", run_id, step)),
            addr,
        );
    }

    fn on_model_finished(
        &mut self,
        run_id: u64,
        result: Result<ModelReply, ModelError>,
        addr: &Addr<Self>,
    ) {
        let stage = self.active_run(run_id).map(|run| run.stage);
        if stage != Some(Stage::Reasoning) {
            debug!("dropping a stale model reply of run {run_id}");
            return;
        }

        let reply = match result {
            Ok(reply) => reply,
            Err(err) => {
                self.finish(RunResult::failure(
                    FailureKind::Model,
                    format!("{}: {err}", err.kind()),
                ));
                return;
            }
        };
        if let Err(reason) = check_reply(&reply) {
            self.finish(RunResult::failure(
                FailureKind::MalformedResponse,
                reason,
            ));
            return;
        }

        let ModelReply {
            text, tool_calls, ..
        } = reply;
        self.conversation.push(Turn::Assistant {
            text: text.clone(),
            tool_requests: tool_calls.clone(),
        });
        if tool_calls.is_empty() {
            self.finish(RunResult::FinalAnswer(text));
        } else {
            self.dispatch(run_id, tool_calls, addr);
        }
    }

    /// Starts every requested tool call at once.
    fn dispatch(
        &mut self,
        run_id: u64,
        requests: Vec<ToolCallRequest>,
        addr: &Addr<Self>,
    ) {
        let Some(run) = &mut self.run else {
            return;
        };
        run.set_stage(Stage::Acting);
        run.calls = requests
            .iter()
            .map(|request| PendingCall {
                request: request.clone(),
                outcome: None,
            })
            .collect();
        let events = run.events.clone();

        let registry = Arc::clone(&self.registry);
        for request in requests {
            events.send(RunEvent::ToolCall(request.clone())).ok();
            let ToolCallRequest {
                id,
                name,
                arguments,
            } = request;
            match registry.resolve(&name) {
                Ok(descriptor) => {
                    let invocation = registry.invoke(descriptor, arguments);
                    self.spawn_tool(run_id, id, name, invocation, addr);
                }
                Err(err) => {
                    warn!("model requested an unknown tool: {name}");
                    // Cannot fail, the call was registered just above.
                    self.resolve_call(&id, Err(err)).ok();
                }
            }
        }
        self.try_join(addr);
    }

    fn spawn_tool(
        &mut self,
        run_id: u64,
        call_id: String,
        tool_name: String,
        invocation: BoxToolFuture,
        addr: &Addr<Self>,
    ) {
        let permits = Arc::clone(&self.tool_permits);
        let limit = self.options.tool_timeout;
        let weak = addr.downgrade();
        let span = debug_span!("tool execute", tool = %tool_name, %call_id);
        self.spawn_task(
            run_id,
            async move {
                let outcome = execute_tool(invocation, permits, limit).await;
                weak.send(ToolFinished {
                    run_id,
                    call_id,
                    outcome,
                })
                .ok();
            }
            .instrument(span),
            addr,
        );
    }

    fn on_tool_finished(
        &mut self,
        run_id: u64,
        call_id: String,
        outcome: ToolResult,
        addr: &Addr<Self>,
    ) {
        let Some(run) = self.active_run(run_id) else {
            debug!("dropping a stale tool result of run {run_id}");
            return;
        };
        let checked = if run.stage == Stage::Acting {
            self.resolve_call(&call_id, outcome)
        } else {
            Err(format!("tool result for `{call_id}` while not acting"))
        };
        match checked {
            Ok(()) => self.try_join(addr),
            Err(reason) => self.finish(RunResult::failure(
                FailureKind::InvariantViolation,
                reason,
            )),
        }
    }

    /// Records the outcome of one pending call, exactly once.
    fn resolve_call(
        &mut self,
        call_id: &str,
        outcome: ToolResult,
    ) -> Result<(), String> {
        let Some(run) = &mut self.run else {
            return Err("no active run".to_owned());
        };
        let Some(call) =
            run.calls.iter_mut().find(|call| call.request.id == call_id)
        else {
            return Err(format!("tool result for unknown call `{call_id}`"));
        };
        if call.outcome.is_some() {
            return Err(format!("second tool result for call `{call_id}`"));
        }
        match &outcome {
            Ok(_) => debug!("tool call {call_id} succeeded"),
            Err(err) => debug!("tool call {call_id} failed: {err}"),
        }
        run.events
            .send(RunEvent::ToolResult {
                id: call.request.id.clone(),
                name: call.request.name.clone(),
                outcome: outcome.clone(),
            })
            .ok();
        call.outcome = Some(outcome);
        Ok(())
    }

    /// Folds the tool results into the conversation once all of them are
    /// in, then goes back to reasoning.
    fn try_join(&mut self, addr: &Addr<Self>) {
        let Some(run) = &mut self.run else {
            return;
        };
        if run.stage != Stage::Acting
            || run.calls.iter().any(|call| call.outcome.is_none())
        {
            return;
        }

        let calls = std::mem::take(&mut run.calls);
        run.set_stage(Stage::Reasoning);
        for PendingCall { request, outcome } in calls {
            self.conversation.push(Turn::ToolResult {
                request_id: request.id,
                tool_name: request.name,
                outcome: outcome.unwrap_or_else(|| Err(ToolError::cancelled())),
            });
        }
        self.reason(addr);
    }

    /// Ends the active run. Failed runs leave no trace in the conversation.
    fn finish(&mut self, result: RunResult) {
        let Some(mut run) = self.run.take() else {
            return;
        };
        let run_id = run.id;
        for task in self.running_tasks.values() {
            if task.run_id == run_id {
                task.abort.abort();
            }
        }

        match &result {
            RunResult::FinalAnswer(_) => {
                run.set_stage(Stage::Done);
                info!("run {run_id} answered after {} model calls", run.steps);
            }
            RunResult::Failure(failure) => {
                run.set_stage(Stage::Failed);
                for call in &run.calls {
                    if call.outcome.is_none() {
                        run.emit(RunEvent::ToolResult {
                            id: call.request.id.clone(),
                            name: call.request.name.clone(),
                            outcome: Err(ToolError::cancelled().with_reason(
                                "the run ended before the call resolved",
                            )),
                        });
                    }
                }
                self.conversation.truncate(run.rollback_len);
                warn!("run {run_id} failed: {failure}");
            }
        }
        run.emit(RunEvent::Finished(result));
    }

    fn spawn_task<F>(&mut self, run_id: u64, fut: F, addr: &Addr<Self>)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task_id = self.next_task_id;
        self.next_task_id += 1;

        let task = tokio::spawn(fut);
        let abort = task.abort_handle();
        let weak = addr.downgrade();
        tokio::spawn(async move {
            let panic = match task.await {
                Err(err) if err.is_panic() => Some(panic_message(err)),
                _ => None,
            };
            weak.send(TaskEnded { task_id, panic }).ok();
        });
        self.running_tasks
            .insert(task_id, RunningTask { run_id, abort });
    }
}

impl ActorState for AgentState {
    fn on_stop(&mut self) {
        self.finish(RunResult::failure(
            FailureKind::Cancelled,
            "the agent stopped",
        ));
        for (_, task) in self.running_tasks.drain() {
            task.abort.abort();
        }
    }
}

/// Rejects replies the run cannot act upon.
fn check_reply(reply: &ModelReply) -> Result<(), String> {
    let mut ids = HashSet::with_capacity(reply.tool_calls.len());
    for call in &reply.tool_calls {
        if call.id.is_empty() {
            return Err(format!("tool call to `{}` has no id", call.name));
        }
        if call.name.is_empty() {
            return Err(format!("tool call `{}` has no tool name", call.id));
        }
        if !ids.insert(call.id.as_str()) {
            return Err(format!("tool call id `{}` is used twice", call.id));
        }
    }
    if reply.tool_calls.is_empty()
        && reply.finish_reason == Some(ModelFinishReason::ToolCalls)
    {
        return Err("the model stopped for tool calls but requested none"
            .to_owned());
    }
    Ok(())
}

/// Aborts the task when dropped, so a timed out call stops running.
struct AbortOnDrop(JoinHandle<ToolResult>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs one invocation on its own task, bounded by `limit`.
///
/// The deadline counts from dispatch, so waiting for a concurrency permit
/// uses up the same budget. Every way the invocation can end, panics
/// included, becomes a `ToolResult`.
async fn execute_tool(
    invocation: BoxToolFuture,
    permits: Arc<Semaphore>,
    limit: Duration,
) -> ToolResult {
    let bounded = async move {
        let Ok(_permit) = permits.acquire_owned().await else {
            return Err(ToolError::cancelled());
        };
        let mut task = AbortOnDrop(tokio::spawn(invocation));
        match (&mut task.0).await {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => {
                let message = panic_message(err);
                error!("tool panicked: {message}");
                Err(ToolError::execution_error()
                    .with_reason(format!("the tool panicked: {message}")))
            }
            Err(_) => Err(ToolError::cancelled()),
        }
    };
    match timeout(limit, bounded).await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!("tool timed out after {limit:?}");
            Err(ToolError::timeout()
                .with_reason(format!("no result within {limit:?}")))
        }
    }
}

fn panic_message(err: JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[derive(Debug)]
pub struct StartRun {
    pub run_id: u64,
    pub input: String,
    pub events: mpsc::UnboundedSender<RunEvent>,
}

impl Message<AgentState> for StartRun {
    fn handle(self, state: &mut AgentState, addr: &Addr<AgentState>) {
        state.start_run(self, addr);
    }
}

#[derive(Debug)]
pub struct CancelRun {
    pub run_id: u64,
}

impl Message<AgentState> for CancelRun {
    fn handle(self, state: &mut AgentState, _addr: &Addr<AgentState>) {
        if state.active_run(self.run_id).is_none() {
            debug!("run {} is not active, nothing to cancel", self.run_id);
            return;
        }
        state.finish(RunResult::failure(
            FailureKind::Cancelled,
            "the run was cancelled",
        ));
    }
}

#[derive(Debug)]
pub struct Snapshot(pub oneshot::Sender<Conversation>);

impl Message<AgentState> for Snapshot {
    #[inline]
    fn handle(self, state: &mut AgentState, _addr: &Addr<AgentState>) {
        self.0.send(state.conversation.clone()).ok();
    }
}

#[derive(Debug)]
struct ModelFinished {
    run_id: u64,
    result: Result<ModelReply, ModelError>,
}

impl Message<AgentState> for ModelFinished {
    fn handle(self, state: &mut AgentState, addr: &Addr<AgentState>) {
        state.on_model_finished(self.run_id, self.result, addr);
    }
}

#[derive(Debug)]
struct ToolFinished {
    run_id: u64,
    call_id: String,
    outcome: ToolResult,
}

impl Message<AgentState> for ToolFinished {
    fn handle(self, state: &mut AgentState, addr: &Addr<AgentState>) {
        state.on_tool_finished(self.run_id, self.call_id, self.outcome, addr);
    }
}

#[derive(Debug)]
struct TaskEnded {
    task_id: u64,
    panic: Option<String>,
}

impl Message<AgentState> for TaskEnded {
    fn handle(self, state: &mut AgentState, _addr: &Addr<AgentState>) {
        let Some(task) = state.running_tasks.remove(&self.task_id) else {
            return;
        };
        let Some(panic) = self.panic else {
            return;
        };
        error!("task {} panicked: {panic}", self.task_id);
        if state.active_run(task.run_id).is_some() {
            state.finish(RunResult::failure(
                FailureKind::Internal,
                format!("a background task panicked: {panic}"),
            ));
        }
    }
}
