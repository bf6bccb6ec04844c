mod builder;
mod state;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use simpleagent_actor::define_actor;
use simpleagent_model::ModelTool;
use tokio::sync::{Semaphore, mpsc, oneshot};

pub use builder::AgentBuilder;
use state::{CancelRun, RunningTask, Snapshot, StartRun};

use crate::conversation::Conversation;
use crate::model_client::ModelClient;
use crate::run::{CancelHandle, FailureKind, Run, RunEvent, RunResult};
use crate::tool::ToolRegistry;
use crate::{AgentOptions, ConfigError};

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

define_actor! {
    /// An agent instance, which owns a conversation, a model client and the
    /// tools the model may call.
    ///
    /// Every submission becomes one run that alternates between asking the
    /// model and executing the tools it requests, until the model answers in
    /// plain text or the run fails. Only one run is active at a time.
    ///
    /// Messages dispatched to the agent are handled immediately, no matter
    /// which stage the active run is in. Model and tool calls run on their
    /// own tasks and report back with messages, so a cancellation is
    /// processed even while a tool hangs.
    pub actor Agent(AgentState);
}

pub struct AgentState {
    model_client: ModelClient,
    registry: Arc<ToolRegistry>,
    model_tools: Vec<ModelTool>,
    options: AgentOptions,
    system_prompt: Option<String>,
    conversation: Conversation,
    run: Option<state::RunContext>,
    running_tasks: HashMap<u64, RunningTask>,
    next_task_id: u64,
    tool_permits: Arc<Semaphore>,
}

impl Agent {
    /// Submits a user input and starts a run for it.
    ///
    /// If the previous run has not finished, the returned run immediately
    /// finishes with [`FailureKind::SessionBusy`] and the conversation is
    /// left untouched.
    pub fn submit<S: Into<String>>(&self, input: S) -> Run {
        let run_id = NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed);
        let (events_tx, events) = mpsc::unbounded_channel();

        let weak = self.addr().downgrade();
        let cancel_handle = CancelHandle(Arc::new(move || {
            weak.send(CancelRun { run_id }).ok();
        }));

        let msg = StartRun {
            run_id,
            input: input.into(),
            events: events_tx.clone(),
        };
        if self.addr().send(msg).is_err() {
            events_tx
                .send(RunEvent::Finished(RunResult::failure(
                    FailureKind::Internal,
                    "the agent has stopped",
                )))
                .ok();
        }

        Run {
            events,
            cancel_handle,
            finished: false,
        }
    }

    /// Returns a copy of the conversation so far.
    ///
    /// While a run is active, the copy includes its turns up to now.
    pub async fn conversation(&self) -> Conversation {
        let (tx, rx) = oneshot::channel();
        if self.addr().send(Snapshot(tx)).is_err() {
            return Conversation::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Stops the agent. An active run finishes as cancelled.
    #[inline]
    pub fn shutdown(&self) {
        self.addr().stop();
    }
}

impl Agent {
    fn spawn_from_builder(builder: AgentBuilder) -> Result<Self, ConfigError> {
        let AgentBuilder {
            model_client,
            registry,
            options,
            system_prompt,
        } = builder;
        options.validate()?;

        let model_client =
            model_client.with_retry_policy(options.retry_policy());
        let tool_permits =
            Arc::new(Semaphore::new(options.max_concurrent_tools));
        let state = AgentState {
            model_client,
            model_tools: registry.model_tools(),
            registry: Arc::clone(&registry),
            tool_permits,
            options,
            system_prompt,
            conversation: Default::default(),
            run: None,
            running_tasks: Default::default(),
            next_task_id: 1,
        };
        info!("starting agent with {} tools", registry.len());
        Ok(Self::spawn(state, "agent"))
    }
}
