//! A local fake model for testing purpose.

mod preset;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use simpleagent_model::{
    ErrorKind, ModelFinishReason, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    events: Vec<PresetEvent>,
    delay: Duration,
    event_idx: usize,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        // SAFETY: This type does not require to be pinned.
        let this = unsafe { self.get_unchecked_mut() };

        if let Some(sleep) = &mut this.sleep {
            let sleep = sleep.as_mut();
            ready!(sleep.poll(cx));
            this.sleep = None;

            if this.event_idx < this.events.len() {
                let event = match &this.events[this.event_idx] {
                    PresetEvent::MessageDelta(msg) => {
                        ModelResponseEvent::MessageDelta(msg.clone())
                    }
                    PresetEvent::ToolCall(req) => {
                        ModelResponseEvent::ToolCall(req.clone())
                    }
                };
                this.event_idx += 1;
                return Poll::Ready(Ok(Some(event)));
            } else if this.event_idx == this.events.len() {
                this.event_idx += 1;
                let has_tool_call = this
                    .events
                    .iter()
                    .any(|event| matches!(event, PresetEvent::ToolCall(_)));
                return Poll::Ready(Ok(Some(ModelResponseEvent::Completed(
                    if has_tool_call {
                        ModelFinishReason::ToolCalls
                    } else {
                        ModelFinishReason::Stop
                    },
                ))));
            } else {
                // In case this method is called after completion.
                return Poll::Ready(Ok(None));
            }
        }
        this.sleep = Some(Box::pin(sleep(this.delay)));
        Pin::new(this).poll_next_event(cx)
    }
}

#[derive(Clone)]
enum ConversationStep {
    UserInput,
    AssistantResponse(PresetResponse),
    ToolResult,
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup the conversation script, which
/// is how the model should respond to a request. The step is selected by the
/// number of non-system messages in the request, so tool results occupy
/// script slots too (see [`TestModelProvider::add_tool_result_steps`]). If
/// the script has no step for a request, the fallback response is used when
/// set, otherwise an error is returned.
///
/// Clones share request and failure counters, so a test can keep a clone to
/// inspect the provider after handing it to an agent.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    conversation_script: Vec<ConversationStep>,
    fallback: Option<PresetResponse>,
    delay: Option<Duration>,
    attempts: Arc<Mutex<HashMap<usize, u64>>>,
    requests: Arc<AtomicUsize>,
}

impl TestModelProvider {
    #[inline]
    pub fn add_assistant_response_step(&mut self, preset: PresetResponse) {
        self.conversation_script
            .push(ConversationStep::AssistantResponse(preset));
    }

    #[inline]
    pub fn add_user_input_step(&mut self) {
        self.conversation_script.push(ConversationStep::UserInput);
    }

    /// Reserves script slots for `count` tool results.
    #[inline]
    pub fn add_tool_result_steps(&mut self, count: usize) {
        for _ in 0..count {
            self.conversation_script.push(ConversationStep::ToolResult);
        }
    }

    /// Sets a response for every request beyond the script.
    #[inline]
    pub fn set_fallback_response(&mut self, preset: PresetResponse) {
        self.fallback = Some(preset);
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns how many requests were sent to this provider, failed
    /// attempts included.
    #[inline]
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn resolve_step(
        &self,
        req: &ModelRequest,
    ) -> Result<PresetResponse, Error> {
        let step_idx = req
            .messages
            .iter()
            .filter(|msg| !matches!(msg, ModelMessage::System(_)))
            .count();
        let step = match self.conversation_script.get(step_idx) {
            Some(step) => step.clone(),
            None => match &self.fallback {
                Some(fallback) => {
                    ConversationStep::AssistantResponse(fallback.clone())
                }
                None => {
                    return Err(Error {
                        message: "no enough steps",
                        kind: ErrorKind::Other,
                    });
                }
            },
        };
        let preset = match step {
            ConversationStep::AssistantResponse(preset) => preset,
            ConversationStep::UserInput | ConversationStep::ToolResult => {
                return Err(Error {
                    message: "not an assistant response step",
                    kind: ErrorKind::InvalidRequest,
                });
            }
        };

        if let Some(failures) = preset.failures {
            let mut attempts = self
                .attempts
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let attempt = attempts.entry(step_idx).or_default();
            *attempt += 1;
            if failures == 0 || *attempt <= failures {
                return Err(Error {
                    message: "preset failure",
                    kind: preset.failure_kind.unwrap_or(ErrorKind::Network),
                });
            }
        }
        Ok(preset)
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let resp = self.resolve_step(req).map(|preset| TestModelResponse {
            events: preset.events,
            delay: self.delay.unwrap_or(Duration::from_millis(1)),
            event_idx: 0,
            sleep: None,
        });
        ready(resp)
    }
}
