use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use pin_project_lite::pin_project;
use serde_json::Value;
use simpleagent_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    ToolCallRequest,
};

use crate::Error;
use crate::io::{Sse, SseError};
use crate::proto::{ChatCompletionChunk, ErrorBody, ToolCall};

struct PartialState {
    sse: Sse,
    id: Option<String>,
    tool_calls: Vec<ToolCall>,
    // Indices of tool calls that have started streaming but are not yet
    // handed out. They are emitted once the stream moves past them, since
    // arguments arrive in fragments.
    pending_tool_call_idx: VecDeque<usize>,
    // Cleared after the response returns the complete event.
    pending_finish_reason: Option<ModelFinishReason>,
    exhausted: bool,
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            tool_calls: Default::default(),
            pending_tool_call_idx: Default::default(),
            pending_finish_reason: Default::default(),
            exhausted: false,
        };
        let next_event_fut = async move { next_event(partial_state).await };
        Self {
            next_event_fut: Some(Box::pin(next_event_fut)),
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, _)) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        let next_event_fut = async move { next_event(partial_state).await };
        *this.next_event_fut = Some(Box::pin(next_event_fut));

        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(
    mut partial_state: PartialState,
) -> Result<(Option<ModelResponseEvent>, PartialState), Error> {
    let mut message_delta = None;

    // Stop pulling once a finish reason is pending, the buffered tool calls
    // and the completion event are handed out first.
    while !partial_state.exhausted
        && partial_state.pending_finish_reason.is_none()
    {
        let sse_event = match partial_state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                partial_state.exhausted = true;
                break;
            }
            Err(SseError::ChunksError(err)) => {
                return Err(Error::new(err.0, ErrorKind::Network));
            }
            Err(err) => {
                return Err(Error::new(format!("{err:?}"), ErrorKind::Other));
            }
        };
        trace!("got sse event: {sse_event}");
        if sse_event == "[DONE]" {
            partial_state.exhausted = true;
            break;
        }

        let mut chunk = match serde_json::from_str::<ChatCompletionChunk>(
            &sse_event,
        ) {
            Ok(chunk) => chunk,
            Err(err) => {
                // Some gateways report failures in-band after a 200 status.
                if let Ok(body) = serde_json::from_str::<ErrorBody>(&sse_event)
                {
                    return Err(Error::new(
                        body.error.message,
                        ErrorKind::ServerError,
                    ));
                }
                return Err(Error::new(format!("{err}"), ErrorKind::Other));
            }
        };
        if partial_state.id.get_or_insert_with(|| chunk.id.clone()) != &chunk.id
        {
            return Err(Error::new("chunk id mismatch", ErrorKind::Other));
        };

        // Usage-only chunks carry no choice.
        let Some(choice) = chunk.choices.pop() else {
            continue;
        };

        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            message_delta = Some(content);
        }
        if let Some(tool_calls) = choice.delta.tool_calls {
            merge_tool_calls(&mut partial_state, tool_calls);
        }
        if let Some(finish_reason) = choice.finish_reason {
            partial_state.pending_finish_reason =
                Some(if finish_reason == "tool_calls" {
                    ModelFinishReason::ToolCalls
                } else {
                    ModelFinishReason::Stop
                });
        }

        if message_delta.is_some() {
            break;
        }
    }

    // The order of events are important. Always emit message delta first, then
    // emit pending tool calls, and finally emit pending finish reason if any.
    // Tool calls are only handed out once the stream has moved to the finish
    // reason, when their argument fragments are complete.

    if let Some(message_delta) = message_delta {
        return Ok((
            Some(ModelResponseEvent::MessageDelta(message_delta)),
            partial_state,
        ));
    }

    if let Some(idx) = partial_state.pending_tool_call_idx.pop_front() {
        let request = tool_call_request(&partial_state.tool_calls[idx]);
        return Ok((Some(ModelResponseEvent::ToolCall(request)), partial_state));
    }

    if let Some(finish_reason) = partial_state.pending_finish_reason.take() {
        return Ok((
            Some(ModelResponseEvent::Completed(finish_reason)),
            partial_state,
        ));
    }

    Ok((None, partial_state))
}

fn merge_tool_calls(
    partial_state: &mut PartialState,
    tool_calls: Vec<ToolCall>,
) {
    for tool_call in tool_calls {
        let Some(partial_tool_call) = partial_state
            .tool_calls
            .iter_mut()
            .find(|t| t.index == tool_call.index)
        else {
            partial_state
                .pending_tool_call_idx
                .push_back(partial_state.tool_calls.len());
            partial_state.tool_calls.push(tool_call);
            continue;
        };
        // Patch the partial tool call.
        if let Some(id) = tool_call.id {
            partial_tool_call.id.get_or_insert_default().push_str(&id);
        }
        if let Some(ty) = tool_call.r#type {
            partial_tool_call.r#type.get_or_insert_default().push_str(&ty);
        }
        if let Some(function) = tool_call.function {
            match partial_tool_call.function {
                Some(ref mut partial_func) => {
                    if let Some(name) = function.name {
                        partial_func
                            .name
                            .get_or_insert_default()
                            .push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        partial_func
                            .arguments
                            .get_or_insert_default()
                            .push_str(&arguments);
                    }
                }
                None => partial_tool_call.function = Some(function),
            }
        }
    }
}

/// Arguments that are not valid JSON are passed through as a string, so the
/// tool rejects them and the model gets to see why.
fn tool_call_request(tool_call: &ToolCall) -> ToolCallRequest {
    let id = tool_call.id.clone().unwrap_or_default();
    let name = tool_call
        .function
        .as_ref()
        .and_then(|f| f.name.clone())
        .unwrap_or_default();
    let raw_arguments = tool_call
        .function
        .as_ref()
        .and_then(|f| f.arguments.as_deref())
        .unwrap_or_default();
    let arguments = if raw_arguments.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str::<Value>(raw_arguments)
            .unwrap_or_else(|_| Value::String(raw_arguments.to_owned()))
    };
    ToolCallRequest {
        id,
        name,
        arguments,
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::io::Chunks;

    type Collected = (String, Vec<ToolCallRequest>, Option<ModelFinishReason>);

    async fn collect(body: &'static [u8]) -> Result<Collected, Error> {
        let chunks = Chunks::from_vec_deque(
            vec![Bytes::from_static(body)].into(),
        );
        let mut resp = pin!(OpenAIResponse::from_sse(Sse::new(chunks)));
        let mut text = String::new();
        let mut tool_calls = vec![];
        let mut finish_reason = None;
        while let Some(event) =
            poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await?
        {
            match event {
                ModelResponseEvent::MessageDelta(delta) => {
                    text.push_str(&delta);
                }
                ModelResponseEvent::ToolCall(req) => tool_calls.push(req),
                ModelResponseEvent::Completed(reason) => {
                    finish_reason = Some(reason);
                }
            }
        }
        Ok((text, tool_calls, finish_reason))
    }

    #[tokio::test]
    async fn test_tool_call_events() {
        let (text, tool_calls, finish_reason) =
            collect(include_bytes!("../fixtures/test_response.txt"))
                .await
                .unwrap();
        assert_eq!(text, "Let me check both cities.");
        assert_eq!(finish_reason, Some(ModelFinishReason::ToolCalls));
        assert_eq!(tool_calls.len(), 2);
        assert_eq!(tool_calls[0].id, "call_boston");
        assert_eq!(tool_calls[0].name, "weather");
        assert_eq!(tool_calls[0].arguments, json!({ "city": "Boston" }));
        assert_eq!(tool_calls[1].id, "call_paris");
        assert_eq!(tool_calls[1].arguments, json!({ "city": "Paris" }));
    }

    #[tokio::test]
    async fn test_text_only_events() {
        let body = b"data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\"It's 61\"},\"finish_reason\":null}]}\n\n\
data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\"\xC2\xB0F.\"},\"finish_reason\":null}]}\n\n\
data: {\"id\":\"c1\",\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n\
data: {\"id\":\"c1\",\"choices\":[]}\n\n\
data: [DONE]\n\n";
        let (text, tool_calls, finish_reason) = collect(body).await.unwrap();
        assert_eq!(text, "It's 61°F.");
        assert!(tool_calls.is_empty());
        assert_eq!(finish_reason, Some(ModelFinishReason::Stop));
    }

    #[tokio::test]
    async fn test_malformed_arguments_pass_through() {
        let body = b"data: {\"id\":\"c2\",\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"type\":\"function\",\"function\":{\"name\":\"weather\",\"arguments\":\"{city:\"}}]},\"finish_reason\":null}]}\n\n\
data: {\"id\":\"c2\",\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n";
        let (_, tool_calls, _) = collect(body).await.unwrap();
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].arguments, json!("{city:"));
    }

    #[tokio::test]
    async fn test_in_band_error() {
        let body = b"data: {\"error\":{\"message\":\"overloaded\"}}\n\n";
        let err = collect(body).await.unwrap_err();
        assert_eq!(err.message(), "overloaded");
        let kind = simpleagent_model::ModelProviderError::kind(&err);
        assert!(kind.is_transient());
    }
}
