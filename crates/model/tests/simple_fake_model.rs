use std::collections::VecDeque;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::task::{self, Poll};

use serde_json::json;
use simpleagent_model::{
    AssistantMessage, ErrorKind, ModelFinishReason, ModelMessage,
    ModelProvider, ModelProviderError, ModelRequest, ModelResponse,
    ModelResponseEvent, ModelTool, ToolCallRequest, ToolCallResult,
};

#[derive(Debug)]
struct FakeModelProviderError(ErrorKind);

impl Display for FakeModelProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for FakeModelProviderError {}

impl ModelProviderError for FakeModelProviderError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

#[derive(Debug)]
struct FakeModelResponse {
    events: VecDeque<ModelResponseEvent>,
}

impl ModelResponse for FakeModelResponse {
    type Error = FakeModelProviderError;

    fn poll_next_event(
        mut self: Pin<&mut Self>,
        _cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        Poll::Ready(Ok(self.events.pop_front()))
    }
}

/// Asks for the `weather` tool until a tool result is in the history, then
/// answers with the tool's content.
struct FakeWeatherModel;

impl ModelProvider for FakeWeatherModel {
    type Error = FakeModelProviderError;
    type Response = FakeModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let result = 'blk: {
            if req.messages.is_empty() {
                break 'blk Err(FakeModelProviderError(
                    ErrorKind::InvalidRequest,
                ));
            }
            if req.tools.iter().all(|t| t.name != "weather") {
                break 'blk Err(FakeModelProviderError(ErrorKind::Other));
            }

            let tool_result = req.messages.iter().find_map(|msg| match msg {
                ModelMessage::Tool(result) => Some(result.content.clone()),
                _ => None,
            });
            let events = match tool_result {
                Some(content) => vec![
                    ModelResponseEvent::MessageDelta(format!(
                        "Weather: {content}"
                    )),
                    ModelResponseEvent::Completed(ModelFinishReason::Stop),
                ],
                None => vec![
                    ModelResponseEvent::ToolCall(ToolCallRequest {
                        id: "call:1".to_owned(),
                        name: "weather".to_owned(),
                        arguments: json!({ "city": "Boston" }),
                    }),
                    ModelResponseEvent::Completed(ModelFinishReason::ToolCalls),
                ],
            };
            Ok(FakeModelResponse {
                events: events.into(),
            })
        };
        ready(result)
    }
}

async fn collect(
    mut resp: FakeModelResponse,
) -> (String, Vec<ToolCallRequest>, Option<ModelFinishReason>) {
    let mut text = String::new();
    let mut tool_calls = vec![];
    let mut finish_reason = None;
    while let Some(event) =
        std::future::poll_fn(|cx| Pin::new(&mut resp).poll_next_event(cx))
            .await
            .unwrap()
    {
        match event {
            ModelResponseEvent::MessageDelta(delta) => text.push_str(&delta),
            ModelResponseEvent::ToolCall(req) => tool_calls.push(req),
            ModelResponseEvent::Completed(reason) => {
                finish_reason = Some(reason)
            }
        }
    }
    (text, tool_calls, finish_reason)
}

fn weather_tool() -> ModelTool {
    ModelTool {
        name: "weather".to_owned(),
        description: "Looks up the weather of a city".to_owned(),
        parameters: json!({
            "type": "object",
            "properties": { "city": { "type": "string" } }
        }),
    }
}

#[tokio::test]
async fn test_tool_round_trip() {
    let provider = FakeWeatherModel;
    let mut req = ModelRequest {
        messages: vec![ModelMessage::User(
            "What's the weather in Boston?".to_owned(),
        )],
        tools: vec![weather_tool()],
    };

    let resp = provider.send_request(&req).await.unwrap();
    let (text, tool_calls, finish_reason) = collect(resp).await;
    assert!(text.is_empty());
    assert_eq!(finish_reason, Some(ModelFinishReason::ToolCalls));
    assert_eq!(tool_calls.len(), 1);
    assert_eq!(tool_calls[0].arguments, json!({ "city": "Boston" }));

    req.messages.push(ModelMessage::Assistant(AssistantMessage {
        content: text,
        tool_calls: tool_calls.clone(),
    }));
    req.messages.push(ModelMessage::Tool(ToolCallResult {
        id: tool_calls[0].id.clone(),
        name: tool_calls[0].name.clone(),
        content: r#"{"temp_f":61}"#.to_owned(),
        is_error: false,
    }));

    let resp = provider.send_request(&req).await.unwrap();
    let (text, tool_calls, finish_reason) = collect(resp).await;
    assert_eq!(text, r#"Weather: {"temp_f":61}"#);
    assert!(tool_calls.is_empty());
    assert_eq!(finish_reason, Some(ModelFinishReason::Stop));
}

#[tokio::test]
async fn test_error() {
    let provider = FakeWeatherModel;
    let req = ModelRequest {
        messages: vec![],
        tools: vec![weather_tool()],
    };
    let err = provider.send_request(&req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert!(!err.kind().is_transient());
}
