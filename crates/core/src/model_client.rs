use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use backoff::future::retry;
use simpleagent_model::{
    ModelFinishReason, ModelProvider, ModelProviderError, ModelRequest,
    ModelResponse, ModelResponseEvent, ToolCallRequest,
};
use tracing::Instrument;

pub type DeltaFn = Arc<dyn Fn(String) + Send + Sync>;
pub type ModelError = Box<dyn ModelProviderError>;

/// A failed attempt. `streamed` is set once any delta reached the caller,
/// after which the attempt cannot be repeated without duplicating output.
struct AttemptError {
    error: ModelError,
    streamed: bool,
}

type AttemptResult = Result<ModelReply, AttemptError>;
type BoxedAttemptFuture = Pin<Box<dyn Future<Output = AttemptResult> + Send>>;
#[rustfmt::skip]
type HandlerFn = Arc<
    dyn Fn(ModelRequest, DeltaFn) -> BoxedAttemptFuture + Send + Sync
>;

/// How failed model calls are retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }
}

/// A wrapper around a model provider that maintains an execution
/// environment for the provider and provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
    retry_policy: RetryPolicy,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(
        provider: P,
        retry_policy: RetryPolicy,
    ) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let handler_fn: HandlerFn = Arc::new(move |req, on_delta| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("got a request: {:?}", req);
                    let resp_or_err = fut.await;
                    handle_response::<P>(resp_or_err, on_delta).await
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self {
            handler_fn,
            retry_policy,
        }
    }

    #[inline]
    pub fn with_retry_policy(self, retry_policy: RetryPolicy) -> Self {
        Self {
            handler_fn: self.handler_fn,
            retry_policy,
        }
    }

    /// Sends a request and collects the complete reply.
    ///
    /// Transient failures are retried with exponential backoff, up to the
    /// attempt limit of the retry policy. Text deltas are passed to
    /// `on_delta` as they arrive; once a delta went out, a failure of that
    /// attempt is no longer retried.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    pub async fn infer(
        &self,
        req: ModelRequest,
        on_delta: DeltaFn,
    ) -> Result<ModelReply, ModelError> {
        let policy = self.retry_policy;
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(policy.initial_backoff)
            .with_max_interval(policy.max_backoff)
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0;
        retry(backoff, || {
            attempt += 1;
            let this_attempt = attempt;
            let fut = (self.handler_fn)(req.clone(), Arc::clone(&on_delta));
            async move {
                let AttemptError { error, streamed } = match fut.await {
                    Ok(reply) => return Ok(reply),
                    Err(err) => err,
                };
                let kind = error.kind();
                if kind.is_transient()
                    && !streamed
                    && this_attempt < policy.max_attempts
                {
                    warn!(
                        "model call attempt {this_attempt} failed ({kind}), \
                         will retry: {error}"
                    );
                    Err(backoff::Error::transient(error))
                } else {
                    error!(
                        "model call failed after {this_attempt} attempt(s) \
                         ({kind}): {error}"
                    );
                    Err(backoff::Error::permanent(error))
                }
            }
        })
        .await
    }
}

/// A completely received response from the model client.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelReply {
    pub text: String,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCallRequest>,
    /// The reason the model finished generating.
    pub finish_reason: Option<ModelFinishReason>,
}

async fn handle_response<P: ModelProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
    on_delta: DeltaFn,
) -> AttemptResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            debug!("request failed: {err:?}");
            return Err(AttemptError {
                error: Box::new(err),
                streamed: false,
            });
        }
    };

    let mut reply = ModelReply::default();

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(event) => event,
            Err(err) => {
                debug!("response stream failed: {err:?}");
                return Err(AttemptError {
                    error: Box::new(err),
                    streamed: !reply.text.is_empty(),
                });
            }
        };

        let Some(event) = event else {
            break;
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(msg) => {
                reply.text.push_str(&msg);
                on_delta(msg);
            }
            ModelResponseEvent::ToolCall(req) => {
                reply.tool_calls.push(req);
            }
            ModelResponseEvent::Completed(reason) => {
                reply.finish_reason = Some(reason);
            }
        }
    }

    trace!("finished a request");

    Ok(reply)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use simpleagent_model::{ErrorKind, ModelMessage};
    use simpleagent_test_model::{
        PresetEvent, PresetResponse, TestModelProvider,
    };

    use super::*;

    const POLICY: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(500),
        max_backoff: Duration::from_secs(8),
    };

    fn hello() -> ModelRequest {
        ModelRequest {
            messages: vec![ModelMessage::User("Hi".to_owned())],
            tools: vec![],
        }
    }

    fn scripted(preset: PresetResponse) -> TestModelProvider {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_user_input_step();
        model_provider.add_assistant_response_step(preset);
        model_provider
    }

    #[tokio::test]
    async fn test_send_request() {
        let model_provider = scripted(PresetResponse::with_events([
            PresetEvent::MessageDelta("How ".to_owned()),
            PresetEvent::MessageDelta("are ".to_owned()),
            PresetEvent::MessageDelta("you?".to_owned()),
        ]));
        let model_client = ModelClient::new(model_provider, POLICY);

        let deltas = Arc::new(Mutex::new(Vec::<String>::new()));
        let on_delta: DeltaFn = {
            let deltas = Arc::clone(&deltas);
            Arc::new(move |delta: String| deltas.lock().unwrap().push(delta))
        };
        let reply = model_client.infer(hello(), on_delta).await.unwrap();
        assert_eq!(reply.text, "How are you?");
        assert_eq!(reply.finish_reason, Some(ModelFinishReason::Stop));
        assert!(reply.tool_calls.is_empty());
        assert_eq!(*deltas.lock().unwrap(), ["How ", "are ", "you?"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let model_provider = scripted(
            PresetResponse::with_events([PresetEvent::MessageDelta(
                "Hello".to_owned(),
            )])
            .with_failures(2)
            .with_failure_kind(ErrorKind::RateLimitExceeded),
        );
        let counter = model_provider.clone();
        let model_client = ModelClient::new(model_provider, POLICY);

        let reply = model_client
            .infer(hello(), Arc::new(|_: String| {}))
            .await
            .unwrap();
        assert_eq!(reply.text, "Hello");
        assert_eq!(counter.request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let model_provider = scripted(
            PresetResponse::with_events(Vec::<PresetEvent>::new())
                .with_failures(0),
        );
        let counter = model_provider.clone();
        let model_client = ModelClient::new(model_provider, POLICY);

        let err = model_client
            .infer(hello(), Arc::new(|_: String| {}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(counter.request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failures_are_not_retried() {
        let model_provider = scripted(
            PresetResponse::with_events(Vec::<PresetEvent>::new())
                .with_failures(0)
                .with_failure_kind(ErrorKind::Authentication),
        );
        let counter = model_provider.clone();
        let model_client = ModelClient::new(model_provider, POLICY);

        let err = model_client
            .infer(hello(), Arc::new(|_: String| {}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(counter.request_count(), 1);
    }
}
