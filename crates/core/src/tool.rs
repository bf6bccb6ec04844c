//! Tool call supports.
//!
//! Tools come in three calling conventions, and all of them are normalized
//! into one contract before the orchestrator sees them: invoking a tool
//! with JSON arguments eventually yields a [`ToolResult`].
//!
//! - [`Tool`]: asynchronous tools returning a future.
//! - [`BlockingTool`]: synchronous tools, run on the blocking thread pool.
//! - [`FnTool`]: plain functions from typed input to a serializable value.
//!
//! Tools hosted by remote servers are reached through a [`RemoteInvoker`].

mod adaptors;
mod error;
mod registry;

use std::pin::Pin;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use adaptors::FnTool;
pub(crate) use adaptors::{AsyncAdaptor, BlockingAdaptor};
pub use error::{Error, ErrorKind};
pub use registry::{ToolDescriptor, ToolKind, ToolRegistry, ToolSpec};

/// The result of a tool call.
pub type ToolResult = Result<Value, Error>;

/// A boxed, `'static` tool invocation.
pub type BoxToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;

/// A tool that can be called by the model.
///
/// Implementations of this trait should be stateless, and may not maintain any
/// internal state.
///
/// The tool can be context-aware, meaning it can access additional information
/// about the current execution context, such as the working directory or the
/// current user. To do this, make the context an immutable state of the tool,
/// which can be set during initialization, and copy it when executing.
pub trait Tool: Send + Sync + 'static {
    /// The type of input that the tool accepts.
    type Input: DeserializeOwned;

    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool.
    fn parameter_schema(&self) -> &Value;

    /// Executes the tool with the given input.
    ///
    /// This method must return a future that is fully independent of `self`,
    /// and the future should be cancellation safe.
    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static;
}

/// A tool whose work is synchronous.
///
/// Each call runs on tokio's blocking pool, so it may do file or CPU heavy
/// work without stalling other calls. A call that outlives its timeout is
/// abandoned, but the thread keeps running until `call` returns.
pub trait BlockingTool: Send + Sync + 'static {
    /// The type of input that the tool accepts.
    type Input: DeserializeOwned + Send;

    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool.
    fn parameter_schema(&self) -> &Value;

    /// Runs the tool to completion on the calling thread.
    fn call(&self, input: Self::Input) -> ToolResult;
}

/// Invokes tools hosted by remote tool servers.
///
/// Calls for one server may be in flight concurrently. Implementations
/// resolve every call exactly once, with a fault when the server cannot
/// answer.
#[async_trait]
pub trait RemoteInvoker: Send + Sync + 'static {
    /// Calls `tool_name` on the server identified by `server_id`.
    async fn call(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: Value,
    ) -> ToolResult;
}

/// Type-erased local tool.
pub(crate) trait LocalInvoke: Send + Sync + 'static {
    fn invoke(&self, arguments: Value) -> BoxToolFuture;
}

/// Parses JSON arguments into a tool's input type.
pub(crate) fn parse_input<I: DeserializeOwned>(
    arguments: Value,
) -> Result<I, Error> {
    serde_json::from_value(arguments)
        .map_err(|err| Error::invalid_input().with_reason(format!("{err}")))
}
