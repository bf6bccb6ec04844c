use std::future::ready;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{
    BlockingTool, BoxToolFuture, Error, LocalInvoke, Tool, ToolResult,
    parse_input,
};

pub(crate) struct AsyncAdaptor<T: Tool>(pub T);

impl<T: Tool> LocalInvoke for AsyncAdaptor<T> {
    fn invoke(&self, arguments: Value) -> BoxToolFuture {
        match parse_input::<T::Input>(arguments) {
            Ok(input) => Box::pin(self.0.execute(input)),
            Err(err) => Box::pin(ready(Err(err))),
        }
    }
}

pub(crate) struct BlockingAdaptor<T: BlockingTool>(pub Arc<T>);

impl<T: BlockingTool> LocalInvoke for BlockingAdaptor<T> {
    fn invoke(&self, arguments: Value) -> BoxToolFuture {
        let input = match parse_input::<T::Input>(arguments) {
            Ok(input) => input,
            Err(err) => return Box::pin(ready(Err(err))),
        };
        let tool = Arc::clone(&self.0);
        Box::pin(async move {
            match tokio::task::spawn_blocking(move || tool.call(input)).await {
                Ok(result) => result,
                Err(err) if err.is_panic() => Err(Error::execution_error()
                    .with_reason("the tool panicked")),
                Err(_) => Err(Error::cancelled()),
            }
        })
    }
}

/// A tool backed by a plain function.
///
/// The function runs inline on the task that dispatches it, so it should
/// be quick. Its output is serialized into the tool result.
pub struct FnTool {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) parameters: Value,
    pub(crate) func: Arc<dyn Fn(Value) -> ToolResult + Send + Sync>,
}

impl FnTool {
    /// Creates a tool from a function.
    pub fn new<I, O, F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        func: F,
    ) -> Self
    where
        I: DeserializeOwned,
        O: Serialize,
        F: Fn(I) -> O + Send + Sync + 'static,
    {
        let erased = move |arguments: Value| -> ToolResult {
            let input = parse_input::<I>(arguments)?;
            serde_json::to_value(func(input)).map_err(|err| {
                Error::execution_error()
                    .with_reason(format!("unserializable output: {err}"))
            })
        };
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            func: Arc::new(erased),
        }
    }
}

impl LocalInvoke for FnTool {
    fn invoke(&self, arguments: Value) -> BoxToolFuture {
        let func = Arc::clone(&self.func);
        // Called when the future is polled, so a panic is caught by the task
        // that runs it.
        Box::pin(async move { func(arguments) })
    }
}
