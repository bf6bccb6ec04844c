use std::time::Duration;

use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::{Value, json};
use simpleagent_core::tool::{Error as ToolError, Tool, ToolResult};

const MAX_SECONDS: u64 = 600;

#[derive(Deserialize, JsonSchema)]
pub struct DoSleepParameters {
    #[schemars(description = "Seconds to sleep, at most 600.")]
    seconds: u64,
}

/// A tool for waiting, so the model can poll long-running operations.
pub struct DoSleepTool {
    parameter_schema: Value,
}

impl DoSleepTool {
    /// Creates a new sleep tool.
    #[inline]
    pub fn new() -> Self {
        DoSleepTool {
            parameter_schema: schema_for!(DoSleepParameters).to_value(),
        }
    }
}

impl Default for DoSleepTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for DoSleepTool {
    type Input = DoSleepParameters;

    fn name(&self) -> &str {
        "dosleep"
    }

    fn description(&self) -> &str {
        r#"
Sleeps for the given number of seconds.
Use it before checking again on a task or operation id returned by another tool."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: DoSleepParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        async move {
            if input.seconds > MAX_SECONDS {
                return Err(ToolError::invalid_input().with_reason(format!(
                    "`seconds` must not exceed {MAX_SECONDS}"
                )));
            }
            tokio::time::sleep(Duration::from_secs(input.seconds)).await;
            Ok(json!(format!("Slept for {} seconds", input.seconds)))
        }
    }
}

#[cfg(test)]
mod tests {
    use simpleagent_core::tool::ErrorKind;
    use tokio::time::Instant;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep() {
        let tool = DoSleepTool::new();
        let started = Instant::now();
        let result = tool.execute(DoSleepParameters { seconds: 30 }).await;
        assert_eq!(result, Ok(json!("Slept for 30 seconds")));
        assert!(started.elapsed() >= Duration::from_secs(30));

        let err = tool
            .execute(DoSleepParameters { seconds: 3600 })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
