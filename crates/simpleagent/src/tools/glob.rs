use std::path::{Path, PathBuf};

use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use simpleagent_core::tool::{BlockingTool, Error as ToolError, ToolResult};

use super::resolve_path;

const MAX_MATCHES: usize = 50;

#[derive(Deserialize, JsonSchema)]
pub struct GlobToolParameters {
    #[schemars(description = "The glob pattern, must be relative to `path`.")]
    pattern: String,
    #[schemars(
        description = "Directory to search in, default to the working directory."
    )]
    path: Option<String>,
}

/// A tool for finding files using glob patterns.
pub struct GlobTool {
    root: PathBuf,
    parameter_schema: Value,
}

impl GlobTool {
    /// Creates a glob tool searching below `root` by default.
    #[inline]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        GlobTool {
            root: root.into(),
            parameter_schema: schema_for!(GlobToolParameters).to_value(),
        }
    }
}

impl BlockingTool for GlobTool {
    type Input = GlobToolParameters;

    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        r#"
Find files and directories using glob patterns.
This tool supports standard glob syntax like *, ?, and ** for recursive searches.
Returns at most 50 paths."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn call(&self, input: GlobToolParameters) -> ToolResult {
        if Path::new(&input.pattern).is_absolute() {
            return Err(ToolError::invalid_input()
                .with_reason("`pattern` must be relative to `path`"));
        }
        let base = match &input.path {
            Some(path) => resolve_path(&self.root, path),
            None => self.root.clone(),
        };
        let pattern = base.join(&input.pattern);
        let paths = glob::glob(&pattern.to_string_lossy()).map_err(|err| {
            ToolError::invalid_input().with_reason(err.to_string())
        })?;

        let mut result = String::new();
        // TODO: report truncation so the model can narrow the pattern.
        for item in paths.flatten().take(MAX_MATCHES) {
            let shown = item.strip_prefix(&self.root).unwrap_or(&item);
            result.push_str(&shown.to_string_lossy());
            result.push('\n');
        }
        Ok(Value::String(result))
    }
}
