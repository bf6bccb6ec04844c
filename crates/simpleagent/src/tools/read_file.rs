use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;

use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use simpleagent_core::tool::{BlockingTool, Error as ToolError, ToolResult};

use super::resolve_path;

const MAX_LINES: usize = 50;

#[derive(Deserialize, JsonSchema)]
pub struct ReadFileItem {
    #[schemars(description = "Path to the file, relative to the working directory or absolute.")]
    path: String,
    #[schemars(description = "1-based start line to read from, default to 1.")]
    start_line: Option<usize>,
}

#[derive(Deserialize, JsonSchema)]
pub struct ReadFileParameters {
    #[schemars(description = "Files to read.")]
    files: Vec<ReadFileItem>,
}

/// A tool for reading file content with line numbers.
pub struct ReadFileTool {
    root: PathBuf,
    parameter_schema: Value,
}

impl ReadFileTool {
    /// Creates a read file tool resolving relative paths against `root`.
    #[inline]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ReadFileTool {
            root: root.into(),
            parameter_schema: schema_for!(ReadFileParameters).to_value(),
        }
    }
}

impl BlockingTool for ReadFileTool {
    type Input = ReadFileParameters;

    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        r#"
Reads files and returns their contents prefixed with line numbers.
Each file includes a path and a 1-based start line, and returns up to 50 lines."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn call(&self, input: ReadFileParameters) -> ToolResult {
        if input.files.is_empty() {
            return Err(ToolError::invalid_input()
                .with_reason("`files` must not be empty"));
        }
        let mut result = String::new();
        for file in input.files {
            let start_line = file.start_line.unwrap_or(1);
            if start_line == 0 {
                return Err(ToolError::invalid_input()
                    .with_reason("`start_line` must be 1-based"));
            }
            let path = resolve_path(&self.root, &file.path);
            let section = File::open(&path)
                .map_err(|err| {
                    ToolError::execution_error()
                        .with_reason(format!("{}: {err}", path.display()))
                })
                .and_then(|f| format_section(&file.path, f, start_line))?;

            if !result.is_empty() {
                result.push('\n');
            }
            result.push_str(&section);
        }
        Ok(Value::String(result))
    }
}

fn format_section<R: Read>(
    path: &str,
    reader: R,
    start_line: usize,
) -> Result<String, ToolError> {
    let mut result = format!("==> {path} <==\n");
    let lines = BufReader::new(reader)
        .lines()
        .skip(start_line - 1)
        .take(MAX_LINES)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| {
            ToolError::execution_error().with_reason(err.to_string())
        })?;

    if let Some(last) = lines.len().checked_sub(1) {
        let width = (start_line + last).to_string().len();
        for (offset, line) in lines.iter().enumerate() {
            let line_no = start_line + offset;
            result.push_str(&format!("{line_no:>width$}: {line}\n"));
        }
    }
    Ok(result)
}
