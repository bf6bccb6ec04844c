use std::error::Error;
use std::fmt::{self, Display};
use std::time::Duration;

use crate::model_client::RetryPolicy;

/// Tunables of an agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentOptions {
    /// Maximum number of model calls in one run.
    pub max_steps: usize,
    /// Deadline of each tool call, counted from dispatch.
    pub tool_timeout: Duration,
    /// How many tool calls may run at the same time.
    pub max_concurrent_tools: usize,
    /// Attempts per model call, the first one included.
    pub model_max_attempts: u32,
    /// Delay before the first model retry. Later delays grow exponentially.
    pub model_initial_backoff: Duration,
    /// Upper bound of a single retry delay.
    pub model_max_backoff: Duration,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            max_steps: 16,
            tool_timeout: Duration::from_secs(120),
            max_concurrent_tools: 8,
            model_max_attempts: 3,
            model_initial_backoff: Duration::from_millis(500),
            model_max_backoff: Duration::from_secs(8),
        }
    }
}

impl AgentOptions {
    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.model_max_attempts,
            initial_backoff: self.model_initial_backoff,
            max_backoff: self.model_max_backoff,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |option, reason: &str| ConfigError::InvalidOption {
            option,
            reason: reason.to_owned(),
        };
        if self.max_steps == 0 {
            return Err(invalid("max_steps", "must be at least 1"));
        }
        if self.max_concurrent_tools == 0 {
            return Err(invalid("max_concurrent_tools", "must be at least 1"));
        }
        if self.model_max_attempts == 0 {
            return Err(invalid("model_max_attempts", "must be at least 1"));
        }
        if self.tool_timeout.is_zero() {
            return Err(invalid("tool_timeout", "must not be zero"));
        }
        Ok(())
    }
}

/// A configuration problem detected before any run starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Two tool sources provide a tool with the same name.
    DuplicateTool {
        /// The conflicting name.
        name: String,
        /// Where the first registration came from.
        first: String,
        /// Where the rejected registration came from.
        second: String,
    },
    /// An option has a value that cannot work.
    InvalidOption {
        /// The option name.
        option: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::DuplicateTool {
                name,
                first,
                second,
            } => write!(
                f,
                "tool `{name}` is provided by both {first} and {second}"
            ),
            ConfigError::InvalidOption { option, reason } => {
                write!(f, "invalid option `{option}`: {reason}")
            }
        }
    }
}

impl Error for ConfigError {}
