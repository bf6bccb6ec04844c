//! Conversation-related types.

use std::fmt::{self, Display};

use serde_json::Value;
use simpleagent_model::{
    AssistantMessage, ModelMessage, ToolCallRequest, ToolCallResult,
};

use crate::tool::ToolResult;

/// One contribution to the conversation.
#[derive(Clone, Debug, PartialEq)]
pub enum Turn {
    /// Text submitted by the user.
    User(String),
    /// Output of the model, possibly requesting tools.
    Assistant {
        /// The generated text, may be empty.
        text: String,
        /// Requested tool calls in issuance order.
        tool_requests: Vec<ToolCallRequest>,
    },
    /// The outcome of one requested tool call.
    ToolResult {
        /// Id of the request this result answers.
        request_id: String,
        /// Name of the tool that was called.
        tool_name: String,
        /// The payload, or the fault the call resolved to.
        outcome: ToolResult,
    },
}

/// The turns of a session, oldest first.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct Conversation {
    turns: Vec<Turn>,
}

/// A conversation whose turns are out of order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnOrderError {
    /// Index of the offending turn.
    pub index: usize,
    /// What is wrong at that index.
    pub reason: &'static str,
}

impl Display for TurnOrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "turn {}: {}", self.index, self.reason)
    }
}

impl std::error::Error for TurnOrderError {}

impl Conversation {
    /// Returns all turns.
    #[inline]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Returns the number of turns.
    #[inline]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Returns `true` if the conversation has no turns.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[inline]
    pub(crate) fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    #[inline]
    pub(crate) fn truncate(&mut self, len: usize) {
        self.turns.truncate(len);
    }

    /// Checks that turns alternate as the model expects.
    ///
    /// A user turn is answered by an assistant turn. An assistant turn with
    /// N tool requests is followed by exactly N tool results, matching the
    /// requests by id and in the same order, and then by another assistant
    /// turn. A trailing assistant turn must not have unanswered requests.
    pub fn check_turn_order(&self) -> Result<(), TurnOrderError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Expect {
            User,
            Assistant,
            Answered,
        }

        let mut expect = Expect::User;
        let mut outstanding: &[ToolCallRequest] = &[];
        for (index, turn) in self.turns.iter().enumerate() {
            let fail = |reason| Err(TurnOrderError { index, reason });
            match turn {
                Turn::ToolResult { request_id, .. } => {
                    let Some((next, rest)) = outstanding.split_first() else {
                        return fail("tool result without a pending request");
                    };
                    if &next.id != request_id {
                        return fail("tool result out of request order");
                    }
                    outstanding = rest;
                    if outstanding.is_empty() {
                        expect = Expect::Assistant;
                    }
                }
                _ if !outstanding.is_empty() => {
                    return fail("tool requests left unanswered");
                }
                Turn::User(_) => {
                    if expect == Expect::Assistant {
                        return fail("user turn where an assistant turn is due");
                    }
                    expect = Expect::Assistant;
                }
                Turn::Assistant { tool_requests, .. } => {
                    if expect == Expect::User {
                        return fail("assistant turn before any user turn");
                    }
                    if expect == Expect::Answered {
                        return fail("two assistant turns in a row");
                    }
                    outstanding = tool_requests.as_slice();
                    expect = Expect::Answered;
                }
            }
        }
        if !outstanding.is_empty() {
            return Err(TurnOrderError {
                index: self.turns.len(),
                reason: "tool requests left unanswered",
            });
        }
        Ok(())
    }

    pub(crate) fn to_model_messages(
        &self,
        system_prompt: Option<&str>,
    ) -> Vec<ModelMessage> {
        let mut messages = Vec::with_capacity(self.turns.len() + 1);
        if let Some(prompt) = system_prompt {
            messages.push(ModelMessage::System(prompt.to_owned()));
        }
        messages.extend(self.turns.iter().map(|turn| match turn {
            Turn::User(text) => ModelMessage::User(text.clone()),
            Turn::Assistant {
                text,
                tool_requests,
            } => ModelMessage::Assistant(AssistantMessage {
                content: text.clone(),
                tool_calls: tool_requests.clone(),
            }),
            Turn::ToolResult {
                request_id,
                tool_name,
                outcome,
            } => ModelMessage::Tool(ToolCallResult {
                id: request_id.clone(),
                name: tool_name.clone(),
                content: render_outcome(outcome),
                is_error: outcome.is_err(),
            }),
        }));
        messages
    }
}

/// Renders a tool outcome as the text the model reads.
pub fn render_outcome(outcome: &ToolResult) -> String {
    match outcome {
        Ok(Value::String(s)) => s.clone(),
        Ok(value) => value.to_string(),
        Err(err) => format!("Error: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tool::Error;

    fn request(id: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_owned(),
            name: "weather".to_owned(),
            arguments: json!({}),
        }
    }

    fn result(id: &str) -> Turn {
        Turn::ToolResult {
            request_id: id.to_owned(),
            tool_name: "weather".to_owned(),
            outcome: Ok(json!({ "temp_f": 61 })),
        }
    }

    fn assistant(ids: &[&str]) -> Turn {
        Turn::Assistant {
            text: String::new(),
            tool_requests: ids.iter().map(|id| request(id)).collect(),
        }
    }

    fn conversation(turns: Vec<Turn>) -> Conversation {
        Conversation { turns }
    }

    #[test]
    fn test_valid_orders() {
        let conv = conversation(vec![
            Turn::User("hi".to_owned()),
            assistant(&["a", "b"]),
            result("a"),
            result("b"),
            assistant(&[]),
            Turn::User("again".to_owned()),
        ]);
        assert_eq!(conv.check_turn_order(), Ok(()));
        assert_eq!(Conversation::default().check_turn_order(), Ok(()));
    }

    #[test]
    fn test_invalid_orders() {
        let cases = [
            (vec![assistant(&[])], 0),
            (
                vec![
                    Turn::User("a".to_owned()),
                    Turn::User("b".to_owned()),
                ],
                1,
            ),
            (
                vec![
                    Turn::User("a".to_owned()),
                    assistant(&["x", "y"]),
                    result("y"),
                ],
                2,
            ),
            (
                vec![Turn::User("a".to_owned()), assistant(&["x"])],
                2,
            ),
            (
                vec![
                    Turn::User("a".to_owned()),
                    assistant(&[]),
                    assistant(&[]),
                ],
                2,
            ),
            (
                vec![
                    Turn::User("a".to_owned()),
                    assistant(&[]),
                    result("x"),
                ],
                2,
            ),
            (
                vec![
                    Turn::User("a".to_owned()),
                    assistant(&["x"]),
                    result("x"),
                    Turn::User("b".to_owned()),
                ],
                3,
            ),
        ];
        for (turns, index) in cases {
            let err = conversation(turns).check_turn_order().unwrap_err();
            assert_eq!(err.index, index, "{err}");
        }
    }

    #[test]
    fn test_model_messages() {
        let conv = conversation(vec![
            Turn::User("weather?".to_owned()),
            assistant(&["a", "b"]),
            result("a"),
            Turn::ToolResult {
                request_id: "b".to_owned(),
                tool_name: "weather".to_owned(),
                outcome: Err(Error::timeout()),
            },
        ]);
        let messages = conv.to_model_messages(Some("Be brief."));
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0], ModelMessage::System("Be brief.".to_owned()));
        let ModelMessage::Tool(ok) = &messages[3] else {
            panic!("expected a tool message");
        };
        assert_eq!(ok.content, r#"{"temp_f":61}"#);
        assert!(!ok.is_error);
        let ModelMessage::Tool(failed) = &messages[4] else {
            panic!("expected a tool message");
        };
        assert_eq!(failed.content, "Error: Timed out");
        assert!(failed.is_error);
    }
}
