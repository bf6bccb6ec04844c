//! The wire format spoken with tool servers.
//!
//! Every message is one JSON object on its own line. The client sends
//! requests `{"id", "method", "params"}` and the server answers each with
//! either `{"id", "result"}` or `{"id", "error"}`, in any order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use simpleagent_core::tool::ToolSpec;

use crate::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    ListTools,
    CallTool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: Method,
    #[serde(default)]
    pub params: Value,
}

/// The error member of a response. Servers may send a bare message or an
/// object carrying one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorPayload {
    Message(String),
    Detailed { message: String },
}

impl ErrorPayload {
    #[inline]
    pub fn message(&self) -> &str {
        match self {
            ErrorPayload::Message(message) => message,
            ErrorPayload::Detailed { message } => message,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl Response {
    #[inline]
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    #[inline]
    pub fn err(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(ErrorPayload::Message(message.into())),
        }
    }

    /// Describes what is wrong with a response that carries both `result`
    /// and `error`. Such a response means the server is out of step with
    /// the protocol.
    pub fn shape_error(&self) -> Option<String> {
        (self.result.is_some() && self.error.is_some()).then(|| {
            format!("response {} has both a result and an error", self.id)
        })
    }

    /// Splits the response into its outcome. A response must carry exactly
    /// one of `result` and `error`.
    pub fn into_result(self) -> Result<Value, Error> {
        if let Some(reason) = self.shape_error() {
            return Err(Error::Protocol(reason));
        }
        match (self.result, self.error) {
            (_, Some(error)) => Err(Error::Remote(error.message().to_owned())),
            (Some(result), None) => Ok(result),
            // `"result": null` is deserialized as a missing member.
            (None, None) => Ok(Value::Null),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "inputSchema", default = "empty_schema")]
    pub parameters: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolDefinition>,
}

fn empty_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl From<ToolDefinition> for ToolSpec {
    fn from(def: ToolDefinition) -> Self {
        ToolSpec {
            name: def.name,
            description: def.description,
            parameters: def.parameters,
        }
    }
}

/// Serializes a message as one line, including the terminating line feed.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Parses one line received from a server.
pub fn decode_response(line: &str) -> Result<Response, Error> {
    serde_json::from_str(line.trim_end()).map_err(|err| {
        Error::Protocol(format!("malformed message {line:?}: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_encode_request() {
        let request = Request {
            id: 3,
            method: Method::CallTool,
            params: serde_json::to_value(CallToolParams {
                name: "echo".to_owned(),
                arguments: json!({ "text": "hi" }),
            })
            .unwrap(),
        };
        assert_eq!(
            encode_line(&request).unwrap(),
            concat!(
                "{\"id\":3,\"method\":\"call_tool\",",
                "\"params\":{\"name\":\"echo\",",
                "\"arguments\":{\"text\":\"hi\"}}}\n",
            )
        );
    }

    #[test]
    fn test_decode_responses() {
        let resp = decode_response("{\"id\":1,\"result\":{\"ok\":true}}\n")
            .unwrap();
        assert_eq!(resp.id, 1);
        assert_eq!(resp.into_result().unwrap(), json!({ "ok": true }));

        let resp =
            decode_response("{\"id\":2,\"error\":{\"message\":\"boom\"}}")
                .unwrap();
        assert!(matches!(
            resp.into_result(),
            Err(Error::Remote(m)) if m == "boom"
        ));

        let resp = decode_response("{\"id\":2,\"error\":\"boom\"}").unwrap();
        assert!(matches!(
            resp.into_result(),
            Err(Error::Remote(m)) if m == "boom"
        ));

        let resp = decode_response(
            "{\"id\":4,\"result\":1,\"error\":\"boom\"}",
        )
        .unwrap();
        assert_eq!(
            resp.shape_error().as_deref(),
            Some("response 4 has both a result and an error")
        );
        assert!(matches!(resp.into_result(), Err(Error::Protocol(_))));

        let resp = decode_response("{\"id\":5,\"result\":null}").unwrap();
        assert_eq!(resp.shape_error(), None);
        assert_eq!(resp.into_result().unwrap(), Value::Null);

        assert!(matches!(
            decode_response("hello"),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_tool_definitions() {
        let result: ListToolsResult = serde_json::from_value(json!({
            "tools": [
                {
                    "name": "analyze",
                    "description": "Analyzes genes.",
                    "inputSchema": { "type": "object" }
                },
                { "name": "ping" }
            ]
        }))
        .unwrap();
        let specs: Vec<ToolSpec> =
            result.tools.into_iter().map(Into::into).collect();
        assert_eq!(specs[0].parameters, json!({ "type": "object" }));
        assert_eq!(specs[1].description, "");
        assert_eq!(
            specs[1].parameters,
            json!({ "type": "object", "properties": {} })
        );
    }
}
