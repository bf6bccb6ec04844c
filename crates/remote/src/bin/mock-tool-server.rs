//! A tool server for tests.
//!
//! Tools:
//! - `echo` answers with its arguments.
//! - `slow` sleeps `ms` milliseconds first, so answers overtake each other.
//! - `fail` answers with an error carrying `message`.
//! - `crash` exits the process without answering.
//! - `garbage` writes a line that is not JSON.
//! - `stray` answers with a correlation id that was never issued.
//! - `both` answers with a result and an error at once.
//!
//! `MOCK_DISCOVERY=fail` or `MOCK_DISCOVERY=hang` breaks the tool listing.
//! `MOCK_IGNORE_EOF=1` keeps the server alive after stdin closes.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use simpleagent_remote::protocol::{
    CallToolParams, ErrorPayload, Method, Request, Response, encode_line,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::Mutex;

type Output = Arc<Mutex<Stdout>>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let output: Output = Arc::new(Mutex::new(tokio::io::stdout()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                eprintln!("ignoring bad request: {err}");
                continue;
            }
        };
        match request.method {
            Method::ListTools => list_tools(request.id, &output).await,
            Method::CallTool => {
                tokio::spawn(call_tool(request, Arc::clone(&output)));
            }
        }
    }

    if std::env::var_os("MOCK_IGNORE_EOF").is_some() {
        std::future::pending::<()>().await;
    }
}

async fn list_tools(id: u64, output: &Output) {
    match std::env::var("MOCK_DISCOVERY").as_deref() {
        Ok("fail") => {
            return write_line(output, &Response::err(id, "not today")).await;
        }
        Ok("hang") => return,
        _ => {}
    }
    let tool = |name: &str, description: &str| {
        json!({
            "name": name,
            "description": description,
            "inputSchema": { "type": "object" }
        })
    };
    let tools = json!({
        "tools": [
            tool("echo", "Answers with its arguments."),
            tool("slow", "Sleeps for `ms` milliseconds."),
            tool("fail", "Always fails."),
            tool("crash", "Exits the server."),
            tool("garbage", "Breaks the protocol."),
            tool("stray", "Answers with a wrong id."),
            tool("both", "Answers with a result and an error."),
        ]
    });
    write_line(output, &Response::ok(id, tools)).await;
}

async fn call_tool(request: Request, output: Output) {
    let id = request.id;
    let params: CallToolParams = match serde_json::from_value(request.params) {
        Ok(params) => params,
        Err(err) => {
            return write_line(&output, &Response::err(id, err.to_string()))
                .await;
        }
    };
    let arguments = params.arguments;
    let response = match params.name.as_str() {
        "echo" => Response::ok(id, arguments),
        "slow" => {
            let ms = arguments.get("ms").and_then(Value::as_u64).unwrap_or(100);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Response::ok(id, json!({ "slept": ms }))
        }
        "fail" => {
            let message = arguments
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("failed");
            Response::err(id, message)
        }
        "crash" => std::process::exit(3),
        "garbage" => {
            let mut output = output.lock().await;
            output.write_all(b"this is not json\n").await.ok();
            output.flush().await.ok();
            return;
        }
        "stray" => Response::ok(id + 1_000_000, Value::Null),
        "both" => Response {
            id,
            result: Some(json!({ "ok": true })),
            error: Some(ErrorPayload::Message("not ok".to_owned())),
        },
        other => Response::err(id, format!("unknown tool `{other}`")),
    };
    write_line(&output, &response).await;
}

async fn write_line(output: &Output, response: &Response) {
    let Ok(line) = encode_line(response) else {
        return;
    };
    let mut output = output.lock().await;
    output.write_all(line.as_bytes()).await.ok();
    output.flush().await.ok();
}
