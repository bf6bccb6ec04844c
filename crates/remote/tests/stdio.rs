use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use simpleagent_core::tool::{ErrorKind, ToolKind, ToolRegistry};
use simpleagent_remote::{
    ClientOptions, Error, RemoteToolClient, ServerConfig, ServerState,
    Transport,
};

const MOCK: &str = env!("CARGO_BIN_EXE_mock-tool-server");

fn mock(id: &str) -> ServerConfig {
    ServerConfig::new(id, MOCK)
}

fn options() -> ClientOptions {
    ClientOptions {
        discovery_timeout: Duration::from_secs(2),
        shutdown_grace: Duration::from_millis(500),
    }
}

async fn start(configs: Vec<ServerConfig>) -> RemoteToolClient {
    RemoteToolClient::start_all(configs, options()).await.unwrap()
}

#[tokio::test]
async fn test_discovery() {
    let client = start(vec![mock("genes")]).await;
    assert_eq!(client.status("genes"), Some(ServerState::Ready));

    let names: Vec<_> = client
        .tools("genes")
        .into_iter()
        .map(|spec| spec.name)
        .collect();
    assert_eq!(
        names,
        ["echo", "slow", "fail", "crash", "garbage", "stray", "both"]
    );

    // Listing again against the same server yields the same tools.
    assert_eq!(
        client.list_tools("genes").await.unwrap(),
        client.tools("genes")
    );

    client.shutdown().await;
    assert_eq!(client.status("genes"), Some(ServerState::Terminated));
}

#[tokio::test]
async fn test_responses_out_of_order() {
    let client = start(vec![mock("genes")]).await;

    let started = Instant::now();
    let (slow, fast) = tokio::join!(
        client.call_tool("genes", "slow", json!({ "ms": 300 })),
        async {
            let result =
                client.call_tool("genes", "echo", json!({ "x": 1 })).await;
            (result, started.elapsed())
        },
    );
    assert_eq!(slow.unwrap(), json!({ "slept": 300 }));
    let (fast, fast_elapsed) = fast;
    assert_eq!(fast.unwrap(), json!({ "x": 1 }));
    assert!(fast_elapsed < Duration::from_millis(300));

    client.shutdown().await;
}

#[tokio::test]
async fn test_remote_error() {
    let client = start(vec![mock("genes")]).await;
    let err = client
        .call_tool("genes", "fail", json!({ "message": "no such gene" }))
        .await
        .unwrap_err();
    assert!(matches!(
        &err,
        Error::Remote(message) if message == "no such gene"
    ));

    // The server stays usable after a tool error.
    assert_eq!(client.status("genes"), Some(ServerState::Ready));
    assert!(client.call_tool("genes", "echo", json!({})).await.is_ok());
    client.shutdown().await;
}

#[tokio::test]
async fn test_crash_resolves_outstanding_calls() {
    let client = start(vec![mock("genes")]).await;

    let slow = || client.call_tool("genes", "slow", json!({ "ms": 10_000 }));
    let crash = async {
        // Let the slow calls go out first.
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.call_tool("genes", "crash", json!({})).await
    };
    let started = Instant::now();
    let (a, b, c, crashed) = tokio::join!(slow(), slow(), slow(), crash);
    assert!(started.elapsed() < Duration::from_secs(5));
    for result in [a, b, c, crashed] {
        assert!(
            matches!(&result, Err(Error::Unavailable(id)) if id == "genes"),
            "{result:?}"
        );
    }
    assert_eq!(client.status("genes"), Some(ServerState::Terminated));

    // Further calls fail fast.
    let err = client.call_tool("genes", "echo", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::Unavailable(_)));

    // Until the server is restarted.
    let tools = client.restart("genes").await.unwrap();
    assert_eq!(tools.len(), 7);
    assert_eq!(client.status("genes"), Some(ServerState::Ready));
    assert_eq!(
        client.call_tool("genes", "echo", json!("back")).await.unwrap(),
        json!("back")
    );
    client.shutdown().await;
}

#[tokio::test]
async fn test_protocol_faults_degrade_the_server() {
    for tool in ["garbage", "stray", "both"] {
        let client = start(vec![mock("genes")]).await;
        let (slow, broken) = tokio::join!(
            client.call_tool("genes", "slow", json!({ "ms": 10_000 })),
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                client.call_tool("genes", tool, json!({})).await
            },
        );
        assert!(matches!(slow, Err(Error::Protocol(_))), "{tool}: {slow:?}");
        assert!(
            matches!(broken, Err(Error::Protocol(_))),
            "{tool}: {broken:?}"
        );
        assert_eq!(client.status("genes"), Some(ServerState::Degraded));

        let err = client
            .call_tool("genes", "echo", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
        client.shutdown().await;
    }
}

#[tokio::test]
async fn test_failed_discovery_does_not_abort_startup() {
    let client = start(vec![
        mock("broken").with_env("MOCK_DISCOVERY", "fail"),
        mock("silent").with_env("MOCK_DISCOVERY", "hang"),
        mock("genes"),
    ])
    .await;
    assert_eq!(
        client.statuses(),
        [
            ("broken".to_owned(), ServerState::Degraded),
            ("silent".to_owned(), ServerState::Degraded),
            ("genes".to_owned(), ServerState::Ready),
        ]
    );
    assert!(client.tools("broken").is_empty());
    assert!(client.tools("silent").is_empty());

    let client = Arc::new(client);
    let mut registry = ToolRegistry::new();
    client.register_tools(&mut registry).unwrap();
    assert_eq!(registry.len(), 7);
    assert!(
        registry
            .descriptors()
            .all(|d| d.kind
                == ToolKind::Remote {
                    server_id: "genes".to_owned()
                })
    );
    client.shutdown().await;
}

#[tokio::test]
async fn test_calls_through_registry() {
    let client = Arc::new(start(vec![mock("genes")]).await);
    let mut registry = ToolRegistry::new();
    client.register_tools(&mut registry).unwrap();

    let echo = registry.resolve("echo").unwrap().clone();
    let result = registry.invoke(&echo, json!({ "gene": "BRCA1" })).await;
    assert_eq!(result, Ok(json!({ "gene": "BRCA1" })));

    let fail = registry.resolve("fail").unwrap().clone();
    let err = registry.invoke(&fail, json!({})).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExecutionError);

    let crash = registry.resolve("crash").unwrap().clone();
    let err = registry.invoke(&crash, json!({})).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServerUnavailable);
    client.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_kills_stubborn_server() {
    let stubborn = mock("stubborn").with_env("MOCK_IGNORE_EOF", "1");
    let client = start(vec![stubborn]).await;
    let started = Instant::now();
    client.shutdown().await;
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(client.status("stubborn"), Some(ServerState::Terminated));
}

#[tokio::test]
async fn test_configuration_errors() {
    let err = RemoteToolClient::start_all(
        vec![ServerConfig::new("ghost", "/nonexistent/tool-server")],
        options(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        &err,
        Error::Spawn { server_id, .. } if server_id == "ghost"
    ));
    assert!(err.is_config_error());

    let err = RemoteToolClient::start_all(
        vec![mock("genes"), mock("genes")],
        options(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::DuplicateServer(_)));

    let mut web = mock("web");
    web.transport = Transport::Sse;
    let err = RemoteToolClient::start_all(vec![web], options())
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "server `web` uses the sse transport, only stdio is supported"
    );

    let client = start(vec![]).await;
    let err = client.call_tool("nobody", "echo", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::UnknownServer(_)));
}
