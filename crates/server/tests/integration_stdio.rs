//! End-to-end run over the stdio transport: spawn the real binary, speak
//! JSON-RPC to it, and point it at a local stand-in for Azure DevOps.

use serde_json::json;
use std::io::{BufRead as _, BufReader, Write as _};
use std::process::{Child, ChildStdout, Command, Stdio};
use storybridge_test_support::{KillOnDrop, spawn_fake_devops};

fn spawn_bridge(base_url: &str) -> KillOnDrop {
    let child = Command::new(env!("CARGO_BIN_EXE_storybridge"))
        .args(["--mode", "jsonrpc"])
        .env("AZURE_DEVOPS_ORGANIZATION", "acme")
        .env("AZURE_DEVOPS_PROJECT", "website")
        .env("AZURE_DEVOPS_PAT", "secret-pat")
        .env("AZURE_DEVOPS_BASE_URL", base_url)
        .env_remove("MCP_PUBLIC_URL")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn storybridge");
    KillOnDrop(child)
}

fn send(child: &mut Child, message: &serde_json::Value) {
    let stdin = child.stdin.as_mut().expect("child stdin");
    writeln!(stdin, "{message}").expect("write request");
    stdin.flush().expect("flush request");
}

/// Read lines until a JSON-RPC response (a message with an `id`) appears.
fn read_response(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).expect("read response line");
        assert!(n > 0, "server closed stdout before responding");
        let Ok(message) = serde_json::from_str::<serde_json::Value>(line.trim()) else {
            continue;
        };
        if message.get("id").is_some() {
            return message;
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn create_story_round_trip_over_stdio() {
    let base_url = spawn_fake_devops(42).await.expect("fake devops");

    let result = tokio::task::spawn_blocking(move || {
        let mut bridge = spawn_bridge(&base_url);
        let stdout = bridge.0.stdout.take().expect("child stdout");
        let mut reader = BufReader::new(stdout);

        send(
            &mut bridge.0,
            &json!({
                "jsonrpc": "2.0", "id": 1, "method": "initialize",
                "params": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": { "name": "integration-test", "version": "0" }
                }
            }),
        );
        let init = read_response(&mut reader);
        assert!(
            init.pointer("/result/capabilities/tools").is_some(),
            "tools capability missing: {init}"
        );

        send(
            &mut bridge.0,
            &json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        );

        send(
            &mut bridge.0,
            &json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }),
        );
        let tools = read_response(&mut reader);
        let names: Vec<&str> = tools
            .pointer("/result/tools")
            .and_then(serde_json::Value::as_array)
            .expect("tools array")
            .iter()
            .filter_map(|t| t.get("name").and_then(serde_json::Value::as_str))
            .collect();
        assert_eq!(names, ["create_story"]);

        send(
            &mut bridge.0,
            &json!({
                "jsonrpc": "2.0", "id": 3, "method": "tools/call",
                "params": {
                    "name": "create_story",
                    "arguments": {
                        "title": "Checkout button misaligned",
                        "description": "Button overlaps the cart summary on mobile."
                    }
                }
            }),
        );
        let call = read_response(&mut reader);
        call.pointer("/result/content/0/text")
            .and_then(serde_json::Value::as_str)
            .expect("text content")
            .to_string()
    })
    .await
    .expect("blocking task");

    assert!(result.contains("Created Azure DevOps story #42"), "{result}");
    assert!(result.contains("View it at:"), "{result}");
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_configuration_surfaces_as_a_tool_error() {
    let base_url = spawn_fake_devops(42).await.expect("fake devops");

    let error = tokio::task::spawn_blocking(move || {
        let child = Command::new(env!("CARGO_BIN_EXE_storybridge"))
            .args(["--mode", "jsonrpc"])
            .env_remove("AZURE_DEVOPS_ORGANIZATION")
            .env_remove("AZURE_DEVOPS_PROJECT")
            .env("AZURE_DEVOPS_PAT", "secret-pat")
            .env("AZURE_DEVOPS_BASE_URL", &base_url)
            .env_remove("MCP_PUBLIC_URL")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn storybridge");
        let mut bridge = KillOnDrop(child);
        let stdout = bridge.0.stdout.take().expect("child stdout");
        let mut reader = BufReader::new(stdout);

        send(
            &mut bridge.0,
            &json!({
                "jsonrpc": "2.0", "id": 1, "method": "initialize",
                "params": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": { "name": "integration-test", "version": "0" }
                }
            }),
        );
        read_response(&mut reader);
        send(
            &mut bridge.0,
            &json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        );

        send(
            &mut bridge.0,
            &json!({
                "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                "params": { "name": "create_story", "arguments": { "title": "T" } }
            }),
        );
        read_response(&mut reader).to_string()
    })
    .await
    .expect("blocking task");

    assert!(
        error.contains("AZURE_DEVOPS_ORGANIZATION") && error.contains("AZURE_DEVOPS_PROJECT"),
        "error should list every missing variable: {error}"
    );
}
