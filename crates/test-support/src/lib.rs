//! Shared helpers for integration tests: child-process cleanup, port
//! selection, HTTP readiness polling, and a canned Azure DevOps endpoint.

use anyhow::Context as _;
use axum::Router;
use axum::response::IntoResponse;
use axum::routing::any;
use std::net::TcpListener;
use std::process::Child;
use std::time::{Duration, Instant};

pub struct KillOnDrop(pub Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
    }
}

/// Pick an unused TCP port on localhost.
///
/// Note: this does not reserve the port; it's still possible for another process to bind it
/// before you do.
///
/// # Errors
///
/// Returns an error if binding an ephemeral localhost port fails or if the bound socket's
/// local address cannot be read.
pub fn pick_unused_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("bind ephemeral port")?;
    Ok(listener.local_addr()?.port())
}

/// Poll an HTTP URL until it returns a success status (2xx/3xx).
///
/// # Errors
///
/// Returns an error if the timeout elapses before the endpoint returns a success status.
pub async fn wait_http_ok(url: &str, timeout_dur: Duration) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let start = Instant::now();
    loop {
        if start.elapsed() > timeout_dur {
            anyhow::bail!("timed out waiting for {url}");
        }

        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            _ => tokio::time::sleep(Duration::from_millis(200)).await,
        }
    }
}

/// Spawn a local stand-in for the Azure DevOps work-item API.
///
/// Every request is answered with a fixed created-work-item document carrying
/// the given id. Returns the base URL to point `AZURE_DEVOPS_BASE_URL` at.
/// The server lives until the test's runtime shuts down.
///
/// # Errors
///
/// Returns an error if binding a local listener fails.
pub async fn spawn_fake_devops(work_item_id: u64) -> anyhow::Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind fake devops listener")?;
    let addr = listener.local_addr()?;

    let app = Router::new().route(
        "/{*path}",
        any(move || async move { axum::Json(created_work_item(work_item_id)).into_response() }),
    );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Ok(format!("http://{addr}"))
}

fn created_work_item(id: u64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "url": format!("https://dev.azure.com/acme/_apis/wit/workItems/{id}"),
        "_links": {
            "html": { "href": format!("https://dev.azure.com/acme/_workitems/edit/{id}") }
        },
        "fields": { "System.Title": "Checkout button misaligned" }
    })
}
