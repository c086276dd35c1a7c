//! storybridge: an MCP server that lets a voice agent file Azure DevOps
//! user stories, optionally reachable through an ngrok public URL.

mod config;
mod interactive;
mod server;

use clap::{Parser, ValueEnum};
use rmcp::ServiceExt as _;
use rmcp::transport::streamable_http_server::StreamableHttpService;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use std::io::IsTerminal as _;
use std::net::SocketAddr;
use std::sync::Arc;
use storybridge_tunnel::{NgrokAgent, TunnelController};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "storybridge", version, about)]
struct Args {
    /// How to run. 'interactive' is a terminal text interface; 'jsonrpc'
    /// forces the MCP transport. 'auto' picks interactive when stdin is a
    /// TTY.
    #[arg(long, value_enum, default_value_t = Mode::Auto)]
    mode: Mode,

    /// MCP transport for jsonrpc mode. A public tunnel forces http.
    #[arg(long, value_enum, default_value_t = Transport::Stdio)]
    transport: Transport,

    /// Listen address for the http transport (and tunnel target).
    #[arg(long, default_value = "127.0.0.1:8848")]
    bind: SocketAddr,

    /// Log filter when RUST_LOG is not set.
    #[arg(long, env = "STORYBRIDGE_LOG", default_value = "info")]
    log_level: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    Auto,
    Interactive,
    Jsonrpc,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Transport {
    Stdio,
    Http,
}

fn init_tracing(log_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    // Logs go to stderr; stdout carries the stdio transport and the
    // interactive session.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let interactive = match args.mode {
        Mode::Interactive => true,
        Mode::Jsonrpc => false,
        Mode::Auto => std::io::stdin().is_terminal(),
    };

    if interactive {
        interactive::run().await
    } else {
        run_jsonrpc(&args).await
    }
}

async fn run_jsonrpc(args: &Args) -> anyhow::Result<()> {
    let tunnel = config::TunnelSettings::from_env();

    if !tunnel.enabled {
        return match args.transport {
            Transport::Stdio => serve_stdio().await,
            Transport::Http => serve_http(args.bind).await,
        };
    }

    if args.transport == Transport::Stdio {
        tracing::info!("public tunnel requested, switching to the http transport");
    }

    let controller: Arc<dyn TunnelController> = Arc::new(NgrokAgent::new());
    let guard = storybridge_tunnel::open(
        controller,
        &args.bind.ip().to_string(),
        args.bind.port(),
        &tunnel.options,
    )
    .await?;
    println!("Public MCP server available at: {}", guard.public_url());

    let result = serve_http(args.bind).await;
    drop(guard);
    result
}

async fn serve_stdio() -> anyhow::Result<()> {
    tracing::info!("serving MCP over stdio");
    let service = server::StoryBridgeServer::new()
        .serve((tokio::io::stdin(), tokio::io::stdout()))
        .await?;
    service.waiting().await?;
    Ok(())
}

async fn serve_http(bind: SocketAddr) -> anyhow::Result<()> {
    let service = StreamableHttpService::new(
        || Ok(server::StoryBridgeServer::new()),
        LocalSessionManager::default().into(),
        Default::default(),
    );
    let app = axum::Router::new()
        .nest_service("/mcp", service)
        .route("/healthz", axum::routing::get(|| async { "ok" }));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "serving MCP over http at /mcp");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    // Ctrl-C still tears the tunnel down through the guard's Drop.
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown requested");
}
