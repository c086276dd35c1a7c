//! Tunnel controller seam and the ngrok agent implementation.

use crate::error::{Result, TunnelError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt as _, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};

/// Narrow capability set the provisioner depends on.
///
/// The real agent is one implementation; tests inject a fake instead of
/// monkey-patching anything at runtime.
#[async_trait]
pub trait TunnelController: Send + Sync {
    /// Record an authtoken on the controller's shared configuration.
    fn set_auth_token(&self, token: &str);

    /// Force a specific agent executable instead of the controller's default.
    fn set_executable_path(&self, path: &Path);

    /// Establish a tunnel to `addr` and return its public URL.
    async fn connect(&self, addr: &str, proto: &str, bind_tls: bool) -> Result<String>;

    /// Tear down the tunnel identified by `public_url`.
    fn disconnect(&self, public_url: &str) -> Result<()>;

    /// Stop the agent entirely.
    fn shutdown(&self) -> Result<()>;
}

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
struct AgentConfig {
    auth_token: Option<String>,
    executable_path: Option<PathBuf>,
}

/// Drives the ngrok agent as a child process, reading its json-formatted log
/// stream for the assigned public URL.
///
/// The auth token and executable path are process-wide mutable configuration;
/// concurrent `connect` calls with different tokens race at the logical level.
/// The contract is at most one active tunnel per process.
pub struct NgrokAgent {
    config: Mutex<AgentConfig>,
    child: Mutex<Option<Child>>,
    startup_timeout: Duration,
}

impl NgrokAgent {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: Mutex::new(AgentConfig::default()),
            child: Mutex::new(None),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }
}

impl Default for NgrokAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TunnelController for NgrokAgent {
    fn set_auth_token(&self, token: &str) {
        self.config.lock().auth_token = Some(token.to_string());
    }

    fn set_executable_path(&self, path: &Path) {
        self.config.lock().executable_path = Some(path.to_path_buf());
    }

    async fn connect(&self, addr: &str, proto: &str, bind_tls: bool) -> Result<String> {
        let (executable, auth_token) = {
            let config = self.config.lock();
            (
                config
                    .executable_path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("ngrok")),
                config.auth_token.clone(),
            )
        };

        let mut command = Command::new(&executable);
        command
            .args(agent_args(addr, proto, bind_tls))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        // Through the environment, not argv: argv is readable by every local
        // user via the process list.
        if let Some(token) = auth_token.as_deref() {
            command.env("NGROK_AUTHTOKEN", token);
        }

        let mut child = command.spawn().map_err(|e| {
            TunnelError::Connect(format!(
                "failed to launch tunnel agent '{}': {e}",
                executable.display()
            ))
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            TunnelError::Connect("tunnel agent stdout was not captured".to_string())
        })?;

        let mut lines = BufReader::new(stdout).lines();
        let url = tokio::time::timeout(self.startup_timeout, wait_for_public_url(&mut lines))
            .await
            .map_err(|_| {
                TunnelError::Connect(format!(
                    "timed out after {}s waiting for the tunnel agent to report a public URL",
                    self.startup_timeout.as_secs()
                ))
            })??;

        // The agent keeps logging to stdout for its whole lifetime. Keep
        // draining the pipe: closing it would SIGPIPE-kill the agent on its
        // next log write, and merely holding it would stall the agent once
        // the pipe buffer fills.
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::trace!(line = %line, "tunnel agent log");
            }
        });

        *self.child.lock() = Some(child);
        tracing::debug!(url = %url, agent = %executable.display(), "tunnel agent started");
        Ok(url)
    }

    fn disconnect(&self, public_url: &str) -> Result<()> {
        tracing::debug!(url = %public_url, "disconnecting tunnel");
        if let Some(child) = self.child.lock().as_mut() {
            child.start_kill().map_err(|e| {
                TunnelError::Connect(format!("failed to stop tunnel agent: {e}"))
            })?;
        }
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        if let Some(mut child) = self.child.lock().take() {
            // Already signalled by disconnect in the common case.
            let _ = child.start_kill();
        }
        Ok(())
    }
}

async fn wait_for_public_url(lines: &mut Lines<BufReader<ChildStdout>>) -> Result<String> {
    loop {
        let line = lines.next_line().await.map_err(|e| {
            TunnelError::Connect(format!("failed to read tunnel agent output: {e}"))
        })?;
        let Some(line) = line else {
            return Err(TunnelError::Connect(
                "tunnel agent exited before reporting a public URL".to_string(),
            ));
        };

        match parse_agent_event(&line) {
            Some(AgentEvent::Started { url }) => return Ok(url),
            Some(AgentEvent::Fatal(message)) => return Err(TunnelError::Connect(message)),
            None => {}
        }
    }
}

enum AgentEvent {
    Started { url: String },
    Fatal(String),
}

fn parse_agent_event(line: &str) -> Option<AgentEvent> {
    let event: Value = serde_json::from_str(line).ok()?;

    if event.get("msg").and_then(Value::as_str) == Some("started tunnel")
        && let Some(url) = event.get("url").and_then(Value::as_str)
    {
        return Some(AgentEvent::Started {
            url: url.to_string(),
        });
    }

    if event.get("lvl").and_then(Value::as_str) == Some("crit") {
        let message = event
            .get("err")
            .and_then(Value::as_str)
            .or_else(|| event.get("msg").and_then(Value::as_str))
            .unwrap_or("tunnel agent reported a fatal error");
        return Some(AgentEvent::Fatal(message.to_string()));
    }

    None
}

fn agent_args(addr: &str, proto: &str, bind_tls: bool) -> Vec<String> {
    let mut args = vec![
        proto.to_string(),
        addr.to_string(),
        "--log".to_string(),
        "stdout".to_string(),
        "--log-format".to_string(),
        "json".to_string(),
    ];

    // TLS-bound endpoints: the v3 agent expresses this as an https-only scheme.
    if bind_tls && proto == "http" {
        args.push("--scheme".to_string());
        args.push("https".to_string());
    }

    args
}

#[cfg(test)]
mod tests {
    use super::{AgentEvent, NgrokAgent, TunnelController as _, agent_args, parse_agent_event};
    use std::time::Duration;

    #[test]
    fn agent_args_include_scheme_for_tls_bound_http() {
        let args = agent_args("127.0.0.1:9999", "http", true);
        assert_eq!(args[0], "http");
        assert_eq!(args[1], "127.0.0.1:9999");
        assert!(args.windows(2).any(|w| w == ["--scheme", "https"]));
    }

    #[test]
    fn agent_args_skip_scheme_for_tcp_and_never_carry_the_token() {
        let args = agent_args("127.0.0.1:9999", "tcp", true);
        assert!(!args.contains(&"--scheme".to_string()));
        // The authtoken travels via NGROK_AUTHTOKEN, never argv.
        assert!(!args.iter().any(|a| a.contains("authtoken")));
    }

    #[test]
    fn parse_agent_event_extracts_started_tunnel_url() {
        let line = r#"{"lvl":"info","msg":"started tunnel","obj":"tunnels","name":"command_line","addr":"http://127.0.0.1:9999","url":"https://example.ngrok.app"}"#;
        match parse_agent_event(line) {
            Some(AgentEvent::Started { url }) => assert_eq!(url, "https://example.ngrok.app"),
            other => panic!("expected started event, got {:?}", other.is_some()),
        }
    }

    #[test]
    fn parse_agent_event_surfaces_fatal_errors() {
        let line = r#"{"lvl":"crit","msg":"terminating with error","err":"authentication failed"}"#;
        match parse_agent_event(line) {
            Some(AgentEvent::Fatal(message)) => assert_eq!(message, "authentication failed"),
            _ => panic!("expected fatal event"),
        }
    }

    #[test]
    fn parse_agent_event_ignores_noise() {
        assert!(parse_agent_event("not json").is_none());
        assert!(parse_agent_event(r#"{"lvl":"info","msg":"open config file"}"#).is_none());
    }

    #[cfg(unix)]
    fn write_agent_script(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt as _;
        let path = dir.path().join("fake-agent.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        path
    }

    #[cfg(unix)]
    const STARTED_LINE: &str =
        r#"echo '{"lvl":"info","msg":"started tunnel","url":"https://fake.ngrok.app"}'"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn connect_reports_the_url_and_keeps_the_agent_alive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let heartbeats = dir.path().join("heartbeats");
        let token_file = dir.path().join("token");
        // The agent keeps logging after the tunnel is up; each loop turn also
        // leaves a heartbeat on disk so liveness is observable from outside.
        let script = write_agent_script(
            &dir,
            &format!(
                "printf '%s' \"$NGROK_AUTHTOKEN\" > '{token}'\n\
                 {STARTED_LINE}\n\
                 while :; do\n\
                 echo '{{\"lvl\":\"info\",\"msg\":\"join connections\"}}'\n\
                 echo beat >> '{beats}'\n\
                 sleep 0.1\n\
                 done\n",
                token = token_file.display(),
                beats = heartbeats.display(),
            ),
        );

        let agent = NgrokAgent::new();
        agent.set_auth_token("sekrit");
        agent.set_executable_path(&script);

        let url = agent.connect("127.0.0.1:1", "http", true).await.expect("connect");
        assert_eq!(url, "https://fake.ngrok.app");
        assert_eq!(
            std::fs::read_to_string(&token_file).expect("token file"),
            "sekrit"
        );

        tokio::time::sleep(Duration::from_millis(400)).await;
        let first = std::fs::read_to_string(&heartbeats).unwrap_or_default().len();
        tokio::time::sleep(Duration::from_millis(400)).await;
        let second = std::fs::read_to_string(&heartbeats).unwrap_or_default().len();
        assert!(
            second > first && first > 0,
            "agent stopped logging after connect (heartbeats: {first} then {second})"
        );

        agent.disconnect(&url).expect("disconnect");
        agent.shutdown().expect("shutdown");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn connect_fails_when_the_agent_exits_before_reporting_a_url() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = write_agent_script(
            &dir,
            "echo '{\"lvl\":\"info\",\"msg\":\"open config file\"}'\nexit 1\n",
        );

        let agent = NgrokAgent::new();
        agent.set_executable_path(&script);

        let err = agent.connect("127.0.0.1:1", "http", true).await.unwrap_err();
        assert!(
            err.to_string().contains("exited before reporting"),
            "unexpected error: {err}"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn connect_times_out_on_a_silent_agent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = write_agent_script(&dir, "sleep 30\n");

        let agent = NgrokAgent::new().with_startup_timeout(Duration::from_millis(200));
        agent.set_executable_path(&script);

        let err = agent.connect("127.0.0.1:1", "http", true).await.unwrap_err();
        assert!(err.to_string().contains("timed out"), "unexpected error: {err}");
    }
}
