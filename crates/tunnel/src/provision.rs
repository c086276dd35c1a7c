//! Scoped tunnel provisioning: executable discovery, connect, guaranteed
//! teardown.

use crate::agent::TunnelController;
use crate::error::{Result, TunnelError};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Options controlling a tunnel session, derived from configuration once at
/// startup.
#[derive(Debug, Clone)]
pub struct TunnelOptions {
    pub authtoken: Option<String>,
    pub proto: String,
    pub executable_path: Option<String>,
}

impl Default for TunnelOptions {
    fn default() -> Self {
        Self {
            authtoken: None,
            proto: "http".to_string(),
            executable_path: None,
        }
    }
}

/// A live tunnel. Dropping the guard tears the tunnel down on every exit
/// path: disconnect by URL first, then a full agent shutdown. The shutdown
/// step runs even when disconnect fails.
pub struct TunnelGuard {
    public_url: String,
    controller: Arc<dyn TunnelController>,
}

impl std::fmt::Debug for TunnelGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelGuard")
            .field("public_url", &self.public_url)
            .finish_non_exhaustive()
    }
}

impl TunnelGuard {
    /// The publicly reachable URL forwarding to the local server.
    #[must_use]
    pub fn public_url(&self) -> &str {
        &self.public_url
    }
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        if let Err(e) = self.controller.disconnect(&self.public_url) {
            tracing::warn!(error = %e, url = %self.public_url, "tunnel disconnect failed");
        }
        if let Err(e) = self.controller.shutdown() {
            tracing::warn!(error = %e, "tunnel shutdown failed");
        }
    }
}

/// Open a TLS-bound tunnel to `host:port` and return a guard scoping its
/// lifetime.
///
/// The authtoken and any resolved executable path are applied to the
/// controller's shared configuration before connecting. Provisioning is
/// expected to happen once at process startup; concurrent calls race on that
/// shared configuration and are out of contract.
///
/// # Errors
///
/// Returns [`TunnelError::Config`] when a configured executable path is
/// invalid (no connect is attempted) and [`TunnelError::Connect`] when the
/// underlying agent fails to establish the tunnel.
pub async fn open(
    controller: Arc<dyn TunnelController>,
    host: &str,
    port: u16,
    options: &TunnelOptions,
) -> Result<TunnelGuard> {
    let executable = resolve_executable(options.executable_path.as_deref())?;

    if let Some(token) = options.authtoken.as_deref().filter(|t| !t.is_empty()) {
        controller.set_auth_token(token);
    }
    if let Some(path) = &executable {
        controller.set_executable_path(path);
    }

    let addr = format!("{host}:{port}");
    let public_url = controller.connect(&addr, &options.proto, true).await?;
    tracing::info!(url = %public_url, "tunnel established");

    Ok(TunnelGuard {
        public_url,
        controller,
    })
}

/// Resolve the tunnel executable to force, if any.
///
/// A configured path is validated and never silently replaced; with nothing
/// configured, platform-conventional install locations are probed in priority
/// order. `None` means the controller's own default applies (`ngrok` on
/// `PATH`).
///
/// # Errors
///
/// Returns [`TunnelError::Config`] naming the offending path when a
/// configured executable does not exist or is not executable.
pub fn resolve_executable(configured: Option<&str>) -> Result<Option<PathBuf>> {
    if let Some(raw) = configured.map(str::trim).filter(|s| !s.is_empty()) {
        let path = expand_user(Path::new(raw), home_dir().as_deref());
        validate_executable(&path)?;
        return Ok(Some(path));
    }

    Ok(candidate_paths().into_iter().find(|p| p.is_file()))
}

fn validate_executable(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(TunnelError::Config(format!(
            "configured tunnel executable does not exist: {}",
            path.display()
        )));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        let mode = path
            .metadata()
            .map_err(|e| {
                TunnelError::Config(format!(
                    "configured tunnel executable is not accessible: {}: {e}",
                    path.display()
                ))
            })?
            .permissions()
            .mode();
        if mode & 0o111 == 0 {
            return Err(TunnelError::Config(format!(
                "configured tunnel executable is not executable: {}",
                path.display()
            )));
        }
    }

    Ok(())
}

fn expand_user(path: &Path, home: Option<&Path>) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~")
        && let Some(home) = home
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    let var = "USERPROFILE";
    #[cfg(not(windows))]
    let var = "HOME";
    std::env::var_os(var).map(PathBuf::from)
}

#[cfg(windows)]
fn candidate_paths() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    for var in ["ProgramFiles", "ProgramFiles(x86)"] {
        if let Some(base) = std::env::var_os(var).filter(|v| !v.is_empty()) {
            candidates.push(PathBuf::from(base).join("ngrok").join("ngrok.exe"));
        }
    }
    if let Some(base) = std::env::var_os("LOCALAPPDATA").filter(|v| !v.is_empty()) {
        candidates.push(
            PathBuf::from(base)
                .join("Microsoft")
                .join("WindowsApps")
                .join("ngrok.exe"),
        );
    }
    candidates
}

#[cfg(not(windows))]
fn candidate_paths() -> Vec<PathBuf> {
    let mut candidates = vec![
        PathBuf::from("/usr/local/bin/ngrok"),
        PathBuf::from("/usr/bin/ngrok"),
        PathBuf::from("/opt/homebrew/bin/ngrok"),
    ];
    if let Some(home) = home_dir() {
        candidates.push(home.join(".local/bin/ngrok"));
    }
    candidates
}
