//! Environment-backed settings: Azure DevOps credentials (re-read on every
//! tool call) and the tunnel switches (read once at startup).

use storybridge_azure::AzureDevOpsConfig;
use storybridge_tunnel::TunnelOptions;
use thiserror::Error;

pub const ENV_ORGANIZATION: &str = "AZURE_DEVOPS_ORGANIZATION";
pub const ENV_PROJECT: &str = "AZURE_DEVOPS_PROJECT";
pub const ENV_PAT: &str = "AZURE_DEVOPS_PAT";
pub const ENV_AREA_PATH: &str = "AZURE_DEVOPS_AREA_PATH";
pub const ENV_ITERATION_PATH: &str = "AZURE_DEVOPS_ITERATION_PATH";
pub const ENV_API_VERSION: &str = "AZURE_DEVOPS_API_VERSION";
pub const ENV_BASE_URL: &str = "AZURE_DEVOPS_BASE_URL";

pub const ENV_PUBLIC_URL: &str = "MCP_PUBLIC_URL";
pub const ENV_PUBLIC_URL_AUTHTOKEN: &str = "MCP_PUBLIC_URL_AUTHTOKEN";
pub const ENV_NGROK_AUTHTOKEN: &str = "NGROK_AUTHTOKEN";
pub const ENV_PUBLIC_URL_PROTO: &str = "MCP_PUBLIC_URL_PROTO";
pub const ENV_PUBLIC_URL_NGROK_PATH: &str = "MCP_PUBLIC_URL_NGROK_PATH";

#[derive(Debug, Error)]
pub enum SettingsError {
    /// Every required variable that is absent or blank, reported together so
    /// the operator can fix the environment in one pass.
    #[error("Missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<String>),
}

/// Load the Azure DevOps settings from the process environment.
///
/// Called fresh for every work-item request so credential rotation does not
/// require a restart.
///
/// # Errors
///
/// Returns [`SettingsError::Missing`] naming all absent or blank required
/// variables.
pub fn azure_settings() -> Result<AzureDevOpsConfig, SettingsError> {
    azure_settings_from(&env_lookup)
}

fn azure_settings_from(
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<AzureDevOpsConfig, SettingsError> {
    let mut missing = Vec::new();
    let mut required = |name: &str| match trimmed(lookup, name) {
        Some(value) => value,
        None => {
            missing.push(name.to_string());
            String::new()
        }
    };

    let organization = required(ENV_ORGANIZATION);
    let project = required(ENV_PROJECT);
    let pat = required(ENV_PAT);
    if !missing.is_empty() {
        return Err(SettingsError::Missing(missing));
    }

    let mut config = AzureDevOpsConfig::new(organization, project, pat);
    config.area_path = trimmed(lookup, ENV_AREA_PATH);
    config.iteration_path = trimmed(lookup, ENV_ITERATION_PATH);
    if let Some(version) = trimmed(lookup, ENV_API_VERSION) {
        config.api_version = version;
    }
    if let Some(base_url) = trimmed(lookup, ENV_BASE_URL) {
        config.base_url = base_url;
    }

    Ok(config)
}

/// Tunnel configuration, read once at startup. Never fails: with the switch
/// off the remaining variables are ignored, and with it on a bad value
/// surfaces later, when the tunnel is provisioned.
#[derive(Debug, Clone, Default)]
pub struct TunnelSettings {
    pub enabled: bool,
    pub options: TunnelOptions,
}

impl TunnelSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(&env_lookup)
    }

    fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        let enabled = trimmed(lookup, ENV_PUBLIC_URL).is_some_and(|v| is_truthy(&v));

        let defaults = TunnelOptions::default();
        let options = TunnelOptions {
            authtoken: trimmed(lookup, ENV_PUBLIC_URL_AUTHTOKEN)
                .or_else(|| trimmed(lookup, ENV_NGROK_AUTHTOKEN)),
            proto: trimmed(lookup, ENV_PUBLIC_URL_PROTO).unwrap_or(defaults.proto),
            executable_path: trimmed(lookup, ENV_PUBLIC_URL_NGROK_PATH),
        };

        Self { enabled, options }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn trimmed(lookup: &dyn Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}
