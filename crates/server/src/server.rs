//! The MCP tool surface: a single `create_story` tool bridging a voice agent
//! to Azure DevOps.

use crate::config;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, ServerCapabilities, ServerInfo};
use rmcp::{ErrorData as McpError, ServerHandler, schemars, tool, tool_handler, tool_router};
use serde::Deserialize;
use storybridge_azure::{WorkItem, WorkItemClient};

const INSTRUCTIONS: &str = "Bridge between a voice agent and Azure DevOps. \
Use create_story to file a user story with the title and description \
gathered during the call.";

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CreateStoryRequest {
    /// Short summary of the story, used verbatim as the work item title.
    pub title: String,
    /// Longer narrative for the story body. May span multiple lines.
    #[serde(default)]
    pub description: String,
}

#[derive(Clone)]
pub struct StoryBridgeServer {
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl StoryBridgeServer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Create an Azure DevOps user story. Provide a title and \
                       description gathered during the call."
    )]
    async fn create_story(
        &self,
        Parameters(request): Parameters<CreateStoryRequest>,
    ) -> Result<CallToolResult, McpError> {
        let confirmation = create_story(&request.title, &request.description)
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(confirmation)]))
    }
}

impl Default for StoryBridgeServer {
    fn default() -> Self {
        Self::new()
    }
}

#[tool_handler]
impl ServerHandler for StoryBridgeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(INSTRUCTIONS.to_string()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Create a user story and return the spoken-back confirmation sentence.
///
/// Settings are loaded from the environment on every call, so rotated
/// credentials take effect without a restart.
///
/// # Errors
///
/// Returns an error when required configuration is missing, the request is
/// invalid, or Azure DevOps rejects it.
pub async fn create_story(title: &str, description: &str) -> anyhow::Result<String> {
    let settings = config::azure_settings()?;
    let client = WorkItemClient::new(settings)?;
    let work_item = client.create_story(title, description).await?;
    tracing::info!(id = work_item.id, "created work item");
    Ok(format_confirmation(&work_item))
}

fn format_confirmation(work_item: &WorkItem) -> String {
    // An empty browser link counts as absent, same as a missing one.
    let link = work_item
        .web_url
        .as_deref()
        .filter(|url| !url.is_empty())
        .unwrap_or(&work_item.url);
    format!(
        "Created Azure DevOps story #{} ({}). View it at: {}",
        work_item.id, work_item.title, link
    )
}
