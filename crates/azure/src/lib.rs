//! Azure DevOps work-item creation for storybridge.
//!
//! Exposes a small client that turns a title/description pair into a
//! "User Story" work item via the Azure DevOps REST API.

pub mod client;
pub mod error;

pub use client::{AzureDevOpsConfig, WorkItem, WorkItemClient};
pub use error::{AzureError, Result};
