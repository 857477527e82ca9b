//! `get_repo`: describe one repository and select it for the conversation.

use std::sync::Arc;

use async_trait::async_trait;
use forgepilot_core::error::ToolError;
use forgepilot_core::tool::{
    CallerIdentity, ParamSpec, ParamType, Tool, ToolDescriptor, ToolEffects, ToolParams, param_str,
};
use serde_json::json;

use crate::CURRENT_REPO_KEY;
use crate::workspace::Workspace;

const NAME: &str = "get_repo";

/// Entries beyond this are summarized as a count.
const MAX_ENTRIES: usize = 40;

pub struct GetRepoTool {
    workspace: Arc<Workspace>,
}

impl GetRepoTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for GetRepoTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            NAME,
            "Show details of one repository and make it the current repository",
        )
        .param(ParamSpec::required(
            "repo_id",
            ParamType::String,
            "Repository name, as returned by list_repos",
        ))
    }

    async fn execute(&self, params: &ToolParams, _caller: &CallerIdentity) -> Result<String, ToolError> {
        let repo_id = param_str(params, "repo_id").unwrap_or_default();
        let info = self
            .workspace
            .repo(repo_id)
            .await
            .map_err(|e| e.into_tool_error(NAME))?;
        let entries = self
            .workspace
            .entries(&info)
            .await
            .map_err(|e| e.into_tool_error(NAME))?;

        let mut listing = entries
            .iter()
            .take(MAX_ENTRIES)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        if entries.len() > MAX_ENTRIES {
            listing.push_str(&format!(" (and {} more)", entries.len() - MAX_ENTRIES));
        }

        Ok(format!(
            "Repository {}\n- path: {}\n- git: {}\n- default branch: {}\n- top-level entries ({}): {}",
            info.name,
            info.path.display(),
            if info.is_git { "yes" } else { "no" },
            info.default_branch.as_deref().unwrap_or("unknown"),
            entries.len(),
            listing,
        ))
    }

    fn effects(&self, params: &ToolParams, _output: &str) -> ToolEffects {
        ToolEffects {
            updates: param_str(params, "repo_id")
                .map(|id| vec![(CURRENT_REPO_KEY.to_string(), json!(id))])
                .unwrap_or_default(),
            candidates: Vec::new(),
        }
    }
}
