//! `list_repos`: enumerate the repositories in the workspace.

use std::sync::Arc;

use async_trait::async_trait;
use forgepilot_core::error::ToolError;
use forgepilot_core::tool::{
    CallerIdentity, EntityCandidate, ParamSpec, ParamType, Tool, ToolDescriptor, ToolEffects,
    ToolParams, param_str,
};
use serde_json::json;

use crate::CURRENT_REPO_KEY;
use crate::workspace::Workspace;

const NAME: &str = "list_repos";

pub struct ListReposTool {
    workspace: Arc<Workspace>,
}

impl ListReposTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ListReposTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(NAME, "List the repositories in the user's workspace").param(
            ParamSpec::optional(
                "filter",
                ParamType::String,
                "Only repositories whose name contains this text",
            ),
        )
    }

    async fn execute(&self, params: &ToolParams, _caller: &CallerIdentity) -> Result<String, ToolError> {
        let filter = param_str(params, "filter").map(str::to_lowercase);
        let repos = self
            .workspace
            .list_repos()
            .await
            .map_err(|e| e.into_tool_error(NAME))?;

        let names: Vec<&str> = repos
            .iter()
            .map(|r| r.name.as_str())
            .filter(|name| {
                filter
                    .as_deref()
                    .is_none_or(|f| name.to_lowercase().contains(f))
            })
            .collect();

        tracing::debug!(count = names.len(), filter = ?filter, "Listed repositories");
        Ok(match names.len() {
            0 => "No repositories found.".to_string(),
            1 => format!("Found 1 repository: {}", names[0]),
            n => format!("Found {n} repositories: {}", names.join(", ")),
        })
    }

    fn effects(&self, _params: &ToolParams, output: &str) -> ToolEffects {
        let candidates = output
            .split_once(": ")
            .map(|(_, list)| {
                list.split(", ")
                    .filter(|name| !name.is_empty())
                    .map(|name| EntityCandidate {
                        key: CURRENT_REPO_KEY.into(),
                        value: json!(name),
                        label: name.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        ToolEffects {
            updates: Vec::new(),
            candidates,
        }
    }
}
