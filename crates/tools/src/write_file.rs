//! `write_file`: create or overwrite a file in a repository.

use std::sync::Arc;

use async_trait::async_trait;
use forgepilot_core::error::ToolError;
use forgepilot_core::tool::{
    CallerIdentity, ParamSpec, ParamType, Tool, ToolDescriptor, ToolEffects, ToolParams, param_str,
};
use serde_json::json;

use crate::workspace::{Workspace, check_relative};

const NAME: &str = "write_file";

/// Working-context key holding the last file written in the conversation.
pub const LAST_WRITTEN_KEY: &str = "last_written_file";

pub struct WriteFileTool {
    workspace: Arc<Workspace>,
}

impl WriteFileTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            NAME,
            "Write text to a file in a repository, creating parent directories as needed",
        )
        .param(ParamSpec::required("repo_id", ParamType::String, "Repository name"))
        .param(ParamSpec::required(
            "path",
            ParamType::String,
            "File path relative to the repository root",
        ))
        .param(ParamSpec::required(
            "content",
            ParamType::String,
            "Full new content of the file",
        ))
    }

    fn validate_params(&self, params: &ToolParams) -> Result<(), ToolError> {
        match param_str(params, "path") {
            Some(path) => {
                check_relative(path).map_err(|e| ToolError::InvalidArguments(e.to_string()))
            }
            None => Ok(()),
        }
    }

    async fn execute(&self, params: &ToolParams, caller: &CallerIdentity) -> Result<String, ToolError> {
        let repo_id = param_str(params, "repo_id").unwrap_or_default();
        let path = param_str(params, "path").unwrap_or_default();
        let content = param_str(params, "content").unwrap_or_default();

        let resolved = self
            .workspace
            .resolve(repo_id, path)
            .await
            .map_err(|e| e.into_tool_error(NAME))?;

        let failed = |e: std::io::Error| ToolError::ExecutionFailed {
            tool_name: NAME.into(),
            reason: format!("{repo_id}/{path}: {e}"),
        };
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(failed)?;
        }
        tokio::fs::write(&resolved, content).await.map_err(failed)?;

        tracing::info!(
            repo = repo_id,
            path,
            bytes = content.len(),
            user_id = %caller.user_id,
            "Wrote file"
        );
        Ok(format!("Wrote {} bytes to {repo_id}/{path}", content.len()))
    }

    fn effects(&self, params: &ToolParams, _output: &str) -> ToolEffects {
        let updates = match (param_str(params, "repo_id"), param_str(params, "path")) {
            (Some(repo), Some(path)) => vec![(LAST_WRITTEN_KEY.to_string(), json!(format!("{repo}/{path}")))],
            _ => Vec::new(),
        };
        ToolEffects {
            updates,
            candidates: Vec::new(),
        }
    }
}
