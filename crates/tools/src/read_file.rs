//! `read_file`: read a text file from a repository.

use std::sync::Arc;

use async_trait::async_trait;
use forgepilot_core::error::ToolError;
use forgepilot_core::tool::{
    CallerIdentity, ParamSpec, ParamType, Tool, ToolDescriptor, ToolParams, param_i64, param_str,
};

use crate::workspace::{Workspace, WorkspaceError, check_relative};

const NAME: &str = "read_file";
const DEFAULT_MAX_CHARS: usize = 8_000;

pub struct ReadFileTool {
    workspace: Arc<Workspace>,
}

impl ReadFileTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(NAME, "Read a text file from a repository")
            .param(ParamSpec::required(
                "repo_id",
                ParamType::String,
                "Repository name",
            ))
            .param(ParamSpec::required(
                "path",
                ParamType::String,
                "File path relative to the repository root",
            ))
            .param(ParamSpec::optional(
                "max_chars",
                ParamType::Integer,
                "Truncate the content after this many characters (default 8000)",
            ))
    }

    fn validate_params(&self, params: &ToolParams) -> Result<(), ToolError> {
        if let Some(path) = param_str(params, "path") {
            check_relative(path).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        }
        if let Some(max) = param_i64(params, "max_chars")
            && max <= 0
        {
            return Err(ToolError::InvalidArguments(
                "max_chars must be positive".into(),
            ));
        }
        Ok(())
    }

    async fn execute(&self, params: &ToolParams, _caller: &CallerIdentity) -> Result<String, ToolError> {
        let repo_id = param_str(params, "repo_id").unwrap_or_default();
        let path = param_str(params, "path").unwrap_or_default();
        let max_chars = param_i64(params, "max_chars")
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(DEFAULT_MAX_CHARS);

        let resolved = self
            .workspace
            .resolve(repo_id, path)
            .await
            .map_err(|e| e.into_tool_error(NAME))?;

        let meta = match tokio::fs::metadata(&resolved).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WorkspaceError::NotFound(format!("{repo_id}/{path}")).into_tool_error(NAME));
            }
            Err(e) => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: NAME.into(),
                    reason: e.to_string(),
                });
            }
        };
        if meta.is_dir() {
            return Err(ToolError::InvalidArguments(format!(
                "{repo_id}/{path} is a directory"
            )));
        }

        let bytes = tokio::fs::read(&resolved)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: NAME.into(),
                reason: e.to_string(),
            })?;
        let content = String::from_utf8(bytes).map_err(|_| {
            ToolError::InvalidArguments(format!("{repo_id}/{path} is not a text file"))
        })?;

        let total = content.chars().count();
        tracing::debug!(repo = repo_id, path, chars = total, "Read file");
        if total > max_chars {
            return Ok(format!(
                "{}\n[truncated: showing {max_chars} of {total} characters]",
                content.chars().take(max_chars).collect::<String>()
            ));
        }
        Ok(content)
    }
}
