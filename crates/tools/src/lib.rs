//! Built-in tool implementations for Forgepilot.
//!
//! Every tool works on a [`Workspace`]: a directory whose immediate
//! subdirectories are the user's repositories. Paths handed to the tools
//! are always relative to a repository and can never leave it.

pub mod get_repo;
pub mod list_repos;
pub mod read_file;
pub mod workspace;
pub mod write_file;

use std::path::PathBuf;
use std::sync::Arc;

use forgepilot_core::error::ToolError;
use forgepilot_core::tool::ToolRegistry;

pub use workspace::{RepoInfo, Workspace, WorkspaceError};

/// Working-context key holding the repository the conversation is about.
pub const CURRENT_REPO_KEY: &str = "current_repo_id";

/// Create a registry with every built-in tool over `workspace_root`.
pub fn default_registry(workspace_root: impl Into<PathBuf>) -> Result<ToolRegistry, ToolError> {
    let workspace = Arc::new(Workspace::new(workspace_root));
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(list_repos::ListReposTool::new(workspace.clone())))?;
    registry.register(Box::new(get_repo::GetRepoTool::new(workspace.clone())))?;
    registry.register(Box::new(read_file::ReadFileTool::new(workspace.clone())))?;
    registry.register(Box::new(write_file::WriteFileTool::new(workspace)))?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_every_tool_in_order() {
        let registry = default_registry("/tmp/forgepilot-none").unwrap();
        assert_eq!(
            registry.names(),
            vec!["list_repos", "get_repo", "read_file", "write_file"]
        );
        let catalogue = registry.describe_all();
        assert!(catalogue.contains("- read_file:"));
        assert!(catalogue.contains("repo_id (string, required)"));
    }
}
