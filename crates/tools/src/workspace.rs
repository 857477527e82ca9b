//! The directory of repositories the tools operate on.
//!
//! Each immediate, non-hidden subdirectory of the root is a repository.
//! File paths are resolved relative to a repository and must stay inside
//! it after symlinks are followed.

use std::path::{Component, Path, PathBuf};

use forgepilot_core::error::ToolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Unknown repository: {0}")]
    UnknownRepo(String),

    #[error("Invalid repository name: {0:?}")]
    InvalidRepoName(String),

    #[error("Path escapes the repository: {0}")]
    OutsideRepo(String),

    #[error("No such file: {0}")]
    NotFound(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl WorkspaceError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Classify for the loop: bad requests are the model's problem, I/O
    /// failures are the dependency's.
    pub fn into_tool_error(self, tool_name: &str) -> ToolError {
        match self {
            Self::UnknownRepo(_) | Self::InvalidRepoName(_) | Self::NotFound(_) => {
                ToolError::InvalidArguments(self.to_string())
            }
            Self::OutsideRepo(_) => ToolError::PermissionDenied {
                tool_name: tool_name.into(),
                reason: self.to_string(),
            },
            Self::Io { .. } => ToolError::ExecutionFailed {
                tool_name: tool_name.into(),
                reason: self.to_string(),
            },
        }
    }
}

/// What the workspace knows about one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    pub name: String,
    pub path: PathBuf,
    pub is_git: bool,
    /// Branch `HEAD` points at, for git repositories
    pub default_branch: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All repositories, sorted by name. A missing root is an empty workspace.
    pub async fn list_repos(&self) -> Result<Vec<RepoInfo>, WorkspaceError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(root = %self.root.display(), "Workspace root does not exist");
                return Ok(Vec::new());
            }
            Err(e) => return Err(WorkspaceError::io("Failed to read workspace", e)),
        };

        let mut repos = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| WorkspaceError::io("Failed to read workspace", e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if is_dir {
                repos.push(inspect(name, entry.path()).await);
            }
        }
        repos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(repos)
    }

    pub async fn repo(&self, name: &str) -> Result<RepoInfo, WorkspaceError> {
        check_repo_name(name)?;
        let path = self.root.join(name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(inspect(name.to_string(), path).await),
            _ => Err(WorkspaceError::UnknownRepo(name.to_string())),
        }
    }

    /// Top-level entry names of a repository, sorted, without `.git`.
    pub async fn entries(&self, repo: &RepoInfo) -> Result<Vec<String>, WorkspaceError> {
        let mut dir = tokio::fs::read_dir(&repo.path)
            .await
            .map_err(|e| WorkspaceError::io(format!("Failed to list {}", repo.name), e))?;
        let mut names = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| WorkspaceError::io(format!("Failed to list {}", repo.name), e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name != ".git" {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Resolve `relative` inside repository `repo`.
    pub async fn resolve(&self, repo: &str, relative: &str) -> Result<PathBuf, WorkspaceError> {
        check_relative(relative)?;
        let info = self.repo(repo).await?;
        let root = tokio::fs::canonicalize(&info.path)
            .await
            .map_err(|e| WorkspaceError::io(format!("Failed to resolve {repo}"), e))?;
        let candidate = root.join(relative);

        // Symlinks can still point outside; check the deepest existing part
        let existing = deepest_existing(&candidate).await;
        let canonical = tokio::fs::canonicalize(&existing)
            .await
            .map_err(|e| WorkspaceError::io(format!("Failed to resolve {relative}"), e))?;
        if !canonical.starts_with(&root) {
            tracing::warn!(repo, path = relative, "Blocked path outside repository");
            return Err(WorkspaceError::OutsideRepo(relative.to_string()));
        }
        Ok(candidate)
    }
}

/// Reject paths that are empty, absolute, or climb with `..`.
pub fn check_relative(relative: &str) -> Result<(), WorkspaceError> {
    let path = Path::new(relative);
    let escapes = path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if relative.trim().is_empty() || path.is_absolute() || escapes {
        return Err(WorkspaceError::OutsideRepo(relative.to_string()));
    }
    Ok(())
}

fn check_repo_name(name: &str) -> Result<(), WorkspaceError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(WorkspaceError::InvalidRepoName(name.to_string()));
    }
    Ok(())
}

async fn inspect(name: String, path: PathBuf) -> RepoInfo {
    let git = path.join(".git");
    let is_git = tokio::fs::metadata(&git).await.is_ok();
    let default_branch = tokio::fs::read_to_string(git.join("HEAD"))
        .await
        .ok()
        .and_then(|head| {
            head.trim()
                .strip_prefix("ref: refs/heads/")
                .map(str::to_string)
        });
    RepoInfo {
        name,
        path,
        is_git,
        default_branch,
    }
}

async fn deepest_existing(path: &Path) -> PathBuf {
    let mut current = path.to_path_buf();
    while tokio::fs::symlink_metadata(&current).await.is_err() {
        if !current.pop() {
            break;
        }
    }
    current
}
