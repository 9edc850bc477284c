use anyhow::{bail, Context, Result};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Allocates one isolated directory per agent under a common base.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    base_dir: PathBuf,
}

impl WorkspaceManager {
    /// A relative `base_dir` is anchored at the current directory.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref();
        let base_dir = if base_dir.is_absolute() {
            base_dir.to_path_buf()
        } else {
            std::env::current_dir()
                .context("Failed to resolve current directory")?
                .join(base_dir)
        };
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Pure lookup; the directory may not exist yet.
    pub fn workspace_root(&self, agent_id: &str) -> PathBuf {
        self.base_dir.join(agent_id)
    }

    /// Wipes any previous contents and returns a fresh, empty directory.
    pub async fn create_workspace(&self, agent_id: &str) -> Result<PathBuf> {
        let dir = self.checked_root(agent_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!("Cleared previous workspace {}", dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to clear workspace {}", dir.display()))
            }
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create workspace {}", dir.display()))?;
        Ok(dir)
    }

    pub async fn cleanup_workspace(&self, agent_id: &str) {
        let dir = match self.checked_root(agent_id) {
            Ok(dir) => dir,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to cleanup workspace for {}: {}", agent_id, e),
        }
    }

    /// Files in the agent's workspace, as sorted `/`-separated relative paths.
    pub async fn list_files(&self, agent_id: &str) -> Result<Vec<String>> {
        let root = self.checked_root(agent_id)?;
        let mut files = Vec::new();
        let mut pending = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && dir == root => {
                    return Ok(files)
                }
                Err(e) => return Err(e).with_context(|| format!("Failed to list {}", dir.display())),
            };

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&root) {
                    let parts: Vec<String> = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    files.push(parts.join("/"));
                }
            }
        }

        files.sort();
        Ok(files)
    }

    fn checked_root(&self, agent_id: &str) -> Result<PathBuf> {
        let mut components = Path::new(agent_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.workspace_root(agent_id)),
            _ => bail!("Invalid agent id for workspace: '{}'", agent_id),
        }
    }
}
