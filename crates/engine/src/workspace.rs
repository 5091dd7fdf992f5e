// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-step workspace provisioning.
//!
//! Layout under `<workspace_root>/<run_id>/<step_id>/`:
//!
//! ```text
//! artifacts/<as_name>/...    # injected from upstream output paths
//! output/                    # step writes outputs here
//! <adapter project files>    # CLAUDE.md, .claude/settings.json
//! <mounted source paths>     # readonly or readwrite per Mount.mode
//! ```
//!
//! Retries never reuse a directory: attempt N > 1 gets `<step_id>.attempt-N`.
//! Workspaces are never deleted automatically; [`WorkspaceManager::reap`]
//! is the only deletion path and only runs on explicit request.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use wave_core::{RunId, StepId};
use wave_manifest::{interpolate, Mount, MountMode, Step, WorkspaceKind};

/// Errors from workspace operations
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("injected artifact source missing: {0}")]
    InjectionMissing(String),
    #[error("mount source missing: {0}")]
    MountMissing(String),
    #[error("git worktree add failed: {0}")]
    Worktree(String),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> WorkspaceError + '_ {
    move |source| WorkspaceError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// A provisioned workspace owned by one step attempt.
#[derive(Debug, Clone)]
pub struct WorkspaceHandle {
    pub path: PathBuf,
    pub run_id: RunId,
    pub step_id: StepId,
    pub attempt: u32,
}

/// An injection resolved by the scheduler: where the upstream artifact file
/// lives on disk and what the step wants it called.
#[derive(Debug, Clone)]
pub struct ResolvedInjection {
    pub source: PathBuf,
    pub as_name: String,
}

/// Creates and tracks per-step workspaces under a configured root.
pub struct WorkspaceManager {
    project_root: PathBuf,
    workspace_root: PathBuf,
    /// Worktrees shared by resolved branch name
    worktrees: Arc<Mutex<HashMap<String, PathBuf>>>,
}

impl WorkspaceManager {
    pub fn new(project_root: impl Into<PathBuf>, workspace_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let workspace_root = workspace_root.into();
        // A relative workspace root is anchored at the project
        let workspace_root = if workspace_root.is_absolute() {
            workspace_root
        } else {
            project_root.join(workspace_root)
        };
        Self {
            project_root,
            workspace_root,
            worktrees: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Directory a given attempt of a step owns.
    pub fn step_dir(&self, run_id: &RunId, step_id: &StepId, attempt: u32) -> PathBuf {
        let leaf = if attempt <= 1 {
            step_id.to_string()
        } else {
            format!("{}.attempt-{}", step_id, attempt)
        };
        self.workspace_root.join(run_id.as_str()).join(leaf)
    }

    /// Resolve the directory a step attempt lives in without provisioning.
    ///
    /// Mirrors [`WorkspaceManager::provision`]'s path logic: custom folder
    /// roots are honored; worktree steps resolve through the shared
    /// branch → path map.
    pub fn resolve_dir(
        &self,
        run_id: &RunId,
        step: &Step,
        step_id: &StepId,
        attempt: u32,
        vars: &HashMap<String, String>,
    ) -> PathBuf {
        match step.workspace.kind {
            WorkspaceKind::Worktree => {
                let branch_template = step
                    .workspace
                    .branch
                    .clone()
                    .unwrap_or_else(|| format!("wave/{}", run_id));
                let branch = interpolate(&branch_template, vars);
                if let Some(path) = self.worktrees.lock().get(&branch).cloned() {
                    return path;
                }
                self.step_dir(run_id, step_id, attempt)
            }
            WorkspaceKind::Folder => match &step.workspace.root {
                Some(root) => {
                    let root = if root.is_absolute() {
                        root.clone()
                    } else {
                        self.project_root.join(root)
                    };
                    let leaf = if attempt <= 1 {
                        step_id.to_string()
                    } else {
                        format!("{}.attempt-{}", step_id, attempt)
                    };
                    root.join(run_id.as_str()).join(leaf)
                }
                None => self.step_dir(run_id, step_id, attempt),
            },
        }
    }

    /// Provision a fresh workspace for a step attempt.
    pub async fn provision(
        &self,
        run_id: &RunId,
        step: &Step,
        step_id: &StepId,
        attempt: u32,
        vars: &HashMap<String, String>,
        injections: &[ResolvedInjection],
    ) -> Result<WorkspaceHandle, WorkspaceError> {
        let path = match step.workspace.kind {
            WorkspaceKind::Worktree => {
                self.provision_worktree(run_id, step, step_id, attempt, vars)
                    .await?
            }
            WorkspaceKind::Folder => {
                let root = match &step.workspace.root {
                    Some(root) if root.is_absolute() => root.clone(),
                    Some(root) => self.project_root.join(root),
                    None => self.workspace_root.clone(),
                };
                let leaf = if attempt <= 1 {
                    step_id.to_string()
                } else {
                    format!("{}.attempt-{}", step_id, attempt)
                };
                root.join(run_id.as_str()).join(leaf)
            }
        };

        tokio::fs::create_dir_all(&path).await.map_err(io_err(&path))?;
        let output = path.join("output");
        tokio::fs::create_dir_all(&output)
            .await
            .map_err(io_err(&output))?;

        self.copy_injections(&path, injections).await?;
        self.apply_mounts(&path, &step.workspace.mount).await?;

        Ok(WorkspaceHandle {
            path,
            run_id: run_id.clone(),
            step_id: step_id.clone(),
            attempt,
        })
    }

    async fn provision_worktree(
        &self,
        run_id: &RunId,
        step: &Step,
        step_id: &StepId,
        attempt: u32,
        vars: &HashMap<String, String>,
    ) -> Result<PathBuf, WorkspaceError> {
        let branch_template = step
            .workspace
            .branch
            .clone()
            .unwrap_or_else(|| format!("wave/{}", run_id));
        let branch = interpolate(&branch_template, vars);

        // Steps resolving to the same branch share the worktree
        if let Some(existing) = self.worktrees.lock().get(&branch).cloned() {
            return Ok(existing);
        }

        let path = self.step_dir(run_id, step_id, attempt);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_err(parent))?;
        }

        let output = tokio::process::Command::new("git")
            .arg("worktree")
            .arg("add")
            .arg("-b")
            .arg(&branch)
            .arg(&path)
            .current_dir(&self.project_root)
            .output()
            .await
            .map_err(|e| WorkspaceError::Worktree(e.to_string()))?;

        if !output.status.success() {
            return Err(WorkspaceError::Worktree(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        self.worktrees.lock().insert(branch, path.clone());
        Ok(path)
    }

    async fn copy_injections(
        &self,
        workspace: &Path,
        injections: &[ResolvedInjection],
    ) -> Result<(), WorkspaceError> {
        for injection in injections {
            if !injection.source.exists() {
                return Err(WorkspaceError::InjectionMissing(
                    injection.source.display().to_string(),
                ));
            }
            let dest_dir = workspace.join("artifacts").join(&injection.as_name);
            tokio::fs::create_dir_all(&dest_dir)
                .await
                .map_err(io_err(&dest_dir))?;

            let file_name = injection
                .source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| injection.as_name.clone());
            let dest = dest_dir.join(file_name);
            if injection.source.is_dir() {
                copy_tree(&injection.source, &dest).await?;
            } else {
                tokio::fs::copy(&injection.source, &dest)
                    .await
                    .map_err(io_err(&dest))?;
            }
        }
        Ok(())
    }

    async fn apply_mounts(
        &self,
        workspace: &Path,
        mounts: &[Mount],
    ) -> Result<(), WorkspaceError> {
        for mount in mounts {
            let source = if mount.path.is_absolute() {
                mount.path.clone()
            } else {
                self.project_root.join(&mount.path)
            };
            if !source.exists() {
                return Err(WorkspaceError::MountMissing(source.display().to_string()));
            }

            let leaf = mount
                .path
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| mount.path.clone());
            let dest = workspace.join(leaf);
            if source.is_dir() {
                copy_tree(&source, &dest).await?;
            } else {
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(io_err(parent))?;
                }
                tokio::fs::copy(&source, &dest)
                    .await
                    .map_err(io_err(&dest))?;
            }

            if mount.mode == MountMode::Readonly {
                set_readonly_recursive(&dest).await;
            }
        }
        Ok(())
    }

    /// Release a workspace. File deletion never happens here: failed runs
    /// stay inspectable.
    pub fn release(&self, handle: WorkspaceHandle) {
        tracing::debug!(
            run_id = %handle.run_id,
            step_id = %handle.step_id,
            path = %handle.path.display(),
            "workspace released"
        );
    }

    /// Delete workspaces of the runs accepted by `predicate`, returning the
    /// removed run directories.
    pub async fn reap<F>(&self, predicate: F) -> Result<Vec<PathBuf>, WorkspaceError>
    where
        F: Fn(&str) -> bool,
    {
        let mut removed = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.workspace_root).await {
            Ok(entries) => entries,
            Err(_) => return Ok(removed), // nothing provisioned yet
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if !predicate(&name) {
                continue;
            }
            let path = entry.path();
            remove_worktrees_under(&path).await;
            // Mounted files may have been made read-only; restore write bits
            // so removal succeeds.
            set_writable_recursive(&path).await;
            tokio::fs::remove_dir_all(&path)
                .await
                .map_err(io_err(&path))?;
            removed.push(path);
        }
        Ok(removed)
    }
}

/// Unregister any git worktrees below a run directory before deletion.
///
/// A worktree's `.git` is a file pointing at the parent repository; removing
/// the directory without `git worktree remove` leaves a stale registration.
async fn remove_worktrees_under(run_dir: &Path) {
    let Ok(mut entries) = tokio::fs::read_dir(run_dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let candidate = entry.path();
        let dot_git = candidate.join(".git");
        let is_worktree = tokio::fs::symlink_metadata(&dot_git)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if is_worktree {
            // Best-effort: git worktree remove --force
            let _ = tokio::process::Command::new("git")
                .arg("worktree")
                .arg("remove")
                .arg("--force")
                .arg(&candidate)
                .current_dir(&candidate)
                .output()
                .await;
        }
    }
}

/// Recursively copy a directory tree.
async fn copy_tree(source: &Path, dest: &Path) -> Result<(), WorkspaceError> {
    tokio::fs::create_dir_all(dest).await.map_err(io_err(dest))?;
    let mut stack = vec![(source.to_path_buf(), dest.to_path_buf())];

    while let Some((src_dir, dst_dir)) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&src_dir)
            .await
            .map_err(io_err(&src_dir))?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err(&src_dir))? {
            let src = entry.path();
            let dst = dst_dir.join(entry.file_name());
            let file_type = entry.file_type().await.map_err(io_err(&src))?;
            if file_type.is_dir() {
                tokio::fs::create_dir_all(&dst).await.map_err(io_err(&dst))?;
                stack.push((src, dst));
            } else if file_type.is_file() {
                tokio::fs::copy(&src, &dst).await.map_err(io_err(&dst))?;
            }
            // Symlinks are skipped: workspaces must be self-contained
        }
    }
    Ok(())
}

async fn set_readonly_recursive(path: &Path) {
    let mut stack = vec![path.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(metadata) = tokio::fs::metadata(&current).await else {
            continue;
        };
        let mut perms = metadata.permissions();
        perms.set_readonly(true);
        let _ = tokio::fs::set_permissions(&current, perms).await;

        if metadata.is_dir() {
            if let Ok(mut entries) = tokio::fs::read_dir(&current).await {
                while let Ok(Some(entry)) = entries.next_entry().await {
                    stack.push(entry.path());
                }
            }
        }
    }
}

async fn set_writable_recursive(path: &Path) {
    let mut stack = vec![path.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(metadata) = tokio::fs::metadata(&current).await else {
            continue;
        };
        #[allow(clippy::permissions_set_readonly_false)]
        {
            let mut perms = metadata.permissions();
            perms.set_readonly(false);
            let _ = tokio::fs::set_permissions(&current, perms).await;
        }

        if metadata.is_dir() {
            if let Ok(mut entries) = tokio::fs::read_dir(&current).await {
                while let Ok(Some(entry)) = entries.next_entry().await {
                    stack.push(entry.path());
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
