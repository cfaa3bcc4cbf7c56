//! Per-turn undo.
//!
//! Inside a git work tree the whole tree is snapshotted at the start of each
//! turn, so `/undo` also reverts what shell commands did. Outside one, only
//! files written by `update_file` are tracked.
//!
//! Git snapshots go through a private index file; the user's staging area is
//! never touched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tern_core::{Message, Result, TernError};
use tokio::process::Command;
use tracing::{debug, warn};

/// State captured when a turn starts.
#[derive(Debug, Clone, Default)]
pub struct TurnSnapshot {
    pub log: Vec<Message>,
    /// Git tree id of the work tree, when it is a repository.
    pub tree: Option<String>,
    /// Contents of files before their first edit in this turn.
    /// `None` means the file did not exist yet. Empty when `tree` is set.
    pub files: HashMap<PathBuf, Option<String>>,
}

/// Per-turn undo history for the conversation log and the work tree.
#[derive(Debug, Default)]
pub struct UndoJournal {
    history: Vec<TurnSnapshot>,
}

impl UndoJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_turn(&mut self, log: &[Message]) {
        self.begin_turn_with_tree(log, None);
    }

    /// Start a turn whose work tree was captured as git tree `tree`.
    pub fn begin_turn_with_tree(&mut self, log: &[Message], tree: Option<String>) {
        self.history.push(TurnSnapshot {
            log: log.to_vec(),
            tree,
            files: HashMap::new(),
        });
    }

    /// Whether the current turn still needs the pre-edit content of `path`.
    pub fn wants_file(&self, path: &Path) -> bool {
        match self.history.last() {
            Some(turn) => turn.tree.is_none() && !turn.files.contains_key(path),
            None => false,
        }
    }

    /// Remember `path` as it was before the current turn first touched it.
    /// Later versions of the same file are ignored.
    pub fn record_file(&mut self, path: PathBuf, previous: Option<String>) {
        let Some(turn) = self.history.last_mut() else {
            return;
        };
        if turn.tree.is_some() || turn.files.contains_key(&path) {
            return;
        }
        debug!(path = %path.display(), existed = previous.is_some(), "file recorded for undo");
        turn.files.insert(path, previous);
    }

    pub fn pop(&mut self) -> Option<TurnSnapshot> {
        self.history.pop()
    }

    pub fn depth(&self) -> usize {
        self.history.len()
    }
}

/// Absolute form of `path`, used as the journal key.
pub fn journal_key(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Read a file's current content for the journal.
///
/// `Ok(None)` means it does not exist.
pub async fn read_previous(path: &Path) -> std::io::Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Put recorded files back: rewrite old contents, remove files the turn created.
pub async fn restore_files(files: &HashMap<PathBuf, Option<String>>) -> Vec<String> {
    let mut failures = Vec::new();
    for (path, previous) in files {
        let result = match previous {
            Some(content) => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await.ok();
                }
                tokio::fs::write(path, content).await
            }
            None => match tokio::fs::remove_file(path).await {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to revert file");
            failures.push(format!("{}: {e}", path.display()));
        }
    }
    failures
}

// ── Git work tree ──────────────────────────────────────────────

/// A git work tree that can be snapshotted and restored wholesale.
#[derive(Debug, Clone)]
pub struct GitWorkTree {
    root: PathBuf,
}

impl GitWorkTree {
    /// The work tree containing `dir`, if `dir` is inside one and git runs.
    pub async fn detect(dir: &Path) -> Option<Self> {
        let output = Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(dir)
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if root.is_empty() {
            return None;
        }
        debug!(%root, "git work tree detected, undo snapshots the whole tree");
        Some(Self {
            root: PathBuf::from(root),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write every non-ignored file into the object store and return the
    /// tree id.
    pub async fn snapshot(&self) -> Result<String> {
        let scratch = tempfile::tempdir()?;
        let index = scratch.path().join("index");
        self.git(&["add", "-A"], &index).await?;
        let tree = self.git(&["write-tree"], &index).await?;
        Ok(tree.trim().to_string())
    }

    /// Make the work tree match `tree`: rewrite tracked content and remove
    /// non-ignored files that did not exist at snapshot time.
    pub async fn restore(&self, tree: &str) -> Result<()> {
        let scratch = tempfile::tempdir()?;
        let index = scratch.path().join("index");
        self.git(&["read-tree", tree], &index).await?;
        self.git(&["checkout-index", "-a", "-f"], &index).await?;
        self.git(&["clean", "-f", "-d", "-q"], &index).await?;
        Ok(())
    }

    async fn git(&self, args: &[&str], index: &Path) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .env("GIT_INDEX_FILE", index)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(TernError::Other(anyhow::anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
