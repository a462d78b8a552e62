// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context};

/// Directory names never descended into by any traversal (file listing,
/// search, snapshotting, repo mapping).
pub const IGNORED_DIRS: &[&str] = &["node_modules", ".git", "dist", ".next", ".cache"];

/// Returns true when `name` is in the standard ignore set.
pub fn is_ignored_dir(name: &str) -> bool {
    IGNORED_DIRS.contains(&name)
}

/// The sandboxed project directory.
///
/// Every path a tool receives resolves against this root; anything whose
/// canonical form does not stay under the root is rejected.  The root itself
/// is canonicalized at construction so symlinked deployment paths compare
/// correctly.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl AsRef<Path>) -> anyhow::Result<Self> {
        let root = root.as_ref();
        let root = root
            .canonicalize()
            .with_context(|| format!("project root {} not accessible", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a model-supplied path into the sandbox.
    ///
    /// Relative paths are joined onto the root; absolute paths are accepted
    /// only when they already point inside the root.  `.`/`..` components are
    /// resolved lexically first, then the deepest existing ancestor is
    /// canonicalized so a symlink cannot smuggle the path outside the root.
    pub fn resolve(&self, raw: &str) -> anyhow::Result<PathBuf> {
        if raw.trim().is_empty() {
            bail!("empty path");
        }
        let candidate = {
            let p = Path::new(raw);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                self.root.join(p)
            }
        };
        let normalized = lexical_normalize(&candidate);
        if !normalized.starts_with(&self.root) {
            bail!("Path traversal blocked: {raw}");
        }

        // Symlink check: canonicalize the deepest existing ancestor and make
        // sure it still lies under the root.
        let mut existing = normalized.as_path();
        let mut tail = Vec::new();
        while !existing.exists() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    tail.push(name.to_os_string());
                    existing = parent;
                }
                _ => bail!("Path traversal blocked: {raw}"),
            }
        }
        let mut canon = existing
            .canonicalize()
            .with_context(|| format!("cannot resolve {}", existing.display()))?;
        if !canon.starts_with(&self.root) {
            bail!("Path traversal blocked: {raw}");
        }
        for name in tail.into_iter().rev() {
            canon.push(name);
        }
        Ok(canon)
    }

    /// Project-relative display form with forward slashes, as sent to clients.
    pub fn rel_display(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Resolve `.` and `..` components without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Paths the agent has read this turn.
///
/// `write_file` against an existing file requires a prior `read_file` of the
/// same canonical path within the same top-level turn; creating new files is
/// exempt.  The gateway resets the set at the start of each turn — sub-agents
/// inherit the parent turn's set untouched.
#[derive(Debug, Default)]
pub struct ReadTracker {
    paths: Mutex<HashSet<PathBuf>>,
}

impl ReadTracker {
    pub fn record(&self, path: &Path) {
        self.paths.lock().unwrap().insert(path.to_path_buf());
    }

    pub fn was_read(&self, path: &Path) -> bool {
        self.paths.lock().unwrap().contains(path)
    }

    pub fn reset(&self) {
        self.paths.lock().unwrap().clear();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
