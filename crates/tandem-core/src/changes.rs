// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use tandem_tools::IGNORED_DIRS;

/// An `{path → mtime}` snapshot of the project tree, used to detect files
/// changed indirectly (shell commands, code generators) that the tool-driven
/// detector cannot see.
///
/// The walk is depth-bounded; changes below the bound are invisible to this
/// detector, which is why `write_file`/`edit_file` changes are reported
/// tool-side instead.
#[derive(Debug)]
pub struct ChangeSnapshot {
    mtimes: HashMap<PathBuf, SystemTime>,
}

impl ChangeSnapshot {
    pub fn capture(root: &Path, depth: usize) -> Self {
        let mut mtimes = HashMap::new();
        for entry in WalkDir::new(root)
            .min_depth(1)
            .max_depth(depth)
            .into_iter()
            .filter_entry(|e| {
                !(e.file_type().is_dir()
                    && IGNORED_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
            })
            .flatten()
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                if let Ok(mtime) = meta.modified() {
                    mtimes.insert(entry.path().to_path_buf(), mtime);
                }
            }
        }
        Self { mtimes }
    }

    /// Paths that are new or have a newer mtime than at capture time,
    /// sorted for stable emission order.
    pub fn diff(&self, root: &Path, depth: usize) -> Vec<PathBuf> {
        let now = Self::capture(root, depth);
        let mut changed: Vec<PathBuf> = now
            .mtimes
            .into_iter()
            .filter(|(path, mtime)| match self.mtimes.get(path) {
                Some(old) => mtime > old,
                None => true,
            })
            .map(|(path, _)| path)
            .collect();
        changed.sort();
        changed
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
