// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Compact project summary injected into the system prompt at session start.
//!
//! Walks the project tree (standard ignore set skipped), extracts imports,
//! exports and top-level declarations per file with regexes — the project
//! language is JS/TS, for which no parser is linked — and renders a
//! Markdown-like digest.  Output is deterministic: files are ordered by
//! extension priority (UI source first, data files last) then
//! alphabetically, and the result is truncated to a character budget with an
//! explicit omission note.

use std::path::Path;

use regex::Regex;
use walkdir::WalkDir;

use tandem_tools::IGNORED_DIRS;

/// Extensions considered source-relevant, in priority order.
const EXTENSION_PRIORITY: &[&str] = &[
    "tsx", "jsx", "ts", "js", "mjs", "cjs", "vue", "svelte", "html", "css", "scss", "json", "md",
];

const MAX_FILE_BYTES: u64 = 512 * 1024;

/// Build the repo map for `root`, truncated to `char_budget` characters.
pub fn build_repo_map(root: &Path, char_budget: usize) -> String {
    let mut files: Vec<(usize, String, std::path::PathBuf)> = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
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
        let ext = entry
            .path()
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let Some(priority) = EXTENSION_PRIORITY.iter().position(|p| *p == ext) else {
            continue;
        };
        if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
            continue;
        }
        let rel = rel_display(root, entry.path());
        files.push((priority, rel, entry.path().to_path_buf()));
    }
    files.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

    let total = files.len();
    let mut out = String::new();
    let mut rendered = 0usize;
    for (_, rel, path) in &files {
        let Ok(text) = std::fs::read_to_string(path) else {
            continue;
        };
        let section = render_file_section(rel, &text);
        // Stop before blowing the budget; the omission note reports the rest.
        if out.len() + section.len() > char_budget {
            break;
        }
        out.push_str(&section);
        rendered += 1;
    }

    let omitted = total - rendered;
    if omitted > 0 {
        out.push_str(&format!(
            "… and {omitted} more file(s) omitted for brevity.\n"
        ));
    }
    out.trim_end().to_string()
}

fn rel_display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn render_file_section(rel: &str, text: &str) -> String {
    let imports = extract_imports(text);
    let exports = extract_exports(text);
    let decls = extract_declarations(text);

    let mut section = format!("### {rel}\n");
    if !imports.is_empty() {
        section.push_str(&format!("imports: {}\n", imports.join(", ")));
    }
    if !exports.is_empty() {
        section.push_str(&format!("exports: {}\n", exports.join(", ")));
    }
    if !decls.is_empty() {
        section.push_str(&format!("defines: {}\n", decls.join(", ")));
    }
    section.push('\n');
    section
}

/// Deduplicated import sources, in first-appearance order.
fn extract_imports(text: &str) -> Vec<String> {
    let re = Regex::new(r#"(?m)^\s*import\s+(?:[^'"]+\s+from\s+)?['"]([^'"]+)['"]"#).unwrap();
    let mut seen = Vec::new();
    for cap in re.captures_iter(text) {
        let module = cap[1].to_string();
        if !seen.contains(&module) {
            seen.push(module);
        }
    }
    seen
}

/// Exported top-level names (functions, classes, consts, default exports).
fn extract_exports(text: &str) -> Vec<String> {
    let re = Regex::new(
        r"(?m)^\s*export\s+(?:default\s+)?(?:async\s+)?(?:function|class|const|let|var)\s+(\w+)",
    )
    .unwrap();
    let mut seen = Vec::new();
    for cap in re.captures_iter(text) {
        let name = cap[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// Top-level function/class/component declarations, exported or not.
fn extract_declarations(text: &str) -> Vec<String> {
    let func = Regex::new(r"(?m)^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s+(\w+)")
        .unwrap();
    let class = Regex::new(r"(?m)^\s*(?:export\s+)?(?:default\s+)?class\s+(\w+)").unwrap();
    let arrow = Regex::new(r"(?m)^\s*(?:export\s+)?const\s+(\w+)\s*=\s*(?:async\s*)?\(").unwrap();

    let mut seen = Vec::new();
    for re in [&func, &class, &arrow] {
        for cap in re.captures_iter(text) {
            let name = cap[1].to_string();
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
    }
    seen
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/App.tsx"),
            "import React from 'react';\nimport './app.css';\n\
             export default function App() {\n  return null;\n}\n\
             const helper = () => 1;\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("src/util.ts"),
            "export const clamp = (n) => n;\nexport class Store {}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        dir
    }

    #[test]
    fn extracts_imports_deduplicated() {
        let text = "import a from 'react';\nimport 'react';\nimport b from './local';\n";
        assert_eq!(extract_imports(text), vec!["react", "./local"]);
    }

    #[test]
    fn extracts_exports() {
        let text = "export function go() {}\nexport const x = 1;\nconst hidden = 2;\n";
        assert_eq!(extract_exports(text), vec!["go", "x"]);
    }

    #[test]
    fn extracts_component_and_class_declarations() {
        let text =
            "export default function App() {}\nclass Model {}\nconst onClick = () => {};\n";
        let decls = extract_declarations(text);
        assert!(decls.contains(&"App".to_string()));
        assert!(decls.contains(&"Model".to_string()));
        assert!(decls.contains(&"onClick".to_string()));
    }

    #[test]
    fn ui_source_ordered_before_data_files() {
        let dir = project();
        let map = build_repo_map(dir.path(), 16_000);
        let tsx = map.find("src/App.tsx").unwrap();
        let ts = map.find("src/util.ts").unwrap();
        let json = map.find("package.json").unwrap();
        assert!(tsx < ts, "tsx should precede ts:\n{map}");
        assert!(ts < json, "ts should precede json:\n{map}");
    }

    #[test]
    fn map_is_byte_identical_across_runs() {
        let dir = project();
        let a = build_repo_map(dir.path(), 16_000);
        let b = build_repo_map(dir.path(), 16_000);
        assert_eq!(a, b);
    }

    #[test]
    fn truncation_reports_omitted_count() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..20 {
            std::fs::write(
                dir.path().join(format!("file{i:02}.ts")),
                format!("export const value{i} = {i};\n"),
            )
            .unwrap();
        }
        let map = build_repo_map(dir.path(), 200);
        assert!(
            map.contains("omitted for brevity"),
            "expected omission note:\n{map}"
        );
    }

    #[test]
    fn small_tree_has_no_omission_note() {
        let dir = project();
        let map = build_repo_map(dir.path(), 16_000);
        assert!(!map.contains("omitted"));
    }

    #[test]
    fn ignored_dirs_are_skipped() {
        let dir = project();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("node_modules/lib.js"), "export const x = 1;").unwrap();
        let map = build_repo_map(dir.path(), 16_000);
        assert!(!map.contains("node_modules"));
    }

    #[test]
    fn non_source_extensions_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("image.png"), [0u8; 4]).unwrap();
        std::fs::write(dir.path().join("a.ts"), "export const x = 1;").unwrap();
        let map = build_repo_map(dir.path(), 16_000);
        assert!(map.contains("a.ts"));
        assert!(!map.contains("image.png"));
    }
}
