// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

/// Fixed capability/rules preamble sent with every model call.
const PREAMBLE: &str = "\
You are a pair-coding assistant working inside a sandboxed web project. The \
participant watches your edits appear in a code viewer and a live preview, so \
keep your prose short and let the edits speak.

Rules:
- All paths are relative to the project root. You cannot read or write \
outside it.
- Read a file with read_file before overwriting it with write_file.
- Prefer edit_file for changes to existing files; old_string must match the \
file exactly once, so include enough surrounding lines to make it unique.
- Use search_files / glob / list_files to orient yourself before editing \
unfamiliar code.
- The live preview reloads on file changes. Do not start dev servers with \
bash; use restart_preview when the preview needs a restart (e.g. after \
dependency changes).
- Use the task tool to delegate self-contained sub-tasks; the sub-agent \
shares your tools but not your conversation.
- When a tool returns {\"error\": ...}, correct the problem and retry rather \
than giving up.";

/// Compose the system prompt: the fixed preamble plus, when available, the
/// repo map wrapped in a delimited section.
pub fn system_prompt(repo_map: Option<&str>) -> String {
    match repo_map {
        Some(map) if !map.trim().is_empty() => {
            format!(
                "{PREAMBLE}\n\n## Project map\n\n<project_map>\n{}\n</project_map>",
                map.trim_end()
            )
        }
        _ => PREAMBLE.to_string(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_without_map_is_just_preamble() {
        let p = system_prompt(None);
        assert!(p.contains("pair-coding assistant"));
        assert!(!p.contains("<project_map>"));
    }

    #[test]
    fn prompt_with_map_wraps_it_in_delimiters() {
        let p = system_prompt(Some("### src/App.tsx\nexports: App"));
        assert!(p.contains("<project_map>"));
        assert!(p.contains("### src/App.tsx"));
        assert!(p.ends_with("</project_map>"));
    }

    #[test]
    fn empty_map_is_treated_as_absent() {
        let p = system_prompt(Some("   "));
        assert!(!p.contains("<project_map>"));
    }

    #[test]
    fn preamble_names_the_core_tools() {
        let p = system_prompt(None);
        for tool in ["read_file", "write_file", "edit_file", "restart_preview", "task"] {
            assert!(p.contains(tool), "preamble should mention {tool}");
        }
    }
}
