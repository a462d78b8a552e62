// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod bash;
mod edit_file;
mod glob;
mod list_files;
pub mod preview;
mod read_file;
mod search_files;
mod write_file;

use std::sync::Arc;

pub use bash::BashTool;
pub use edit_file::EditFileTool;
pub use glob::GlobTool;
pub use list_files::ListFilesTool;
pub use preview::{PreviewManager, RestartPreviewTool};
pub use read_file::ReadFileTool;
pub use search_files::SearchFilesTool;
pub use write_file::WriteFileTool;

use crate::{ReadTracker, ToolRegistry, Workspace};

/// Register the standard filesystem/process tool set.
///
/// The `task` sub-agent tool is registered separately by the agent crate,
/// which owns the model handle the sub-agent needs.
pub fn standard_registry(
    workspace: Arc<Workspace>,
    reads: Arc<ReadTracker>,
    preview: Arc<PreviewManager>,
    bash_timeout_secs: u64,
) -> ToolRegistry {
    let mut reg = ToolRegistry::new();
    reg.register(ReadFileTool {
        workspace: Arc::clone(&workspace),
        reads: Arc::clone(&reads),
    });
    reg.register(WriteFileTool {
        workspace: Arc::clone(&workspace),
        reads,
    });
    reg.register(EditFileTool {
        workspace: Arc::clone(&workspace),
    });
    reg.register(ListFilesTool {
        workspace: Arc::clone(&workspace),
    });
    reg.register(SearchFilesTool {
        workspace: Arc::clone(&workspace),
    });
    reg.register(GlobTool {
        workspace: Arc::clone(&workspace),
    });
    reg.register(BashTool::new(workspace, bash_timeout_secs));
    reg.register(RestartPreviewTool { manager: preview });
    reg
}
