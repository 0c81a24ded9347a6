//! Built-in tools for the coding agent

mod diagnose;
mod glob;
mod list;
mod read;
mod replace;
mod search;
mod shell;
mod time;
mod web;
mod write;

use std::sync::Arc;

use poly_agent::{BoxedTool, ToolError};
use poly_fs::{FileEngine, FsError};

use self::diagnose::DiagnoseFileTool;
use self::glob::GlobTool;
use self::list::ListDirectoryTool;
use self::read::ReadFileTool;
use self::replace::ReplaceTool;
use self::search::SearchFileContentTool;
use self::shell::ShellTool;
use self::time::CurrentTimeTool;
pub use self::web::WebConfig;
use self::web::{WebCrawlTool, WebSearchTool};
use self::write::WriteFileTool;

/// Every built-in tool, sharing one file engine
pub fn builtin_tools(engine: Arc<FileEngine>, web: WebConfig) -> Vec<BoxedTool> {
    let web = Arc::new(web);
    vec![
        Arc::new(ReadFileTool::new(Arc::clone(&engine))),
        Arc::new(WriteFileTool::new(Arc::clone(&engine))),
        Arc::new(ReplaceTool::new(Arc::clone(&engine))),
        Arc::new(ListDirectoryTool::new(Arc::clone(&engine))),
        Arc::new(SearchFileContentTool::new(Arc::clone(&engine))),
        Arc::new(GlobTool::new(Arc::clone(&engine))),
        Arc::new(DiagnoseFileTool::new(engine)),
        Arc::new(ShellTool::new()),
        Arc::new(CurrentTimeTool::new()),
        Arc::new(WebSearchTool::new(Arc::clone(&web))),
        Arc::new(WebCrawlTool::new(web)),
    ]
}

/// Run a file engine call on the blocking pool
pub(crate) async fn blocking<T, F>(engine: &Arc<FileEngine>, op: F) -> Result<T, ToolError>
where
    F: FnOnce(&FileEngine) -> Result<T, ToolError> + Send + 'static,
    T: Send + 'static,
{
    let engine = Arc::clone(engine);
    tokio::task::spawn_blocking(move || op(&engine))
        .await
        .map_err(|e| ToolError::failed(format!("File task failed: {}", e)))?
}

/// Render a file engine error for the model, with its hint
pub(crate) fn fs_failure(err: FsError) -> ToolError {
    ToolError::failed(format!("{} [{}] {}", err, err.code(), err.suggestion()))
}
