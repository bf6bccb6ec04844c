//! A set of built-in tools that models can use.
//!
//! File tools are rooted at a base directory: relative paths given by the
//! model are resolved against it.

mod dosleep;
mod glob;
mod read_file;

use std::path::{Path, PathBuf};

pub use dosleep::DoSleepTool;
pub use glob::GlobTool;
pub use read_file::ReadFileTool;

#[inline]
fn resolve_path(root: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_owned()
    } else {
        root.join(path)
    }
}
