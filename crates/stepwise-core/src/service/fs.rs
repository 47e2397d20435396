//! FileSystem trait for abstracting file I/O.
//!
//! Defined in stepwise-core so the `filesystem` tool can read and write files
//! without depending on any specific filesystem implementation. The
//! `LocalFileSystem` adapter lives in stepwise-infra.

use std::path::{Path, PathBuf};

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    pub size: u64,
}

/// Abstraction over filesystem operations.
pub trait FileSystem: Send + Sync {
    /// Read a file's content as a string.
    fn read_file(
        &self,
        path: &Path,
    ) -> impl std::future::Future<Output = Result<String, std::io::Error>> + Send;

    /// Write string content to a file, creating parent directories as needed.
    fn write_file(
        &self,
        path: &Path,
        content: &str,
    ) -> impl std::future::Future<Output = Result<(), std::io::Error>> + Send;

    /// List the entries of a directory, sorted by name.
    fn list_dir(
        &self,
        path: &Path,
    ) -> impl std::future::Future<Output = Result<Vec<DirEntryInfo>, std::io::Error>> + Send;
}
