//! Filesystem helpers shared across modules.
//!
//! These helpers provide consistent error context (operation + path) and
//! treat files that vanish underneath us as already handled.

use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, warn};

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error("creating directory", path, e))
}

/// Remove a file, treating an already-missing file as success.
///
/// Returns `true` when this call removed the file.
pub async fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_error("removing file", path, e)),
    }
}

/// Delete every regular file directly inside `dir`.
///
/// A missing directory is not an error, so purging twice in a row is fine.
/// Returns the number of files removed.
pub async fn purge_dir_files(dir: &Path) -> Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(io_error("reading directory", dir, e)),
    };

    let mut removed = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_error("reading directory", dir, e))?
    {
        let path = entry.path();
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        match remove_file_if_exists(&path).await {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Failed to remove stale file"),
        }
    }

    Ok(removed)
}

/// Create a channel output directory and clear files left from a previous run.
pub async fn prepare_output_dir(dir: &Path) -> Result<()> {
    ensure_dir_all(dir).await?;
    let removed = purge_dir_files(dir).await?;
    if removed > 0 {
        debug!(dir = %dir.display(), removed, "Cleared stale output files");
    }
    Ok(())
}

/// Remove every entry under `root`, creating `root` if it does not exist.
///
/// Used once at startup: no session survives a restart.
pub async fn purge_root(root: &Path) -> Result<usize> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            ensure_dir_all(root).await?;
            return Ok(0);
        }
        Err(e) => return Err(io_error("reading directory", root, e)),
    };

    let mut removed = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_error("reading directory", root, e))?
    {
        let path = entry.path();
        let result = match entry.file_type().await {
            Ok(t) if t.is_dir() => tokio::fs::remove_dir_all(&path).await,
            _ => tokio::fs::remove_file(&path).await,
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to purge scratch entry"),
        }
    }

    Ok(removed)
}

/// Write `contents` to `path` atomically (temp file in the same directory + rename).
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::validation(format!("invalid file path: {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| io_error("writing file", &tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| io_error("renaming file", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_purge_dir_files_twice() {
        let dir = tempfile::tempdir().unwrap();
        let channel = dir.path().join("42");
        tokio::fs::create_dir_all(&channel).await.unwrap();
        tokio::fs::write(channel.join("a.ts"), b"x").await.unwrap();
        tokio::fs::write(channel.join("manifest.mpd"), b"y").await.unwrap();

        assert_eq!(purge_dir_files(&channel).await.unwrap(), 2);
        assert_eq!(purge_dir_files(&channel).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_missing_dir_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(purge_dir_files(&missing).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_root_removes_dirs_and_creates_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("stream");
        assert_eq!(purge_root(&root).await.unwrap(), 0);
        assert!(root.is_dir());

        tokio::fs::create_dir_all(root.join("7")).await.unwrap();
        tokio::fs::write(root.join("7").join("x.ts"), b"x").await.unwrap();
        tokio::fs::write(root.join("stray"), b"x").await.unwrap();
        assert_eq!(purge_root(&root).await.unwrap(), 2);
        assert!(!root.join("7").exists());
    }

    #[tokio::test]
    async fn test_remove_file_if_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.ts");
        tokio::fs::write(&path, b"x").await.unwrap();
        assert!(remove_file_if_exists(&path).await.unwrap());
        assert!(!remove_file_if_exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.m3u8");
        write_atomic(&path, b"#EXTM3U\n").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"#EXTM3U\n");
    }
}
