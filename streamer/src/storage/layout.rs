//! Scratch directory layout and file classification.
//!
//! Every channel writes into `<scratch_root>/<channel>`. Files are classified
//! by name only; the encoder's naming convention is the contract.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Prefix of DASH media fragments (`chunk-<repr>-<number>.m4s`).
pub const FRAGMENT_PREFIX: &str = "chunk-";

/// Prefix of DASH initialization segments (`init--<repr>.m4s`).
pub const INIT_PREFIX: &str = "init--";

/// DASH manifest written by the encoder.
pub const DASH_MANIFEST: &str = "manifest.mpd";

/// HLS master playlist written by the server after readiness.
pub const HLS_MASTER: &str = "index.m3u8";

const MAX_CHANNEL_ID_LEN: usize = 128;

/// Kind of a file inside a channel directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// MPEG-TS segment (`<profile>_segment-NNNNN.ts`).
    TsSegment,
    /// fMP4 media fragment rotated by the encoder itself.
    Fragment,
    /// fMP4 initialization segment.
    InitSegment,
    /// HLS playlist.
    Playlist,
    /// DASH manifest.
    Manifest,
    Other,
}

impl FileKind {
    /// Classify a file by its name.
    pub fn classify(name: &str) -> Self {
        if name.ends_with(".ts") {
            FileKind::TsSegment
        } else if name.ends_with(".m4s") {
            if name.starts_with(FRAGMENT_PREFIX) {
                FileKind::Fragment
            } else {
                FileKind::InitSegment
            }
        } else if name.ends_with(".m3u8") {
            FileKind::Playlist
        } else if name.ends_with(".mpd") {
            FileKind::Manifest
        } else {
            FileKind::Other
        }
    }

    /// Media segments count as viewing activity; playlists and manifests do not.
    pub fn is_media(&self) -> bool {
        matches!(
            self,
            FileKind::TsSegment | FileKind::Fragment | FileKind::InitSegment
        )
    }

    /// Files the global space-pressure reclaimer may delete.
    pub fn is_space_evictable(&self) -> bool {
        matches!(self, FileKind::TsSegment | FileKind::Fragment)
    }

    /// Files the per-channel age reclaimer may delete.
    ///
    /// Fragments are excluded: the encoder prunes them from its own window and
    /// deleting them here would race with it.
    pub fn is_age_evictable(&self) -> bool {
        matches!(self, FileKind::TsSegment)
    }

    /// HTTP content type served for this kind.
    pub fn content_type(&self) -> &'static str {
        match self {
            FileKind::TsSegment => "video/MP2T",
            FileKind::Fragment | FileKind::InitSegment => "video/iso.segment",
            FileKind::Playlist => "application/vnd.apple.mpegurl",
            FileKind::Manifest => "application/dash+xml",
            FileKind::Other => "application/octet-stream",
        }
    }
}

/// Whether a request for `name` represents real viewing activity.
pub fn is_media_segment(name: &str) -> bool {
    FileKind::classify(name).is_media()
}

/// Validate a name used as a single path component.
fn validate_component(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation(format!("{kind} must not be empty")));
    }
    if name == "." || name == ".." {
        return Err(Error::validation(format!("invalid {kind}: {name}")));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(Error::validation(format!(
            "{kind} must not contain path separators: {name}"
        )));
    }
    Ok(())
}

/// Validate an opaque channel id.
pub fn validate_channel_id(channel: &str) -> Result<()> {
    validate_component("channel id", channel)?;
    if channel.len() > MAX_CHANNEL_ID_LEN {
        return Err(Error::validation(format!(
            "channel id longer than {MAX_CHANNEL_ID_LEN} bytes"
        )));
    }
    Ok(())
}

/// Validate a requested file name inside a channel directory.
pub fn validate_file_name(name: &str) -> Result<()> {
    validate_component("file name", name)?;
    if name.starts_with('.') {
        return Err(Error::validation(format!("hidden file requested: {name}")));
    }
    Ok(())
}

/// Directory layout of the scratch volume.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Scratch root shared by all channels.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Output directory of a channel. The id must already be validated.
    pub fn channel_dir(&self, channel: &str) -> PathBuf {
        self.root.join(channel)
    }

    /// Path of a file inside a channel directory, validating both components.
    pub fn file_path(&self, channel: &str, file: &str) -> Result<PathBuf> {
        validate_channel_id(channel)?;
        validate_file_name(file)?;
        Ok(self.channel_dir(channel).join(file))
    }

    /// List channel directories currently present on disk.
    pub async fn channel_dirs(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io_path("reading directory", &self.root, e)),
        };

        let mut dirs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::io_path("reading directory", &self.root, e))?
        {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                dirs.push((name.to_string(), entry.path()));
            }
        }
        Ok(dirs)
    }
}
