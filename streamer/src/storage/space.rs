//! Free-space probing for the scratch volume.

use std::path::Path;

use tracing::warn;

/// Source of free-space readings for the volume containing a path.
pub trait SpaceProbe: Send + Sync {
    /// Available bytes on the volume holding `path`, or `None` if unknown.
    fn available_bytes(&self, path: &Path) -> Option<u64>;
}

/// Probe backed by `statvfs` (via `fs2`) on the path itself.
///
/// Querying the path directly also works for tmpfs mounts that do not show
/// up in disk listings.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsProbe;

impl SpaceProbe for StatvfsProbe {
    fn available_bytes(&self, path: &Path) -> Option<u64> {
        match fs2::available_space(path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not determine free space");
                None
            }
        }
    }
}

/// Format bytes as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
