//! HLS master playlist generation.

use std::path::{Path, PathBuf};

use super::profile::QualityProfile;
use crate::Result;
use crate::storage::layout::HLS_MASTER;
use crate::utils::fs::write_atomic;

/// Render a master playlist referencing each profile's variant playlist.
///
/// Variant URIs are relative unless `public_base_url` is set.
pub fn render_master_playlist(
    channel: &str,
    profiles: &[QualityProfile],
    public_base_url: Option<&str>,
) -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for profile in profiles {
        let uri = match public_base_url {
            Some(base) => format!(
                "{}/{}/{}",
                base.trim_end_matches('/'),
                channel,
                profile.playlist_name()
            ),
            None => profile.playlist_name(),
        };
        out.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{},NAME=\"{}\"\n{}\n",
            u64::from(profile.max_rate_kbps) * 1000,
            profile.nominal_width(),
            profile.height,
            profile.name,
            uri
        ));
    }
    out
}

/// Write `index.m3u8` into a channel directory, replacing any previous one.
pub async fn write_master_playlist(
    channel_dir: &Path,
    channel: &str,
    profiles: &[QualityProfile],
    public_base_url: Option<&str>,
) -> Result<PathBuf> {
    let path = channel_dir.join(HLS_MASTER);
    let body = render_master_playlist(channel, profiles, public_base_url);
    write_atomic(&path, body.as_bytes()).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_relative() {
        let body = render_master_playlist("42", &QualityProfile::defaults(), None);
        assert!(body.starts_with("#EXTM3U\n"));
        assert!(body.contains("BANDWIDTH=6000000,RESOLUTION=1280x720"));
        assert!(body.contains("BANDWIDTH=3000000,RESOLUTION=1280x720"));
        assert!(body.contains("\nhq.m3u8\n"));
        assert!(body.contains("\nlq.m3u8\n"));
    }

    #[test]
    fn test_render_absolute() {
        let body = render_master_playlist(
            "42",
            &[QualityProfile::hq()],
            Some("https://tv.example.com/stream/"),
        );
        assert!(body.contains("\nhttps://tv.example.com/stream/42/hq.m3u8\n"));
    }

    #[tokio::test]
    async fn test_write_master_playlist() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_master_playlist(dir.path(), "42", &QualityProfile::defaults(), None)
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("index.m3u8"));
        let body = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(body.matches("#EXT-X-STREAM-INF").count(), 2);
    }
}
