//! FFmpeg encoder launcher.

use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use super::process::{ChildProcess, EncoderLauncher, EncoderProcess, LaunchRequest};
use super::profile::{OutputFormat, QualityProfile};
use crate::config::EncoderConfig;
use crate::storage::layout::{DASH_MANIFEST, FRAGMENT_PREFIX, INIT_PREFIX};
use crate::{Error, Result};

/// Segment duration in seconds for both formats.
const SEGMENT_SECONDS: &str = "2";

/// Launches one ffmpeg process per channel.
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    config: EncoderConfig,
}

impl FfmpegLauncher {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    /// Source URL for a channel.
    pub fn source_url(&self, channel: &str) -> String {
        self.config.source_url_template.replace("{channel}", channel)
    }

    fn input_args(&self, channel: &str) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-nostats",
            "-loglevel",
            "warning",
            "-fflags",
            "+discardcorrupt+genpts+igndts",
            "-err_detect",
            "ignore_err",
            "-max_interleave_delta",
            "0",
            "-probesize",
            "10M",
            "-analyzeduration",
            "10M",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.extend(["-i".to_string(), self.source_url(channel)]);
        args.push("-sn".to_string());
        args
    }

    fn audio_args() -> Vec<String> {
        ["-c:a", "aac", "-ac", "2", "-ar", "48000", "-b:a", "128k"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn video_common_args() -> Vec<String> {
        [
            "-pix_fmt",
            "yuv420p",
            "-c:v",
            "libx264",
            "-profile:v",
            "high",
            "-level",
            "5.1",
            "-x264opts",
            "keyint=48:min-keyint=1:scenecut=0",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Per-rendition encoder settings, with an optional stream specifier suffix.
    fn profile_args(profile: &QualityProfile, spec: &str) -> Vec<String> {
        let mut args = vec![
            format!("-filter{spec}"),
            profile.video_filter(),
            format!("-preset{spec}"),
            profile.preset.clone(),
            format!("-crf{spec}"),
            profile.crf.to_string(),
            format!("-maxrate{spec}"),
            format!("{}k", profile.max_rate_kbps),
            format!("-bufsize{spec}"),
            format!("{}k", profile.buf_size_kbps),
        ];
        if let Some(tune) = &profile.tune {
            args.extend([format!("-tune{spec}"), tune.clone()]);
        }
        args
    }

    /// Single DASH output with one video representation per profile.
    fn dash_args(&self, output_dir: &Path) -> Vec<String> {
        let mut args = Vec::new();
        for _ in &self.config.profiles {
            args.extend(["-map".to_string(), "0:v:0".to_string()]);
        }
        args.extend(["-map".to_string(), "0:a:0".to_string()]);

        args.extend(Self::video_common_args());
        for (index, profile) in self.config.profiles.iter().enumerate() {
            args.extend(Self::profile_args(profile, &format!(":v:{index}")));
        }
        args.extend(Self::audio_args());

        args.extend([
            "-f".to_string(),
            "dash".to_string(),
            "-adaptation_sets".to_string(),
            "id=0,streams=v id=1,streams=a".to_string(),
            "-window_size".to_string(),
            "2000".to_string(),
            "-extra_window_size".to_string(),
            "0".to_string(),
            "-init_seg_name".to_string(),
            format!("{INIT_PREFIX}$RepresentationID$.m4s"),
            "-media_seg_name".to_string(),
            format!("{FRAGMENT_PREFIX}$RepresentationID$-$Number$.m4s"),
            "-seg_duration".to_string(),
            SEGMENT_SECONDS.to_string(),
            "-use_template".to_string(),
            "1".to_string(),
            "-use_timeline".to_string(),
            "1".to_string(),
            "-remove_at_exit".to_string(),
            "1".to_string(),
        ]);
        args.push(output_dir.join(DASH_MANIFEST).to_string_lossy().to_string());
        args
    }

    /// One HLS output per profile, each with its own variant playlist.
    fn hls_args(&self, channel: &str, output_dir: &Path) -> Vec<String> {
        let mut args = Vec::new();
        for profile in &self.config.profiles {
            args.extend([
                "-map".to_string(),
                "0:v:0".to_string(),
                "-map".to_string(),
                "0:a:0".to_string(),
            ]);
            args.extend(Self::video_common_args());
            args.extend(Self::profile_args(profile, ":v"));
            args.extend(Self::audio_args());
            args.extend([
                "-f".to_string(),
                "hls".to_string(),
                "-hls_time".to_string(),
                SEGMENT_SECONDS.to_string(),
                "-hls_list_size".to_string(),
                "20".to_string(),
                "-hls_flags".to_string(),
                "independent_segments+delete_segments+program_date_time".to_string(),
                "-hls_segment_type".to_string(),
                "mpegts".to_string(),
                "-hls_segment_filename".to_string(),
                output_dir
                    .join(profile.segment_pattern())
                    .to_string_lossy()
                    .to_string(),
            ]);
            if let Some(base) = &self.config.public_base_url {
                args.extend([
                    "-hls_base_url".to_string(),
                    format!("{}/{}/", base.trim_end_matches('/'), channel),
                ]);
            }
            args.push(
                output_dir
                    .join(profile.playlist_name())
                    .to_string_lossy()
                    .to_string(),
            );
        }
        args
    }

    /// Build the full ffmpeg argument vector for a launch.
    pub fn build_args(&self, request: &LaunchRequest) -> Vec<String> {
        let mut args = self.input_args(&request.channel);
        match self.config.output_format {
            OutputFormat::Dash => args.extend(self.dash_args(&request.output_dir)),
            OutputFormat::Hls => args.extend(self.hls_args(&request.channel, &request.output_dir)),
        }
        args
    }
}

#[async_trait]
impl EncoderLauncher for FfmpegLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn EncoderProcess>> {
        let args = self.build_args(request);

        info!(
            channel = %request.channel,
            format = %self.config.output_format,
            "Starting encoder"
        );
        debug!(channel = %request.channel, ?args, "Encoder arguments");

        let mut child = process_utils::supervised_command(&self.config.ffmpeg_path)
            .args(&args)
            .env("LC_ALL", "C")
            .spawn()
            .map_err(|e| Error::encoder_launch(&request.channel, e.to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let channel = request.channel.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            if line.contains("Error") || line.contains("error") {
                                warn!(channel = %channel, "ffmpeg: {}", line);
                            } else {
                                debug!(channel = %channel, "ffmpeg: {}", line);
                            }
                        }
                        Ok(None) => {
                            debug!(channel = %channel, "Encoder output closed");
                            break;
                        }
                        Err(e) => {
                            debug!(channel = %channel, error = %e, "Error reading encoder output");
                            break;
                        }
                    }
                }
            });
        }

        Ok(Box::new(ChildProcess::new(child)))
    }
}
