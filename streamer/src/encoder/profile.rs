//! Output formats and quality profiles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::storage::layout::{DASH_MANIFEST, HLS_MASTER};
use crate::{Error, Result};

/// Adaptive streaming format produced by the encoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Dash,
    Hls,
}

impl OutputFormat {
    /// Top-level file a player requests first.
    pub fn entry_file(&self) -> &'static str {
        match self {
            OutputFormat::Dash => DASH_MANIFEST,
            OutputFormat::Hls => HLS_MASTER,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Dash => "dash",
            OutputFormat::Hls => "hls",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dash" | "mpd" => Ok(OutputFormat::Dash),
            "hls" | "m3u8" => Ok(OutputFormat::Hls),
            other => Err(Error::config(format!("unknown output format: {other}"))),
        }
    }
}

/// One video rendition produced from the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityProfile {
    /// Short name used in file names (`<name>.m3u8`, `<name>_segment-NNNNN.ts`).
    pub name: String,
    /// Output height; width follows the source aspect ratio.
    pub height: u32,
    pub crf: u8,
    pub max_rate_kbps: u32,
    pub buf_size_kbps: u32,
    pub preset: String,
    /// Apply `yadif` before scaling.
    #[serde(default)]
    pub deinterlace: bool,
    #[serde(default)]
    pub tune: Option<String>,
}

impl QualityProfile {
    /// High quality, low latency rendition.
    pub fn hq() -> Self {
        Self {
            name: "hq".to_string(),
            height: 720,
            crf: 21,
            max_rate_kbps: 6000,
            buf_size_kbps: 6000,
            preset: "veryfast".to_string(),
            deinterlace: false,
            tune: Some("zerolatency".to_string()),
        }
    }

    /// Cheaper deinterlaced rendition.
    pub fn lq() -> Self {
        Self {
            name: "lq".to_string(),
            height: 720,
            crf: 23,
            max_rate_kbps: 3000,
            buf_size_kbps: 6000,
            preset: "ultrafast".to_string(),
            deinterlace: true,
            tune: None,
        }
    }

    pub fn defaults() -> Vec<Self> {
        vec![Self::hq(), Self::lq()]
    }

    /// Video filter chain for this profile.
    pub fn video_filter(&self) -> String {
        if self.deinterlace {
            format!("yadif=1,scale=-2:{}", self.height)
        } else {
            format!("scale=-2:{}", self.height)
        }
    }

    /// Nominal 16:9 width, used for playlist attributes.
    pub fn nominal_width(&self) -> u32 {
        // Round to an even number, as the encoder does.
        (self.height * 16 / 9 + 1) & !1
    }

    /// Variant playlist written by the encoder in HLS mode.
    pub fn playlist_name(&self) -> String {
        format!("{}.m3u8", self.name)
    }

    /// Segment file pattern for HLS mode.
    pub fn segment_pattern(&self) -> String {
        format!("{}_segment-%05d.ts", self.name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("profile name must not be empty"));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::config(format!(
                "profile name must be alphanumeric: {}",
                self.name
            )));
        }
        if self.height == 0 || self.max_rate_kbps == 0 {
            return Err(Error::config(format!(
                "profile {} needs a height and a max rate",
                self.name
            )));
        }
        Ok(())
    }
}
