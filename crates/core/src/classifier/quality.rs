//! The fixed resolution ladder.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A rung on the resolution ladder, ordered from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QualityTier {
    #[serde(rename = "240p")]
    P240,
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "1440p")]
    P1440,
    #[serde(rename = "2160p")]
    P2160,
}

static RESOLUTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\d{3,4}\s*x\s*)?(\d{3,4})\s*[pi]?\b").expect("static regex")
});

impl QualityTier {
    pub const LADDER: [QualityTier; 7] = [
        QualityTier::P240,
        QualityTier::P360,
        QualityTier::P480,
        QualityTier::P720,
        QualityTier::P1080,
        QualityTier::P1440,
        QualityTier::P2160,
    ];

    pub fn lines(&self) -> u32 {
        match self {
            Self::P240 => 240,
            Self::P360 => 360,
            Self::P480 => 480,
            Self::P720 => 720,
            Self::P1080 => 1080,
            Self::P1440 => 1440,
            Self::P2160 => 2160,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P240 => "240p",
            Self::P360 => "360p",
            Self::P480 => "480p",
            Self::P720 => "720p",
            Self::P1080 => "1080p",
            Self::P1440 => "1440p",
            Self::P2160 => "2160p",
        }
    }

    /// Resolve a free-form quality token ("720p", "FHD", "1920x1080", "4K").
    pub fn resolve(token: &str) -> Option<Self> {
        let normalized = token.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return None;
        }

        let alias = match normalized.as_str() {
            "sd" => Some(Self::P480),
            "hd" => Some(Self::P720),
            "fhd" | "full hd" | "fullhd" => Some(Self::P1080),
            "qhd" | "2k" => Some(Self::P1440),
            "uhd" | "4k" => Some(Self::P2160),
            _ => None,
        };
        if alias.is_some() {
            return alias;
        }

        let captures = RESOLUTION.captures(&normalized)?;
        let lines: u32 = captures.get(1)?.as_str().parse().ok()?;
        Self::LADDER.iter().copied().find(|tier| tier.lines() == lines)
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::resolve(s).ok_or_else(|| format!("unknown quality tier: {}", s))
    }
}

/// An inclusive, non-empty range of the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityBand {
    pub min: QualityTier,
    pub max: QualityTier,
}

impl QualityBand {
    /// Returns `None` when `min` is above `max`.
    pub fn new(min: QualityTier, max: QualityTier) -> Option<Self> {
        (min <= max).then_some(Self { min, max })
    }

    pub fn full() -> Self {
        Self {
            min: QualityTier::P240,
            max: QualityTier::P2160,
        }
    }

    pub fn contains(&self, tier: QualityTier) -> bool {
        self.min <= tier && tier <= self.max
    }
}
