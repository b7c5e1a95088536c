//! Extended M3U playlists.
//!
//! Each entry is an `#EXTINF:` line followed by its URL; the display text
//! after the first comma carries the title and the inferred markers
//! (quality token, release year, season/episode).

use std::io::{BufRead, Lines};

use once_cell::sync::Lazy;
use regex_lite::Regex;
use tracing::warn;

use super::ManifestSource;
use crate::acquisition::file_name_from_url;
use crate::classifier::RawCandidate;
use crate::item::ContentCategory;

/// Quality assumed for entries that carry no marker.
pub const DEFAULT_QUALITY: &str = "480p";

static QUALITY: Lazy<Regex> = Lazy::new(|| {
    // Also matches the height of a "1920x1080p" resolution.
    Regex::new(r"(?i)(?:\b|\dx)(\d{3,4}p|4k|uhd|fhd|hd|sd)\b").expect("static regex")
});
static BARE_QUALITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(720|1080|2160)\b").expect("static regex"));
static PAREN_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(((?:19|20)\d{2})\)").expect("static regex"));
static YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b((?:19|20)\d{2})\b").expect("static regex"));
static SERIES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bS(\d{1,2})\s*E(\d{1,3})\b").expect("static regex"));
static SERIAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})x(\d{1,3})\b").expect("static regex"));
static CHAPTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[Cc]ap[ií]tulo\s*(\d{1,3})").expect("static regex"));

/// Lazily parsed M3U playlist.
pub struct M3uManifest<R> {
    name: String,
    lines: Lines<R>,
    pending: Option<String>,
}

impl<R: BufRead> M3uManifest<R> {
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            lines: reader.lines(),
            pending: None,
        }
    }
}

impl<R: BufRead> Iterator for M3uManifest<R> {
    type Item = RawCandidate;

    fn next(&mut self) -> Option<RawCandidate> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    warn!("Stopped reading manifest {}: {}", self.name, e);
                    return None;
                }
            };
            let line = line.trim();

            if let Some(info) = line.strip_prefix("#EXTINF:") {
                let display = info.split_once(',').map_or(info, |(_, text)| text);
                self.pending = Some(display.trim().to_string());
            } else if line.is_empty() || line.starts_with('#') {
                continue;
            } else {
                let display = self.pending.take().unwrap_or_else(|| {
                    let file = file_name_from_url(line);
                    match file.rsplit_once('.') {
                        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
                        _ => file,
                    }
                });
                return Some(parse_entry(&display, line));
            }
        }
    }
}

impl<R: BufRead> ManifestSource for M3uManifest<R> {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Split display text into a title and its inferred markers.
///
/// A parenthesized year wins over a bare one, so titles that are years
/// themselves ("1917", "Blade Runner 2049") stay intact.
pub(crate) fn parse_entry(display: &str, url: &str) -> RawCandidate {
    let mut candidate = RawCandidate::new("", url);
    let mut cut = display.len();

    let quality = QUALITY.captures(display).and_then(|c| c.get(1));
    if let Some(m) = quality {
        candidate.quality = Some(m.as_str().to_string());
        cut = cut.min(m.start());
    } else if let Some(m) = BARE_QUALITY.captures(display).and_then(|c| c.get(1)) {
        candidate.quality = Some(format!("{}p", m.as_str()));
        cut = cut.min(m.start());
    } else {
        candidate.quality = Some(DEFAULT_QUALITY.to_string());
    }

    if let Some(c) = SERIES.captures(display) {
        candidate.category = ContentCategory::SeriesEpisode;
        candidate.season = c.get(1).and_then(|m| m.as_str().parse().ok());
        candidate.episode = c.get(2).and_then(|m| m.as_str().parse().ok());
        cut = cut.min(c.get(0).map_or(cut, |m| m.start()));
    } else if let Some(c) = SERIAL.captures(display) {
        candidate.category = ContentCategory::SerialEpisode;
        candidate.season = c.get(1).and_then(|m| m.as_str().parse().ok());
        candidate.episode = c.get(2).and_then(|m| m.as_str().parse().ok());
        cut = cut.min(c.get(0).map_or(cut, |m| m.start()));
    } else if let Some(c) = CHAPTER.captures(display) {
        candidate.category = ContentCategory::SerialEpisode;
        candidate.season = Some(1);
        candidate.episode = c.get(1).and_then(|m| m.as_str().parse().ok());
        cut = cut.min(c.get(0).map_or(cut, |m| m.start()));
    }

    if let Some((year, start)) = find_year(display) {
        candidate.year = Some(year);
        cut = cut.min(start);
    }

    let title = display[..cut].trim_end_matches(|c: char| {
        c.is_whitespace() || matches!(c, '-' | '.' | '_' | '(' | '[' | '|')
    });
    candidate.title = if title.trim().is_empty() {
        display.trim().to_string()
    } else {
        title.trim().to_string()
    };
    candidate
}

/// Release year and the offset to cut the title at.
///
/// A bare year is only taken after the start of the text and outside any
/// quality token ("1920x1080p" is a resolution).
fn find_year(display: &str) -> Option<(i32, usize)> {
    if let Some(c) = PAREN_YEAR.captures(display) {
        let whole = c.get(0)?;
        let year = c.get(1)?.as_str().parse().ok()?;
        return Some((year, whole.start()));
    }

    let quality_spans: Vec<(usize, usize)> = QUALITY
        .find_iter(display)
        .map(|m| (m.start(), m.end()))
        .collect();
    YEAR.find_iter(display)
        .filter(|m| m.start() > 0)
        .filter(|m| {
            !quality_spans
                .iter()
                .any(|&(start, end)| m.start() < end && start < m.end())
        })
        .find_map(|m| m.as_str().parse().ok().map(|year| (year, m.start())))
}
