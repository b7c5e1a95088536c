//! Destination naming below a target's base path.

use std::path::Path;

use crate::config::TargetConfig;
use crate::item::{ContentCategory, Item};

const DEFAULT_EXTENSION: &str = "mp4";

/// Display name used for the placed file, without extension.
pub fn formatted_title(item: &Item) -> String {
    match (item.category, item.season, item.episode) {
        (ContentCategory::Movie, _, _) => match item.year {
            Some(year) => format!("{} ({})", item.title, year),
            None => item.title.clone(),
        },
        (ContentCategory::SeriesEpisode, Some(season), Some(episode)) => {
            format!("{} S{:02}E{:02}", item.title, season, episode)
        }
        (ContentCategory::SerialEpisode, Some(season), Some(episode)) => {
            format!("{} - {}x{:02}", item.title, season, episode)
        }
        _ => item.title.clone(),
    }
}

/// Replace characters that are invalid in file names on common targets.
pub fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_end_matches('.').trim_end();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Directory below the base path for this item.
pub fn category_dir(target: &TargetConfig, item: &Item) -> String {
    match item.category {
        ContentCategory::Movie => target.layout.movies.clone(),
        ContentCategory::SeriesEpisode => {
            format!("{}/{}", target.layout.series, sanitize(&item.title))
        }
        ContentCategory::SerialEpisode => {
            format!("{}/{}", target.layout.serials, sanitize(&item.title))
        }
    }
}

/// Full destination path on the target, `/`-separated.
///
/// The extension is taken from the staged artifact and defaults to `mp4`.
pub fn destination_path(target: &TargetConfig, item: &Item, staged: &Path) -> String {
    let extension = staged
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && *e != "part")
        .unwrap_or(DEFAULT_EXTENSION);

    let base = target.base_path.trim_end_matches('/');
    let file_name = format!("{}.{}", sanitize(&formatted_title(item)), extension);
    let dir = category_dir(target, item);

    if dir.is_empty() {
        format!("{}/{}", base, file_name)
    } else {
        format!("{}/{}/{}", base, dir.trim_matches('/'), file_name)
    }
}

/// Parent directory of a `/`-separated remote path.
pub fn remote_parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => ".",
    }
}
