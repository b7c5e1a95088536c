use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::acquisition::HttpFetcherConfig;
use crate::classifier::{ClassifierConfig, QualityBand, QualityTier};
use crate::engine::EngineConfig;
use crate::enrichment::EnrichmentConfig;
use crate::item::ContentCategory;
use crate::retry::RetryConfig;
use crate::transfer::ClientConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub acquisition: HttpFetcherConfig,
    #[serde(default)]
    pub transfer: ClientConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl Config {
    pub fn with_target(mut self, target: TargetConfig) -> Self {
        self.targets.push(target);
        self
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("mediarelay.db")
}

/// Per-category directories below a target's base path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DirectoryLayout {
    #[serde(default = "default_movies_dir")]
    pub movies: String,
    #[serde(default = "default_series_dir")]
    pub series: String,
    #[serde(default = "default_serials_dir")]
    pub serials: String,
}

impl Default for DirectoryLayout {
    fn default() -> Self {
        Self {
            movies: default_movies_dir(),
            series: default_series_dir(),
            serials: default_serials_dir(),
        }
    }
}

fn default_movies_dir() -> String {
    "Movies".to_string()
}

fn default_series_dir() -> String {
    "Series".to_string()
}

fn default_serials_dir() -> String {
    "Serials".to_string()
}

/// A remote destination profile.
#[derive(Clone, Deserialize, Serialize)]
pub struct TargetConfig {
    pub name: String,

    /// Protocol kind: `local_mount`, `sftp`, `smb` or `rsync`.
    ///
    /// Resolved when a transfer starts, so an unknown kind fails the item
    /// with a configuration error instead of refusing to boot.
    pub protocol: String,

    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    /// SMB password. Never serialized.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// SSH private key for sftp/rsync.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    /// SMB share name.
    #[serde(default)]
    pub share: Option<String>,

    /// Root directory on the target.
    pub base_path: String,

    /// Transfer slots on this target.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_target_min_quality")]
    pub min_quality: QualityTier,
    #[serde(default = "default_target_max_quality")]
    pub max_quality: QualityTier,

    /// Accepted categories; empty accepts every category.
    #[serde(default)]
    pub categories: Vec<ContentCategory>,

    /// Delete the staged artifact once the transfer completes.
    #[serde(default = "default_true")]
    pub cleanup_after_success: bool,

    /// Compare SHA-256 of the staged and placed file (local mounts only).
    #[serde(default)]
    pub verify_checksum: bool,

    /// Bandwidth cap in bytes per second.
    #[serde(default)]
    pub bandwidth_limit_bps: Option<u64>,

    #[serde(default)]
    pub layout: DirectoryLayout,
}

fn default_max_concurrent() -> usize {
    3
}

fn default_target_min_quality() -> QualityTier {
    QualityTier::P480
}

fn default_target_max_quality() -> QualityTier {
    QualityTier::P1080
}

fn default_true() -> bool {
    true
}

impl TargetConfig {
    pub fn new(
        name: impl Into<String>,
        protocol: impl Into<String>,
        base_path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            protocol: protocol.into(),
            host: None,
            port: None,
            username: None,
            password: None,
            identity_file: None,
            share: None,
            base_path: base_path.into(),
            max_concurrent: default_max_concurrent(),
            min_quality: default_target_min_quality(),
            max_quality: default_target_max_quality(),
            categories: Vec::new(),
            cleanup_after_success: true,
            verify_checksum: false,
            bandwidth_limit_bps: None,
            layout: DirectoryLayout::default(),
        }
    }

    /// A pre-mounted local filesystem target.
    pub fn local(name: impl Into<String>, base_path: impl Into<String>) -> Self {
        Self::new(name, "local_mount", base_path)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    pub fn with_ceiling(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_quality_band(mut self, min: QualityTier, max: QualityTier) -> Self {
        self.min_quality = min;
        self.max_quality = max;
        self
    }

    pub fn with_categories(mut self, categories: Vec<ContentCategory>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup_after_success = cleanup;
        self
    }

    pub fn with_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    pub fn with_bandwidth_limit(mut self, bytes_per_sec: u64) -> Self {
        self.bandwidth_limit_bps = Some(bytes_per_sec);
        self
    }

    pub fn quality_band(&self) -> Option<QualityBand> {
        QualityBand::new(self.min_quality, self.max_quality)
    }

    /// Whether this target takes items of `category` at `quality`.
    pub fn accepts(&self, category: ContentCategory, quality: QualityTier) -> bool {
        let category_ok = self.categories.is_empty() || self.categories.contains(&category);
        let quality_ok = self.quality_band().is_some_and(|band| band.contains(quality));
        category_ok && quality_ok
    }

    /// `user@host` or `host` for remote protocols.
    pub fn remote_login(&self) -> Option<String> {
        let host = self.host.as_deref()?;
        Some(match &self.username {
            Some(user) => format!("{}@{}", user, host),
            None => host.to_string(),
        })
    }
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("name", &self.name)
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("identity_file", &self.identity_file)
            .field("share", &self.share)
            .field("base_path", &self.base_path)
            .field("max_concurrent", &self.max_concurrent)
            .field("min_quality", &self.min_quality)
            .field("max_quality", &self.max_quality)
            .field("categories", &self.categories)
            .field("cleanup_after_success", &self.cleanup_after_success)
            .field("verify_checksum", &self.verify_checksum)
            .field("bandwidth_limit_bps", &self.bandwidth_limit_bps)
            .finish()
    }
}
