//! Downloader backends that fetch a seedbox file to local disk.
//!
//! A backend writes into the temporary path and only places the file at the
//! final path once it is complete.

pub mod aria2;
pub mod http;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::config::{AppConfig, DownloaderKind};
use crate::error::Result;

pub use aria2::Aria2Downloader;
pub use http::HttpDownloader;

/// Capability shared by every download backend.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetches `source_url`, leaving the file at `final_path` on success.
    async fn download(&self, source_url: &str, temp_path: &Path, final_path: &Path)
    -> Result<()>;

    /// Releases connections or daemon state; safe to call more than once.
    async fn release_resources(&self) -> Result<()> {
        Ok(())
    }
}

/// The backend chosen once at startup.
pub enum Backend {
    /// Files are queued on an aria2 daemon.
    Queue(Aria2Downloader),
    /// Files are streamed over HTTP by this process.
    Direct(HttpDownloader),
    /// Links are printed, nothing is downloaded.
    PrintOnly,
}

impl Backend {
    /// Builds the backend named by `config.downloader`.
    #[must_use]
    pub fn from_config(config: &AppConfig, http: reqwest::Client) -> Self {
        match config.downloader {
            DownloaderKind::Aria2 => Self::Queue(Aria2Downloader::new(config.aria2.clone(), http)),
            DownloaderKind::Fetch => Self::Direct(HttpDownloader::new(http)),
            DownloaderKind::PrintOnly => Self::PrintOnly,
        }
    }

    /// The downloader, or `None` in print-only mode.
    #[must_use]
    pub fn downloader(&self) -> Option<&dyn Downloader> {
        match self {
            Self::Queue(aria2) => Some(aria2 as &dyn Downloader),
            Self::Direct(http) => Some(http as &dyn Downloader),
            Self::PrintOnly => None,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Queue(_) => "aria2",
            Self::Direct(_) => "fetch",
            Self::PrintOnly => "print-only",
        }
    }
}

/// Returns the `.part` file path for a given path.
pub(crate) fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
