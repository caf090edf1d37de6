//! debrid-dl - Download torrents through a Debrid-Link seedbox.
//!
//! The seedbox fetches the torrent; this library authenticates with the
//! OAuth2 device flow, submits the torrent, waits for it to complete and
//! hands every file to a download backend.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use debrid_dl::{ApiClient, AppConfig, AuthConfig, AuthManager, Backend, Orchestrator};
//! use debrid_dl::auth::{ProcessLock, TokenStore};
//!
//! # async fn example() -> debrid_dl::Result<()> {
//! let config = AppConfig::from_env()?;
//! let http = reqwest::Client::new();
//!
//! let auth = AuthManager::new(
//!     AuthConfig::new(config.client_id.clone()),
//!     TokenStore::in_dir(&config.state_dir),
//!     ProcessLock::in_dir(&config.state_dir),
//!     debrid_dl::notify::from_config(&config.notifier, http.clone())?,
//!     http.clone(),
//! )?;
//! let api = ApiClient::new(http.clone(), Arc::new(auth));
//! let backend = Backend::from_config(&config, http);
//!
//! let outcome = Orchestrator::new(api, &config)
//!     .run(Path::new("ubuntu.magnet"), backend.downloader(), &mut std::io::stdout())
//!     .await?;
//! println!("exit code {}", outcome.exit_code());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod api;
pub mod auth;
pub mod config;
pub mod download;
pub mod error;
pub mod fs;
pub mod notify;
pub mod orchestrator;

// Re-export main types for convenience
pub use api::{ApiClient, RemoteFile, SeedboxApi, TorrentRecord, TorrentSubmission};
pub use auth::{AuthConfig, AuthManager, TokenProvider};
pub use config::{AppConfig, DownloaderKind};
pub use download::{Backend, Downloader};
pub use error::{Error, Result};
pub use fs::{FileSystem, TokioFileSystem};
pub use notify::Mailer;
pub use orchestrator::{Orchestrator, Outcome};
