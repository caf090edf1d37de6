//! Direct HTTP download streamed to a `.part` file.

use std::path::Path;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{Downloader, part_path};
use crate::api::transport::{RetryPolicy, send_with_retry};
use crate::error::{Error, Result};
use crate::fs::{FileSystem, TokioFileSystem};

/// Streams a URL to disk with `reqwest`.
pub struct HttpDownloader<F: FileSystem = TokioFileSystem> {
    http: reqwest::Client,
    fs: F,
    retry: RetryPolicy,
}

impl HttpDownloader<TokioFileSystem> {
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_fs(http, TokioFileSystem::new())
    }
}

impl<F: FileSystem> HttpDownloader<F> {
    #[must_use]
    pub fn with_fs(http: reqwest::Client, fs: F) -> Self {
        Self {
            http,
            fs,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_to(&self, source_url: &str, part: &Path) -> Result<u64> {
        let mut response = send_with_retry(self.retry, || self.http.get(source_url)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Download(format!(
                "GET '{source_url}' returned {}",
                status.as_u16()
            )));
        }

        let mut file = self.fs.create_file(part).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl<F: FileSystem> Downloader for HttpDownloader<F> {
    async fn download(&self, source_url: &str, temp_path: &Path, final_path: &Path) -> Result<()> {
        if let Some(parent) = temp_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.fs.create_dir_all(parent).await?;
        }
        let part = part_path(temp_path);

        let written = match self.fetch_to(source_url, &part).await {
            Ok(written) => written,
            Err(e) => {
                let _ = self.fs.remove_file(&part).await;
                return Err(e);
            }
        };
        log::debug!("Fetched {written} bytes into {}", part.display());

        self.fs.move_file(&part, final_path).await?;
        log::info!("Downloaded {}", final_path.display());
        Ok(())
    }
}
