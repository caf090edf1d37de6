//! Download queued on an aria2 daemon over JSON-RPC.

use std::path::Path;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::Downloader;
use crate::api::transport::{RetryPolicy, send_with_retry};
use crate::config::Aria2Config;
use crate::error::{Error, Result};
use crate::fs::{FileSystem, TokioFileSystem};

const STATUS_KEYS: [&str; 4] = ["status", "completedLength", "totalLength", "errorMessage"];

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: String,
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Subset of `aria2.tellStatus` fields.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadStatus {
    status: String,
    #[serde(default)]
    completed_length: Option<String>,
    #[serde(default)]
    total_length: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Hands each file to aria2 and waits for it to finish.
pub struct Aria2Downloader<F: FileSystem = TokioFileSystem> {
    config: Aria2Config,
    http: reqwest::Client,
    fs: F,
    retry: RetryPolicy,
}

impl Aria2Downloader<TokioFileSystem> {
    #[must_use]
    pub fn new(config: Aria2Config, http: reqwest::Client) -> Self {
        Self::with_fs(config, http, TokioFileSystem::new())
    }
}

impl<F: FileSystem> Aria2Downloader<F> {
    #[must_use]
    pub fn with_fs(config: Aria2Config, http: reqwest::Client, fs: F) -> Self {
        Self {
            config,
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

    async fn rpc<T: DeserializeOwned>(&self, method: &str, args: Vec<Value>) -> Result<T> {
        let mut params = Vec::with_capacity(args.len() + 1);
        if let Some(secret) = &self.config.secret {
            params.push(Value::String(format!("token:{secret}")));
        }
        params.extend(args);
        let body = serde_json::to_string(&RpcRequest {
            jsonrpc: "2.0",
            id: uuid::Uuid::new_v4().to_string(),
            method,
            params,
        })?;

        let response = send_with_retry(self.retry, || {
            self.http
                .post(&self.config.rpc_url)
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone())
        })
        .await?;
        let status = response.status();
        let text = response.text().await?;

        // aria2 reports RPC failures with a 400 and an error object.
        let parsed: RpcResponse<T> = serde_json::from_str(&text).map_err(|_| Error::Api {
            url: self.config.rpc_url.clone(),
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            body: text.clone(),
        })?;
        if let Some(RpcError { code, message }) = parsed.error {
            return Err(Error::Download(format!("aria2 {method} failed ({code}): {message}")));
        }
        parsed
            .result
            .ok_or_else(|| Error::UnexpectedResponse(format!("aria2 {method} returned no result")))
    }

    async fn wait_for(&self, gid: &str) -> Result<()> {
        loop {
            let status: DownloadStatus = self
                .rpc("aria2.tellStatus", vec![json!(gid), json!(STATUS_KEYS)])
                .await?;
            match status.status.as_str() {
                "complete" => return Ok(()),
                "error" | "removed" => {
                    return Err(Error::Download(format!(
                        "aria2 download {gid} {}: {}",
                        status.status,
                        status.error_message.unwrap_or_default()
                    )));
                }
                other => log::debug!(
                    "aria2 {gid} {other}: {}/{} bytes",
                    status.completed_length.as_deref().unwrap_or("0"),
                    status.total_length.as_deref().unwrap_or("?")
                ),
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

#[async_trait]
impl<F: FileSystem> Downloader for Aria2Downloader<F> {
    async fn download(&self, source_url: &str, temp_path: &Path, final_path: &Path) -> Result<()> {
        let dir = temp_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| Error::Download(format!("no directory in {}", temp_path.display())))?;
        let out = temp_path
            .file_name()
            .ok_or_else(|| Error::Download(format!("no file name in {}", temp_path.display())))?;

        let gid: String = self
            .rpc(
                "aria2.addUri",
                vec![
                    json!([source_url]),
                    json!({
                        "dir": dir.to_string_lossy(),
                        "out": out.to_string_lossy(),
                    }),
                ],
            )
            .await?;
        log::info!("Queued {} on aria2 as {gid}", temp_path.display());

        self.wait_for(&gid).await?;
        self.fs.move_file(temp_path, final_path).await?;
        log::info!("Downloaded {}", final_path.display());
        Ok(())
    }

    async fn release_resources(&self) -> Result<()> {
        let _: Value = self.rpc("aria2.purgeDownloadResult", Vec::new()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;
    use std::time::Duration;
    use tempfile::TempDir;

    fn downloader(server: &MockServer, secret: Option<&str>) -> Aria2Downloader {
        let config = Aria2Config {
            rpc_url: server.url("/jsonrpc"),
            secret: secret.map(String::from),
            poll_interval: Duration::from_millis(1),
        };
        Aria2Downloader::new(config, reqwest::Client::new()).with_retry_policy(RetryPolicy::none())
    }

    #[tokio::test]
    async fn queues_waits_and_moves() {
        let server = MockServer::start_async().await;
        let add = server
            .mock_async(|when, then| {
                when.method("POST")
                    .path("/jsonrpc")
                    .body_includes("aria2.addUri")
                    .body_includes("token:s3cret")
                    .body_includes("\"out\":\"movie.mkv\"");
                then.status(200)
                    .body(r#"{"jsonrpc":"2.0","id":"x","result":"2089b05ecca3d829"}"#);
            })
            .await;
        let status = server
            .mock_async(|when, then| {
                when.path("/jsonrpc").body_includes("aria2.tellStatus");
                then.status(200).body(
                    r#"{"jsonrpc":"2.0","id":"x","result":{"status":"complete","completedLength":"3","totalLength":"3"}}"#,
                );
            })
            .await;

        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("tmp/movie.mkv");
        let fin = dir.path().join("final/movie.mkv");
        // Stands in for the file aria2 would have written.
        std::fs::create_dir_all(temp.parent().unwrap()).unwrap();
        std::fs::write(&temp, b"abc").unwrap();

        downloader(&server, Some("s3cret"))
            .download("https://dl.example.test/movie.mkv", &temp, &fin)
            .await
            .unwrap();

        add.assert_async().await;
        status.assert_async().await;
        assert!(!temp.exists());
        assert_eq!(std::fs::read(&fin).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn failed_download_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.body_includes("aria2.addUri");
                then.status(200).body(r#"{"jsonrpc":"2.0","id":"x","result":"gid1"}"#);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.body_includes("aria2.tellStatus");
                then.status(200).body(
                    r#"{"jsonrpc":"2.0","id":"x","result":{"status":"error","errorMessage":"404"}}"#,
                );
            })
            .await;
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("a.bin");

        let err = downloader(&server, None)
            .download("https://dl.example.test/a.bin", &temp, &temp)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Download(_)));
    }

    #[tokio::test]
    async fn rpc_error_object_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.body_includes("aria2.addUri");
                then.status(400).body(
                    r#"{"jsonrpc":"2.0","id":"x","error":{"code":1,"message":"Unauthorized"}}"#,
                );
            })
            .await;
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("a.bin");

        let err = downloader(&server, Some("wrong"))
            .download("https://dl.example.test/a.bin", &temp, &temp)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Unauthorized"));
    }

    #[tokio::test]
    async fn release_purges_results() {
        let server = MockServer::start_async().await;
        let purge = server
            .mock_async(|when, then| {
                when.body_includes("aria2.purgeDownloadResult");
                then.status(200).body(r#"{"jsonrpc":"2.0","id":"x","result":"OK"}"#);
            })
            .await;

        downloader(&server, None).release_resources().await.unwrap();
        purge.assert_async().await;
    }
}
