//! Seedbox endpoints.

use async_trait::async_trait;

use super::models::{
    LimitsAndUsage, PagerRequest, TorrentActivityMap, TorrentIds, TorrentRecord, TorrentSource,
    TorrentSubmission,
};
use super::{ApiClient, CallOptions, MultipartBody, RequestBody};
use crate::auth::TokenProvider;
use crate::error::{Error, Result};

/// The seedbox operations the orchestrator relies on.
#[async_trait]
pub trait SeedboxApi: Send + Sync {
    /// Adds a torrent and returns its initial record.
    async fn add_torrent(&self, submission: TorrentSubmission) -> Result<TorrentRecord>;

    /// Fetches the current record of one torrent.
    async fn torrent(&self, id: &str) -> Result<TorrentRecord>;

    /// Removes torrents, returning the removed ids.
    async fn remove_torrents(&self, ids: TorrentIds) -> Result<Vec<String>>;
}

impl<P: TokenProvider> ApiClient<P> {
    /// Lists torrents.
    ///
    /// A file is ready for download when `downloadPercent` reaches 100.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn list_torrents(&self, pager: &PagerRequest) -> Result<Vec<TorrentRecord>> {
        log::trace!("Listing torrents {pager:?}");
        Ok(self
            .call("/seedbox/list", CallOptions::get().with_query(pager.query()))
            .await?
            .unwrap_or_default())
    }

    /// Activity indexed by torrent id; lighter than [`list_torrents`](Self::list_torrents).
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn torrents_activity(&self, ids: Option<&TorrentIds>) -> Result<TorrentActivityMap> {
        log::trace!("Getting torrents activity {ids:?}");
        let query = ids.map(|ids| vec![("ids", ids.encode())]).unwrap_or_default();
        Ok(self
            .call("/seedbox/activity", CallOptions::get().with_query(query))
            .await?
            .unwrap_or_default())
    }

    /// Adds a torrent, by URL as a form or by file as a multipart upload.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails or returns no torrent.
    pub async fn add_torrent(&self, submission: TorrentSubmission) -> Result<TorrentRecord> {
        self.call("/seedbox/add", CallOptions::post(submission_body(submission)))
            .await?
            .ok_or_else(|| Error::UnexpectedResponse("/seedbox/add".to_string()))
    }

    /// Removes one or more torrents.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn remove_torrents(&self, ids: &TorrentIds) -> Result<Vec<String>> {
        log::trace!("Removing torrents {ids:?}");
        Ok(self
            .call(&format!("/seedbox/{}/remove", ids.encode()), CallOptions::delete())
            .await?
            .unwrap_or_default())
    }

    /// Asks the seedbox to build a zip of the torrent's files.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn zip_torrent(&self, id: &str) -> Result<Vec<String>> {
        log::trace!("Compressing torrent files of {id}");
        Ok(self
            .call(
                &format!("/seedbox/{id}/zip"),
                CallOptions::post(RequestBody::Empty),
            )
            .await?
            .unwrap_or_default())
    }

    /// Sets the unwanted files of a waiting torrent; an empty list selects
    /// every file.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn configure_torrent(&self, id: &str, unwanted_file_ids: &[String]) -> Result<()> {
        log::trace!("Configure unwanted files of {id}: {unwanted_file_ids:?}");
        let unwanted = TorrentIds::Many(unwanted_file_ids.to_vec()).encode();
        self.call::<serde_json::Value>(
            &format!("/seedbox/{id}/config"),
            CallOptions::post(RequestBody::Form(vec![(
                "files-unwanted".to_string(),
                unwanted,
            )])),
        )
        .await?;
        Ok(())
    }

    /// Account limits and usage.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails or returns nothing.
    pub async fn limits(&self) -> Result<LimitsAndUsage> {
        log::trace!("Get limits and usage");
        self.call("/seedbox/limits", CallOptions::get())
            .await?
            .ok_or_else(|| Error::UnexpectedResponse("/seedbox/limits".to_string()))
    }
}

/// A URL becomes a plain form; a file becomes a multipart upload with a
/// `file` part and no `url` field.
fn submission_body(submission: TorrentSubmission) -> RequestBody {
    let mut fields = submission.option_fields();
    match submission.source {
        TorrentSource::Url(url) => {
            log::trace!("Adding torrent from URL {url}");
            fields.insert(0, ("url".to_string(), url));
            RequestBody::Form(fields)
        }
        TorrentSource::File { bytes, file_name } => {
            log::trace!("Adding torrent file '{file_name}' ({} bytes)", bytes.len());
            RequestBody::Multipart(MultipartBody {
                fields,
                file_field: "file".to_string(),
                file_name,
                bytes,
            })
        }
    }
}

#[async_trait]
impl<P: TokenProvider> SeedboxApi for ApiClient<P> {
    async fn add_torrent(&self, submission: TorrentSubmission) -> Result<TorrentRecord> {
        Self::add_torrent(self, submission).await
    }

    async fn torrent(&self, id: &str) -> Result<TorrentRecord> {
        self.list_torrents(&PagerRequest::for_ids(id))
            .await?
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::UnexpectedResponse(format!("/seedbox/list?ids={id}")))
    }

    async fn remove_torrents(&self, ids: TorrentIds) -> Result<Vec<String>> {
        Self::remove_torrents(self, &ids).await
    }
}
