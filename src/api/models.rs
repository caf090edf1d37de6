//! Payload types of the Debrid-Link v2 seedbox API.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Wrapper around every API payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    pub value: Option<T>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub pages: i64,
    #[serde(default)]
    pub next: i64,
    #[serde(default)]
    pub previous: i64,
}

/// A file inside a torrent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub download_url: String,
    pub size: u64,
    #[serde(default)]
    pub download_percent: f64,
}

/// A torrent as reported by the seedbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hash_string: String,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub wait: bool,
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub download_percent: f64,
    #[serde(default)]
    pub download_speed: u64,
    #[serde(default)]
    pub peers_connected: u32,
    #[serde(default)]
    pub files: Vec<RemoteFile>,
}

impl TorrentRecord {
    /// The seedbox signals completion only through `downloadPercent`.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.download_percent >= 100.0
    }
}

/// Short status of a torrent, as returned by `/seedbox/activity`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentActivity {
    #[serde(default)]
    pub upload_ratio: f64,
    #[serde(default)]
    pub peers_connected: u32,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub wait: bool,
    /// Downloaded percent of each file, same order as [`TorrentRecord::files`].
    #[serde(default)]
    pub files: Vec<f64>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub download_percent: f64,
    #[serde(default)]
    pub download_speed: u64,
    #[serde(default)]
    pub upload_speed: u64,
}

/// Activity indexed by torrent id.
pub type TorrentActivityMap = HashMap<String, TorrentActivity>;

/// A usage counter against its limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub current: f64,
    #[serde(default)]
    pub value: f64,
}

/// Account limits and usage of the seedbox.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsAndUsage {
    #[serde(default)]
    pub usage_percent: Usage,
    #[serde(default)]
    pub next_reset_seconds: Usage,
    #[serde(default)]
    pub day_count: Usage,
}

/// Layout of the `files` field in torrent listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureType {
    List,
    Tree,
}

impl StructureType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Tree => "tree",
        }
    }
}

/// A torrent id or a list of ids, as accepted by several endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorrentIds {
    One(String),
    Many(Vec<String>),
}

impl TorrentIds {
    /// Single ids go verbatim, lists as a JSON array.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::One(id) => id.clone(),
            Self::Many(ids) => serde_json::to_string(ids).unwrap_or_default(),
        }
    }
}

impl From<&str> for TorrentIds {
    fn from(id: &str) -> Self {
        Self::One(id.to_string())
    }
}

impl From<String> for TorrentIds {
    fn from(id: String) -> Self {
        Self::One(id)
    }
}

impl From<Vec<String>> for TorrentIds {
    fn from(ids: Vec<String>) -> Self {
        Self::Many(ids)
    }
}

/// Paging and filtering of `/seedbox/list`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PagerRequest {
    /// At most 50 ids.
    pub ids: Option<TorrentIds>,
    pub structure_type: Option<StructureType>,
    /// Starts at 0.
    pub page: Option<u32>,
    /// Between 20 and 50.
    pub per_page: Option<u32>,
}

impl PagerRequest {
    #[must_use]
    pub fn for_ids(ids: impl Into<TorrentIds>) -> Self {
        Self {
            ids: Some(ids.into()),
            ..Self::default()
        }
    }

    /// Query string pairs, omitting unset fields.
    #[must_use]
    pub fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(ids) = &self.ids {
            query.push(("ids", ids.encode()));
        }
        if let Some(structure) = self.structure_type {
            query.push(("structureType", structure.as_str().to_string()));
        }
        if let Some(page) = self.page {
            query.push(("page", page.to_string()));
        }
        if let Some(per_page) = self.per_page {
            query.push(("perPage", per_page.to_string()));
        }
        query
    }
}

/// Where the torrent comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorrentSource {
    /// Magnet link, hash, or public torrent URL.
    Url(String),
    /// Raw `.torrent` content uploaded as a multipart file.
    File { bytes: Vec<u8>, file_name: String },
}

/// Request to add a torrent to the seedbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentSubmission {
    pub source: TorrentSource,
    /// Hold the torrent so files can be selected before it starts.
    pub wait: bool,
    /// Return immediately instead of waiting for magnet metadata.
    pub r#async: bool,
    pub structure_type: Option<StructureType>,
}

impl TorrentSubmission {
    #[must_use]
    pub const fn new(source: TorrentSource) -> Self {
        Self {
            source,
            wait: false,
            r#async: false,
            structure_type: None,
        }
    }

    #[must_use]
    pub const fn by_url(url: String) -> Self {
        Self::new(TorrentSource::Url(url))
    }

    #[must_use]
    pub const fn by_file(bytes: Vec<u8>, file_name: String) -> Self {
        Self::new(TorrentSource::File { bytes, file_name })
    }

    /// Builds a submission from loosely specified parts. A URL wins over
    /// file content, which is then dropped.
    #[must_use]
    pub fn from_parts(
        url: Option<String>,
        file: Option<Vec<u8>>,
        file_name: Option<String>,
    ) -> Option<Self> {
        match (url, file, file_name) {
            (Some(url), file, file_name) => {
                if file.is_some() || file_name.is_some() {
                    log::warn!("Using URL, ignoring file and fileName");
                }
                Some(Self::by_url(url))
            }
            (None, Some(bytes), Some(file_name)) => Some(Self::by_file(bytes, file_name)),
            _ => None,
        }
    }

    #[must_use]
    pub const fn with_async(mut self, value: bool) -> Self {
        self.r#async = value;
        self
    }

    #[must_use]
    pub const fn with_wait(mut self, value: bool) -> Self {
        self.wait = value;
        self
    }

    #[must_use]
    pub const fn with_structure_type(mut self, structure: StructureType) -> Self {
        self.structure_type = Some(structure);
        self
    }

    /// Non-file fields as form pairs.
    #[must_use]
    pub fn option_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("wait".to_string(), self.wait.to_string()),
            ("async".to_string(), self.r#async.to_string()),
        ];
        if let Some(structure) = self.structure_type {
            fields.push(("structureType".to_string(), structure.as_str().to_string()));
        }
        fields
    }
}
