//! On-disk persistence of the OAuth credential.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tokens are treated as expired this long before their real expiry.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// File name of the persisted credential record.
pub const CREDENTIAL_FILE: &str = ".access_token";

/// `now` plus `seconds`, as reported by the server.
///
/// # Errors
///
/// Returns [`Error::Auth`] when the offset cannot be represented.
pub fn expiry_after(now: DateTime<Utc>, seconds: i64) -> Result<DateTime<Utc>> {
    TimeDelta::try_seconds(seconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| Error::Auth(format!("unusable expires_in of {seconds} seconds")))
}

/// A bearer token pair with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Builds a credential expiring `expires_in` seconds after `now`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if `expires_in` is out of range.
    pub fn issued(
        access_token: String,
        refresh_token: String,
        expires_in: i64,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            access_token,
            refresh_token,
            expires_at: expiry_after(now, expires_in)?,
        })
    }

    /// Whether the access token is still usable at `now`, keeping the
    /// one-minute safety margin.
    #[must_use]
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }

    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }
}

/// Load/save of the credential record at a fixed path.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store located at `<dir>/.access_token`.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(CREDENTIAL_FILE))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted credential.
    ///
    /// A missing, empty or unparsable record yields `None`; only other I/O
    /// failures are errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub async fn load(&self) -> Result<Option<Credential>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(None);
        }
        match serde_json::from_str(&contents) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                log::warn!(
                    "Ignoring unreadable credential record '{}': {e}",
                    self.path.display()
                );
                Ok(None)
            }
        }
    }

    /// Persists the credential atomically (write tmp + rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written.
    pub async fn save(&self, credential: &Credential) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string(credential)?;
        let tmp_path = self.tmp_path();
        let written = Self::write_private(&tmp_path, json).await;
        let result = match written {
            Ok(()) => tokio::fs::rename(&tmp_path, &self.path).await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp_path).await;
        }
        Ok(result?)
    }

    /// Unique per writer, so concurrent refreshes never share a temp file.
    fn tmp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map_or_else(|| CREDENTIAL_FILE.into(), |n| n.to_string_lossy());
        self.path.with_file_name(format!(
            "{name}.{}.{}.tmp",
            std::process::id(),
            uuid::Uuid::new_v4().simple()
        ))
    }

    async fn write_private(path: &Path, contents: String) -> std::io::Result<()> {
        tokio::fs::write(path, contents).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(path, perms).await?;
        }
        Ok(())
    }

    /// Deletes the persisted record; a missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub async fn remove(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn sample(expires_at: DateTime<Utc>) -> Credential {
        Credential {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at,
        }
    }

    #[tokio::test]
    async fn load_missing_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::in_dir(dir.path());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::in_dir(&dir.path().join("nested"));
        let credential = sample(Utc::now() + Duration::hours(1));

        store.save(&credential).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(credential));
    }

    #[tokio::test]
    async fn record_uses_camel_case_keys() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::in_dir(dir.path());
        store
            .save(&sample(Utc::now() + Duration::hours(1)))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"accessToken\""));
        assert!(raw.contains("\"refreshToken\""));
        assert!(raw.contains("\"expiresAt\""));
    }

    #[tokio::test]
    async fn concurrent_saves_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::in_dir(dir.path());
        let expires_at = Utc::now() + Duration::hours(1);

        let saves = (0..16).map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let mut credential = sample(expires_at);
                credential.access_token = format!("access-{i}");
                store.save(&credential).await
            })
        });
        for save in saves.collect::<Vec<_>>() {
            save.await.unwrap().unwrap();
        }

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec![CREDENTIAL_FILE.to_string()]);
        assert!(store.load().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn garbage_record_is_ignored() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::in_dir(dir.path());
        std::fs::write(store.path(), "not json").unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::in_dir(dir.path());
        store
            .save(&sample(Utc::now() + Duration::hours(1)))
            .await
            .unwrap();

        store.remove().await.unwrap();
        store.remove().await.unwrap();
        assert!(!store.path().exists());
    }

    #[test]
    fn token_inside_margin_is_stale() {
        let now = Utc::now();
        assert!(!sample(now + Duration::seconds(30)).is_fresh_at(now));
        assert!(!sample(now + Duration::seconds(60)).is_fresh_at(now));
        assert!(sample(now + Duration::seconds(61)).is_fresh_at(now));
    }

    #[test]
    fn out_of_range_expiry_is_an_error() {
        let now = Utc::now();
        for expires_in in [i64::MAX, i64::MIN, i64::MAX / 1000] {
            let result = Credential::issued("a".to_string(), "r".to_string(), expires_in, now);
            assert!(matches!(result, Err(Error::Auth(_))), "{expires_in}");
        }
        let credential = Credential::issued("a".to_string(), "r".to_string(), 3600, now).unwrap();
        assert_eq!(credential.expires_at, now + Duration::hours(1));
    }

    proptest! {
        #[test]
        fn freshness_respects_margin(offset in -10_000i64..10_000) {
            let now = Utc::now();
            let credential = sample(now + Duration::seconds(offset));
            prop_assert_eq!(credential.is_fresh_at(now), offset > EXPIRY_MARGIN_SECS);
        }
    }
}
