//! Submit a torrent, wait for the seedbox, then fetch every file.

use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::api::{RemoteFile, SeedboxApi, TorrentIds, TorrentRecord, TorrentSubmission};
use crate::config::AppConfig;
use crate::download::Downloader;
use crate::error::{Error, Result};
use crate::fs::{FileStatus, FileSystem, TokioFileSystem};

/// How a run ended when nothing fatal happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Links were printed instead of downloaded.
    Printed { files: usize },
    /// Every file was downloaded or already present.
    Completed { downloaded: usize, skipped: usize },
    /// At least one file failed to download.
    PartialFailure { failed: usize },
}

impl Outcome {
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Printed { .. } | Self::Completed { .. } => 0,
            Self::PartialFailure { .. } => 1,
        }
    }
}

/// Drives one reference through the seedbox.
pub struct Orchestrator<A: SeedboxApi, F: FileSystem = TokioFileSystem> {
    api: A,
    fs: F,
    destination: Option<PathBuf>,
    temp_destination: Option<PathBuf>,
    poll_interval: Duration,
    remove_completed: bool,
}

impl<A: SeedboxApi> Orchestrator<A, TokioFileSystem> {
    #[must_use]
    pub fn new(api: A, config: &AppConfig) -> Self {
        Self::with_fs(api, config, TokioFileSystem::new())
    }
}

impl<A: SeedboxApi, F: FileSystem> Orchestrator<A, F> {
    #[must_use]
    pub fn with_fs(api: A, config: &AppConfig, fs: F) -> Self {
        Self {
            api,
            fs,
            destination: config.destination.clone(),
            temp_destination: config.temp_destination.clone(),
            poll_interval: config.poll_interval,
            remove_completed: config.remove_completed,
        }
    }

    /// Runs the whole flow for `reference`, a `.magnet` file or a torrent
    /// file. Without a downloader every link is written to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] before any network call if the reference or
    /// a needed destination is missing. Reference read failures and API
    /// errors are returned as well; per-file download failures are not.
    pub async fn run(
        &self,
        reference: &Path,
        downloader: Option<&dyn Downloader>,
        out: &mut (dyn Write + Send),
    ) -> Result<Outcome> {
        if reference.as_os_str().is_empty() {
            return Err(Error::Config("missing torrent or magnet reference".to_string()));
        }
        if downloader.is_some() && self.destination.is_none() {
            return Err(Error::Config(
                "missing downloads destination configuration".to_string(),
            ));
        }
        log::info!("Starting download for '{}'", reference.display());

        let submitted = self.api.add_torrent(self.submission(reference).await?).await?;
        log::info!("Torrent '{}' added as {}", submitted.name, submitted.id);
        let torrent = self.wait_for_completion(&submitted.id).await?;

        let Some(downloader) = downloader else {
            log::debug!("No downloader selected, printing links");
            for file in &torrent.files {
                writeln!(out, "{}", file.download_url)?;
            }
            out.flush()?;
            return Ok(Outcome::Printed {
                files: torrent.files.len(),
            });
        };

        let outcome = self.download_all(&torrent.files, downloader).await;
        if let Err(e) = downloader.release_resources().await {
            log::warn!("Failed to release downloader resources: {e}");
        }

        if self.remove_completed && outcome.exit_code() == 0 {
            match self.api.remove_torrents(TorrentIds::from(torrent.id.clone())).await {
                Ok(_) => log::info!("Removed torrent {} from the seedbox", torrent.id),
                Err(e) => log::warn!("Failed to remove torrent {}: {e}", torrent.id),
            }
        }
        log::info!("Processed '{}'", reference.display());
        Ok(outcome)
    }

    async fn submission(&self, reference: &Path) -> Result<TorrentSubmission> {
        let content = self.fs.read(reference).await.map_err(|e| {
            Error::Config(format!("cannot read '{}': {e}", reference.display()))
        })?;
        if reference.to_string_lossy().ends_with(".magnet") {
            log::trace!("Reference is a magnet");
            let url = String::from_utf8_lossy(&content).trim().to_string();
            Ok(TorrentSubmission::by_url(url).with_async(true))
        } else {
            log::trace!("Reference is a torrent file");
            let file_name = reference
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(TorrentSubmission::by_file(content, file_name).with_async(true))
        }
    }

    /// Polls until `downloadPercent` reaches 100, sleeping between polls.
    async fn wait_for_completion(&self, id: &str) -> Result<TorrentRecord> {
        loop {
            let torrent = self.api.torrent(id).await?;
            if torrent.is_complete() {
                return Ok(torrent);
            }
            log::debug!("Torrent {id} at {:.1}%", torrent.download_percent);
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn download_all(&self, files: &[RemoteFile], downloader: &dyn Downloader) -> Outcome {
        let mut downloaded = 0;
        let mut skipped = 0;
        let mut failed = 0;
        for file in files {
            match self.download_one(file, downloader).await {
                Ok(true) => downloaded += 1,
                Ok(false) => skipped += 1,
                Err(e) => {
                    log::warn!("Failed to download from '{}': {e}", file.download_url);
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            Outcome::PartialFailure { failed }
        } else {
            Outcome::Completed {
                downloaded,
                skipped,
            }
        }
    }

    /// Returns `false` when the file was already in place.
    async fn download_one(&self, file: &RemoteFile, downloader: &dyn Downloader) -> Result<bool> {
        let destination = self
            .destination
            .as_deref()
            .ok_or_else(|| Error::Config("missing downloads destination".to_string()))?;
        let temp_dir = self.temp_destination.as_deref().unwrap_or(destination);
        let name = contained_name(&file.name)?;
        let final_path = destination.join(&name);
        let temp_path = temp_dir.join(&name);

        match self.fs.file_status(&final_path, file.size).await? {
            FileStatus::Complete => {
                log::info!(
                    "A file with the same size already exists, skipping '{}'",
                    final_path.display()
                );
                return Ok(false);
            }
            FileStatus::SizeMismatch(size) => log::debug!(
                "'{}' has {size} of {} bytes, downloading again",
                final_path.display(),
                file.size
            ),
            FileStatus::Missing => {}
        }

        downloader
            .download(&file.download_url, &temp_path, &final_path)
            .await?;
        Ok(true)
    }
}

/// The remote file name as a path that stays inside the directory it is
/// joined to: roots and `.` are dropped, `..` is refused.
fn contained_name(name: &str) -> Result<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::Download(format!(
                    "refusing file name '{name}' leaving the destination"
                )));
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(Error::Download(format!("unusable file name '{name}'")));
    }
    Ok(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    use crate::api::TorrentSource;

    fn record(percent: f64, files: Vec<RemoteFile>) -> TorrentRecord {
        TorrentRecord {
            id: "t-1".to_string(),
            name: "ubuntu".to_string(),
            hash_string: String::new(),
            status: 0,
            wait: false,
            total_size: 0,
            download_percent: percent,
            download_speed: 0,
            peers_connected: 0,
            files,
        }
    }

    fn remote(name: &str, size: u64) -> RemoteFile {
        RemoteFile {
            id: name.to_string(),
            name: name.to_string(),
            download_url: format!("https://dl.example.test/{name}"),
            size,
            download_percent: 100.0,
        }
    }

    /// Replays `downloadPercent` values, one per poll.
    struct ScriptedSeedbox {
        percents: Mutex<VecDeque<f64>>,
        files: Vec<RemoteFile>,
        submissions: Mutex<Vec<TorrentSubmission>>,
        polls: AtomicUsize,
        removed: AtomicUsize,
    }

    impl ScriptedSeedbox {
        fn new(percents: &[f64], files: Vec<RemoteFile>) -> Self {
            Self {
                percents: Mutex::new(percents.iter().copied().collect()),
                files,
                submissions: Mutex::new(Vec::new()),
                polls: AtomicUsize::new(0),
                removed: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SeedboxApi for ScriptedSeedbox {
        async fn add_torrent(&self, submission: TorrentSubmission) -> Result<TorrentRecord> {
            self.submissions.lock().unwrap().push(submission);
            Ok(record(0.0, Vec::new()))
        }

        async fn torrent(&self, _id: &str) -> Result<TorrentRecord> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let percent = self.percents.lock().unwrap().pop_front().unwrap_or(100.0);
            Ok(record(percent, self.files.clone()))
        }

        async fn remove_torrents(&self, _ids: TorrentIds) -> Result<Vec<String>> {
            self.removed.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["t-1".to_string()])
        }
    }

    /// Writes `size` bytes at the final path unless the URL is in `failing`.
    #[derive(Default)]
    struct RecordingDownloader {
        calls: Mutex<Vec<String>>,
        targets: Mutex<Vec<(PathBuf, PathBuf)>>,
        failing: Vec<String>,
        releases: AtomicUsize,
    }

    #[async_trait]
    impl Downloader for RecordingDownloader {
        async fn download(&self, url: &str, temp: &Path, final_path: &Path) -> Result<()> {
            self.calls.lock().unwrap().push(url.to_string());
            self.targets
                .lock()
                .unwrap()
                .push((temp.to_path_buf(), final_path.to_path_buf()));
            if self.failing.iter().any(|f| f == url) {
                return Err(Error::Download(format!("GET '{url}' returned 500")));
            }
            std::fs::create_dir_all(final_path.parent().unwrap())?;
            std::fs::write(final_path, b"data")?;
            Ok(())
        }

        async fn release_resources(&self) -> Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Workspace {
        dir: TempDir,
        magnet: PathBuf,
    }

    fn workspace() -> Workspace {
        let dir = TempDir::new().unwrap();
        let magnet = dir.path().join("ubuntu.magnet");
        std::fs::write(&magnet, "magnet:?xt=urn:btih:abc\n").unwrap();
        Workspace { dir, magnet }
    }

    fn config(ws: &Workspace) -> AppConfig {
        AppConfig::new("client")
            .with_destination(ws.dir.path().join("downloads"))
            .with_temp_destination(ws.dir.path().join("in-progress"))
            .with_poll_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn polls_until_complete() {
        let ws = workspace();
        let api = ScriptedSeedbox::new(&[10.0, 55.0, 100.0], Vec::new());
        let orchestrator = Orchestrator::new(api, &config(&ws));

        let mut out = Vec::new();
        orchestrator.run(&ws.magnet, None, &mut out).await.unwrap();

        assert_eq!(orchestrator.api.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn magnet_is_submitted_by_url_async() {
        let ws = workspace();
        let api = ScriptedSeedbox::new(&[100.0], Vec::new());
        let orchestrator = Orchestrator::new(api, &config(&ws));

        orchestrator.run(&ws.magnet, None, &mut Vec::new()).await.unwrap();

        let submissions = orchestrator.api.submissions.lock().unwrap();
        assert_eq!(
            submissions[0].source,
            TorrentSource::Url("magnet:?xt=urn:btih:abc".to_string())
        );
        assert!(submissions[0].r#async);
    }

    #[tokio::test]
    async fn torrent_file_is_submitted_with_base_name() {
        let ws = workspace();
        let torrent = ws.dir.path().join("debian.torrent");
        std::fs::write(&torrent, b"d8:announce").unwrap();
        let api = ScriptedSeedbox::new(&[100.0], Vec::new());
        let orchestrator = Orchestrator::new(api, &config(&ws));

        orchestrator.run(&torrent, None, &mut Vec::new()).await.unwrap();

        let submissions = orchestrator.api.submissions.lock().unwrap();
        assert_eq!(
            submissions[0].source,
            TorrentSource::File {
                bytes: b"d8:announce".to_vec(),
                file_name: "debian.torrent".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn print_only_writes_links_in_order() {
        let ws = workspace();
        let api = ScriptedSeedbox::new(&[100.0], vec![remote("a.mkv", 4), remote("b.srt", 4)]);
        let orchestrator = Orchestrator::new(api, &AppConfig::new("client"));

        let mut out = Vec::new();
        let outcome = orchestrator.run(&ws.magnet, None, &mut out).await.unwrap();

        assert_eq!(outcome, Outcome::Printed { files: 2 });
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "https://dl.example.test/a.mkv\nhttps://dl.example.test/b.srt\n"
        );
    }

    #[tokio::test]
    async fn existing_file_with_same_size_is_skipped() {
        let ws = workspace();
        let config = config(&ws);
        let existing = config.destination.clone().unwrap().join("a.mkv");
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, b"1234").unwrap();

        let api = ScriptedSeedbox::new(&[100.0], vec![remote("a.mkv", 4), remote("b.srt", 9)]);
        let downloader = RecordingDownloader::default();
        let orchestrator = Orchestrator::new(api, &config);

        let outcome = orchestrator
            .run(&ws.magnet, Some(&downloader), &mut Vec::new())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::Completed {
                downloaded: 1,
                skipped: 1
            }
        );
        assert_eq!(
            *downloader.calls.lock().unwrap(),
            vec!["https://dl.example.test/b.srt".to_string()]
        );
        assert_eq!(downloader.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn size_mismatch_is_downloaded_again() {
        let ws = workspace();
        let config = config(&ws);
        let existing = config.destination.clone().unwrap().join("a.mkv");
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, b"12").unwrap();

        let api = ScriptedSeedbox::new(&[100.0], vec![remote("a.mkv", 4)]);
        let downloader = RecordingDownloader::default();
        let orchestrator = Orchestrator::new(api, &config);

        orchestrator
            .run(&ws.magnet, Some(&downloader), &mut Vec::new())
            .await
            .unwrap();

        assert_eq!(downloader.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_others() {
        let ws = workspace();
        let config = config(&ws).with_remove_completed(true);
        let api = ScriptedSeedbox::new(&[100.0], vec![remote("a.mkv", 4), remote("b.mkv", 4)]);
        let downloader = RecordingDownloader {
            failing: vec!["https://dl.example.test/b.mkv".to_string()],
            ..RecordingDownloader::default()
        };
        let orchestrator = Orchestrator::new(api, &config);

        let outcome = orchestrator
            .run(&ws.magnet, Some(&downloader), &mut Vec::new())
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::PartialFailure { failed: 1 });
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(downloader.calls.lock().unwrap().len(), 2);
        assert!(config.destination.unwrap().join("a.mkv").exists());
        assert_eq!(downloader.releases.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.api.removed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn names_are_kept_under_the_directory() {
        assert_eq!(contained_name("a.mkv").unwrap(), PathBuf::from("a.mkv"));
        assert_eq!(
            contained_name("/tmp/escape/evil.bin").unwrap(),
            PathBuf::from("tmp/escape/evil.bin")
        );
        assert_eq!(
            contained_name("./Season 1/e01.mkv").unwrap(),
            PathBuf::from("Season 1/e01.mkv")
        );
        assert!(contained_name("../evil.bin").is_err());
        assert!(contained_name("a/../../evil.bin").is_err());
        assert!(contained_name("/").is_err());
        assert!(contained_name("").is_err());
    }

    #[tokio::test]
    async fn absolute_remote_name_stays_inside_destination() {
        let ws = workspace();
        let config = config(&ws);
        let destination = config.destination.clone().unwrap();
        let temp = config.temp_destination.clone().unwrap();
        let api = ScriptedSeedbox::new(
            &[100.0],
            vec![remote("/tmp/escape/evil.bin", 4), remote("../up.bin", 4)],
        );
        let downloader = RecordingDownloader::default();
        let orchestrator = Orchestrator::new(api, &config);

        let outcome = orchestrator
            .run(&ws.magnet, Some(&downloader), &mut Vec::new())
            .await
            .unwrap();

        // The `..` name fails without reaching the downloader.
        assert_eq!(outcome, Outcome::PartialFailure { failed: 1 });
        let targets = downloader.targets.lock().unwrap();
        assert_eq!(
            *targets,
            vec![(
                temp.join("tmp/escape/evil.bin"),
                destination.join("tmp/escape/evil.bin")
            )]
        );
        assert!(targets.iter().all(|(t, f)| t.starts_with(&temp) && f.starts_with(&destination)));
    }

    #[tokio::test]
    async fn file_named_only_magnet_is_a_magnet() {
        let ws = workspace();
        let bare = ws.dir.path().join(".magnet");
        std::fs::write(&bare, "magnet:?xt=urn:btih:def").unwrap();
        let api = ScriptedSeedbox::new(&[100.0], Vec::new());
        let orchestrator = Orchestrator::new(api, &config(&ws));

        orchestrator.run(&bare, None, &mut Vec::new()).await.unwrap();

        let submissions = orchestrator.api.submissions.lock().unwrap();
        assert_eq!(
            submissions[0].source,
            TorrentSource::Url("magnet:?xt=urn:btih:def".to_string())
        );
    }

    #[tokio::test]
    async fn completed_torrent_is_removed_when_asked() {
        let ws = workspace();
        let config = config(&ws).with_remove_completed(true);
        let api = ScriptedSeedbox::new(&[100.0], vec![remote("a.mkv", 4)]);
        let downloader = RecordingDownloader::default();
        let orchestrator = Orchestrator::new(api, &config);

        orchestrator
            .run(&ws.magnet, Some(&downloader), &mut Vec::new())
            .await
            .unwrap();

        assert_eq!(orchestrator.api.removed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn downloader_without_destination_fails_before_submitting() {
        let ws = workspace();
        let api = ScriptedSeedbox::new(&[100.0], Vec::new());
        let downloader = RecordingDownloader::default();
        let orchestrator = Orchestrator::new(api, &AppConfig::new("client"));

        let err = orchestrator
            .run(&ws.magnet, Some(&downloader), &mut Vec::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Config(_)));
        assert!(orchestrator.api.submissions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreadable_reference_is_a_config_error() {
        let ws = workspace();
        let api = ScriptedSeedbox::new(&[100.0], Vec::new());
        let orchestrator = Orchestrator::new(api, &config(&ws));

        let err = orchestrator
            .run(&ws.dir.path().join("missing.magnet"), None, &mut Vec::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Config(_)));
    }
}
