//! Configuration loaded from the process environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default aria2 JSON-RPC endpoint.
pub const DEFAULT_ARIA2_RPC_URL: &str = "http://localhost:6800/jsonrpc";

/// Which downloader backend receives the files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloaderKind {
    /// Queue the files on an aria2 daemon.
    Aria2,
    /// Stream the files directly over HTTP.
    Fetch,
    /// Print the links and download nothing.
    #[default]
    PrintOnly,
}

impl DownloaderKind {
    /// Parses the `DOWNLOADER` value; unset or empty means print-only.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unknown backend names.
    pub fn parse(value: Option<&str>) -> Result<Self> {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") => Ok(Self::PrintOnly),
            Some("aria2") => Ok(Self::Aria2),
            Some("fetch") => Ok(Self::Fetch),
            Some(other) => Err(Error::Config(format!(
                "unknown downloader '{other}', expected 'aria2' or 'fetch'"
            ))),
        }
    }
}

/// aria2 daemon connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aria2Config {
    pub rpc_url: String,
    /// RPC secret, sent as the `token:` parameter.
    pub secret: Option<String>,
    /// Interval between status polls of a queued download.
    pub poll_interval: Duration,
}

impl Default for Aria2Config {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_ARIA2_RPC_URL.to_string(),
            secret: None,
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Mailjet API credentials and addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailjetConfig {
    pub api_key: String,
    pub api_secret: String,
    pub from: String,
    pub to: Vec<String>,
}

/// SMTP relay used for the verification mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: String,
    pub to: Vec<String>,
}

/// How the verification link reaches the user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NotifierConfig {
    /// Log the link and print it to stderr.
    #[default]
    Log,
    Smtp(SmtpConfig),
    Mailjet(MailjetConfig),
}

/// Complete application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// OAuth client id.
    pub client_id: String,
    /// Directory where completed files end up.
    pub destination: Option<PathBuf>,
    /// Directory for in-progress files.
    pub temp_destination: Option<PathBuf>,
    pub downloader: DownloaderKind,
    pub aria2: Aria2Config,
    pub notifier: NotifierConfig,
    /// Directory of the credential record and lock marker.
    pub state_dir: PathBuf,
    /// Remove the torrent from the seedbox once every file is in place.
    pub remove_completed: bool,
    /// Interval between completion polls.
    pub poll_interval: Duration,
}

impl AppConfig {
    /// Creates a print-only configuration for `client_id`.
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            destination: None,
            temp_destination: None,
            downloader: DownloaderKind::PrintOnly,
            aria2: Aria2Config::default(),
            notifier: NotifierConfig::Log,
            state_dir: default_state_dir(),
            remove_completed: false,
            poll_interval: Duration::from_secs(30),
        }
    }

    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// See [`from_lookup`](Self::from_lookup).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`; empty values count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] without a client id and [`Error::Config`] for
    /// an unknown downloader, a missing destination when a downloader is
    /// selected, or incomplete Mailjet settings.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let client_id = get("DEBRID_LINK_CLIENT_ID").ok_or_else(|| {
            Error::Auth("missing OAuth client id (DEBRID_LINK_CLIENT_ID)".to_string())
        })?;

        let mut config = Self::new(client_id)
            .with_downloader(DownloaderKind::parse(get("DOWNLOADER").as_deref())?);
        config.destination = get("DOWNLOADS").map(PathBuf::from);
        config.temp_destination = get("IN_PROGRESS").map(PathBuf::from);
        config.notifier = notifier_from(&get)?;
        config.remove_completed = get("DEBRID_REMOVE_COMPLETED")
            .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"));
        if let Some(dir) = get("DEBRID_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }
        if let Some(url) = get("ARIA2_RPC_URL") {
            config.aria2.rpc_url = url;
        }
        config.aria2.secret = get("ARIA2_SECRET");

        config.validate()?;
        Ok(config)
    }

    /// Checks that a downloader has somewhere to put files.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a downloader is selected without a
    /// destination.
    pub fn validate(&self) -> Result<()> {
        if self.downloader != DownloaderKind::PrintOnly && self.destination.is_none() {
            return Err(Error::Config(
                "missing downloads destination configuration (DOWNLOADS)".to_string(),
            ));
        }
        Ok(())
    }

    /// The in-progress directory, falling back to the destination.
    #[must_use]
    pub fn temp_dir(&self) -> Option<&PathBuf> {
        self.temp_destination.as_ref().or(self.destination.as_ref())
    }

    #[must_use]
    pub const fn with_downloader(mut self, downloader: DownloaderKind) -> Self {
        self.downloader = downloader;
        self
    }

    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    #[must_use]
    pub fn with_temp_destination(mut self, temp: impl Into<PathBuf>) -> Self {
        self.temp_destination = Some(temp.into());
        self
    }

    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_remove_completed(mut self, remove: bool) -> Self {
        self.remove_completed = remove;
        self
    }
}

fn notifier_from<F>(get: &F) -> Result<NotifierConfig>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = get("SMTP_HOST") {
        let require = |key: &str| {
            get(key).ok_or_else(|| Error::Config(format!("missing {key} for SMTP")))
        };
        let port = require("SMTP_PORT")?;
        let port = port
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("invalid SMTP_PORT '{port}'")))?;
        return Ok(NotifierConfig::Smtp(SmtpConfig {
            host,
            port,
            user: require("SMTP_USER")?,
            password: require("SMTP_PASS")?,
            from: require("MAIL_FROM")?,
            to: recipients(get)?,
        }));
    }

    match (get("MJ_APIKEY_PUBLIC"), get("MJ_APIKEY_PRIVATE")) {
        (None, None) => Ok(NotifierConfig::Log),
        (Some(api_key), Some(api_secret)) => Ok(NotifierConfig::Mailjet(MailjetConfig {
            api_key,
            api_secret,
            from: get("MAIL_FROM")
                .ok_or_else(|| Error::Config("missing MAIL_FROM for Mailjet".to_string()))?,
            to: recipients(get)?,
        })),
        (Some(_), None) => Err(Error::Config("missing Mailjet API secret".to_string())),
        (None, Some(_)) => Err(Error::Config("missing Mailjet API key".to_string())),
    }
}

/// Comma separated `MAIL_TO`; at least one address is required.
fn recipients<F>(get: &F) -> Result<Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let to: Vec<String> = get("MAIL_TO")
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    if to.is_empty() {
        return Err(Error::Config("missing MAIL_TO".to_string()));
    }
    Ok(to)
}

/// `$XDG_CACHE_HOME/debrid-dl` or the platform equivalent.
#[must_use]
pub fn default_state_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("debrid-dl")
}
