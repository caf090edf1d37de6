//! Delivery of the device verification link to a human.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::json;

use crate::config::{MailjetConfig, NotifierConfig, SmtpConfig};
use crate::error::{Error, Result};

const MAILJET_SEND_URL: &str = "https://api.mailjet.com/v3.1/send";
const SUBJECT: &str = "Confirm device";

/// Out-of-band notification of a pending device authorization.
///
/// Delivery is best-effort: callers log failures and carry on polling.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn notify(&self, user_code: &str, verification_link: &str) -> Result<()>;
}

/// Builds the mailer selected by configuration.
///
/// # Errors
///
/// Returns [`Error::Mail`] if the SMTP transport cannot be set up.
pub fn from_config(config: &NotifierConfig, http: reqwest::Client) -> Result<Arc<dyn Mailer>> {
    Ok(match config {
        NotifierConfig::Log => Arc::new(LogMailer),
        NotifierConfig::Smtp(smtp) => Arc::new(SmtpMailer::new(smtp.clone())?),
        NotifierConfig::Mailjet(mailjet) => Arc::new(MailjetMailer::new(mailjet.clone(), http)),
    })
}

fn text_part(verification_link: &str) -> String {
    format!("Please confirm your Debrid Link device: {verification_link}")
}

fn html_part(user_code: &str, verification_link: &str) -> String {
    format!(
        "<p>Please confirm your Debrid Link device: <a href=\"{verification_link}\">{user_code}</a></p>"
    )
}

/// Writes the link to the log and stderr; used when no mail transport is
/// configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn notify(&self, user_code: &str, verification_link: &str) -> Result<()> {
        log::warn!("Device authorization required, code {user_code}: {verification_link}");
        eprintln!("{}", text_part(verification_link));
        Ok(())
    }
}

/// Sends the link through an SMTP relay, upgrading to TLS when offered.
pub struct SmtpMailer {
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Sets up the transport; no connection is made until the first mail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mail`] if the TLS parameters cannot be built.
    pub fn new(config: SmtpConfig) -> Result<Self> {
        // Relays with self-signed certificates are accepted.
        let tls = TlsParameters::builder(config.host.clone())
            .dangerous_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::Mail(format!("TLS setup for '{}': {e}", config.host)))?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port)
            .tls(Tls::Opportunistic(tls))
            .credentials(Credentials::new(
                config.user.clone(),
                config.password.clone(),
            ))
            .timeout(Some(Duration::from_secs(30)))
            .build();
        Ok(Self { config, transport })
    }

    fn message(&self, user_code: &str, verification_link: &str) -> Result<Message> {
        let parse = |address: &str| {
            address
                .parse::<Mailbox>()
                .map_err(|e| Error::Mail(format!("invalid address '{address}': {e}")))
        };
        let builder = self
            .config
            .to
            .iter()
            .try_fold(Message::builder().from(parse(&self.config.from)?), |builder, to| {
                Ok::<_, Error>(builder.to(parse(to)?))
            })?;
        builder
            .subject(SUBJECT)
            .multipart(MultiPart::alternative_plain_html(
                text_part(verification_link),
                html_part(user_code, verification_link),
            ))
            .map_err(|e| Error::Mail(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn notify(&self, user_code: &str, verification_link: &str) -> Result<()> {
        let message = self.message(user_code, verification_link)?;
        let response = self.transport.send(message).await.map_err(|e| {
            Error::Mail(format!(
                "SMTP {}:{} rejected the mail: {e}",
                self.config.host, self.config.port
            ))
        })?;
        log::debug!("Email sent, {}", response.code());
        Ok(())
    }
}

/// Sends the link through the Mailjet v3.1 send API.
#[derive(Debug, Clone)]
pub struct MailjetMailer {
    config: MailjetConfig,
    http: reqwest::Client,
    endpoint: String,
}

impl MailjetMailer {
    #[must_use]
    pub fn new(config: MailjetConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            endpoint: MAILJET_SEND_URL.to_string(),
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn payload(&self, user_code: &str, verification_link: &str) -> serde_json::Value {
        let to: Vec<_> = self
            .config
            .to
            .iter()
            .map(|email| json!({ "Email": email }))
            .collect();
        json!({
            "Messages": [{
                "From": { "Email": self.config.from, "Name": "Debrid-Link Blackhole" },
                "To": to,
                "Subject": SUBJECT,
                "TextPart": text_part(verification_link),
                "HTMLPart": html_part(user_code, verification_link),
            }]
        })
    }
}

#[async_trait]
impl Mailer for MailjetMailer {
    async fn notify(&self, user_code: &str, verification_link: &str) -> Result<()> {
        let body = serde_json::to_string(&self.payload(user_code, verification_link))?;
        let response = self
            .http
            .post(&self.endpoint)
            .basic_auth(&self.config.api_key, Some(&self.config.api_secret))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::Api {
                url: self.endpoint.clone(),
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                body: text,
            });
        }
        log::debug!("Verification mail sent: {text}");
        Ok(())
    }
}
