//! Wire types and calls for the OAuth2 device-authorization grant.

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Grant type used when polling with a device code.
pub const DEVICE_GRANT: &str = "http://oauth.net/grant_type/device/1.0";

/// Grant type used to exchange a refresh token.
pub const REFRESH_GRANT: &str = "refresh_token";

/// Response of the device-code issuance endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_url: String,
    /// Seconds the user has to approve the device.
    pub expires_in: i64,
    /// Poll interval suggested by the server, in seconds.
    #[serde(default)]
    pub interval: u64,
}

impl DeviceCode {
    /// Link the user opens to approve this device.
    #[must_use]
    pub fn verification_link(&self) -> String {
        format!(
            "{}/{}",
            self.verification_url.trim_end_matches('/'),
            self.user_code
        )
    }
}

/// Successful response of the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

/// POSTs a form to an OAuth endpoint and decodes the JSON answer.
pub(crate) async fn post_form<T: DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
    params: &[(&str, &str)],
) -> Result<T> {
    let response = http.post(url).form(params).send().await?;
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(Error::Api {
            url: url.to_string(),
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        });
    }
    Ok(serde_json::from_str(&body)?)
}
