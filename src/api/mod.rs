//! Authenticated client for the Debrid-Link v2 API.
//!
//! [`ApiClient::call`] is the single entry point for every remote call: it
//! injects the bearer token, picks the body encoding, unwraps the response
//! envelope and re-authenticates on `401 Unauthorized`. The endpoints in
//! [`seedbox`] are thin mappings onto it.

pub mod models;
pub mod seedbox;
pub mod transport;

use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;

use crate::auth::{AuthManager, TokenProvider};
use crate::error::{Error, Result};

pub use models::{
    ApiEnvelope, LimitsAndUsage, PagerRequest, RemoteFile, StructureType, TorrentActivity,
    TorrentActivityMap, TorrentIds, TorrentRecord, TorrentSource, TorrentSubmission,
};
pub use seedbox::SeedboxApi;
pub use transport::RetryPolicy;

/// Default base URL of the Debrid-Link v2 API.
pub const API_BASE_URL: &str = "https://debrid-link.com/api/v2";

/// Re-authentication retries after a 401, on top of the first attempt.
pub const MAX_UNAUTHORIZED_RETRIES: u32 = 2;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const BYTES_CONTENT_TYPE: &str = "application/octet-stream";

/// A multipart body with a single named file part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartBody {
    pub fields: Vec<(String, String)>,
    pub file_field: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl MultipartBody {
    // `Form` is consumed by the request, so it is rebuilt for each attempt.
    fn to_form(&self) -> reqwest::multipart::Form {
        let part = reqwest::multipart::Part::bytes(self.bytes.clone())
            .file_name(self.file_name.clone());
        self.fields
            .iter()
            .fold(reqwest::multipart::Form::new(), |form, (key, value)| {
                form.text(key.clone(), value.clone())
            })
            .part(self.file_field.clone(), part)
    }
}

/// Request body and its encoding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Structured fields, sent form-url-encoded.
    Form(Vec<(String, String)>),
    /// Raw bytes, sent unmodified.
    Bytes(Vec<u8>),
    /// File upload; the transport sets the boundary header.
    Multipart(MultipartBody),
}

/// Method, query and body of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOptions {
    pub method: Method,
    pub query: Vec<(&'static str, String)>,
    pub body: RequestBody,
}

impl CallOptions {
    #[must_use]
    pub const fn new(method: Method) -> Self {
        Self {
            method,
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    #[must_use]
    pub const fn get() -> Self {
        Self::new(Method::GET)
    }

    #[must_use]
    pub const fn post(body: RequestBody) -> Self {
        Self {
            method: Method::POST,
            query: Vec::new(),
            body,
        }
    }

    #[must_use]
    pub const fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    #[must_use]
    pub fn with_query(mut self, query: Vec<(&'static str, String)>) -> Self {
        self.query = query;
        self
    }
}

/// Client wrapping the Debrid-Link API.
pub struct ApiClient<P: TokenProvider = AuthManager> {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<P>,
    retry: RetryPolicy,
}

impl<P: TokenProvider> ApiClient<P> {
    #[must_use]
    pub fn new(http: reqwest::Client, tokens: Arc<P>) -> Self {
        Self {
            http,
            base_url: API_BASE_URL.to_string(),
            tokens,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn tokens(&self) -> &P {
        &self.tokens
    }

    fn build(&self, url: &str, token: &str, options: &CallOptions) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .request(options.method.clone(), url)
            .bearer_auth(token);
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        match &options.body {
            RequestBody::Empty => request.header(CONTENT_TYPE, FORM_CONTENT_TYPE),
            RequestBody::Form(fields) => request.form(fields),
            RequestBody::Bytes(bytes) => request
                .header(CONTENT_TYPE, BYTES_CONTENT_TYPE)
                .body(bytes.clone()),
            RequestBody::Multipart(multipart) => request.multipart(multipart.to_form()),
        }
    }

    /// Performs an authenticated call and returns the envelope's `value`.
    ///
    /// A 2xx response whose body is not a valid envelope yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] for non-2xx responses (401 only after
    /// [`MAX_UNAUTHORIZED_RETRIES`] re-authentications), or the token
    /// provider's or transport's error.
    pub async fn call<T: DeserializeOwned>(
        &self,
        path: &str,
        options: CallOptions,
    ) -> Result<Option<T>> {
        let url = format!("{}{path}", self.base_url);
        let mut unauthorized = 0;

        loop {
            let token = self.tokens.token().await?;
            let response =
                transport::send_with_retry(self.retry, || self.build(&url, &token, &options))
                    .await
                    .inspect_err(|e| log::error!("Request to '{url}' failed: {e}"))?;
            let status = response.status();

            if status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Ok(parse_envelope(&url, &text));
            }

            if status == StatusCode::UNAUTHORIZED && unauthorized < MAX_UNAUTHORIZED_RETRIES {
                unauthorized += 1;
                log::warn!(
                    "Unauthorized response for '{url}', re-authenticating (retry {unauthorized}/{MAX_UNAUTHORIZED_RETRIES})"
                );
                self.tokens.clear().await?;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            let error = Error::Api {
                url,
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                body,
            };
            log::error!("{error}");
            return Err(error);
        }
    }
}

fn parse_envelope<T: DeserializeOwned>(url: &str, text: &str) -> Option<T> {
    match serde_json::from_str::<ApiEnvelope<T>>(text) {
        Ok(envelope) => {
            log::trace!("Got response payload from '{url}': {text}");
            envelope.value
        }
        Err(e) => {
            log::debug!("Response from '{url}' is not a valid envelope: {e}");
            None
        }
    }
}
