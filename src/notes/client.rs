use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use crate::config::ApiConfig;
use crate::error::FetchError;
use crate::notes::api_types::{ApiErrorBody, ApiLocatorResponse};
use crate::notes::fetcher::{BinarySource, LocatorSource};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Notes API client wrapper
#[derive(Clone)]
pub struct ApiClient {
  client: Client,
  base_url: Url,
  token: Option<String>,
}

impl ApiClient {
  pub fn new(config: &ApiConfig, token: Option<String>) -> Result<Self, FetchError> {
    // Url::join drops the last segment unless the base ends in a slash
    let mut base = config.url.trim_end_matches('/').to_string();
    base.push('/');
    let base_url = Url::parse(&base)
      .map_err(|e| FetchError::remote(format!("invalid API url {}: {}", config.url, e)))?;

    let client = Client::builder()
      .timeout(config.timeout())
      .build()
      .map_err(|e| FetchError::remote(format!("failed to create HTTP client: {}", e)))?;

    Ok(Self {
      client,
      base_url,
      token,
    })
  }

  /// `{base}/units/{unit_id}/url`, with the id escaped as a single segment.
  fn locator_endpoint(&self, unit_id: &str) -> Result<Url, FetchError> {
    // extend() silently skips these instead of escaping them
    if matches!(unit_id, "." | "..") {
      return Err(FetchError::remote(format!("invalid unit id {:?}", unit_id)));
    }

    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|()| FetchError::remote(format!("API url {} cannot take a path", self.base_url)))?
      .pop_if_empty()
      .extend(["units", unit_id, "url"]);
    Ok(url)
  }

  /// Resolve a locator that may be relative to the API base.
  fn resolve_locator(&self, raw: &str) -> Result<Url, FetchError> {
    match Url::parse(raw) {
      Ok(url) => Ok(url),
      Err(url::ParseError::RelativeUrlWithoutBase) => self
        .base_url
        .join(raw)
        .map_err(|e| FetchError::remote(format!("invalid locator {}: {}", raw, e))),
      Err(e) => Err(FetchError::remote(format!("invalid locator {}: {}", raw, e))),
    }
  }
}

#[async_trait]
impl LocatorSource for ApiClient {
  async fn unit_locator(&self, unit_id: &str) -> Result<Url, FetchError> {
    let url = self.locator_endpoint(unit_id)?;
    debug!(unit_id, %url, "requesting unit locator");

    let mut request = self
      .client
      .get(url)
      .header(USER_AGENT, concat!("notelab-offline/", env!("CARGO_PKG_VERSION")));
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(classify_reqwest_error)?;
    let status = response.status();
    let body = response.bytes().await.map_err(classify_reqwest_error)?;

    if !status.is_success() {
      return Err(classify_status(status, &body));
    }

    let envelope: ApiLocatorResponse = serde_json::from_slice(&body).map_err(|e| FetchError::Remote {
      status: Some(status.as_u16()),
      message: format!("malformed locator response: {}", e),
    })?;

    self.resolve_locator(&envelope.data.url)
  }
}

#[async_trait]
impl BinarySource for ApiClient {
  async fn get_binary(&self, locator: &Url) -> Result<(Vec<u8>, String), FetchError> {
    // Signed locators carry their own credentials; no auth header here
    let response = self
      .client
      .get(locator.clone())
      .send()
      .await
      .map_err(classify_reqwest_error)?;

    let status = response.status();
    let content_type = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from)
      .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
    let body = response.bytes().await.map_err(classify_reqwest_error)?;

    if !status.is_success() {
      return Err(classify_status(status, &body));
    }

    Ok((body.to_vec(), content_type))
  }
}

/// Classify a transport-level reqwest error.
///
/// Anything that kept the full response from arriving is treated as a
/// connectivity failure. A response that arrived but could not be used is a
/// remote failure.
pub fn classify_reqwest_error(err: reqwest::Error) -> FetchError {
  if err.is_connect() || err.is_timeout() || err.is_request() {
    FetchError::Network(err.to_string())
  } else if let Some(status) = err.status() {
    FetchError::Remote {
      status: Some(status.as_u16()),
      message: err.to_string(),
    }
  } else if err.is_body() || (err.is_decode() && !is_rejected_content(&err)) {
    // Connection dropped mid-body
    FetchError::Network(err.to_string())
  } else {
    FetchError::remote(err.to_string())
  }
}

/// Whether a decode error came from the payload itself (e.g. a corrupt
/// compressed body) rather than from the transport. Below reqwest's own
/// wrappers, decompression failures are I/O errors while transport failures
/// carry the HTTP stack's error type.
fn is_rejected_content(err: &reqwest::Error) -> bool {
  let mut source = std::error::Error::source(err);
  while let Some(inner) = source {
    if !inner.is::<reqwest::Error>() {
      return inner.is::<std::io::Error>();
    }
    source = inner.source();
  }
  false
}

/// Classify a non-success HTTP response.
pub fn classify_status(status: StatusCode, body: &[u8]) -> FetchError {
  let message = serde_json::from_slice::<ApiErrorBody>(body)
    .ok()
    .and_then(ApiErrorBody::into_message)
    .unwrap_or_else(|| {
      status
        .canonical_reason()
        .unwrap_or("unexpected status")
        .to_string()
    });

  FetchError::Remote {
    status: Some(status.as_u16()),
    message,
  }
}
