//! HTTP transport to the upstream REST API and the throttled requester on top of it.

use std::cell::RefCell;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{ApiError, Result};
use crate::throttle::RateLimiter;

const VERSION_HEADER: &str = "Pretalx-Version";
const USER_AGENT: &str = "talkline/0.1";

/// Ordered query parameters merged into a request URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    pub fn push<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.0.push((key.into(), value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Percent-encoded `k=v&k=v` rendering, without a leading `?`.
    pub fn to_query_string(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Split an absolute link into its path and query parameters.
    pub fn split_url(link: &str) -> Result<(String, QueryParams)> {
        let url = Url::parse(link).map_err(|err| ApiError::InvalidUrl(format!("{link}: {err}")))?;
        let params = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Ok((url.path().to_string(), QueryParams(params)))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A response as received, before any status check.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub url: String,
    pub body: String,
}

/// How a request ended, for callers that branch on specific statuses.
#[derive(Debug)]
pub enum Outcome {
    Success(Value),
    NotFound { url: String },
    Unauthorized { status: StatusCode, url: String },
    Failed { status: StatusCode, url: String },
}

impl Outcome {
    /// Collapse back into a plain result, turning every non-success into an error.
    pub fn into_result(self) -> Result<Value> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::NotFound { url } => Err(ApiError::NotFound { url }),
            Outcome::Unauthorized { status, url } | Outcome::Failed { status, url } => {
                Err(ApiError::Status { status, url })
            }
        }
    }
}

impl HttpResponse {
    pub fn new<U: Into<String>, B: Into<String>>(status: StatusCode, url: U, body: B) -> Self {
        Self {
            status,
            url: url.into(),
            body: body.into(),
        }
    }

    pub fn error_for_status(self) -> Result<Self> {
        if self.status.is_success() {
            Ok(self)
        } else if self.status == StatusCode::NOT_FOUND {
            Err(ApiError::NotFound { url: self.url })
        } else {
            Err(ApiError::Status {
                status: self.status,
                url: self.url,
            })
        }
    }

    pub fn json(self) -> Result<Value> {
        let response = self.error_for_status()?;
        Ok(serde_json::from_str(&response.body)?)
    }

    pub fn outcome(self) -> Result<Outcome> {
        let HttpResponse { status, url, body } = self;
        if status.is_success() {
            return Ok(Outcome::Success(serde_json::from_str(&body)?));
        }
        Ok(match status {
            StatusCode::NOT_FOUND => Outcome::NotFound { url },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Outcome::Unauthorized { status, url }
            }
            _ => Outcome::Failed { status, url },
        })
    }
}

/// Issues GET requests against the upstream origin.
///
/// Implementations must not fail on HTTP error statuses; that decision belongs
/// to the caller.
pub trait Transport {
    fn get(&self, endpoint: &str, params: &QueryParams) -> Result<HttpResponse>;
}

/// Blocking reqwest transport with the fixed version and auth headers.
pub struct HttpTransport {
    client: Client,
    base: Url,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|err| ApiError::InvalidUrl(format!("{}: {err}", config.base_url)))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            VERSION_HEADER,
            HeaderValue::from_str(&config.api_version)
                .map_err(|err| ApiError::InvalidHeader(format!("{VERSION_HEADER}: {err}")))?,
        );
        if let Some(token) = config.api_token.as_deref() {
            let mut value = HeaderValue::from_str(&authorization_value(token))
                .map_err(|err| ApiError::InvalidHeader(format!("Authorization: {err}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, base })
    }

    fn url_for(&self, endpoint: &str, params: &QueryParams) -> Result<Url> {
        let mut url = self
            .base
            .join(endpoint)
            .map_err(|err| ApiError::InvalidUrl(format!("{endpoint}: {err}")))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter());
        }
        Ok(url)
    }
}

impl Transport for HttpTransport {
    fn get(&self, endpoint: &str, params: &QueryParams) -> Result<HttpResponse> {
        let url = self.url_for(endpoint, params)?;
        info!(url = %url, "GET");
        let response = self.client.get(url.clone()).send()?;
        let status = response.status();
        let body = response.text()?;
        Ok(HttpResponse::new(status, url.as_str(), body))
    }
}

fn authorization_value(token: &str) -> String {
    let token = token.trim();
    if token.starts_with("Token ") || token.starts_with("Bearer ") {
        token.to_string()
    } else {
        format!("Token {token}")
    }
}

/// A transport behind the rate limiter. Every outgoing call goes through here.
pub struct Requester {
    transport: Box<dyn Transport>,
    limiter: RefCell<RateLimiter>,
}

impl Requester {
    pub fn new(transport: Box<dyn Transport>, limiter: RateLimiter) -> Self {
        Self {
            transport,
            limiter: RefCell::new(limiter),
        }
    }

    /// Swap in a new limiter. Waits already in progress keep their old deadline.
    pub fn set_limiter(&self, limiter: RateLimiter) {
        info!(
            calls = limiter.calls(),
            seconds = limiter.period().as_secs_f64(),
            "throttling"
        );
        *self.limiter.borrow_mut() = limiter;
    }

    pub fn get(&self, endpoint: &str, params: &QueryParams) -> Result<HttpResponse> {
        self.limiter
            .borrow_mut()
            .call(|| self.transport.get(endpoint, params))
    }

    /// Fetch and decode, failing on any error status.
    pub fn get_json(&self, endpoint: &str, params: &QueryParams) -> Result<Value> {
        let value = self.get(endpoint, params)?.json()?;
        debug!(endpoint = %endpoint, "response received");
        Ok(value)
    }

    /// Fetch and classify, so callers can branch on not-found or unauthorized.
    pub fn get_outcome(&self, endpoint: &str, params: &QueryParams) -> Result<Outcome> {
        self.get(endpoint, params)?.outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_string_is_encoded_in_order() {
        let params = QueryParams::new()
            .with("questions", "all")
            .with("state", "accepted confirmed");
        assert_eq!(
            params.to_query_string(),
            "questions=all&state=accepted%20confirmed"
        );
        assert_eq!(params.get("questions"), Some("all"));
        assert_eq!(params.get("missing"), None);
    }

    #[test]
    fn test_split_url_extracts_path_and_params() {
        let (path, params) = QueryParams::split_url(
            "https://pretalx.com/api/events/pyconde/submissions/?limit=25&offset=50",
        )
        .expect("valid link");
        assert_eq!(path, "/api/events/pyconde/submissions/");
        assert_eq!(params.get("limit"), Some("25"));
        assert_eq!(params.get("offset"), Some("50"));
    }

    #[test]
    fn test_split_url_rejects_relative_links() {
        let err = QueryParams::split_url("/api/events/").unwrap_err();
        assert!(matches!(err, ApiError::InvalidUrl(_)));
    }

    #[test]
    fn test_outcome_classification() {
        let ok = HttpResponse::new(StatusCode::OK, "u", r#"{"code":"X"}"#)
            .outcome()
            .expect("decodes");
        assert!(matches!(ok, Outcome::Success(_)));

        let missing = HttpResponse::new(StatusCode::NOT_FOUND, "u", "")
            .outcome()
            .expect("classified");
        assert!(matches!(missing, Outcome::NotFound { .. }));

        let denied = HttpResponse::new(StatusCode::FORBIDDEN, "u", "")
            .outcome()
            .expect("classified");
        assert!(matches!(denied, Outcome::Unauthorized { .. }));

        let broken = HttpResponse::new(StatusCode::BAD_GATEWAY, "u", "")
            .outcome()
            .expect("classified");
        let err = broken.into_result().unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::BAD_GATEWAY));
    }

    #[test]
    fn test_json_raises_on_error_status() {
        let err = HttpResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "u", "{}")
            .json()
            .unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn test_authorization_scheme() {
        assert_eq!(authorization_value("abc"), "Token abc");
        assert_eq!(authorization_value("Token abc"), "Token abc");
        assert_eq!(authorization_value("Bearer xyz"), "Bearer xyz");
    }

    #[test]
    fn test_url_for_merges_params() {
        let config = ClientConfig::default();
        let transport = HttpTransport::new(&config).expect("transport");
        let url = transport
            .url_for(
                "/api/events/demo/talks/",
                &QueryParams::new().with("limit", "10"),
            )
            .expect("url");
        assert_eq!(
            url.as_str(),
            "https://pretalx.com/api/events/demo/talks/?limit=10"
        );

        let bare = transport
            .url_for("/api/events/", &QueryParams::new())
            .expect("url");
        assert_eq!(bare.as_str(), "https://pretalx.com/api/events/");
    }
}
