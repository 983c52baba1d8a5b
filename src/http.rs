//! Blocking HTTP transport shared by the exchange providers.

use std::sync::Mutex;
use std::thread::sleep;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::provider::ProviderError;

const MAX_ERROR_BODY_CHARS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpConfig {
    pub timeout_ms: u64,
    /// Minimum spacing between two requests through one transport.
    pub min_request_interval_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            min_request_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &str, query: &[(&str, String)]) -> Result<HttpResponse, ProviderError>;

    fn post_json(&self, url: &str, body: &serde_json::Value)
        -> Result<HttpResponse, ProviderError>;
}

impl<T: HttpTransport + ?Sized> HttpTransport for std::sync::Arc<T> {
    fn get(&self, url: &str, query: &[(&str, String)]) -> Result<HttpResponse, ProviderError> {
        (**self).get(url, query)
    }

    fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<HttpResponse, ProviderError> {
        (**self).post_json(url, body)
    }
}

pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl ReqwestTransport {
    pub fn new(cfg: &HttpConfig) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|err| ProviderError::Network(format!("HTTP client build error: {err}")))?;
        Ok(Self {
            client,
            min_interval: Duration::from_millis(cfg.min_request_interval_ms),
            last_request: Mutex::new(None),
        })
    }

    /// Blocks until `min_interval` has passed since the previous request.
    fn throttle(&self) {
        let mut last = match self.last_request.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed);
            }
        }
        *last = Some(Instant::now());
    }

    fn send(
        &self,
        url: &str,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<HttpResponse, ProviderError> {
        self.throttle();
        let response = request.send().map_err(|err| transport_error(url, &err))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|err| transport_error(url, &err))?
            .to_vec();
        debug!(
            component = "http",
            event = "http.response",
            url,
            status,
            bytes = body.len()
        );
        Ok(HttpResponse { status, body })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str, query: &[(&str, String)]) -> Result<HttpResponse, ProviderError> {
        let params = query.iter().map(|(k, v)| (*k, v.as_str()));
        let full_url = reqwest::Url::parse_with_params(url, params).map_err(|err| {
            ProviderError::malformed(format!("invalid request url {url}: {err}"))
        })?;
        self.send(url, self.client.get(full_url))
    }

    fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<HttpResponse, ProviderError> {
        let payload = serde_json::to_vec(body)
            .map_err(|err| ProviderError::malformed(format!("request encode: {err}")))?;
        self.send(
            url,
            self.client
                .post(url)
                .header("content-type", "application/json")
                .body(payload),
        )
    }
}

fn transport_error(url: &str, err: &reqwest::Error) -> ProviderError {
    if err.is_decode() {
        ProviderError::malformed(format!("{url}: {err}"))
    } else {
        ProviderError::Network(format!("{url}: {err}"))
    }
}

/// Maps a non-success status to the engine's error taxonomy.
pub fn check_status(url: &str, response: &HttpResponse) -> Result<(), ProviderError> {
    let status = response.status;
    if (200..300).contains(&status) {
        return Ok(());
    }

    let body = truncate(&String::from_utf8_lossy(&response.body), MAX_ERROR_BODY_CHARS);
    Err(match status {
        429 | 418 => ProviderError::RateLimited(format!("{url}: status {status}: {body}")),
        401 | 403 => ProviderError::Authentication(format!("{url}: status {status}: {body}")),
        500..=599 => ProviderError::Network(format!("{url}: status {status}: {body}")),
        _ => ProviderError::HttpStatus {
            url: url.to_string(),
            status,
            body,
        },
    })
}

pub fn decode_json(url: &str, response: &HttpResponse) -> Result<serde_json::Value, ProviderError> {
    check_status(url, response)?;
    serde_json::from_slice(&response.body)
        .map_err(|err| ProviderError::malformed(format!("{url}: {err}")))
}

pub fn json_i64(value: &serde_json::Value, field: &str) -> Result<i64, ProviderError> {
    if let Some(v) = value.as_i64() {
        return Ok(v);
    }
    value
        .as_str()
        .and_then(|text| text.trim().parse().ok())
        .ok_or_else(|| ProviderError::malformed(format!("{field}: expected integer, got {value}")))
}

pub fn json_f64(value: &serde_json::Value, field: &str) -> Result<f64, ProviderError> {
    if let Some(v) = value.as_f64() {
        return Ok(v);
    }
    value
        .as_str()
        .and_then(|text| text.trim().parse().ok())
        .ok_or_else(|| ProviderError::malformed(format!("{field}: expected number, got {value}")))
}

/// Like [`json_f64`] but treats missing, null and empty-string values as absent.
pub fn json_opt_f64(
    value: Option<&serde_json::Value>,
    field: &str,
) -> Result<Option<f64>, ProviderError> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(v) => json_f64(v, field).map(Some),
    }
}

fn truncate(body: &str, max: usize) -> String {
    if body.chars().count() <= max {
        body.to_string()
    } else {
        let mut out: String = body.chars().take(max).collect();
        out.push_str("...");
        out
    }
}
