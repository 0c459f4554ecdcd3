//! reqwest-backed transport with static header injection.
//!
//! Resolves request paths against the configured API base URL, adds the
//! configured `[[headers]]` to every request, and reads the full response
//! body before returning. The Authorization header is never injected from
//! config: it belongs to the credential layer above.

use crate::{RequestSpec, Response, Result, Transport, TransportError};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Header injection rule (name + value pair from config).
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

/// Transport that issues real HTTP calls through a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    headers: Vec<HeaderInjection>,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
            headers: Vec::new(),
        }
    }

    /// Add static headers sent with every request.
    pub fn with_headers(mut self, headers: Vec<HeaderInjection>) -> Self {
        self.headers = headers;
        self
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        request: RequestSpec,
    ) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + '_>> {
        Box::pin(async move {
            let url = join_url(&self.base_url, &request.path);
            let mut headers = request.headers;
            apply_static_headers(&mut headers, &self.headers);

            debug!(method = %request.method, url = %url, "sending request");

            let mut builder = self
                .client
                .request(request.method, &url)
                .headers(headers)
                .timeout(self.timeout);
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await.map_err(map_reqwest_error)?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|e| TransportError::Body(e.to_string()))?;

            Ok(Response {
                status,
                headers,
                body,
            })
        })
    }
}

/// Join the API base URL and a request path with exactly one slash between.
pub fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Insert configured headers, replacing existing values, skipping invalid
/// entries and any attempt to set Authorization.
pub fn apply_static_headers(headers: &mut HeaderMap, injections: &[HeaderInjection]) {
    for injection in injections {
        let name = match HeaderName::from_str(&injection.name) {
            Ok(n) => n,
            Err(e) => {
                warn!(header = %injection.name, error = %e, "skipping invalid header name");
                continue;
            }
        };
        if name == reqwest::header::AUTHORIZATION {
            warn!(header = %injection.name, "refusing to inject authorization header from config");
            continue;
        }
        let value = match HeaderValue::from_str(&injection.value) {
            Ok(v) => v,
            Err(e) => {
                warn!(header = %injection.name, error = %e, "skipping invalid header value");
                continue;
            }
        };
        headers.insert(name, value);
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}
