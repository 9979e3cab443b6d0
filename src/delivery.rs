//! Authenticated push of one reading to the collector.
//!
//! Every push produces exactly one [`DeliveryOutcome`], reported to the status
//! sink. Nothing is retried here: a failed device is simply pushed again with
//! its cached reading on the next cycle.

use crate::config::Settings;
use crate::reading::Reading;
use crate::sink::StatusSink;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Longest slice of a non-JSON error body that is shown in the activity log.
pub const ERROR_BODY_PREVIEW_CHARS: usize = 100;

/// JSON body of a push.
#[derive(Debug, Serialize)]
pub struct CollectorPayload<'a> {
    pub temperature: f64,
    pub humidity: f64,
    pub battery: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<&'a str>,
}

/// Why a payload could not be encoded.
#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("{field} is not a finite number")]
    NonFinite { field: &'static str },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Encode the collector payload for `reading`.
pub fn build_payload(reading: &Reading, hostname: Option<&str>) -> Result<Vec<u8>, PayloadError> {
    // serde_json would silently write NaN/inf as null
    for (field, value) in [
        ("temperature", reading.temperature),
        ("humidity", reading.humidity),
    ] {
        if !value.is_finite() {
            return Err(PayloadError::NonFinite { field });
        }
    }

    let payload = CollectorPayload {
        temperature: reading.temperature,
        humidity: reading.humidity,
        battery: reading.battery,
        hostname,
    };
    Ok(serde_json::to_vec(&payload)?)
}

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// No response was received from the collector.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
}

/// HTTP transport abstraction so pushes can be tested without a network.
pub trait Transport: Send + Sync {
    /// POST a JSON `body` to `url` with a bearer `token`.
    fn post<'a>(
        &'a self,
        url: &'a str,
        token: &'a str,
        body: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>>;
}

/// `reqwest` transport with a hard per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// # Arguments
    /// * `timeout` - Hard limit for one request, connect included
    ///
    /// # Errors
    /// Returns `TransportError::Request` if the client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    fn classify_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

impl Transport for HttpTransport {
    fn post<'a>(
        &'a self,
        url: &'a str,
        token: &'a str,
        body: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let response = self
                .client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .bearer_auth(token)
                .body(body)
                .send()
                .await
                .map_err(|e| self.classify_error(e))?;

            let status = response.status().as_u16();
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(url, status, error = %e, "failed to read response body");
                    String::new()
                }
            };
            Ok(HttpResponse { status, body })
        })
    }
}

/// Result of one push.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// 2xx response.
    Delivered { status: u16 },
    /// Any other HTTP status; `message` is what the activity log shows.
    Rejected { status: u16, message: String },
    /// No response at all.
    TransportFailed(TransportError),
    /// The payload could not be encoded; nothing was sent.
    PayloadFailed(String),
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    /// Classify a completed HTTP exchange.
    pub fn from_response(response: &HttpResponse) -> Self {
        if (200..300).contains(&response.status) {
            DeliveryOutcome::Delivered {
                status: response.status,
            }
        } else {
            DeliveryOutcome::Rejected {
                status: response.status,
                message: error_message(&response.body),
            }
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryOutcome::Delivered { status } => write!(f, "Data sent (HTTP {status})"),
            DeliveryOutcome::Rejected { status, message } => write!(f, "HTTP {status}: {message}"),
            DeliveryOutcome::TransportFailed(e) => write!(f, "Connection error: {e}"),
            DeliveryOutcome::PayloadFailed(e) => write!(f, "Could not encode data: {e}"),
        }
    }
}

/// Human-readable message from an error body.
///
/// A JSON object with a string `message` yields that message; other JSON gets
/// a pointer to the diagnostics log; anything else is shown raw, truncated.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => match value.get("message").and_then(|m| m.as_str()) {
            Some(message) => message.to_string(),
            None => "see log for details".to_string(),
        },
        Err(_) => {
            if body.chars().count() > ERROR_BODY_PREVIEW_CHARS {
                let mut preview: String = body.chars().take(ERROR_BODY_PREVIEW_CHARS).collect();
                preview.push_str("...");
                preview
            } else {
                body.to_string()
            }
        }
    }
}

/// Pushes readings to the collector and reports every outcome.
pub struct DeliveryClient {
    transport: Arc<dyn Transport>,
    settings: Arc<Settings>,
    sink: Arc<dyn StatusSink>,
}

impl DeliveryClient {
    /// Create a client that pushes through `transport`.
    ///
    /// # Arguments
    /// * `transport` - Sends the request; [`HttpTransport`] in production
    /// * `settings` - Endpoint, bearer token and optional hostname tag
    /// * `sink` - Receives the outcome of every push
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: Arc<Settings>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            transport,
            settings,
            sink,
        }
    }

    /// Push one reading for `identity`. Never panics, never retries.
    pub async fn push(&self, identity: &str, reading: &Reading) -> DeliveryOutcome {
        self.sink.append_log(&format!(
            "Sending {identity} (Temp: {:.1}°C, Hum: {:.1}%, Bat: {}mV)",
            reading.temperature, reading.humidity, reading.battery
        ));

        let outcome = match build_payload(reading, self.settings.hostname.as_deref()) {
            Ok(body) => {
                let url = self.settings.device_url(identity);
                match self.transport.post(&url, &self.settings.token, body).await {
                    Ok(response) => {
                        let outcome = DeliveryOutcome::from_response(&response);
                        log_response(identity, &url, &response, &outcome);
                        outcome
                    }
                    Err(e) => {
                        tracing::warn!(identity, url = %url, error = %e, "push failed");
                        DeliveryOutcome::TransportFailed(e)
                    }
                }
            }
            Err(e) => {
                tracing::warn!(identity, error = %e, "failed to encode payload");
                DeliveryOutcome::PayloadFailed(e.to_string())
            }
        };

        self.sink.append_log(&outcome.to_string());
        let verdict = if outcome.is_success() { "OK" } else { "ERROR" };
        self.sink
            .report_status(outcome.is_success(), &format!("{identity}: {verdict}"));
        outcome
    }
}

fn log_response(identity: &str, url: &str, response: &HttpResponse, outcome: &DeliveryOutcome) {
    if outcome.is_success() {
        if !response.body.is_empty() && response.body != "{}" {
            tracing::debug!(identity, status = response.status, body = %response.body, "collector response");
        }
        tracing::info!(identity, status = response.status, "reading delivered");
    } else {
        tracing::warn!(identity, url, status = response.status, body = %response.body, "collector rejected reading");
    }
}
