use std::time::{Duration, Instant};

use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use crate::dispatch::{FormPart, RequestBody, RequestData};
use crate::error::BridgeError;

pub const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024; // 2MB

/// Health checks should never hold a caller for long.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared HTTP client for every adapter. One attempt per call; retrying is
/// the adapter's job.
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, BridgeError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| BridgeError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn prepare(&self, data: &RequestData) -> Result<RequestBuilder, BridgeError> {
        let mut builder = self.client.post(&data.url);
        for (k, v) in &data.headers {
            builder = builder.header(k, v);
        }

        let builder = match &data.body {
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(parts) => builder.multipart(build_form(parts)?),
        };
        Ok(builder)
    }

    /// POST once with the per-attempt timeout. Anything but 200 is a failure.
    pub async fn post(&self, data: &RequestData, platform: &str) -> Result<Vec<u8>, BridgeError> {
        let start = Instant::now();
        let response = self
            .prepare(data)?
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| map_send_error(e, start))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(BridgeError::Upstream {
                platform: platform.to_string(),
                status: status.as_u16(),
            });
        }

        // Reject oversized bodies up front when the server announces them.
        if response
            .content_length()
            .is_some_and(|len| len as usize > MAX_RESPONSE_BYTES)
        {
            return Err(BridgeError::SchemaParse("response too large".to_string()));
        }

        let bytes = response.bytes().await.map_err(|e| map_send_error(e, start))?;
        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(BridgeError::SchemaParse(format!(
                "response too large: {} bytes (max {MAX_RESPONSE_BYTES})",
                bytes.len()
            )));
        }

        Ok(bytes.to_vec())
    }

    /// Open a streaming response. No overall timeout: the body may legitimately
    /// stay open for as long as the backend keeps producing chunks.
    pub async fn open_stream(
        &self,
        data: &RequestData,
        platform: &str,
    ) -> Result<Response, BridgeError> {
        let start = Instant::now();
        let response = self
            .prepare(data)?
            .send()
            .await
            .map_err(|e| map_send_error(e, start))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(BridgeError::Upstream {
                platform: platform.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// GET the URL and report whether it answered 200.
    pub async fn check_health(&self, url: &str, headers: &[(String, String)]) -> bool {
        let mut builder = self.client.get(url).timeout(PROBE_TIMEOUT);
        for (k, v) in headers {
            builder = builder.header(k, v);
        }
        match builder.send().await {
            Ok(resp) => resp.status() == StatusCode::OK,
            Err(e) => {
                tracing::debug!("health check failed: {e}");
                false
            }
        }
    }
}

fn map_send_error(e: reqwest::Error, start: Instant) -> BridgeError {
    if e.is_timeout() {
        BridgeError::Timeout(start.elapsed().as_millis() as u64)
    } else {
        BridgeError::Request(e)
    }
}

fn build_form(parts: &[FormPart]) -> Result<Form, BridgeError> {
    let mut form = Form::new();
    for part in parts {
        form = match part {
            FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
            FormPart::File {
                name,
                file_name,
                content_type,
                bytes,
            } => {
                let mut file = Part::bytes(bytes.clone()).file_name(file_name.clone());
                if let Some(mime) = content_type {
                    file = file
                        .mime_str(mime)
                        .map_err(|e| BridgeError::Other(format!("invalid content type: {e}")))?;
                }
                form.part(name.clone(), file)
            }
        };
    }
    Ok(form)
}
