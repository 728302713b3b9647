use std::sync::Arc;

use reqwest::Url;
use serde_json::Value;

use crate::config::BridgeConfig;
use crate::dispatch::abort::{AbortController, TaskGuard, cancelled};
use crate::dispatch::default_flow::DefaultAdapter;
use crate::dispatch::generic_flow::GenericFlowAdapter;
use crate::dispatch::http::HttpTransport;
use crate::dispatch::stream::StreamResponse;
use crate::dispatch::{AdapterSettings, BotDescriptor, BotPlatform, RequestData, RequestModel};
use crate::error::BridgeError;
use crate::parsers::parser_for;

/// Shared pieces every adapter needs. Cheap to clone.
#[derive(Clone)]
pub struct AdapterContext {
    pub transport: Arc<HttpTransport>,
    /// Retries after the first attempt.
    pub max_trials: u32,
    pub local_model_url: String,
    pub public_api_url: String,
}

impl AdapterContext {
    pub fn from_config(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let transport = HttpTransport::new(config.request_timeout)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: &BridgeConfig, transport: Arc<HttpTransport>) -> Self {
        Self {
            transport,
            max_trials: config.max_trials,
            local_model_url: config.local_model_url.clone(),
            public_api_url: config.public_api_url.clone(),
        }
    }
}

/// What a bot call produced.
pub enum BotReply {
    Text(String),
    Stream(StreamResponse),
}

impl std::fmt::Debug for BotReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Stream(stream) => f.debug_tuple("Stream").field(&stream.state()).finish(),
        }
    }
}

pub struct ExecuteRequest {
    pub model: RequestModel,
    /// Present on the abortable path.
    pub controller: Option<Arc<AbortController>>,
    pub use_stream: bool,
}

/// Uploaded file handed to a backend.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// One adapter per backend family. Closed set: adding a backend means adding
/// a variant and satisfying every match below.
pub enum RequestAdapter {
    Default(DefaultAdapter),
    GenericFlow(GenericFlowAdapter),
}

impl RequestAdapter {
    pub fn descriptor(&self) -> &BotDescriptor {
        match self {
            Self::Default(a) => a.descriptor(),
            Self::GenericFlow(a) => a.descriptor(),
        }
    }

    pub fn base_url(&self) -> &str {
        match self {
            Self::Default(a) => a.base_url(),
            Self::GenericFlow(a) => a.base_url(),
        }
    }

    pub fn settings(&self) -> &AdapterSettings {
        match self {
            Self::Default(a) => a.settings(),
            Self::GenericFlow(a) => a.settings(),
        }
    }

    fn context(&self) -> &AdapterContext {
        match self {
            Self::Default(a) => a.context(),
            Self::GenericFlow(a) => a.context(),
        }
    }

    fn create_request_data(
        &self,
        model: &RequestModel,
        headers: Vec<(String, String)>,
        use_stream: bool,
    ) -> Option<RequestData> {
        match self {
            Self::Default(a) => a.create_request_data(model, headers, use_stream),
            Self::GenericFlow(a) => a.create_request_data(model, headers, use_stream),
        }
    }

    fn convert_response(&self, body: &[u8]) -> Option<String> {
        match self {
            Self::Default(a) => a.convert_response(body),
            Self::GenericFlow(a) => a.convert_response(body),
        }
    }

    fn create_stream_response(
        &self,
        data: RequestData,
        guard: TaskGuard,
    ) -> Result<StreamResponse, BridgeError> {
        let platform = self.descriptor().platform();
        let parser = parser_for(&platform, &data.settings)?;
        Ok(StreamResponse::new(
            self.context().transport.clone(),
            data,
            parser,
            platform.as_str().to_string(),
            self.context().max_trials,
            guard,
        ))
    }

    pub async fn is_available(&self) -> bool {
        match self {
            Self::Default(a) => a.is_available().await,
            Self::GenericFlow(a) => a.is_available().await,
        }
    }

    pub async fn upload(&self, file: &UploadFile) -> Option<String> {
        let headers = match auth_headers(&self.descriptor().platform(), &self.descriptor().credential) {
            Ok(headers) => headers,
            Err(e) => {
                tracing::warn!(bot = %self.descriptor().name, "upload skipped: {e}");
                return None;
            }
        };
        let data = match self {
            Self::Default(a) => a.create_upload_data(file, headers)?,
            Self::GenericFlow(a) => a.create_upload_data(file, headers)?,
        };

        let platform = self.descriptor().platform();
        let body = match self.context().transport.post(&data, platform.as_str()).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(bot = %self.descriptor().name, "upload failed: {e}");
                return None;
            }
        };

        let key = match self {
            Self::Default(_) => "file_path",
            Self::GenericFlow(_) => "path",
        };
        let value: Value = serde_json::from_slice(&body).ok()?;
        value[key].as_str().map(str::to_string)
    }

    /// Run one bot call.
    ///
    /// Returns `Err` only for an unsupported platform. Every other failure is
    /// logged and reported as `Ok(None)`. The controller's cleanup runs exactly
    /// once: here for single-shot calls, in the stream for streaming ones.
    pub async fn execute(&self, req: ExecuteRequest) -> Result<Option<BotReply>, BridgeError> {
        let guard = TaskGuard::new(req.controller);
        let descriptor = self.descriptor();

        let headers = auth_headers(&descriptor.platform(), &descriptor.credential)?;

        let Some(data) = self.create_request_data(&req.model, headers, req.use_stream) else {
            tracing::warn!(bot = %descriptor.name, "adapter declined request, bot unavailable");
            return Ok(None);
        };

        if req.use_stream {
            let stream = self.create_stream_response(data, guard)?;
            return Ok(Some(BotReply::Stream(stream)));
        }

        let text = self.request(&data, &guard).await;
        Ok(text.map(BotReply::Text))
    }

    /// Non-streaming call with bounded, strictly sequential retries over the
    /// same resolved request.
    async fn request(&self, data: &RequestData, guard: &TaskGuard) -> Option<String> {
        let descriptor = self.descriptor();
        let platform = descriptor.platform();
        let ctx = self.context();
        let token = guard.token();

        for attempt in 0..=ctx.max_trials {
            if token.as_ref().is_some_and(|t| t.is_cancelled()) {
                tracing::debug!(bot = %descriptor.name, "request cancelled before attempt");
                return None;
            }

            let outcome = tokio::select! {
                biased;
                _ = cancelled(token.as_ref()) => {
                    tracing::debug!(bot = %descriptor.name, attempt, "request cancelled in flight");
                    return None;
                }
                outcome = ctx.transport.post(data, platform.as_str()) => outcome,
            };

            match outcome {
                Ok(body) => {
                    let text = self.convert_response(&body);
                    if text.is_none() {
                        tracing::warn!(bot = %descriptor.name, "response has no reply text");
                    }
                    return text;
                }
                Err(e) if e.is_retryable() && attempt < ctx.max_trials => {
                    tracing::warn!(
                        bot = %descriptor.name,
                        platform = platform.as_str(),
                        attempt = attempt + 1,
                        "bot request failed, retrying: {e}"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        bot = %descriptor.name,
                        platform = platform.as_str(),
                        attempts = attempt + 1,
                        "bot request failed: {e}"
                    );
                    return None;
                }
            }
        }
        None
    }
}

/// Auth headers per platform: none for the bundled runner, an API key for the
/// flow engine, an authorization header for webhook automation.
pub fn auth_headers(
    platform: &BotPlatform,
    credential: &str,
) -> Result<Vec<(String, String)>, BridgeError> {
    match platform {
        BotPlatform::Default => Ok(vec![]),
        BotPlatform::ExternalFlowEngine => Ok(vec![("x-api-key".to_string(), credential.to_string())]),
        BotPlatform::GenericAutomation => Ok(vec![(
            "Authorization".to_string(),
            format!("Bearer {credential}"),
        )]),
        BotPlatform::Unsupported(raw) => Err(BridgeError::UnsupportedPlatform(raw.clone())),
    }
}

/// Append the `stream` flag to a URL, keeping any existing query.
pub(crate) fn with_stream_flag(url: &str, use_stream: bool) -> Option<String> {
    let mut url = match Url::parse(url) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(url, "invalid bot URL: {e}");
            return None;
        }
    };
    url.query_pairs_mut()
        .append_pair("stream", if use_stream { "true" } else { "false" });
    Some(url.to_string())
}

/// Reply text in the flow-engine result shape:
/// `outputs[0].outputs[0].results.message.text`
pub(crate) fn flow_message_text(value: &Value) -> Option<String> {
    value["outputs"][0]["outputs"][0]["results"]["message"]["text"]
        .as_str()
        .map(str::to_string)
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
