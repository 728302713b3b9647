use reqwest::Url;
use serde_json::{Value, json};

use crate::dispatch::adapter::{
    AdapterContext, UploadFile, flow_message_text, join_url, with_stream_flag,
};
use crate::dispatch::{
    AdapterSettings, BotDescriptor, FormPart, RequestBody, RequestData, RequestModel, RunningMode,
};

/// Adapter for a self-hosted flow engine, reached either through the bot's own
/// endpoint or by running its flow definition on the shared flows service.
pub struct GenericFlowAdapter {
    descriptor: BotDescriptor,
    base_url: String,
    settings: AdapterSettings,
    ctx: AdapterContext,
}

impl GenericFlowAdapter {
    /// Per-assignment settings win; the descriptor's value fills in the output
    /// key when the assignment does not set one.
    pub fn new(
        descriptor: BotDescriptor,
        base_url: String,
        mut settings: AdapterSettings,
        ctx: AdapterContext,
    ) -> Self {
        if settings.output_key.is_none() {
            settings.output_key = descriptor
                .value_object()
                .and_then(|v| v.get("output_key").and_then(Value::as_str).map(str::to_string));
        }
        Self {
            descriptor,
            base_url,
            settings,
            ctx,
        }
    }

    pub fn descriptor(&self) -> &BotDescriptor {
        &self.descriptor
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn settings(&self) -> &AdapterSettings {
        &self.settings
    }

    pub(crate) fn context(&self) -> &AdapterContext {
        &self.ctx
    }

    fn uses_flow_definition(&self) -> bool {
        self.descriptor.running_mode() == RunningMode::FlowDefinition
    }

    pub(crate) fn create_request_data(
        &self,
        model: &RequestModel,
        headers: Vec<(String, String)>,
        use_stream: bool,
    ) -> Option<RequestData> {
        let mut body = json!({
            "input_value": model.message,
            "input_type": model.input_type,
            "output_type": model.output_type,
            "session_id": model.session_id,
        });
        if let Some(tweaks) = &model.tweaks {
            body["tweaks"] = Value::Object(tweaks.clone());
        }
        if let Some(rest_data) = &model.rest_data {
            body["rest_data"] = rest_data.clone();
        }

        let target = if self.uses_flow_definition() {
            let flow_id = self.descriptor.id.trim();
            if flow_id.is_empty() {
                tracing::warn!(bot = %self.descriptor.name, "flow definition bot has no flow id");
                return None;
            }
            let Some(flow) = self.descriptor.value_object() else {
                tracing::warn!(bot = %self.descriptor.name, "flow definition is not a JSON object");
                return None;
            };
            body["flow"] = Value::Object(flow);
            join_url(&self.base_url, &format!("api/v1/run/{flow_id}"))
        } else {
            if self.base_url.trim().is_empty() {
                tracing::warn!(bot = %self.descriptor.name, "endpoint bot has no URL");
                return None;
            }
            self.base_url.trim().to_string()
        };

        Some(RequestData {
            url: with_stream_flag(&target, use_stream)?,
            headers,
            body: RequestBody::Json(body),
            settings: self.settings.clone(),
        })
    }

    /// Read the configured output key, or the flow-engine result shape when
    /// no key is configured.
    pub(crate) fn convert_response(&self, body: &[u8]) -> Option<String> {
        let value: Value = serde_json::from_slice(body).ok()?;
        match self.settings.output_key.as_deref() {
            Some(key) => match value.get(key)? {
                Value::String(text) => Some(text.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            },
            None => flow_message_text(&value),
        }
    }

    pub(crate) async fn is_available(&self) -> bool {
        if self.uses_flow_definition() {
            return self
                .ctx
                .transport
                .check_health(&join_url(&self.base_url, "health"), &[])
                .await;
        }
        Url::parse(self.base_url.trim()).is_ok()
    }

    pub(crate) fn create_upload_data(
        &self,
        file: &UploadFile,
        headers: Vec<(String, String)>,
    ) -> Option<RequestData> {
        let origin = if self.uses_flow_definition() {
            self.base_url.clone()
        } else {
            let url = Url::parse(self.base_url.trim()).ok()?;
            url.origin().ascii_serialization()
        };

        Some(RequestData {
            url: join_url(&origin, "api/v2/files"),
            headers,
            body: RequestBody::Multipart(vec![FormPart::File {
                name: "file".to_string(),
                file_name: file.file_name.clone(),
                content_type: file.content_type.clone(),
                bytes: file.bytes.clone(),
            }]),
            settings: self.settings.clone(),
        })
    }
}
