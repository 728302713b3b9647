use serde_json::{Map, Value, json};

use crate::dispatch::adapter::{
    AdapterContext, UploadFile, flow_message_text, join_url, with_stream_flag,
};
use crate::dispatch::tweaks::{self, InjectionContext};
use crate::dispatch::{
    AdapterSettings, BotDescriptor, FormPart, RequestBody, RequestData, RequestModel, RunningMode,
};

/// Adapter for the bundled flow runner behind the shared default-flows URL.
pub struct DefaultAdapter {
    descriptor: BotDescriptor,
    base_url: String,
    settings: AdapterSettings,
    ctx: AdapterContext,
}

impl DefaultAdapter {
    pub fn new(
        descriptor: BotDescriptor,
        base_url: String,
        settings: AdapterSettings,
        ctx: AdapterContext,
    ) -> Self {
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

    pub(crate) fn create_request_data(
        &self,
        model: &RequestModel,
        headers: Vec<(String, String)>,
        use_stream: bool,
    ) -> Option<RequestData> {
        let bot_id = self.descriptor.id.trim();
        if bot_id.is_empty() {
            tracing::warn!(bot = %self.descriptor.name, "default bot has no flow id");
            return None;
        }

        let url = with_stream_flag(
            &join_url(&self.base_url, &format!("api/v1/run/{bot_id}")),
            use_stream,
        )?;

        let mut tweaks = model.tweaks.clone().unwrap_or_default();
        if let Some(path) = &model.file_path {
            tweaks.insert("ChatInput".to_string(), json!({ "files": [path] }));
        }
        if self.descriptor.running_mode() == RunningMode::Default {
            let ctx = InjectionContext {
                config_value: &self.descriptor.value,
                is_title: model.is_title,
                custom_prompt: self.settings.prompt.as_deref(),
                local_model_url: &self.ctx.local_model_url,
                calling_context: self.calling_context(model),
            };
            tweaks = tweaks::inject_variables(tweaks, &ctx);
        }

        let body = json!({
            "input_value": model.message,
            "input_type": model.input_type,
            "output_type": model.output_type,
            "session_id": model.session_id,
            "tweaks": tweaks,
        });

        Some(RequestData {
            url,
            headers,
            body: RequestBody::Json(body),
            settings: self.settings.clone(),
        })
    }

    fn calling_context(&self, model: &RequestModel) -> Map<String, Value> {
        let mut calling = Map::new();
        calling.insert("base_url".into(), Value::String(self.ctx.public_api_url.clone()));
        calling.insert("bot_uid".into(), Value::String(self.descriptor.id.clone()));
        if let Some(project_uid) = &model.project_uid {
            calling.insert("project_uid".into(), Value::String(project_uid.clone()));
        }
        if let Some(session_id) = &model.session_id {
            calling.insert("session_id".into(), Value::String(session_id.clone()));
        }
        if let Some(rest_data) = &model.rest_data {
            calling.insert("rest_data".into(), rest_data.clone());
        }
        calling
    }

    pub(crate) fn convert_response(&self, body: &[u8]) -> Option<String> {
        let value: Value = serde_json::from_slice(body).ok()?;
        flow_message_text(&value)
    }

    pub(crate) async fn is_available(&self) -> bool {
        self.ctx
            .transport
            .check_health(&join_url(&self.base_url, "health"), &[])
            .await
    }

    pub(crate) fn create_upload_data(
        &self,
        file: &UploadFile,
        headers: Vec<(String, String)>,
    ) -> Option<RequestData> {
        let bot_id = self.descriptor.id.trim();
        if bot_id.is_empty() {
            return None;
        }
        Some(RequestData {
            url: join_url(&self.base_url, &format!("api/v1/files/upload/{bot_id}")),
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
