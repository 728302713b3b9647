use schemars::JsonSchema;
use serde::Deserialize;

use crate::dispatch::AdapterSettings;

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct AskRequest {
    /// Bot name from `listbots` output. Use exact names.
    pub bot: String,
    /// The message to send to the bot.
    pub message: String,
    /// Project the conversation belongs to.
    pub project_uid: String,
    /// Conversation session. Defaults to one session per bot type and project.
    pub session_id: Option<String>,
    /// Caller-chosen ID. When set, the call can be cancelled with `abort_task`.
    pub task_id: Option<String>,
    /// Ask for a short title for the message instead of an answer.
    pub is_title: Option<bool>,
    /// Opaque data handed to the flow as part of its calling context.
    pub rest_data: Option<serde_json::Value>,
    /// Read the reply as a stream from the backend. The streamed text is
    /// joined before it is returned. Ignored for title requests.
    pub stream: Option<bool>,
    /// Custom system prompt for this project or assignment.
    pub prompt: Option<String>,
    /// JSON key holding the reply in the backend's response.
    pub output_key: Option<String>,
}

impl AskRequest {
    /// Per-assignment overrides, if the caller set any.
    pub fn settings(&self) -> Option<AdapterSettings> {
        let prompt = self.prompt.clone().filter(|p| !p.trim().is_empty());
        let output_key = self.output_key.clone().filter(|k| !k.trim().is_empty());
        if prompt.is_none() && output_key.is_none() {
            return None;
        }
        Some(AdapterSettings { prompt, output_key })
    }
}
