pub mod abort;
pub mod adapter;
pub mod default_flow;
pub mod factory;
pub mod generic_flow;
pub mod http;
pub mod stream;
pub mod tweaks;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lenient enum parsing for values read from configuration storage.
/// Unknown strings map to a defined fallback instead of failing.
pub trait SafeEnum: Sized {
    fn parse_known(raw: &str) -> Option<Self>;

    fn fallback(raw: &str) -> Self;

    fn coerce(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        Self::parse_known(&normalized).unwrap_or_else(|| Self::fallback(raw))
    }
}

/// Backend family a bot talks to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BotPlatform {
    /// Bundled flow runner reached through the shared default-flows URL.
    Default,
    /// Self-hosted flow engine.
    ExternalFlowEngine,
    /// Webhook-style automation tool.
    GenericAutomation,
    /// Anything the coercion did not recognise. Carries the raw value.
    Unsupported(String),
}

impl BotPlatform {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Default => "default",
            Self::ExternalFlowEngine => "flow_engine",
            Self::GenericAutomation => "automation",
            Self::Unsupported(raw) => raw,
        }
    }
}

impl SafeEnum for BotPlatform {
    fn parse_known(raw: &str) -> Option<Self> {
        match raw {
            "default" => Some(Self::Default),
            "flow_engine" | "external_flow_engine" | "langflow" => Some(Self::ExternalFlowEngine),
            "automation" | "generic_automation" | "n8n" => Some(Self::GenericAutomation),
            _ => None,
        }
    }

    fn fallback(raw: &str) -> Self {
        Self::Unsupported(raw.to_string())
    }
}

/// How a platform is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunningMode {
    Default,
    Endpoint,
    FlowDefinition,
}

impl RunningMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Endpoint => "endpoint",
            Self::FlowDefinition => "flow_definition",
        }
    }
}

impl SafeEnum for RunningMode {
    fn parse_known(raw: &str) -> Option<Self> {
        match raw {
            "default" => Some(Self::Default),
            "endpoint" => Some(Self::Endpoint),
            "flow_definition" | "flow_json" => Some(Self::FlowDefinition),
            _ => None,
        }
    }

    fn fallback(raw: &str) -> Self {
        if !raw.trim().is_empty() {
            tracing::warn!(running_mode = raw, "unknown running mode, using default");
        }
        Self::Default
    }
}

/// A configured bot as stored by the surrounding application. Read-only here;
/// platform and running mode stay raw until an adapter is built. Never
/// serialized: it carries the backend credential.
#[derive(Clone, Default, Deserialize)]
pub struct BotDescriptor {
    /// Flow id on the backend. Also the bot uid handed to the calling context.
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bot_type: String,
    pub platform: String,
    #[serde(default)]
    pub running_mode: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub credential: String,
    /// JSON-encoded backend knobs (agent selection, output key, flow definition).
    #[serde(default)]
    pub value: String,
}

impl BotDescriptor {
    pub fn platform(&self) -> BotPlatform {
        BotPlatform::coerce(&self.platform)
    }

    pub fn running_mode(&self) -> RunningMode {
        RunningMode::coerce(&self.running_mode)
    }

    /// The opaque value parsed as a JSON object, if it is one.
    pub fn value_object(&self) -> Option<Map<String, Value>> {
        match serde_json::from_str(&self.value) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    }
}

impl std::fmt::Debug for BotDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("bot_type", &self.bot_type)
            .field("platform", &self.platform)
            .field("running_mode", &self.running_mode)
            .field("url", &self.url)
            .field("credential", &"[REDACTED]")
            .finish()
    }
}

/// Per-assignment overrides supplied alongside a bot.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AdapterSettings {
    /// Custom system prompt configured for the project or bot.
    pub prompt: Option<String>,
    /// JSON key holding the reply in backend responses.
    pub output_key: Option<String>,
}

/// One bot invocation. Built by a façade, never mutated by adapters.
#[derive(Debug, Clone, Default)]
pub struct RequestModel {
    pub message: String,
    pub project_uid: Option<String>,
    pub session_id: Option<String>,
    pub input_type: String,
    pub output_type: String,
    pub tweaks: Option<Map<String, Value>>,
    pub rest_data: Option<Value>,
    /// Title generation swaps the system prompt for a fixed instruction.
    pub is_title: bool,
    pub file_path: Option<String>,
}

/// Outbound body. Multipart parts are kept as plain data so the same
/// request can be rebuilt for every retry.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(Value),
    Multipart(Vec<FormPart>),
}

#[derive(Debug, Clone)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        content_type: Option<String>,
        bytes: Vec<u8>,
    },
}

/// Fully resolved request, produced by an adapter and consumed by one call.
#[derive(Debug, Clone)]
pub struct RequestData {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub settings: AdapterSettings,
}
