pub mod chat;
pub mod registry;
pub mod tasks;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::dispatch::adapter::{BotReply, UploadFile};
use crate::dispatch::{AdapterSettings, BotDescriptor, SafeEnum};
use crate::error::BridgeError;

/// Internal bot kinds. Unknown strings coerce to `Unknown`, which is never
/// registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BotType {
    ProjectChat,
    EditorChat,
    Unknown,
}

impl BotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectChat => "project_chat",
            Self::EditorChat => "editor_chat",
            Self::Unknown => "unknown",
        }
    }
}

impl SafeEnum for BotType {
    fn parse_known(raw: &str) -> Option<Self> {
        match raw {
            "project_chat" => Some(Self::ProjectChat),
            "editor_chat" => Some(Self::EditorChat),
            _ => None,
        }
    }

    fn fallback(_raw: &str) -> Self {
        Self::Unknown
    }
}

/// A user-facing bot call, before it is shaped into a `RequestModel`.
#[derive(Debug, Clone, Default)]
pub struct BotRequest {
    pub bot: BotDescriptor,
    pub settings: Option<AdapterSettings>,
    pub message: String,
    pub project_uid: String,
    pub session_id: Option<String>,
    pub tweaks: Option<Map<String, Value>>,
    pub rest_data: Option<Value>,
    pub file_path: Option<String>,
    pub is_title: bool,
    /// Ask for a stream. Ignored for title requests.
    pub stream: bool,
}

/// Entry point for one bot kind.
#[async_trait]
pub trait Bot: Send + Sync {
    /// Human-readable name used in logs and registration errors.
    fn name(&self) -> &str;

    /// Implementations must declare their kind to be registered.
    fn bot_type(&self) -> Option<BotType> {
        None
    }

    async fn run(&self, req: BotRequest) -> Result<Option<BotReply>, BridgeError>;

    /// Like `run`, but cancellable through `abort(task_id)` until it completes.
    async fn run_abortable(
        &self,
        req: BotRequest,
        task_id: &str,
    ) -> Result<Option<BotReply>, BridgeError>;

    fn abort(&self, task_id: &str);

    fn is_aborted(&self, task_id: &str) -> bool;

    async fn is_available(&self, bot: &BotDescriptor) -> bool;

    async fn upload_file(&self, bot: &BotDescriptor, file: UploadFile) -> Option<String>;
}
