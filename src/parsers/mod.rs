pub mod automation;
pub mod flow_engine;

use serde_json::Value;

use crate::dispatch::{AdapterSettings, BotPlatform};
use crate::error::BridgeError;
use crate::parsers::automation::AutomationParser;
use crate::parsers::flow_engine::FlowEngineParser;

/// Classification of one framed stream chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Message(String),
    End,
    Error(String),
    Ignore,
}

/// Trait for turning a backend's stream chunks into message/end/error events.
/// Each backend family frames its stream differently.
pub trait ChunkParser: Send + Sync {
    fn parse(&self, chunk: &Value) -> ChunkOutcome;
}

/// Resolve the chunk parser for a platform.
/// Returns an error for unsupported platforms instead of silently falling back.
pub fn parser_for(
    platform: &BotPlatform,
    settings: &AdapterSettings,
) -> Result<Box<dyn ChunkParser>, BridgeError> {
    match platform {
        BotPlatform::Default | BotPlatform::ExternalFlowEngine => Ok(Box::new(FlowEngineParser)),
        BotPlatform::GenericAutomation => Ok(Box::new(AutomationParser::new(
            settings.output_key.as_deref(),
        ))),
        BotPlatform::Unsupported(raw) => Err(BridgeError::UnsupportedPlatform(raw.clone())),
    }
}
