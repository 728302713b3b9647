use rmcp::model::{CallToolResult, Content};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Answered,
    NoAnswer,
    Failed,
}

/// Envelope every bridge tool answers with, serialized as one JSON text block.
#[derive(Debug, Serialize)]
pub struct ToolResponse {
    pub status: ReplyStatus,
    pub content: String,
    pub metadata: ToolMetadata,
}

#[derive(Debug, Default, Serialize)]
pub struct ToolMetadata {
    pub tool_name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub elapsed_ms: u64,
}

impl ToolResponse {
    pub fn answered(content: String, metadata: ToolMetadata) -> Self {
        Self {
            status: ReplyStatus::Answered,
            content,
            metadata,
        }
    }

    pub fn no_answer(metadata: ToolMetadata) -> Self {
        Self {
            status: ReplyStatus::NoAnswer,
            content: "the bot produced no response".to_string(),
            metadata,
        }
    }

    pub fn failed(message: String, metadata: ToolMetadata) -> Self {
        Self {
            status: ReplyStatus::Failed,
            content: message,
            metadata,
        }
    }

    /// Bridge failures travel inside the payload; the MCP call itself succeeds.
    pub fn into_call_tool_result(self) -> CallToolResult {
        let text = serde_json::to_string(&self).unwrap_or_else(|e| {
            serde_json::json!({ "status": "failed", "content": format!("serialization failed: {e}") })
                .to_string()
        });
        CallToolResult::success(vec![Content::text(text)])
    }
}
