use serde_json::Value;

use crate::parsers::{ChunkOutcome, ChunkParser};

pub const DEFAULT_OUTPUT_KEY: &str = "message";

/// Parses webhook-automation chunks: each chunk is a JSON object and the reply
/// text sits under a configurable key. There is no end/error framing; the
/// stream ends when the transport closes.
pub struct AutomationParser {
    output_key: String,
}

impl AutomationParser {
    pub fn new(output_key: Option<&str>) -> Self {
        let output_key = output_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .unwrap_or(DEFAULT_OUTPUT_KEY)
            .to_string();
        Self { output_key }
    }

    pub fn output_key(&self) -> &str {
        &self.output_key
    }
}

impl ChunkParser for AutomationParser {
    fn parse(&self, chunk: &Value) -> ChunkOutcome {
        match chunk.get(&self.output_key) {
            Some(Value::String(text)) => ChunkOutcome::Message(text.clone()),
            Some(Value::Null) | None => ChunkOutcome::Ignore,
            Some(other) => ChunkOutcome::Message(other.to_string()),
        }
    }
}
