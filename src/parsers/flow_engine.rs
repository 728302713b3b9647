use serde_json::Value;

use crate::parsers::{ChunkOutcome, ChunkParser};

/// Parses flow-engine event chunks.
/// Expected shape: `{"event": "token" | "add_message" | "error" | "end", "data": {...}}`
pub struct FlowEngineParser;

impl ChunkParser for FlowEngineParser {
    fn parse(&self, chunk: &Value) -> ChunkOutcome {
        let data = &chunk["data"];
        match chunk["event"].as_str() {
            Some("add_message") => {
                // The engine echoes the user's own input back as a message.
                let from_user = data["sender"]
                    .as_str()
                    .is_some_and(|s| s.eq_ignore_ascii_case("user"));
                if from_user {
                    return ChunkOutcome::Ignore;
                }
                match data["text"].as_str() {
                    Some(text) if !text.is_empty() => ChunkOutcome::Message(text.to_string()),
                    _ => ChunkOutcome::Ignore,
                }
            }
            Some("token") => match data["chunk"].as_str() {
                Some(token) if !token.is_empty() => ChunkOutcome::Message(token.to_string()),
                _ => ChunkOutcome::Ignore,
            },
            Some("error") => {
                let message = data["error"]
                    .as_str()
                    .or_else(|| data["text"].as_str())
                    .or_else(|| data.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| data.to_string());
                ChunkOutcome::Error(message)
            }
            Some("end") => ChunkOutcome::End,
            _ => ChunkOutcome::Ignore,
        }
    }
}
