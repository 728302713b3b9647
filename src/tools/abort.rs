use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AbortRequest {
    /// Bot name the task was started with.
    pub bot: String,
    /// Task ID passed to `ask_bot`.
    pub task_id: String,
}
