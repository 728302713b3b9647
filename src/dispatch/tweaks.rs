//! Runtime variable injection for the default flow backend.
//!
//! The default backend runs prebuilt flows parameterized by a "tweaks" map.
//! Before each call the bot's configured agent is placed under the right
//! component key, system prompts are rewritten into a dedicated prompt
//! component, and API allow-lists move onto the calling-context component.

use serde_json::{Map, Value, json};

use crate::error::BridgeError;

/// Agents served by a local model server get their own component key.
pub const LOCAL_MODEL_AGENTS: [&str; 2] = ["Ollama", "LMStudio"];

pub const AGENT_KEY: &str = "Agent";
pub const PROMPT_KEY: &str = "Prompt";
pub const CALLING_CONTEXT_KEY: &str = "CallingContext";

/// Base URL value meaning "use the configured local model server".
pub const DEFAULT_URL_SENTINEL: &str = "default";

pub const TITLE_PROMPT: &str = "Generate a concise title (at most 8 words) that summarizes the user's message. \
Reply with the title only: no quotes, no punctuation at the end, no explanation.";

/// Everything injection needs besides the tweaks themselves.
pub struct InjectionContext<'a> {
    /// The bot's opaque configuration value (JSON string).
    pub config_value: &'a str,
    pub is_title: bool,
    /// Custom prompt configured for the project or bot, if any.
    pub custom_prompt: Option<&'a str>,
    pub local_model_url: &'a str,
    /// Caller identity, server base URL and rest data for the flow.
    pub calling_context: Map<String, Value>,
}

/// A place in the tweaks map that may carry `system_prompt` / `api_names`.
#[derive(Debug, Clone, Copy)]
enum Container {
    TopLevel,
    Named(&'static str),
}

/// Fixed order in which containers are inspected.
const CANDIDATES: [Container; 4] = [
    Container::TopLevel,
    Container::Named(AGENT_KEY),
    Container::Named(LOCAL_MODEL_AGENTS[0]),
    Container::Named(LOCAL_MODEL_AGENTS[1]),
];

/// Inject runtime variables into `tweaks`.
///
/// The calling-context component is always set. Agent configuration errors
/// are logged and leave the agent-related tweaks out; steps already applied
/// when an error occurs are kept.
pub fn inject_variables(
    mut tweaks: Map<String, Value>,
    ctx: &InjectionContext<'_>,
) -> Map<String, Value> {
    tweaks.insert(
        CALLING_CONTEXT_KEY.to_string(),
        Value::Object(ctx.calling_context.clone()),
    );

    if let Err(e) = apply_agent_tweaks(&mut tweaks, ctx) {
        tracing::warn!("skipping agent tweaks: {e}");
    }
    tweaks
}

fn apply_agent_tweaks(
    tweaks: &mut Map<String, Value>,
    ctx: &InjectionContext<'_>,
) -> Result<(), BridgeError> {
    let mut config = match serde_json::from_str::<Value>(ctx.config_value) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return Err(BridgeError::Config("bot value is not a JSON object".into())),
        Err(e) => return Err(BridgeError::Config(format!("bot value is not valid JSON: {e}"))),
    };

    let agent = match config.remove("agent_llm") {
        Some(Value::String(agent)) if !agent.trim().is_empty() => agent,
        _ => return Err(BridgeError::Config("bot value has no agent_llm".into())),
    };

    match LOCAL_MODEL_AGENTS.iter().find(|local| **local == agent) {
        Some(local) => {
            tweaks.insert(local.to_string(), Value::Object(config));
        }
        None => {
            config.insert("agent_llm".to_string(), Value::String(agent));
            tweaks.insert(AGENT_KEY.to_string(), Value::Object(config));
        }
    }

    tweaks.remove("base_url");

    for local in LOCAL_MODEL_AGENTS {
        if let Some(Value::Object(local_tweaks)) = tweaks.get_mut(local)
            && local_tweaks.get("base_url").and_then(Value::as_str) == Some(DEFAULT_URL_SENTINEL)
        {
            local_tweaks.insert(
                "base_url".to_string(),
                Value::String(ctx.local_model_url.to_string()),
            );
        }
    }

    for container in CANDIDATES {
        if let Some(original) = take_field(tweaks, container, "system_prompt") {
            let prompt = resolve_prompt(original, ctx);
            tweaks.insert(PROMPT_KEY.to_string(), json!({ "prompt": prompt }));
        }
    }

    for container in CANDIDATES {
        if let Some(api_names) = take_field(tweaks, container, "api_names")
            && let Some(Value::Object(calling)) = tweaks.get_mut(CALLING_CONTEXT_KEY)
        {
            calling.insert("api_names".to_string(), api_names);
        }
    }

    Ok(())
}

fn resolve_prompt(original: Value, ctx: &InjectionContext<'_>) -> Value {
    if ctx.is_title {
        return Value::String(TITLE_PROMPT.to_string());
    }
    match ctx.custom_prompt.filter(|p| !p.trim().is_empty()) {
        Some(custom) => Value::String(custom.to_string()),
        None => original,
    }
}

fn take_field(tweaks: &mut Map<String, Value>, container: Container, field: &str) -> Option<Value> {
    match container {
        Container::TopLevel => tweaks.remove(field),
        Container::Named(key) => match tweaks.get_mut(key) {
            Some(Value::Object(inner)) => inner.remove(field),
            _ => None,
        },
    }
}
