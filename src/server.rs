use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Implementation, ServerCapabilities, ServerInfo};
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};

use crate::bots::registry::BotRegistry;
use crate::bots::{Bot, BotRequest};
use crate::config::BridgeConfig;
use crate::dispatch::BotDescriptor;
use crate::dispatch::adapter::BotReply;
use crate::dispatch::factory::RequestFactory;
use crate::dispatch::stream::StreamEvent;
use crate::error::BridgeError;
use crate::response::{ToolMetadata, ToolResponse};
use crate::tools::abort::AbortRequest;
use crate::tools::ask::AskRequest;
use crate::tools::listbots::{BotInfo, ListBotsResponse};

#[derive(Clone)]
pub struct BridgeServer {
    registry: Arc<BotRegistry>,
    bots: Arc<HashMap<String, BotDescriptor>>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl BridgeServer {
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        let factory = Arc::new(RequestFactory::new(&config)?);
        let registry = Arc::new(BotRegistry::with_defaults(factory)?);

        let mut bots = HashMap::new();
        for bot in config.bots {
            let key = if bot.name.trim().is_empty() {
                bot.id.clone()
            } else {
                bot.name.clone()
            };
            if bots.insert(key.clone(), bot).is_some() {
                tracing::warn!(bot = %key, "duplicate bot name, keeping the last one");
            }
        }

        Ok(Self {
            registry,
            bots: Arc::new(bots),
            tool_router: Self::tool_router(),
        })
    }

    fn resolve(&self, name: &str) -> Result<(BotDescriptor, Arc<dyn Bot>), McpError> {
        let descriptor = self
            .bots
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::invalid_params(format!("bot not found: {name}"), None))?;
        let bot = self.registry.lookup(&descriptor.bot_type).ok_or_else(|| {
            McpError::invalid_params(
                format!("bot {name} has unknown bot type: {}", descriptor.bot_type),
                None,
            )
        })?;
        Ok((descriptor, bot))
    }

    #[tool(
        name = "ask_bot",
        description = "Send a message to a configured bot and wait for its reply. Use `listbots` for bot names. Pass `task_id` to make the call cancellable with `abort_task`. `stream` reads the backend's streamed reply and returns the joined text."
    )]
    pub async fn ask_bot(
        &self,
        Parameters(req): Parameters<AskRequest>,
    ) -> Result<CallToolResult, McpError> {
        if req.message.trim().is_empty() {
            return Err(McpError::invalid_params("message must not be empty", None));
        }
        let (descriptor, bot) = self.resolve(&req.bot)?;
        let start = Instant::now();

        let bot_req = BotRequest {
            bot: descriptor.clone(),
            settings: req.settings(),
            message: req.message,
            project_uid: req.project_uid,
            session_id: req.session_id,
            tweaks: None,
            rest_data: req.rest_data,
            file_path: None,
            is_title: req.is_title.unwrap_or(false),
            stream: req.stream.unwrap_or(false),
        };

        let result = match req.task_id.as_deref() {
            Some(task_id) => bot.run_abortable(bot_req, task_id).await,
            None => bot.run(bot_req).await,
        };

        let metadata = ToolMetadata {
            tool_name: "ask_bot",
            bot: Some(req.bot.clone()),
            platform: Some(descriptor.platform().as_str().to_string()),
            task_id: req.task_id.clone(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        };

        let response = match result {
            Ok(Some(reply)) => match reply_text(reply).await {
                Ok(Some(text)) => ToolResponse::answered(text, metadata),
                Ok(None) => ToolResponse::no_answer(metadata),
                Err(message) => ToolResponse::failed(message, metadata),
            },
            Ok(None) => ToolResponse::no_answer(metadata),
            Err(e) => {
                tracing::warn!(bot = %req.bot, "ask_bot failed: {e}");
                ToolResponse::failed(e.user_message(), metadata)
            }
        };

        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "abort_task",
        description = "Cancel an in-flight `ask_bot` call started with the given task_id. Unknown or finished tasks are ignored."
    )]
    async fn abort_task(
        &self,
        Parameters(req): Parameters<AbortRequest>,
    ) -> Result<CallToolResult, McpError> {
        let (descriptor, bot) = self.resolve(&req.bot)?;
        let was_running = !bot.is_aborted(&req.task_id);
        bot.abort(&req.task_id);

        let content = if was_running {
            format!("task {} aborted", req.task_id)
        } else {
            format!("task {} was not running", req.task_id)
        };
        let response = ToolResponse::answered(
            content,
            ToolMetadata {
                tool_name: "abort_task",
                bot: Some(req.bot),
                platform: Some(descriptor.platform().as_str().to_string()),
                task_id: Some(req.task_id),
                elapsed_ms: 0,
            },
        );
        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "listbots",
        description = "List configured bots with their type, platform, running mode and availability.",
        annotations(read_only_hint = true)
    )]
    async fn listbots(&self) -> Result<CallToolResult, McpError> {
        let start = Instant::now();
        let mut names: Vec<&String> = self.bots.keys().collect();
        names.sort();

        let mut bots = Vec::with_capacity(names.len());
        for name in names {
            let descriptor = &self.bots[name];
            let available = match self.registry.lookup(&descriptor.bot_type) {
                Some(bot) => bot.is_available(descriptor).await,
                None => false,
            };
            bots.push(BotInfo::new(descriptor, available));
        }

        let response = ToolResponse::answered(
            ListBotsResponse { bots }.to_markdown(),
            ToolMetadata {
                tool_name: "listbots",
                elapsed_ms: start.elapsed().as_millis() as u64,
                ..Default::default()
            },
        );
        Ok(response.into_call_tool_result())
    }
}

/// Flatten a reply into text. Streams are drained and their messages joined;
/// a stream error becomes `Err` with its sanitized message.
async fn reply_text(reply: BotReply) -> Result<Option<String>, String> {
    let stream = match reply {
        BotReply::Text(text) => return Ok(Some(text)),
        BotReply::Stream(stream) => stream,
    };

    let mut events = stream.into_events();
    let mut text = String::new();
    while let Some(event) = events.recv().await {
        match event {
            StreamEvent::Message(chunk) => text.push_str(&chunk),
            StreamEvent::End => break,
            StreamEvent::Error(e) => return Err(e),
        }
    }
    Ok(Some(text).filter(|t| !t.is_empty()))
}

#[tool_handler]
impl ServerHandler for BridgeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "botbridge".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "botbridge: relays messages to configured project bots.\n\n\
                 1. Call `listbots` for bot names and availability.\n\
                 2. Call `ask_bot` with a bot name, project and message.\n\
                 3. Pass `task_id` to `ask_bot` if you may need `abort_task` later."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
