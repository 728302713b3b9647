use std::sync::Arc;

use async_trait::async_trait;

use crate::bots::tasks::AbortableTasks;
use crate::bots::{Bot, BotRequest, BotType};
use crate::dispatch::abort::AbortController;
use crate::dispatch::adapter::{BotReply, ExecuteRequest, UploadFile};
use crate::dispatch::factory::RequestFactory;
use crate::dispatch::{BotDescriptor, RequestModel};
use crate::error::BridgeError;

const CHAT_IO_TYPE: &str = "chat";

/// Chat façade shared by the project and editor chat bots.
pub struct ChatBot {
    kind: BotType,
    factory: Arc<RequestFactory>,
    tasks: AbortableTasks,
}

impl ChatBot {
    pub fn new(kind: BotType, factory: Arc<RequestFactory>) -> Self {
        Self {
            kind,
            factory,
            tasks: AbortableTasks::new(),
        }
    }

    pub fn tasks(&self) -> &AbortableTasks {
        &self.tasks
    }

    fn build_model(&self, req: &BotRequest) -> RequestModel {
        let session_id = req
            .session_id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("{}-{}", self.kind.as_str(), req.project_uid));

        RequestModel {
            message: req.message.clone(),
            project_uid: Some(req.project_uid.clone()),
            session_id: Some(session_id),
            input_type: CHAT_IO_TYPE.to_string(),
            output_type: CHAT_IO_TYPE.to_string(),
            tweaks: req.tweaks.clone(),
            rest_data: req.rest_data.clone(),
            is_title: req.is_title,
            file_path: req.file_path.clone(),
        }
    }

    /// Titles are short and always fetched in one shot.
    fn use_stream(req: &BotRequest) -> bool {
        req.stream && !req.is_title
    }

    async fn dispatch(
        &self,
        req: BotRequest,
        controller: Option<Arc<AbortController>>,
    ) -> Result<Option<BotReply>, BridgeError> {
        let Some(adapter) = self.factory.create_request(&req.bot, req.settings.clone()) else {
            tracing::warn!(
                bot = %req.bot.name,
                bot_type = self.kind.as_str(),
                "bot is unavailable for its platform and running mode"
            );
            if let Some(controller) = controller {
                controller.finish();
            }
            return Ok(None);
        };

        adapter
            .execute(ExecuteRequest {
                model: self.build_model(&req),
                controller,
                use_stream: Self::use_stream(&req),
            })
            .await
    }
}

#[async_trait]
impl Bot for ChatBot {
    fn name(&self) -> &str {
        match self.kind {
            BotType::ProjectChat => "project chat bot",
            BotType::EditorChat => "editor chat bot",
            BotType::Unknown => "chat bot",
        }
    }

    fn bot_type(&self) -> Option<BotType> {
        match self.kind {
            BotType::Unknown => None,
            kind => Some(kind),
        }
    }

    async fn run(&self, req: BotRequest) -> Result<Option<BotReply>, BridgeError> {
        self.dispatch(req, None).await
    }

    async fn run_abortable(
        &self,
        req: BotRequest,
        task_id: &str,
    ) -> Result<Option<BotReply>, BridgeError> {
        let controller = self.tasks.register(task_id);
        self.dispatch(req, Some(controller)).await
    }

    fn abort(&self, task_id: &str) {
        self.tasks.abort(task_id);
    }

    fn is_aborted(&self, task_id: &str) -> bool {
        self.tasks.is_aborted(task_id)
    }

    async fn is_available(&self, bot: &BotDescriptor) -> bool {
        match self.factory.create_request(bot, None) {
            Some(adapter) => adapter.is_available().await,
            None => false,
        }
    }

    async fn upload_file(&self, bot: &BotDescriptor, file: UploadFile) -> Option<String> {
        let adapter = self.factory.create_request(bot, None)?;
        adapter.upload(&file).await
    }
}
