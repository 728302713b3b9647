use std::collections::HashMap;
use std::sync::Arc;

use crate::bots::chat::ChatBot;
use crate::bots::{Bot, BotType};
use crate::dispatch::SafeEnum;
use crate::dispatch::factory::RequestFactory;
use crate::error::BridgeError;

/// One instance per bot kind, filled once at startup.
#[derive(Default)]
pub struct BotRegistry {
    bots: HashMap<BotType, Arc<dyn Bot>>,
}

impl BotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in bot.
    pub fn with_defaults(factory: Arc<RequestFactory>) -> Result<Self, BridgeError> {
        let mut registry = Self::new();
        registry.register(Arc::new(ChatBot::new(BotType::ProjectChat, factory.clone())))?;
        registry.register(Arc::new(ChatBot::new(BotType::EditorChat, factory)))?;
        Ok(registry)
    }

    /// Store `bot` under its declared type. A bot without a declared type is a
    /// startup error.
    pub fn register(&mut self, bot: Arc<dyn Bot>) -> Result<(), BridgeError> {
        let bot_type = match bot.bot_type() {
            Some(BotType::Unknown) | None => {
                return Err(BridgeError::UndeclaredBotType(bot.name().to_string()));
            }
            Some(bot_type) => bot_type,
        };

        if self.bots.insert(bot_type, bot).is_some() {
            tracing::warn!(bot_type = bot_type.as_str(), "bot type registered twice, replacing");
        }
        Ok(())
    }

    pub fn get(&self, bot_type: BotType) -> Option<Arc<dyn Bot>> {
        self.bots.get(&bot_type).cloned()
    }

    /// Look up by the raw type string stored with a bot.
    pub fn lookup(&self, raw: &str) -> Option<Arc<dyn Bot>> {
        self.get(BotType::coerce(raw))
    }

    pub fn bot_types(&self) -> Vec<BotType> {
        let mut types: Vec<BotType> = self.bots.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }
}
