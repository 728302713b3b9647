use serde::Serialize;

use crate::dispatch::BotDescriptor;

#[derive(Serialize)]
pub struct BotInfo {
    pub name: String,
    pub bot_type: String,
    pub platform: String,
    pub running_mode: String,
    pub available: bool,
}

impl BotInfo {
    pub fn new(descriptor: &BotDescriptor, available: bool) -> Self {
        Self {
            name: descriptor.name.clone(),
            bot_type: descriptor.bot_type.clone(),
            platform: descriptor.platform().as_str().to_string(),
            running_mode: descriptor.running_mode().as_str().to_string(),
            available,
        }
    }
}

#[derive(Serialize)]
pub struct ListBotsResponse {
    pub bots: Vec<BotInfo>,
}

impl ListBotsResponse {
    pub fn to_markdown(&self) -> String {
        if self.bots.is_empty() {
            return "No bots configured.".to_string();
        }
        let mut out = String::from(
            "| bot | type | platform | running mode | available |\n|---|---|---|---|---|\n",
        );
        for bot in &self.bots {
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                bot.name,
                bot.bot_type,
                bot.platform,
                bot.running_mode,
                if bot.available { "yes" } else { "no" }
            ));
        }
        out
    }
}
