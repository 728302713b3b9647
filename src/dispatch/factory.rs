use std::sync::Arc;

use crate::config::BridgeConfig;
use crate::dispatch::adapter::{AdapterContext, RequestAdapter};
use crate::dispatch::default_flow::DefaultAdapter;
use crate::dispatch::generic_flow::GenericFlowAdapter;
use crate::dispatch::http::HttpTransport;
use crate::dispatch::{AdapterSettings, BotDescriptor, BotPlatform, RunningMode};
use crate::error::BridgeError;

/// Builds the adapter for a bot descriptor. Adapters are fresh per call and
/// share only the HTTP transport.
pub struct RequestFactory {
    ctx: AdapterContext,
    default_flows_url: String,
}

impl RequestFactory {
    pub fn new(config: &BridgeConfig) -> Result<Self, BridgeError> {
        Ok(Self {
            ctx: AdapterContext::from_config(config)?,
            default_flows_url: config.default_flows_url.clone(),
        })
    }

    pub fn with_transport(config: &BridgeConfig, transport: Arc<HttpTransport>) -> Self {
        Self {
            ctx: AdapterContext::with_transport(config, transport),
            default_flows_url: config.default_flows_url.clone(),
        }
    }

    pub fn context(&self) -> &AdapterContext {
        &self.ctx
    }

    /// Select the adapter for the descriptor's platform and running mode.
    /// `None` means the bot is unavailable.
    pub fn create_request(
        &self,
        descriptor: &BotDescriptor,
        settings: Option<AdapterSettings>,
    ) -> Option<RequestAdapter> {
        let settings = settings.unwrap_or_default();
        let platform = descriptor.platform();
        let mode = descriptor.running_mode();

        match (&platform, mode) {
            (BotPlatform::Default, RunningMode::Default) => {
                Some(RequestAdapter::Default(DefaultAdapter::new(
                    descriptor.clone(),
                    self.default_flows_url.clone(),
                    settings,
                    self.ctx.clone(),
                )))
            }
            (BotPlatform::ExternalFlowEngine, RunningMode::Endpoint) => {
                Some(RequestAdapter::GenericFlow(GenericFlowAdapter::new(
                    descriptor.clone(),
                    descriptor.url.clone(),
                    settings,
                    self.ctx.clone(),
                )))
            }
            (BotPlatform::ExternalFlowEngine, RunningMode::FlowDefinition) => {
                Some(RequestAdapter::GenericFlow(GenericFlowAdapter::new(
                    descriptor.clone(),
                    self.default_flows_url.clone(),
                    settings,
                    self.ctx.clone(),
                )))
            }
            _ => {
                tracing::debug!(
                    bot = %descriptor.name,
                    platform = platform.as_str(),
                    running_mode = mode.as_str(),
                    "no adapter for platform and running mode"
                );
                None
            }
        }
    }
}
