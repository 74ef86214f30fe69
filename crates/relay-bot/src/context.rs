use std::sync::Arc;
use std::time::Duration;

use relay_core::ModelTransport;
use relay_engine::{CoalescerConfig, ResponseEngine, ToolRegistry};
use relay_settings::RelaySettings;
use relay_telemetry::TraceLinker;

use crate::client::ChatClient;
use crate::command::CommandRouter;
use crate::dice::Dice;
use crate::event::MessageEvent;
use crate::history::HistoryBuffer;
use crate::materials::ReactionMaterials;
use crate::mute::MuteRegistry;
use crate::tools;

/// Lines kept per chat, as a multiple of the prompt history size.
const HISTORY_RETENTION_FACTOR: usize = 3;

/// Everything the stages, hooks and commands share. Built once at startup.
pub struct BotContext {
    pub settings: Arc<RelaySettings>,
    pub client: Arc<dyn ChatClient>,
    pub engine: Arc<ResponseEngine>,
    pub dice: Arc<dyn Dice>,
    pub history: Arc<HistoryBuffer>,
    pub materials: Arc<ReactionMaterials>,
    pub mutes: Arc<MuteRegistry>,
    pub router: CommandRouter,
    pub linker: TraceLinker,
}

impl BotContext {
    pub fn new(
        settings: RelaySettings,
        client: Arc<dyn ChatClient>,
        transport: Arc<dyn ModelTransport>,
        dice: Arc<dyn Dice>,
    ) -> Self {
        let history = Arc::new(HistoryBuffer::new(
            settings.model.history_size.max(1) * HISTORY_RETENTION_FACTOR,
        ));

        let mut registry = ToolRegistry::new();
        tools::register_defaults(&mut registry, Arc::clone(&history), Arc::clone(&dice));
        let engine = Arc::new(ResponseEngine::new(transport, Arc::new(registry)));

        let linker = TraceLinker::new(settings.telemetry.grafana_url.clone());

        Self {
            settings: Arc::new(settings),
            client,
            engine,
            dice,
            history,
            materials: Arc::new(ReactionMaterials::new()),
            mutes: Arc::new(MuteRegistry::new()),
            router: CommandRouter::new(),
            linker,
        }
    }

    pub fn is_mentioned(&self, event: &MessageEvent) -> bool {
        event.mentions_user(&self.settings.bot.bot_open_id)
    }

    pub fn coalescer_config(&self) -> CoalescerConfig {
        CoalescerConfig {
            flush_interval: Duration::from_millis(self.settings.streaming.flush_interval_ms),
            capacity: self.settings.streaming.channel_capacity,
            first_sequence: 1,
        }
    }
}
