use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use relay_core::{SharedMetadata, Stage, StageOutcome};

use crate::context::BotContext;
use crate::event::MessageEvent;
use crate::materials::Material;

/// Remembers stickers and images seen in a chat for later reactions.
pub struct RecordStage {
    ctx: Arc<BotContext>,
}

impl RecordStage {
    pub fn new(ctx: Arc<BotContext>) -> Self {
        Self { ctx }
    }

    fn material(event: &MessageEvent) -> Option<Material> {
        if let Some(key) = event.sticker_key() {
            return Some(Material::Sticker(key.to_string()));
        }
        event.image_key().map(|key| Material::Image(key.to_string()))
    }
}

#[async_trait]
impl Stage<MessageEvent> for RecordStage {
    fn name(&self) -> &str {
        "record"
    }

    async fn pre_run(&self, event: &MessageEvent, _meta: &SharedMetadata, _cancel: &CancellationToken) -> StageOutcome {
        if Self::material(event).is_none() {
            return StageOutcome::skip("no material");
        }
        StageOutcome::Ok
    }

    async fn run(&self, event: &MessageEvent, _meta: &SharedMetadata, _cancel: &CancellationToken) -> StageOutcome {
        if let Some(material) = Self::material(event) {
            let added = self.ctx.materials.remember(&event.chat_id, material);
            debug!(chat_id = %event.chat_id, added, "material recorded");
        }
        StageOutcome::Ok
    }
}
