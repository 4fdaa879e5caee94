use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use stride_types::EnricherKind;

use crate::{
    DescriptionModel, EnrichContext, EnrichError, EnrichOutcome, Enricher, EnrichmentResult,
};

pub const AI_DESCRIPTION_HEADER: &str = "🤖 Description:";

/// Generates a one-paragraph activity description via a language-model
/// endpoint. Model failures degrade to a skip on the do-not-retry pass.
pub struct AiDescriptionEnricher {
    model: Arc<dyn DescriptionModel>,
}

impl AiDescriptionEnricher {
    pub fn new(model: Arc<dyn DescriptionModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Enricher for AiDescriptionEnricher {
    fn kind(&self) -> EnricherKind {
        EnricherKind::AiDescription
    }

    async fn enrich(&self, ctx: &EnrichContext<'_>) -> Result<EnrichOutcome, EnrichError> {
        let text = match self.model.describe(ctx.activity).await {
            Ok(text) => text,
            Err(e) if ctx.do_not_retry => {
                debug!("description model failed on final pass, continuing without: {e}");
                return Ok(EnrichOutcome::Skipped {
                    reason: format!("description model unavailable: {e}"),
                });
            }
            Err(e) => return Err(EnrichError::transient(format!("description model: {e}"))),
        };

        if text.is_empty() {
            return Ok(EnrichOutcome::Skipped {
                reason: "model returned an empty description".to_string(),
            });
        }

        Ok(EnrichOutcome::Applied(EnrichmentResult {
            section_header: Some(AI_DESCRIPTION_HEADER.to_string()),
            description: Some(text),
            ..Default::default()
        }))
    }
}
