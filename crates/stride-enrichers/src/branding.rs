use async_trait::async_trait;

use stride_types::EnricherKind;

use crate::{EnrichContext, EnrichError, EnrichOutcome, Enricher, EnrichmentResult};

const DEFAULT_FOOTER: &str = "Synced with Stride";

/// Appends the sync footer and tag. Config keys: `footer_text` overrides the
/// footer line; `update_mode=true` marks the event so destination uploaders
/// patch the existing upstream activity instead of creating a new one.
pub struct BrandingEnricher;

#[async_trait]
impl Enricher for BrandingEnricher {
    fn kind(&self) -> EnricherKind {
        EnricherKind::Branding
    }

    async fn enrich(&self, ctx: &EnrichContext<'_>) -> Result<EnrichOutcome, EnrichError> {
        let footer = ctx
            .config
            .get("footer_text")
            .cloned()
            .unwrap_or_else(|| DEFAULT_FOOTER.to_string());

        let mut result = EnrichmentResult {
            section_header: Some("⚡".to_string()),
            description: Some(footer),
            tags: vec!["stride".to_string()],
            ..Default::default()
        };
        if ctx.config_flag("update_mode") {
            result
                .metadata
                .insert("use_update_method".to_string(), "true".to_string());
        }
        Ok(EnrichOutcome::Applied(result))
    }
}
