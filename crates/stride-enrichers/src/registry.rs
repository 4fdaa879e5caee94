use std::collections::HashMap;
use std::sync::Arc;

use stride_types::EnricherKind;

use crate::Enricher;

/// Lookup of enricher implementations by kind or stable name. Built once by
/// the engine during startup and never mutated afterwards.
#[derive(Default, Clone)]
pub struct EnricherRegistry {
    by_kind: HashMap<EnricherKind, Arc<dyn Enricher>>,
}

impl EnricherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, enricher: Arc<dyn Enricher>) {
        self.by_kind.insert(enricher.kind(), enricher);
    }

    pub fn get(&self, kind: EnricherKind) -> Option<Arc<dyn Enricher>> {
        self.by_kind.get(&kind).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn Enricher>> {
        self.by_kind
            .values()
            .find(|e| e.name() == name)
            .cloned()
    }

    pub fn kinds(&self) -> Vec<EnricherKind> {
        self.by_kind.keys().copied().collect()
    }
}
