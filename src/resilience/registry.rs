use crate::config::types::ExtractionConfig;
use crate::extraction::{build_backend, ExtractionBackend, ExtractionError, ExtractionKind};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Backends by id, plus the ids each kind of extraction prefers
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn ExtractionBackend>>,
    primary: Option<String>,
    per_kind: HashMap<ExtractionKind, String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ExtractionConfig) -> Result<Self, ExtractionError> {
        let mut registry = Self::new();
        for (id, backend) in &config.backends {
            registry.register(id.clone(), build_backend(backend)?);
        }

        registry.primary = config.primary.clone();
        for (kind, id) in [
            (ExtractionKind::Topics, &config.topic_backend),
            (ExtractionKind::Quotes, &config.quote_backend),
            (ExtractionKind::Titles, &config.title_backend),
        ] {
            if let Some(id) = id {
                registry.per_kind.insert(kind, id.clone());
            }
        }
        Ok(registry)
    }

    pub fn register(&mut self, id: impl Into<String>, backend: Arc<dyn ExtractionBackend>) {
        self.backends.insert(id.into(), backend);
    }

    pub fn with_primary(mut self, id: impl Into<String>) -> Self {
        self.primary = Some(id.into());
        self
    }

    pub fn with_kind_backend(mut self, kind: ExtractionKind, id: impl Into<String>) -> Self {
        self.per_kind.insert(kind, id.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Walk the fallback chain: kind-specific id, primary id, the caller's
    /// session default, then the first registered backend (by id)
    pub fn resolve(
        &self,
        kind: ExtractionKind,
        session_default: Option<&str>,
    ) -> Option<(String, Arc<dyn ExtractionBackend>)> {
        let preferred = [
            self.per_kind.get(&kind).map(String::as_str),
            self.primary.as_deref(),
            session_default,
        ];

        for id in preferred.into_iter().flatten() {
            match self.backends.get(id) {
                Some(backend) => return Some((id.to_string(), backend.clone())),
                None => tracing::debug!(kind = %kind, backend = %id, "Backend not registered, falling back"),
            }
        }

        self.backends
            .iter()
            .next()
            .map(|(id, backend)| (id.clone(), backend.clone()))
    }
}
