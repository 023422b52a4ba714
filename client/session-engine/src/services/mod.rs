use std::sync::Arc;

use crate::config::Config;
use crate::engine::SessionEngine;
use crate::services::exam_client::{ExamService, HttpExamService};
use crate::services::local_cache::LocalCache;

pub mod exam_client;
pub mod local_cache;

/// Shared collaborators every session engine is built from.
pub struct AppState {
    pub config: Config,
    pub exam_service: Arc<dyn ExamService>,
    pub cache: LocalCache,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let exam_service = Arc::new(HttpExamService::new(&config)?);
        tracing::info!("Grading service client ready: {}", config.api_base_url);

        let cache = LocalCache::file(config.cache_dir.clone());
        tracing::info!("Recovery snapshots stored in {}", config.cache_dir.display());

        Ok(Self {
            config,
            exam_service,
            cache,
        })
    }

    pub fn with_parts(
        config: Config,
        exam_service: Arc<dyn ExamService>,
        cache: LocalCache,
    ) -> Self {
        Self {
            config,
            exam_service,
            cache,
        }
    }

    /// A fresh engine per attempt, so guards never leak between sessions.
    pub fn session_engine(&self) -> SessionEngine {
        SessionEngine::new(self.exam_service.clone(), self.cache.clone(), &self.config)
    }
}
