//! Shared application state threaded through every handler.

use std::sync::Arc;

use crate::config::Config;
use crate::llm::LlmRouter;
use crate::pipeline::context::PipelineContext;
use crate::profile::store::ProfileStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ProfileStore>,
    pub llm: LlmRouter,
    pub config: Config,
}

impl AppState {
    pub fn new(store: Arc<dyn ProfileStore>, llm: LlmRouter, config: Config) -> Self {
        Self { store, llm, config }
    }

    /// A fresh per-request pipeline context with the configured provider
    /// overrides applied.
    pub fn pipeline_context(&self) -> PipelineContext {
        PipelineContext::new(self.llm.clone())
            .with_recommendation_provider(self.config.recommendation_provider)
    }
}
