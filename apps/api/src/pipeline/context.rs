//! Per-run pipeline context: the provider router plus a stage-result cache.
//!
//! The cache memoizes raw completions by stage + rendered prompt, so a stage
//! invoked twice with identical input inside one run costs one network round
//! trip. The cache lives only as long as the run; nothing is shared across
//! requests.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::debug;

use crate::llm::{CallOptions, LlmRouter, Provider, ProviderError};
use crate::pipeline::Stage;

pub struct PipelineContext {
    router: LlmRouter,
    recommendation_provider: Provider,
    cache: Mutex<HashMap<String, String>>,
}

impl PipelineContext {
    pub fn new(router: LlmRouter) -> Self {
        Self {
            router,
            recommendation_provider: Stage::Recommendation.default_provider(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Redirects the recommendation stage to a configured provider
    /// (`RECOMMENDATION_PROVIDER`).
    pub fn with_recommendation_provider(mut self, provider: Provider) -> Self {
        self.recommendation_provider = provider;
        self
    }

    /// Effective provider for a stage, with the configured override applied.
    pub fn provider_for(&self, stage: Stage) -> Provider {
        match stage {
            Stage::Recommendation => self.recommendation_provider,
            _ => stage.default_provider(),
        }
    }

    /// Invokes the stage's effective provider, memoizing by stage + prompt.
    pub async fn call_stage(&self, stage: Stage, prompt: &str) -> Result<String, ProviderError> {
        self.call_stage_with(stage, self.provider_for(stage), prompt)
            .await
    }

    /// Same as `call_stage` with an explicit provider override.
    pub async fn call_stage_with(
        &self,
        stage: Stage,
        provider: Provider,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let key = format!("{}|{}|{}", stage.partial_key(), provider, prompt);

        if let Some(cached) = self.cache.lock().await.get(&key) {
            debug!(stage = stage.partial_key(), "Stage cache hit");
            return Ok(cached.clone());
        }

        let response = self
            .router
            .invoke(provider, prompt, CallOptions::default())
            .await?;

        self.cache
            .lock()
            .await
            .insert(key, response.clone());
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::llm::backend::TextBackend;

    struct CountingBackend {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TextBackend for CountingBackend {
        async fn generate(
            &self,
            _prompt: &str,
            _options: CallOptions,
        ) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("{\"ok\": true}".to_string())
        }
    }

    fn counting_context() -> (PipelineContext, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = Arc::new(CountingBackend {
            calls: calls.clone(),
        });
        let router = LlmRouter::new(backend.clone(), backend.clone(), backend);
        (PipelineContext::new(router), calls)
    }

    #[tokio::test]
    async fn test_identical_input_hits_cache() {
        let (ctx, calls) = counting_context();

        let a = ctx.call_stage(Stage::SocioEconomic, "same prompt").await.unwrap();
        let b = ctx.call_stage(Stage::SocioEconomic, "same prompt").await.unwrap();

        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_prompts_are_separate_entries() {
        let (ctx, calls) = counting_context();

        ctx.call_stage(Stage::SocioEconomic, "prompt one").await.unwrap();
        ctx.call_stage(Stage::SocioEconomic, "prompt two").await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_same_prompt_different_stage_is_a_miss() {
        let (ctx, calls) = counting_context();

        ctx.call_stage(Stage::SocioEconomic, "prompt").await.unwrap();
        ctx.call_stage(Stage::LearningRoadmap, "prompt").await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    struct NamedBackend(&'static str);

    #[async_trait]
    impl TextBackend for NamedBackend {
        async fn generate(
            &self,
            _prompt: &str,
            _options: CallOptions,
        ) -> Result<String, ProviderError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_recommendation_provider_override_routes_calls() {
        let router = LlmRouter::new(
            Arc::new(NamedBackend("from groq")),
            Arc::new(NamedBackend("from gemini")),
            Arc::new(NamedBackend("from openai")),
        );
        let ctx = PipelineContext::new(router).with_recommendation_provider(Provider::Groq);

        assert_eq!(ctx.provider_for(Stage::Recommendation), Provider::Groq);
        // Non-recommendation stages keep their defaults.
        assert_eq!(ctx.provider_for(Stage::GapAnalysis), Provider::Groq);

        let out = ctx.call_stage(Stage::Recommendation, "prompt").await.unwrap();
        assert_eq!(out, "from groq");
    }
}
