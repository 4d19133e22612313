pub mod fallback;
pub mod gemini;
pub mod prompt;

pub use gemini::GeminiClient;
pub use prompt::{build_prompt, ExplanationContext};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use common::{Error, ExplanationResult, ExplanationSource, Result};

/// Default word limit requested from the text service.
pub const DEFAULT_MAX_WORDS: usize = 120;

/// External generative-text service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Produces a rationale for a decision: AI text when a generator is
/// configured and answers in time, the deterministic fallback otherwise.
pub struct ExplanationGenerator {
    generator: Option<Arc<dyn TextGenerator>>,
    timeout: Duration,
    max_words: usize,
}

impl ExplanationGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self {
            generator: Some(generator),
            timeout,
            max_words: DEFAULT_MAX_WORDS,
        }
    }

    /// No external service; every explanation comes from the fallback.
    pub fn fallback_only() -> Self {
        Self {
            generator: None,
            timeout: Duration::ZERO,
            max_words: DEFAULT_MAX_WORDS,
        }
    }

    pub fn with_max_words(mut self, max_words: usize) -> Self {
        self.max_words = max_words;
        self
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    /// Never fails; service errors are logged and absorbed.
    pub async fn explain(&self, ctx: &ExplanationContext<'_>) -> ExplanationResult {
        if let Some(generator) = &self.generator {
            match self.generate(generator.as_ref(), ctx).await {
                Ok(text) => {
                    return ExplanationResult {
                        source: ExplanationSource::Ai,
                        text,
                    }
                }
                Err(e) => {
                    warn!(instrument = %ctx.instrument, "Explanation service unavailable, using fallback: {e}");
                }
            }
        }

        ExplanationResult {
            source: ExplanationSource::Fallback,
            text: fallback::explain(ctx.instrument, ctx.classification(), ctx.breakdown),
        }
    }

    async fn generate(
        &self,
        generator: &dyn TextGenerator,
        ctx: &ExplanationContext<'_>,
    ) -> Result<String> {
        let prompt = build_prompt(ctx, self.max_words);
        let text = tokio::time::timeout(self.timeout, generator.generate(&prompt))
            .await
            .map_err(|_| {
                Error::ExplanationService(format!("no answer within {:?}", self.timeout))
            })??;

        if text.trim().is_empty() {
            return Err(Error::ExplanationService("blank explanation text".into()));
        }
        info!(instrument = %ctx.instrument, "AI explanation generated");
        Ok(text)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
