//! Generative-text providers and the ordered fallback cascade.

mod gemini;
mod groq;

pub use gemini::{GeminiProvider, GEMINI_FLASH, GEMINI_FLASH_LITE};
pub use groq::{GroqProvider, GROQ_LLAMA};

use crate::shared::ReplyMode;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Why a provider call failed. Every kind is recoverable by falling through
/// to the next tier; none is ever surfaced raw to the user.
#[derive(Debug)]
pub enum ProviderError {
    /// Quota or rate limit exhausted (HTTP 429).
    Quota,
    /// The configured model id does not exist upstream (HTTP 404).
    ModelNotFound,
    /// The provider refused the content on safety grounds.
    SafetyBlocked(String),
    /// The per-call timeout elapsed.
    Timeout,
    /// Transport-level failure.
    Network(String),
    /// The provider answered with a body we could not interpret.
    InvalidResponse(String),
    /// No API key configured; the tier is permanently unavailable.
    Disabled,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Quota => write!(f, "quota or rate limit exhausted"),
            ProviderError::ModelNotFound => write!(f, "model not found"),
            ProviderError::SafetyBlocked(reason) => write!(f, "safety blocked: {}", reason),
            ProviderError::Timeout => write!(f, "call timed out"),
            ProviderError::Network(e) => write!(f, "network failure: {}", e),
            ProviderError::InvalidResponse(e) => write!(f, "invalid response: {}", e),
            ProviderError::Disabled => write!(f, "no API key configured"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// One generative-text backend. Adapters absorb the wire differences
/// (Gemini takes a system_instruction block, Groq a system message).
#[async_trait::async_trait]
pub trait TextProvider: Send + Sync {
    /// Model identifier for logs and degraded-mode transparency.
    fn name(&self) -> &str;

    /// Generates text for the prompt, with an optional system text.
    async fn generate(&self, prompt: &str, system: Option<&str>)
        -> Result<String, ProviderError>;
}

/// One rung of the fallback ladder: a provider, the mode tag its success
/// carries, and the fixed degraded-mode annotation (None for the top tier).
pub struct Tier {
    pub provider: Arc<dyn TextProvider>,
    pub mode: ReplyMode,
    pub annotation: Option<&'static str>,
}

impl Tier {
    pub fn new(provider: Arc<dyn TextProvider>, mode: ReplyMode) -> Self {
        Self { provider, mode, annotation: None }
    }

    pub fn with_annotation(mut self, annotation: &'static str) -> Self {
        self.annotation = Some(annotation);
        self
    }
}

/// Result of walking the tier list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeOutcome {
    /// Some tier answered. The annotation is the tier's fixed degraded-mode
    /// note; callers append it after any reply post-processing so it always
    /// lands on the display text.
    Answered {
        text: String,
        mode: ReplyMode,
        annotation: Option<&'static str>,
    },
    /// Every tier failed.
    Exhausted,
}

/// Ordered attempt list over providers. Stateless across calls; tiers are
/// immutable after construction and shared freely between requests.
pub struct Cascade {
    tiers: Vec<Tier>,
}

impl Cascade {
    pub fn new(tiers: Vec<Tier>) -> Self {
        Self { tiers }
    }

    /// Tries each tier in priority order, one attempt per tier. A failure is
    /// logged with its kind and the walk continues; the first success wins.
    pub async fn generate(&self, prompt: &str, system: Option<&str>) -> CascadeOutcome {
        for tier in &self.tiers {
            match tier.provider.generate(prompt, system).await {
                Ok(text) => {
                    info!("Reply generated by {}", tier.provider.name());
                    return CascadeOutcome::Answered {
                        text,
                        mode: tier.mode,
                        annotation: tier.annotation,
                    };
                }
                Err(e) => {
                    warn!("{} failed ({}), trying next tier", tier.provider.name(), e);
                }
            }
        }
        CascadeOutcome::Exhausted
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider {
        name: &'static str,
        reply: Result<&'static str, fn() -> ProviderError>,
        calls: AtomicUsize,
    }

    impl FixedProvider {
        fn ok(name: &'static str, reply: &'static str) -> Self {
            Self { name, reply: Ok(reply), calls: AtomicUsize::new(0) }
        }

        fn failing(name: &'static str, err: fn() -> ProviderError) -> Self {
            Self { name, reply: Err(err), calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait::async_trait]
    impl TextProvider for FixedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn generate(
            &self,
            _prompt: &str,
            _system: Option<&str>,
        ) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(text) => Ok(text.to_string()),
                Err(make) => Err(make()),
            }
        }
    }

    #[tokio::test]
    async fn test_first_tier_success_has_no_annotation() {
        let cascade = Cascade::new(vec![
            Tier::new(Arc::new(FixedProvider::ok("a", "hello")), ReplyMode::GeminiFlash),
            Tier::new(Arc::new(FixedProvider::ok("b", "unused")), ReplyMode::GroqLlama)
                .with_annotation("\n\n(backup)"),
        ]);
        let out = cascade.generate("p", None).await;
        assert_eq!(
            out,
            CascadeOutcome::Answered {
                text: "hello".to_string(),
                mode: ReplyMode::GeminiFlash,
                annotation: None,
            }
        );
    }

    #[tokio::test]
    async fn test_fallback_tier_reports_its_annotation() {
        let first = Arc::new(FixedProvider::failing("a", || ProviderError::Quota));
        let second = Arc::new(FixedProvider::ok("b", "plan B"));
        let cascade = Cascade::new(vec![
            Tier::new(first.clone(), ReplyMode::GeminiFlash),
            Tier::new(second.clone(), ReplyMode::GeminiFlashLite).with_annotation("\n\n(lite)"),
        ]);
        let out = cascade.generate("p", None).await;
        assert_eq!(
            out,
            CascadeOutcome::Answered {
                text: "plan B".to_string(),
                mode: ReplyMode::GeminiFlashLite,
                annotation: Some("\n\n(lite)"),
            }
        );
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_tiers_failing_is_exhausted_not_error() {
        let cascade = Cascade::new(vec![
            Tier::new(
                Arc::new(FixedProvider::failing("a", || ProviderError::Timeout)),
                ReplyMode::GeminiFlash,
            ),
            Tier::new(
                Arc::new(FixedProvider::failing("b", || {
                    ProviderError::Network("down".to_string())
                })),
                ReplyMode::GroqLlama,
            )
            .with_annotation("\n\n(backup)"),
        ]);
        assert_eq!(cascade.generate("p", None).await, CascadeOutcome::Exhausted);
    }

    #[tokio::test]
    async fn test_each_tier_gets_exactly_one_attempt() {
        let only = Arc::new(FixedProvider::failing("a", || ProviderError::Quota));
        let cascade = Cascade::new(vec![Tier::new(only.clone(), ReplyMode::GeminiFlash)]);
        let _ = cascade.generate("p", None).await;
        assert_eq!(only.calls.load(Ordering::SeqCst), 1);
    }
}
