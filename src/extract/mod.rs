//! Extraction gateway — structured data out of free-form email text.
//!
//! `extract()` drives a bounded retry loop around the completion provider:
//! transient transport errors back off exponentially, a rate-limit signal
//! adds a long fixed wait, a credential rejection aborts immediately, and
//! schema validation failures re-prompt with a correction directive listing
//! every failing field. Exhaustion is a normal outcome (`ExtractionFailure`),
//! never an error propagated past this boundary.

pub mod mock;
pub mod provider;
pub mod schema;

pub use provider::{CompletionProvider, CompletionRequest, OpenAiProvider};
pub use schema::{ExtractedDocument, FieldViolation, SchemaKind};

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::config::ExtractionConfig;
use crate::error::ProviderError;

/// Non-exceptional extraction outcomes. Callers route these to the review
/// path; they are never thrown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionFailure {
    /// Input text was empty or blank. No provider call was made.
    #[error("input text is empty")]
    EmptyInput,

    /// The provider rejected the configured credential.
    #[error("provider credential rejected")]
    Unauthorized,

    /// All attempts were spent without a validated result.
    #[error("extraction exhausted after {attempts} attempt(s)")]
    Exhausted { attempts: u32 },
}

/// Gateway to the external AI capability.
pub struct ExtractionGateway {
    provider: Option<Arc<dyn CompletionProvider>>,
    config: ExtractionConfig,
}

impl ExtractionGateway {
    /// Build from configuration. Without an API key the gateway runs in
    /// deterministic mock mode (test/CI paths).
    pub fn from_config(config: ExtractionConfig) -> Self {
        let provider = config
            .api_key
            .clone()
            .map(|key| Arc::new(OpenAiProvider::new(key, &config)) as Arc<dyn CompletionProvider>);
        if provider.is_none() {
            warn!("No provider credential configured — extraction runs in mock mode");
        }
        Self { provider, config }
    }

    /// Build with an explicit provider (tests, alternate endpoints).
    pub fn with_provider(provider: Arc<dyn CompletionProvider>, config: ExtractionConfig) -> Self {
        Self {
            provider: Some(provider),
            config,
        }
    }

    /// Extract a document of the given schema from `text`.
    pub async fn extract(
        &self,
        text: &str,
        kind: &SchemaKind,
        instructions: &str,
    ) -> Result<ExtractedDocument, ExtractionFailure> {
        if text.trim().is_empty() {
            return Err(ExtractionFailure::EmptyInput);
        }

        let Some(provider) = &self.provider else {
            return self.extract_mock(kind);
        };

        let system = build_system_prompt(kind);
        let mut user = build_user_prompt(instructions, text);

        for attempt in 1..=self.config.max_attempts {
            if attempt > 1 {
                let delay = backoff_delay(self.config.base_delay_secs, attempt);
                debug!(attempt, ?delay, "Backing off before retry");
                tokio::time::sleep(delay).await;
            }

            info!(
                attempt,
                max = self.config.max_attempts,
                schema = kind.name(),
                "Calling extraction provider"
            );

            match provider
                .complete(CompletionRequest {
                    system: system.clone(),
                    user: user.clone(),
                })
                .await
            {
                Ok(raw) => {
                    let cleaned = strip_code_fences(&raw);
                    match kind.validate(cleaned) {
                        Ok(doc) => {
                            info!(
                                attempt,
                                confidence = doc.confidence_score(),
                                "Extraction validated"
                            );
                            return Ok(doc);
                        }
                        Err(violations) => {
                            warn!(
                                attempt,
                                violations = violations.len(),
                                "Provider output failed validation"
                            );
                            // Targeted repair: tell the provider exactly what
                            // was wrong instead of repeating the same request.
                            user.push_str(&correction_directive(&violations));
                        }
                    }
                }
                Err(ProviderError::AuthFailed { .. }) => {
                    error!("Provider credential rejected — aborting extraction");
                    return Err(ExtractionFailure::Unauthorized);
                }
                Err(e) if e.is_transient() => {
                    warn!(attempt, error = %e, "Transient provider error");
                    if matches!(e, ProviderError::RateLimited { .. })
                        && attempt < self.config.max_attempts
                    {
                        tokio::time::sleep(Duration::from_secs(self.config.rate_limit_wait_secs))
                            .await;
                    }
                }
                Err(e) => {
                    error!(attempt, error = %e, "Permanent provider error — aborting extraction");
                    return Err(ExtractionFailure::Exhausted { attempts: attempt });
                }
            }
        }

        error!(
            attempts = self.config.max_attempts,
            "Extraction exhausted all attempts"
        );
        Err(ExtractionFailure::Exhausted {
            attempts: self.config.max_attempts,
        })
    }

    /// Mock path: deterministic document through the same validation.
    fn extract_mock(&self, kind: &SchemaKind) -> Result<ExtractedDocument, ExtractionFailure> {
        warn!(schema = kind.name(), "Using mock extraction");
        let raw = mock::mock_document(kind).to_string();
        kind.validate(&raw).map_err(|violations| {
            error!(?violations, "Mock output failed its own schema");
            ExtractionFailure::Exhausted { attempts: 0 }
        })
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_system_prompt(kind: &SchemaKind) -> String {
    format!(
        "You are a highly efficient data extractor. Your only task is to analyze \
         the provided text and return data strictly as JSON conforming to the \
         schema below. If a required field cannot be determined, use a reasonable \
         default. Use null for optional fields with no information.\n\n\
         JSON SCHEMA: {}",
        serde_json::to_string_pretty(&kind.json_schema()).unwrap_or_default()
    )
}

fn build_user_prompt(instructions: &str, text: &str) -> String {
    format!("{instructions}\n\nINPUT TEXT:\n---\n{text}")
}

/// Correction directive appended to the next attempt's prompt.
fn correction_directive(violations: &[FieldViolation]) -> String {
    let mut directive =
        String::from("\n\nCORRECTION REQUIRED:\nThe previous JSON failed validation:\n");
    for violation in violations {
        directive.push_str(&format!("- {violation}\n"));
    }
    directive.push_str("Return ONLY the corrected JSON, conforming to the schema.");
    directive
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Strip surrounding markdown code fences — providers wrap JSON in them.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

/// Exponential backoff before `attempt` (2-based): base, 2×base, 4×base…
/// plus up to 250ms of jitter.
fn backoff_delay(base_secs: u64, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(2);
    let secs = base_secs.saturating_mul(1_u64 << exp.min(16));
    let jitter_ms = rand::thread_rng().gen_range(0..250);
    Duration::from_secs(secs) + Duration::from_millis(jitter_ms)
}
