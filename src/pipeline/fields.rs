//! Field extraction: slide text → five structured fields.
//!
//! The [`FieldExtractor`] trait is the seam between the orchestrator and
//! whatever understands the text. [`LlmFieldExtractor`] sends each slide to
//! an LLM through `edgequake-llm` and validates the answer against a strict
//! schema at the boundary; [`crate::pipeline::pattern::PatternFieldExtractor`]
//! does the same job offline with regular expressions.
//!
//! ## Failure policy
//!
//! Every per-slide failure (call error, timeout, malformed answer, empty
//! text) becomes a [`SlideError`] and the slide is dropped. Nothing here ever
//! aborts a batch: [`extract_all`] always returns once every member of every
//! batch has settled.

use crate::config::ExtractionConfig;
use crate::error::{PptxError, SlideError};
use crate::output::{SlideFields, SlideText};
use crate::progress::ProgressCallback;
use crate::prompts;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Turns one slide's text into [`SlideFields`].
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Extract the fields of one slide.
    ///
    /// Implementations never see an empty slide; [`extract_all`] filters
    /// those out first.
    async fn extract_fields(&self, slide: &SlideText) -> Result<SlideFields, SlideError>;
}

/// Run `extractor` over every slide in sequential batches of concurrent calls.
///
/// Returns the successful `(slide_number, fields)` pairs in slide order plus
/// the errors of every dropped slide. `progress.on_batch_complete` fires after
/// each batch with the number of slides attempted so far.
pub async fn extract_all(
    extractor: &Arc<dyn FieldExtractor>,
    slides: &[SlideText],
    batch_size: usize,
    progress: Option<&ProgressCallback>,
) -> (Vec<(u32, SlideFields)>, Vec<SlideError>) {
    let total = slides.len();
    let mut extracted = Vec::with_capacity(total);
    let mut errors = Vec::new();
    let mut processed = 0usize;

    for (batch_idx, batch) in slides.chunks(batch_size.max(1)).enumerate() {
        let batch_start = Instant::now();
        let results = join_all(batch.iter().map(|slide| extract_one(extractor, slide))).await;

        for (slide, result) in batch.iter().zip(results) {
            match result {
                Ok(fields) => extracted.push((slide.slide_number, fields)),
                Err(e) => {
                    warn!("{}; slide dropped", e);
                    if let Some(cb) = progress {
                        cb.on_slide_error(slide.slide_number, &e.to_string());
                    }
                    errors.push(e);
                }
            }
        }

        processed += batch.len();
        debug!(
            "Extraction batch {} done in {:?}: {}/{} slides processed",
            batch_idx + 1,
            batch_start.elapsed(),
            processed,
            total
        );
        if let Some(cb) = progress {
            cb.on_batch_complete(processed, total);
        }
    }

    info!(
        "Field extraction via {}: {} kept, {} dropped",
        extractor.name(),
        extracted.len(),
        errors.len()
    );
    (extracted, errors)
}

async fn extract_one(
    extractor: &Arc<dyn FieldExtractor>,
    slide: &SlideText,
) -> Result<SlideFields, SlideError> {
    if slide.text.trim().is_empty() {
        return Err(SlideError::EmptyText {
            slide: slide.slide_number,
        });
    }
    extractor.extract_fields(slide).await
}

// ── LLM-backed extractor ─────────────────────────────────────────────────

/// Field extraction through an LLM provider.
///
/// ## Message Layout
///
/// 1. **System message**: extraction rules plus the JSON schema (or the
///    user-supplied override)
/// 2. **User message**: the slide text, quoted
///
/// The answer must be a single JSON object; see [`parse_fields`].
pub struct LlmFieldExtractor {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    api_timeout_secs: u64,
}

impl LlmFieldExtractor {
    /// Wrap an existing provider, taking call settings from `config`.
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            system_prompt: prompts::system_prompt(config.system_prompt.as_deref()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout_secs: config.api_timeout_secs,
        }
    }

    /// Resolve the provider from `config` / environment and wrap it.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, PptxError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }

    fn build_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl FieldExtractor for LlmFieldExtractor {
    fn name(&self) -> &str {
        "llm"
    }

    async fn extract_fields(&self, slide: &SlideText) -> Result<SlideFields, SlideError> {
        let slide_number = slide.slide_number;
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user(prompts::slide_user_message(slide_number, &slide.text)),
        ];
        let options = self.build_options();
        let call_timeout = Duration::from_secs(self.api_timeout_secs);

        let mut last_err: Option<SlideError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Slide {}: retry {}/{} after {}ms",
                    slide_number, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let start = Instant::now();
            match timeout(call_timeout, self.provider.chat(&messages, Some(&options))).await {
                Ok(Ok(response)) => {
                    debug!(
                        "Slide {}: {} input tokens, {} output tokens, {:?}",
                        slide_number,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return parse_fields(slide_number, &response.content);
                }
                Ok(Err(e)) => {
                    warn!("Slide {}: attempt {} failed: {}", slide_number, attempt + 1, e);
                    last_err = Some(SlideError::ExtractionFailed {
                        slide: slide_number,
                        retries: attempt,
                        detail: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!(
                        "Slide {}: attempt {} timed out after {}s",
                        slide_number,
                        attempt + 1,
                        self.api_timeout_secs
                    );
                    last_err = Some(SlideError::Timeout {
                        slide: slide_number,
                        secs: self.api_timeout_secs,
                    });
                }
            }
        }

        Err(last_err.unwrap_or(SlideError::ExtractionFailed {
            slide: slide_number,
            retries: self.max_retries,
            detail: "Unknown error".to_string(),
        }))
    }
}

// ── Structured-response validation ───────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json|JSON)?\s*\n(.*)\n\s*```$").unwrap());

/// Exactly the five schema fields, each required.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct WireFields {
    #[serde(deserialize_with = "lenient_string")]
    codigo_parceiro: String,
    #[serde(deserialize_with = "lenient_string")]
    nome_loja: String,
    #[serde(deserialize_with = "lenient_string")]
    colaborador: String,
    #[serde(deserialize_with = "lenient_string")]
    superior: String,
    #[serde(deserialize_with = "lenient_string")]
    data_envio: String,
}

/// Accept strings, `null` (→ "") and numbers (→ decimal text).
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s.trim().to_string()),
        serde_json::Value::Null => Ok(String::new()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!("expected string, got {other}"))),
    }
}

/// Validate a raw service answer against the field schema.
///
/// Tolerates an outer code fence and prose around the object; everything
/// else (missing keys, extra keys, nested objects, no JSON at all) is a
/// [`SlideError::MalformedResponse`].
pub fn parse_fields(slide_number: u32, raw: &str) -> Result<SlideFields, SlideError> {
    let malformed = |detail: String| SlideError::MalformedResponse {
        slide: slide_number,
        detail,
    };

    let trimmed = raw.trim();
    let unfenced = RE_OUTER_FENCES
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map_or(trimmed, |m| m.as_str());

    let (start, end) = match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(s), Some(e)) if s < e => (s, e),
        _ => return Err(malformed("no JSON object in response".to_string())),
    };

    let wire: WireFields =
        serde_json::from_str(&unfenced[start..=end]).map_err(|e| malformed(e.to_string()))?;

    Ok(SlideFields {
        codigo_parceiro: wire.codigo_parceiro,
        nome_loja: wire.nome_loja,
        colaborador: wire.colaborador,
        superior: wire.superior,
        data_envio: wire.data_envio,
    })
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, PptxError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        PptxError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`)
/// 2. **Named provider + model** (`config.provider_name`)
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`)
/// 4. **OpenAI key present** (`OPENAI_API_KEY`)
/// 5. **Full auto-detection** (`ProviderFactory::from_env`)
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, PptxError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| PptxError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, GEMINI_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
