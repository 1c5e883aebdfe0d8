//! Configuration types for PPTX extraction and the job service.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. The config travels explicitly into
//! every stage as part of [`crate::extract::PipelineContext`]; no stage reads
//! API keys or storage settings from ambient state.
//!
//! Job bookkeeping (persistence, staleness, polling cadence) lives in the
//! separate [`ServiceConfig`].

use crate::error::PptxError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for one extraction pipeline run.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use pptx_extract::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .extraction_batch_size(5)
///     .upload_batch_size(20)
///     .model("gpt-4.1-nano")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Image uploads issued concurrently per batch. Default: 10.
    ///
    /// Batches run one after another, so this is also the peak number of
    /// in-flight storage requests per job.
    pub upload_batch_size: usize,

    /// Field-extraction calls issued concurrently per batch. Default: 10.
    ///
    /// `processedSlides` advances once per batch. Lower this if the provider
    /// starts answering `429`.
    pub extraction_batch_size: usize,

    /// LLM model identifier, e.g. "gpt-4.1-nano", "gemini-2.5-flash".
    /// If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "gemini", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per slide. Default: 512.
    ///
    /// The answer is a five-field JSON object; 512 leaves room for long
    /// store names without letting a confused model ramble.
    pub max_tokens: usize,

    /// Retry attempts on a failed extraction call. Default: 0.
    ///
    /// A failed slide is dropped, not retried. Operators facing a flaky
    /// endpoint may raise this; retries back off exponentially.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout for the extraction service in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Custom system prompt. If None, uses [`crate::prompts::DEFAULT_SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            upload_batch_size: 10,
            extraction_batch_size: 10,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 512,
            max_retries: 0,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            system_prompt: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("upload_batch_size", &self.upload_batch_size)
            .field("extraction_batch_size", &self.extraction_batch_size)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn upload_batch_size(mut self, n: usize) -> Self {
        self.config.upload_batch_size = n;
        self
    }

    pub fn extraction_batch_size(mut self, n: usize) -> Self {
        self.config.extraction_batch_size = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, PptxError> {
        let c = &self.config;
        if c.upload_batch_size == 0 {
            return Err(PptxError::InvalidConfig(
                "Upload batch size must be ≥ 1".into(),
            ));
        }
        if c.extraction_batch_size == 0 {
            return Err(PptxError::InvalidConfig(
                "Extraction batch size must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(PptxError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Settings for [`crate::service::JobService`] and its tracker.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Directory holding one `{job_id}.json` record per job. `None` keeps
    /// jobs in memory only.
    pub persist_dir: Option<PathBuf>,

    /// A non-terminal job with no update for this long is failed as stalled.
    /// `0` disables the reaper. Default: 1800 (30 minutes).
    pub stale_job_timeout_secs: u64,

    /// Interval pollers should wait between status checks. Default: 2000.
    pub poll_interval_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            persist_dir: None,
            stale_job_timeout_secs: 1800,
            poll_interval_ms: 2000,
        }
    }
}

impl ServiceConfig {
    pub fn with_persist_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persist_dir = Some(dir.into());
        self
    }

    pub fn with_stale_job_timeout_secs(mut self, secs: u64) -> Self {
        self.stale_job_timeout_secs = secs;
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ExtractionConfig::default();
        assert_eq!(c.upload_batch_size, 10);
        assert_eq!(c.extraction_batch_size, 10);
        assert_eq!(c.max_retries, 0);
        assert!(c.progress_callback.is_none());

        let s = ServiceConfig::default();
        assert_eq!(s.poll_interval_ms, 2000);
        assert!(s.persist_dir.is_none());
    }

    #[test]
    fn zero_batch_size_rejected() {
        let err = ExtractionConfig::builder()
            .extraction_batch_size(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Extraction batch size"));

        let err = ExtractionConfig::builder()
            .upload_batch_size(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Upload batch size"));
    }

    #[test]
    fn temperature_is_clamped() {
        let c = ExtractionConfig::builder().temperature(9.0).build().unwrap();
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn debug_hides_provider() {
        let c = ExtractionConfig::default();
        let s = format!("{c:?}");
        assert!(s.contains("extraction_batch_size"));
    }
}
