//! CLI binary for pptx-extract.
//!
//! A thin shim over the library crate: uploads the deck to the configured
//! object store, submits a job, polls it like any other client would and
//! prints the records.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use pptx_extract::job::read_persisted;
use pptx_extract::{
    inspect, write_records, ExtractionConfig, FieldExtractor, FsObjectStore, HttpObjectStore,
    JobService, JobStatus, JobView, LlmFieldExtractor, ObjectStore, PatternFieldExtractor,
    PipelineContext, ServiceConfig, SubmitJobRequest,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const PPTX_MIME: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract records to stdout (LLM provider from OPENAI_API_KEY etc.)
  pptx-extract extract visitas.pptx

  # Offline, regex-based extraction, written to a file
  pptx-extract extract --extractor pattern visitas.pptx -o visitas.json

  # Upload images to Supabase storage
  pptx-extract extract --storage http --storage-url https://proj.supabase.co \
      --bucket pptx-images --storage-key $KEY visitas.pptx

  # Show slide texts and image files (no network, no API key)
  pptx-extract inspect visitas.pptx

  # Read a persisted job record
  pptx-extract status --jobs-dir ./jobs 0b8e7c1e-...

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY           OpenAI API key
  ANTHROPIC_API_KEY        Anthropic API key
  GEMINI_API_KEY           Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER   Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL          Override model ID
  PPTX_EXTRACT_*           Fallback for every flag (see --help of each subcommand)
"#;

/// Extract structured store-visit records from PowerPoint decks.
#[derive(Parser, Debug)]
#[command(
    name = "pptx-extract",
    version,
    about = "Extract structured slide records from PPTX files using LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PPTX_EXTRACT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PPTX_EXTRACT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a deck, run an extraction job and print its records.
    Extract(ExtractArgs),
    /// Print slide texts and resolved image files. No network.
    Inspect {
        /// Local .pptx file.
        file: PathBuf,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Print a persisted job record.
    Status {
        /// Job id (UUID).
        job_id: String,
        /// Directory holding job records.
        #[arg(long, env = "PPTX_EXTRACT_JOBS_DIR", default_value = "./pptx-jobs")]
        jobs_dir: PathBuf,
    },
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Local .pptx file.
    file: PathBuf,

    /// Write records to this file instead of stdout.
    #[arg(short, long, env = "PPTX_EXTRACT_OUTPUT")]
    output: Option<PathBuf>,

    /// Field extraction strategy.
    #[arg(long, env = "PPTX_EXTRACT_EXTRACTOR", value_enum, default_value = "llm")]
    extractor: ExtractorArg,

    /// LLM model ID (e.g. gpt-4.1-nano, gemini-2.5-flash).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// Slides per field-extraction batch.
    #[arg(long, env = "PPTX_EXTRACT_BATCH_SIZE", default_value_t = 10)]
    batch_size: usize,

    /// Images per upload batch.
    #[arg(long, env = "PPTX_EXTRACT_UPLOAD_BATCH_SIZE", default_value_t = 10)]
    upload_batch_size: usize,

    /// Max LLM output tokens per slide.
    #[arg(long, env = "PPTX_EXTRACT_MAX_TOKENS", default_value_t = 512)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PPTX_EXTRACT_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Retries per slide on LLM failure.
    #[arg(long, env = "PPTX_EXTRACT_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Per-slide LLM call timeout in seconds.
    #[arg(long, env = "PPTX_EXTRACT_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PPTX_EXTRACT_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Object store backend for the deck and slide images.
    #[arg(long, env = "PPTX_EXTRACT_STORAGE", value_enum, default_value = "fs")]
    storage: StorageArg,

    /// Root directory of the `fs` store.
    #[arg(long, env = "PPTX_EXTRACT_STORAGE_DIR", default_value = "./pptx-storage")]
    storage_dir: PathBuf,

    /// Public base URL for objects in the `fs` store.
    #[arg(long, env = "PPTX_EXTRACT_PUBLIC_BASE_URL")]
    public_base_url: Option<String>,

    /// Base URL of the `http` store (Supabase project URL).
    #[arg(long, env = "PPTX_EXTRACT_STORAGE_URL")]
    storage_url: Option<String>,

    /// Bucket of the `http` store.
    #[arg(long, env = "PPTX_EXTRACT_BUCKET", default_value = "pptx-images")]
    bucket: String,

    /// API key of the `http` store.
    #[arg(long, env = "PPTX_EXTRACT_STORAGE_KEY", hide_env_values = true)]
    storage_key: Option<String>,

    /// Persist job records in this directory.
    #[arg(long, env = "PPTX_EXTRACT_JOBS_DIR")]
    jobs_dir: Option<PathBuf>,

    /// Milliseconds between status polls.
    #[arg(long, env = "PPTX_EXTRACT_POLL_INTERVAL_MS", default_value_t = 2000)]
    poll_interval_ms: u64,

    /// Disable progress bar.
    #[arg(long, env = "PPTX_EXTRACT_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ExtractorArg {
    Llm,
    Pattern,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StorageArg {
    Fs,
    Http,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = match &cli.command {
        Command::Extract(args) => !cli.quiet && !args.no_progress,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Extract(ref args) => run_extract(args, cli.quiet, show_progress).await,
        Command::Inspect { ref file, json } => run_inspect(file, json).await,
        Command::Status {
            ref job_id,
            ref jobs_dir,
        } => run_status(job_id, jobs_dir).await,
    }
}

async fn run_extract(args: &ExtractArgs, quiet: bool, show_progress: bool) -> Result<()> {
    let bytes = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let file_name = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.pptx".to_string());
    let file_size = bytes.len() as u64;

    // ── Upload the deck ──────────────────────────────────────────────────
    let store = build_store(args)?;
    let storage_path = upload_key(&file_name);
    store
        .put(&storage_path, bytes, PPTX_MIME)
        .await
        .context("Failed to upload deck")?;

    // ── Start the service ────────────────────────────────────────────────
    let config = build_config(args).await?;
    let extractor: Arc<dyn FieldExtractor> = match args.extractor {
        ExtractorArg::Llm => Arc::new(
            LlmFieldExtractor::from_config(&config).context("Failed to set up LLM provider")?,
        ),
        ExtractorArg::Pattern => Arc::new(PatternFieldExtractor::new()),
    };
    let ctx = PipelineContext::new(config, store, extractor);

    let mut service_config = ServiceConfig::default().with_poll_interval_ms(args.poll_interval_ms);
    if let Some(ref dir) = args.jobs_dir {
        service_config = service_config.with_persist_dir(dir);
    }
    let service = JobService::new(ctx, service_config)
        .await
        .context("Failed to start job service")?;

    let submitted = service
        .submit_job(SubmitJobRequest {
            file_name,
            file_size,
            storage_path,
        })
        .await;
    let Some(job_id) = submitted.job_id else {
        bail!(submitted.error.unwrap_or_else(|| "submit failed".to_string()));
    };
    if !quiet {
        eprintln!("{} job {}", dim("◆"), bold(&job_id.to_string()));
    }

    // ── Poll ─────────────────────────────────────────────────────────────
    let bar = show_progress.then(new_bar);
    let poll_every = Duration::from_millis(service.config().poll_interval_ms);
    let job = loop {
        tokio::time::sleep(poll_every).await;
        let status = service.check_job_status(&job_id.to_string()).await;
        let Some(job) = status.job else {
            bail!(status.error.unwrap_or_else(|| "job vanished".to_string()));
        };
        if let Some(ref bar) = bar {
            update_bar(bar, &job);
        }
        if job.status.is_terminal() {
            break job;
        }
    };
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    // ── Report ───────────────────────────────────────────────────────────
    if job.status == JobStatus::Failed {
        bail!(job
            .error_message
            .unwrap_or_else(|| "extraction failed".to_string()));
    }
    let records = job.extracted_data.unwrap_or_default();

    match args.output {
        Some(ref path) => write_records(&records, path)
            .await
            .context("Failed to write output")?,
        None => println!(
            "{}",
            serde_json::to_string_pretty(&records).context("Failed to serialise records")?
        ),
    }

    if !quiet {
        let dropped = job.total_slides.saturating_sub(records.len());
        eprintln!(
            "{} {}/{} slides extracted{}{}",
            green("✔"),
            bold(&records.len().to_string()),
            job.total_slides,
            if dropped > 0 {
                format!("  ({} dropped)", red(&dropped.to_string()))
            } else {
                String::new()
            },
            args.output
                .as_ref()
                .map(|p| format!("  →  {}", bold(&p.display().to_string())))
                .unwrap_or_default(),
        );
    }
    Ok(())
}

async fn run_inspect(file: &Path, json: bool) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let summary = inspect(bytes).await.context("Failed to inspect PPTX")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
        return Ok(());
    }

    println!("File:    {}", file.display());
    println!("Slides:  {}", summary.slides.len());
    println!("Images:  {}", summary.images.len());
    for slide in &summary.slides {
        let image = summary
            .images
            .iter()
            .find(|i| i.slide_number == slide.slide_number)
            .map(|i| i.media_filename.as_str())
            .unwrap_or("-");
        println!();
        println!("{}  {}", bold(&format!("Slide {}", slide.slide_number)), dim(image));
        for line in slide.text.lines() {
            println!("  {line}");
        }
    }
    Ok(())
}

async fn run_status(job_id: &str, jobs_dir: &Path) -> Result<()> {
    let id = Uuid::parse_str(job_id.trim()).with_context(|| format!("Invalid job id '{job_id}'"))?;
    let job = read_persisted(jobs_dir, id).await?;
    let view = JobView::from(job);
    println!(
        "{}",
        serde_json::to_string_pretty(&view).context("Failed to serialise job")?
    );
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(args: &ExtractArgs) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .extraction_batch_size(args.batch_size)
        .upload_batch_size(args.upload_batch_size)
        .max_tokens(args.max_tokens)
        .temperature(args.temperature)
        .max_retries(args.max_retries)
        .api_timeout_secs(args.api_timeout);

    if let Some(ref model) = args.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref path) = args.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}

fn build_store(args: &ExtractArgs) -> Result<Arc<dyn ObjectStore>> {
    match args.storage {
        StorageArg::Fs => {
            let mut store = FsObjectStore::new(&args.storage_dir);
            if let Some(ref base) = args.public_base_url {
                store = store.with_public_base_url(base);
            }
            Ok(Arc::new(store))
        }
        StorageArg::Http => {
            let url = args
                .storage_url
                .as_deref()
                .context("--storage-url is required with --storage http")?;
            let key = args
                .storage_key
                .as_deref()
                .context("--storage-key is required with --storage http")?;
            let store = HttpObjectStore::new(url, &args.bucket, key, args.api_timeout)?;
            Ok(Arc::new(store))
        }
    }
}

/// `uploads/{unix_ms}-{name}` with anything outside `[A-Za-z0-9._-]` replaced.
fn upload_key(file_name: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let safe: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("uploads/{millis}-{safe}")
}

fn new_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
    bar.set_style(spinner_style);
    bar.set_prefix("Queued");
    bar.set_message("Waiting for worker…");
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

fn update_bar(bar: &ProgressBar, job: &JobView) {
    if job.total_slides > 0 && bar.length() != Some(job.total_slides as u64) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} slides  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        bar.set_style(style);
        bar.set_length(job.total_slides as u64);
        bar.set_prefix("Extracting");
    }
    if job.status == JobStatus::Processing && job.total_slides == 0 {
        bar.set_prefix("Reading");
        bar.set_message("Unpacking archive…");
    }
    bar.set_position(job.processed_slides as u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn provider_flag_reads_the_documented_variable() {
        let cmd = Cli::command();
        let extract = cmd
            .find_subcommand("extract")
            .expect("extract subcommand");
        let provider = extract
            .get_arguments()
            .find(|a| a.get_id() == "provider")
            .expect("--provider flag");
        let env = provider.get_env().and_then(|v| v.to_str()).unwrap_or_default();

        assert_eq!(env, "EDGEQUAKE_LLM_PROVIDER");
        assert!(AFTER_HELP.contains(env));
    }

    #[test]
    fn provider_flag_parses() {
        let cli = Cli::try_parse_from([
            "pptx-extract",
            "extract",
            "deck.pptx",
            "--provider",
            "gemini",
        ])
        .unwrap();
        match cli.command {
            Command::Extract(args) => assert_eq!(args.provider.as_deref(), Some("gemini")),
            other => panic!("unexpected subcommand {other:?}"),
        }
    }
}
