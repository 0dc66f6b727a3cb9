//! CLI binary for vision-attack-eval.
//!
//! A thin shim over the library crate that maps CLI flags and environment
//! variables to `EvalSettings`, runs one command, and prints the results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vision_attack_eval::config::{
    DEFAULT_CUSTOM_ENDPOINT, DEFAULT_JUDGE_MODEL, DEFAULT_TEST_MODEL, DEFAULT_VISION_PROMPT,
};
use vision_attack_eval::render::pdf::DEFAULT_RESCALE;
use vision_attack_eval::render::{render_all_word_lists, render_pdfs};
use vision_attack_eval::{
    run, write_report, EvalProgressCallback, EvalSettings, MetricKind, MetricOutcome,
    ProgressCallback, RunOutput, SourceKind,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One progress bar reused for both phases: vision queries, then judgments.
/// Judgments complete out of order, so only counts are shown for them.
struct CliProgressCallback {
    bar: ProgressBar,
    query_failures: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Loading images…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            query_failures: AtomicUsize::new(0),
        })
    }

    fn start_phase(&self, prefix: &'static str, unit: &str, total: usize) {
        let style = ProgressStyle::with_template(&format!(
            "{{spinner:.cyan}} {{prefix:.bold}}  [{{bar:42.green/238}}] {{pos:>3}}/{{len}} {unit}  ⏱ {{elapsed_precise}}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(style);
        self.bar.set_prefix(prefix);
        self.bar.reset_eta();
    }
}

impl EvalProgressCallback for CliProgressCallback {
    fn on_queries_start(&self, total: usize) {
        self.start_phase("Querying", "images", total);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Querying vision model with {total} images…"))
        ));
    }

    fn on_query_complete(&self, index: usize, total: usize, identifier: &str, failed: bool) {
        if failed {
            self.query_failures.fetch_add(1, Ordering::SeqCst);
            self.bar.println(format!(
                "  {} {:>3}/{:<3}  {}  {}",
                red("✗"),
                index + 1,
                total,
                identifier,
                red("no answer (ERROR)")
            ));
        } else {
            self.bar.println(format!(
                "  {} {:>3}/{:<3}  {}",
                green("✓"),
                index + 1,
                total,
                identifier
            ));
        }
        self.bar.inc(1);
    }

    fn on_judgments_start(&self, total: usize) {
        self.start_phase("Judging", "judgments", total);
    }

    fn on_judgment_complete(&self, _index: usize, _total: usize, _metric: &str, _passed: Option<bool>) {
        self.bar.inc(1);
    }

    fn on_evaluation_complete(&self, passed: usize, failed: usize, errored: usize) {
        self.bar.finish_and_clear();
        let failures = self.query_failures.load(Ordering::SeqCst);
        if failures > 0 {
            eprintln!(
                "{} {} vision queries returned no answer",
                yellow("⚠"),
                bold(&failures.to_string())
            );
        }
        eprintln!(
            "{} judged: {} passed, {} failed, {} errored",
            if failed == 0 && errored == 0 {
                green("✔")
            } else {
                cyan("◆")
            },
            green(&passed.to_string()),
            red(&failed.to_string()),
            yellow(&errored.to_string()),
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Render attack images
  attack-eval render-pdfs --rescale 0.25
  attack-eval render-text --words-file animals.txt

  # Evaluate a local model served by an OpenAI-compatible endpoint
  attack-eval eval-text --words-file animals.txt --test-model llava

  # Evaluate a hosted model on PDF pages, both metrics, JSON report
  attack-eval eval-pdfs --test-model gpt-4o-mini --metric hallucination,correctness -o report.json

DATA LAYOUT:
  data/pdf/*.pdf                      PDFs to render
  data/pdf/pdf_descriptions.json      [{"filename": ..., "description": ...}]
  data/txt/*.txt                      word lists, one entry per line
  data/attack_images/pdf/             <stem>__page_<n>__rescale_<r>.png
  data/attack_images/txt/<list>/      <identifier>.png

ENVIRONMENT VARIABLES (also read from .env):
  OPENAI_API_KEY          Key for hosted models and the judge
  JUDGE_MODEL_NAME        Judge model (default gpt-4o)
  JUDGE_TEMPERATURE       Judge temperature (default 0.1)
  OPENAI_CUSTOM_ENDPOINT  OpenAI-compatible endpoint for non-hosted models
  DATA_PATH               Data root (default ./data)
  ATTACK_IMAGES_PATH      Attack image root (default <DATA_PATH>/attack_images)
  LOGGING_LEVEL           Log level when RUST_LOG is unset (default info)
  PDFIUM_LIB_PATH         Directory containing libpdfium
  ATTACK_FONT_PATH        TrueType font for text images
"#;

/// Evaluate vision language models on adversarial attack images.
#[derive(Parser, Debug)]
#[command(
    name = "attack-eval",
    version,
    about = "Evaluate vision language models on adversarial attack images",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// API key for hosted models and the judge.
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Judge model name.
    #[arg(long, global = true, env = "JUDGE_MODEL_NAME", default_value = DEFAULT_JUDGE_MODEL)]
    judge_model: String,

    /// Judge sampling temperature.
    #[arg(long, global = true, env = "JUDGE_TEMPERATURE", default_value_t = 0.1)]
    judge_temperature: f32,

    /// OpenAI-compatible endpoint for non-hosted models.
    #[arg(long, global = true, env = "OPENAI_CUSTOM_ENDPOINT", default_value = DEFAULT_CUSTOM_ENDPOINT)]
    custom_endpoint: String,

    /// Model-name prefixes routed to the hosted provider.
    #[arg(
        long,
        global = true,
        env = "HOSTED_MODEL_PREFIXES",
        value_delimiter = ',',
        default_value = "gpt"
    )]
    hosted_prefix: Vec<String>,

    /// Data root containing pdf/ and txt/.
    #[arg(long, global = true, env = "DATA_PATH", default_value = "data")]
    data_path: PathBuf,

    /// Attack image root (default: <data-path>/attack_images).
    #[arg(long, global = true, env = "ATTACK_IMAGES_PATH")]
    attack_images_path: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, global = true, env = "LOGGING_LEVEL", default_value = "info")]
    log_level: String,

    /// TrueType font for text images.
    #[arg(long, global = true, env = "ATTACK_FONT_PATH")]
    font_path: Option<PathBuf>,

    /// Directory containing libpdfium.
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Disable progress bar.
    #[arg(long, global = true, env = "ATTACK_EVAL_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate a model on the rendered PDF pages.
    EvalPdfs(EvalArgs),

    /// Evaluate a model on the rendered words of one word list.
    EvalText {
        /// Word list, as a path or a file name under <data-path>/txt.
        #[arg(long)]
        words_file: PathBuf,

        #[command(flatten)]
        eval: EvalArgs,
    },

    /// Render every PDF under <data-path>/pdf into degraded page images.
    RenderPdfs {
        /// Render scale before upscaling back (0 < r ≤ 1).
        #[arg(long, default_value_t = DEFAULT_RESCALE)]
        rescale: f32,
    },

    /// Render word lists into text images.
    RenderText {
        /// One word list; every *.txt under <data-path>/txt when omitted.
        #[arg(long)]
        words_file: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct EvalArgs {
    /// Prompt shown with every image.
    #[arg(long, env = "VISION_PROMPT", default_value = DEFAULT_VISION_PROMPT)]
    vision_prompt: String,

    /// Vision model under test.
    #[arg(long, env = "TEST_MODEL", default_value = DEFAULT_TEST_MODEL)]
    test_model: String,

    /// Metrics to compute.
    #[arg(long, value_enum, value_delimiter = ',', default_value = "hallucination")]
    metric: Vec<MetricArg>,

    /// Pass threshold for every metric (0.0–1.0).
    #[arg(long, env = "ATTACK_EVAL_THRESHOLD", default_value_t = 0.5)]
    threshold: f64,

    /// Concurrent vision queries (1 = sequential).
    #[arg(short, long, env = "ATTACK_EVAL_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Concurrent judge calls.
    #[arg(long, env = "ATTACK_EVAL_JUDGE_CONCURRENCY", default_value_t = 8)]
    judge_concurrency: usize,

    /// Retries per model call.
    #[arg(long, env = "ATTACK_EVAL_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Per-call timeout in seconds.
    #[arg(long, env = "ATTACK_EVAL_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Max output tokens per model call.
    #[arg(long, env = "ATTACK_EVAL_MAX_TOKENS", default_value_t = 1024)]
    max_tokens: usize,

    /// Print the full report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Write the full JSON report to this file.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum MetricArg {
    Hallucination,
    Correctness,
}

impl From<MetricArg> for MetricKind {
    fn from(v: MetricArg) -> Self {
        match v {
            MetricArg::Hallucination => MetricKind::Hallucination,
            MetricArg::Correctness => MetricKind::Correctness,
        }
    }
}

fn main() -> Result<()> {
    // .env must be loaded before clap reads its env fallbacks.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let json_mode = matches!(
        &cli.command,
        Command::EvalPdfs(EvalArgs { json: true, .. })
            | Command::EvalText {
                eval: EvalArgs { json: true, .. },
                ..
            }
    );
    let show_progress = !cli.global.quiet && !cli.global.no_progress && !json_mode;
    init_logging(&cli.global, show_progress);

    tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?
        .block_on(dispatch(cli, show_progress))
}

// ── Logging setup ────────────────────────────────────────────────────────
// RUST_LOG wins; otherwise --verbose / --quiet; otherwise LOGGING_LEVEL.
// INFO-level library logs are suppressed while the progress bar is active.
fn init_logging(global: &GlobalArgs, show_progress: bool) {
    let filter = if global.verbose {
        "debug".to_string()
    } else if global.quiet || show_progress {
        "error".to_string()
    } else {
        global.log_level.to_lowercase()
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli, show_progress: bool) -> Result<()> {
    match cli.command {
        Command::EvalPdfs(ref eval) => {
            evaluate(&cli.global, eval, SourceKind::Pdf, show_progress).await
        }
        Command::EvalText {
            ref words_file,
            ref eval,
        } => {
            let source = SourceKind::Text {
                words_file: words_file.clone(),
            };
            evaluate(&cli.global, eval, source, show_progress).await
        }
        Command::RenderPdfs { rescale } => {
            let settings = build_settings(&cli.global, None, None)?;
            let written = render_pdfs(&settings, rescale)
                .await
                .context("PDF rendering failed")?;
            if !cli.global.quiet {
                eprintln!(
                    "{} {} page images  →  {}",
                    green("✔"),
                    bold(&written.len().to_string()),
                    settings.pdf_images_dir().display()
                );
            }
            Ok(())
        }
        Command::RenderText { ref words_file } => {
            let settings = build_settings(&cli.global, None, None)?;
            let written = render_all_word_lists(words_file.as_deref(), &settings)
                .context("Text image rendering failed")?;
            if !cli.global.quiet {
                eprintln!(
                    "{} {} text images  →  {}",
                    green("✔"),
                    bold(&written.len().to_string()),
                    settings.attack_images_path.join("txt").display()
                );
            }
            Ok(())
        }
    }
}

async fn evaluate(
    global: &GlobalArgs,
    eval: &EvalArgs,
    source: SourceKind,
    show_progress: bool,
) -> Result<()> {
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn EvalProgressCallback>)
    } else {
        None
    };
    let settings = build_settings(global, Some(eval), progress)?;
    let metrics: Vec<MetricKind> = eval.metric.iter().copied().map(Into::into).collect();

    let output = run(&source, &eval.vision_prompt, &eval.test_model, &metrics, &settings)
        .await
        .context("Evaluation failed")?;

    if let Some(ref path) = eval.output {
        write_report(&output, path)
            .await
            .context("Failed to write report")?;
    }

    if eval.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise report")?;
        println!("{json}");
    } else if !global.quiet {
        print_report(&output);
        if let Some(ref path) = eval.output {
            eprintln!("   report  →  {}", bold(&path.display().to_string()));
        }
    }

    Ok(())
}

/// Map CLI args to `EvalSettings`.
fn build_settings(
    global: &GlobalArgs,
    eval: Option<&EvalArgs>,
    progress: Option<ProgressCallback>,
) -> Result<EvalSettings> {
    let mut builder = EvalSettings::builder()
        .judge_model(&global.judge_model)
        .judge_temperature(global.judge_temperature)
        .custom_endpoint(&global.custom_endpoint)
        .hosted_prefixes(global.hosted_prefix.iter().map(|p| p.trim().to_string()))
        .data_path(&global.data_path);

    if let Some(ref key) = global.api_key {
        builder = builder.api_key(key);
    }
    if let Some(ref path) = global.attack_images_path {
        builder = builder.attack_images_path(path);
    }
    if let Some(ref path) = global.font_path {
        builder = builder.font_path(path);
    }
    if let Some(ref path) = global.pdfium_lib_path {
        builder = builder.pdfium_lib_path(path);
    }
    if let Some(eval) = eval {
        builder = builder
            .threshold(eval.threshold)
            .concurrency(eval.concurrency)
            .judge_concurrency(eval.judge_concurrency)
            .max_retries(eval.max_retries)
            .api_timeout_secs(eval.api_timeout)
            .max_tokens(eval.max_tokens);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Per-case table followed by per-metric totals.
fn print_report(output: &RunOutput) {
    let report = &output.report;
    println!(
        "{}  model {}  judge {}  source {}",
        bold("Evaluation"),
        cyan(&output.model),
        cyan(&report.judge_model),
        output.source
    );
    println!("{}", dim(&format!("prompt: {}", output.prompt)));
    println!();

    for result in &report.cases {
        for metric in &result.metrics {
            let (mark, detail) = match &metric.outcome {
                MetricOutcome::Scored {
                    score,
                    passed,
                    reason,
                } => (
                    if *passed { green("PASS") } else { red("FAIL") },
                    format!("{score:.2}  {}", dim(&truncate(reason, 80))),
                ),
                MetricOutcome::Failed { error } => (yellow("ERR "), yellow(&error.to_string())),
            };
            println!(
                "  {}  {:<30}  {:<13}  {}",
                mark,
                result.case.identifier,
                metric.metric.name(),
                detail
            );
        }
        if let Some(ref err) = result.case.vision_error {
            println!("        {}", dim(&format!("vision query failed: {err}")));
        }
    }

    println!();
    for (metric, summary) in &report.summary {
        let mean = summary
            .mean_score
            .map_or_else(|| "n/a".to_string(), |m| format!("{m:.3}"));
        println!(
            "  {:<13}  {} passed  {} failed  {} errored  mean {}",
            metric.name(),
            green(&summary.passed.to_string()),
            red(&summary.failed.to_string()),
            yellow(&summary.errored.to_string()),
            mean
        );
    }
    println!(
        "  {}",
        dim(&format!(
            "{} cases, {} vision failures, judged in {}ms",
            report.cases.len(),
            report.vision_failures(),
            report.duration_ms
        ))
    );
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        let cut: String = s.chars().take(max_chars - 1).collect();
        format!("{cut}\u{2026}")
    } else {
        s.to_string()
    }
}
