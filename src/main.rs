use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use remend::config::{
    self, RunConfig, StoredConfig, DEFAULT_DEBUG_INFO_DIR, DEFAULT_DEEP_TRY, DEFAULT_DYNAMIC_DIR,
    DEFAULT_METHOD_CALLS_DIR, DEFAULT_MODEL, DEFAULT_OUT_DIR, DEFAULT_RUNNER,
    DEFAULT_TEMPERATURE, DEFAULT_TEST_TIMEOUT_SECS, DEFAULT_WIDTH_TRY,
};
use remend::dataset::{self, BugId};
use remend::llm::{OpenAiClient, DEFAULT_API_BASE};
use remend::prompts::PromptMode;
use remend::repo;
use remend::results::{EvalRow, RunLog};
use remend::search::{self, SearchVerdict};
use remend::validate::WorkTreeValidator;

#[derive(Parser)]
#[command(
    name = "remend",
    about = "Iterative LLM repair for Defects4J bugs",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the repair loop over a sample file
    Run(RunArgs),

    /// Prepare Defects4J working trees for a list of bugs
    Checkout {
        /// Directory to place the checkouts in
        #[arg(long)]
        base_dir: PathBuf,

        /// Comma-separated bug slugs, e.g. Lang_1,Math_5
        #[arg(long, value_delimiter = ',', required = true)]
        slugs: Vec<String>,

        /// Defects4J command
        #[arg(long, default_value = DEFAULT_RUNNER)]
        runner: String,
    },

    /// Store API credentials and defaults for later runs
    Config {
        /// API key to store
        #[arg(long)]
        api_key: Option<String>,

        /// OpenAI-compatible API base URL to store
        #[arg(long)]
        api_base: Option<String>,

        /// Model name to store
        #[arg(long)]
        model: Option<String>,

        /// Print the stored values
        #[arg(long)]
        show: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Buggy method samples, JSONL
    #[arg(long)]
    data: PathBuf,

    /// Recorded exception info, JSONL (exception mode)
    #[arg(long)]
    exceptions: Option<PathBuf>,

    /// Directory of Defects4J checkouts
    #[arg(long)]
    base_dir: PathBuf,

    /// Where logs, records, and the checkpoint go
    #[arg(long, default_value = DEFAULT_OUT_DIR)]
    out_dir: PathBuf,

    /// Prompt mode
    #[arg(long, value_enum, default_value = "pure")]
    mode: PromptMode,

    /// Model name (else stored config, else the default)
    #[arg(long)]
    model: Option<String>,

    /// OpenAI-compatible API base URL
    #[arg(long)]
    api_base: Option<String>,

    /// API key (else REMEND_API_KEY, else stored config)
    #[arg(long)]
    api_key: Option<String>,

    /// Maximum independent attempts per bug
    #[arg(long, default_value_t = DEFAULT_WIDTH_TRY)]
    width_try: u32,

    /// Maximum refinement rounds per attempt
    #[arg(long, default_value_t = DEFAULT_DEEP_TRY)]
    deep_try: u32,

    /// Sampling temperature
    #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
    temperature: f64,

    /// Timeout in seconds for one test-suite run
    #[arg(long, default_value_t = DEFAULT_TEST_TIMEOUT_SECS)]
    test_timeout: u64,

    /// Keep refining after a passing candidate instead of stopping
    #[arg(long)]
    no_early_stop: bool,

    /// Ignore the checkpoint and start from the first bug
    #[arg(long)]
    fresh: bool,

    /// Static per-bug execution traces (debuginfo mode)
    #[arg(long, default_value = DEFAULT_DEBUG_INFO_DIR)]
    debug_info_dir: PathBuf,

    /// Static per-bug called-method context (debuginfo mode)
    #[arg(long, default_value = DEFAULT_METHOD_CALLS_DIR)]
    method_calls_dir: PathBuf,

    /// Per-round traces collected during the run (debuginfo mode)
    #[arg(long, default_value = DEFAULT_DYNAMIC_DIR)]
    dynamic_dir: PathBuf,

    /// Defects4J command used for checkout and test runs
    #[arg(long, default_value = DEFAULT_RUNNER)]
    runner: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Checkout {
            base_dir,
            slugs,
            runner,
        } => checkout(&base_dir, &slugs, &runner),
        Commands::Config {
            api_key,
            api_base,
            model,
            show,
        } => configure(api_key, api_base, model, show),
    }
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("REMEND_LOG")
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();
}

async fn run(args: RunArgs) -> Result<()> {
    let stored = StoredConfig::load();
    let api_key = config::resolve_api_key(args.api_key, &stored)?;
    let api_base = config::resolve_api_base(args.api_base, &stored)?;
    let model = config::resolve_model(args.model, &stored);

    let run_config = RunConfig {
        data_path: args.data,
        exceptions_path: args.exceptions.clone().unwrap_or_default(),
        base_dir: args.base_dir,
        out_dir: args.out_dir,
        mode: args.mode,
        model,
        runner: args.runner,
        width_try: args.width_try,
        deep_try: args.deep_try,
        temperature: args.temperature,
        early_stop: !args.no_early_stop,
        test_timeout: Duration::from_secs(args.test_timeout),
        debug_info_dir: args.debug_info_dir,
        method_calls_dir: args.method_calls_dir,
        dynamic_dir: args.dynamic_dir,
        fresh: args.fresh,
    };

    let samples = dataset::load_samples(&run_config.data_path)?;
    let exceptions = match &args.exceptions {
        Some(path) => dataset::load_exceptions(path)?,
        None => Vec::new(),
    };
    if run_config.mode == PromptMode::Exception && exceptions.is_empty() {
        warn!("exception mode selected but no exception info loaded; prompts will carry placeholders");
    }

    let bugs = dataset::group_by_slug(samples);
    info!(
        bugs = bugs.len(),
        mode = run_config.mode.as_str(),
        model = %run_config.model,
        "starting repair run"
    );

    let log = RunLog::new(&run_config.out_dir, run_config.mode.as_str(), &run_config.model);
    let start = if run_config.fresh {
        0
    } else {
        log.load_checkpoint()?
    };
    if start > 0 {
        info!(start, "resuming from checkpoint");
    }

    let client = OpenAiClient::new(&api_base, &api_key, &run_config.model);
    let validator = WorkTreeValidator::new(
        run_config.base_dir.clone(),
        run_config.runner.clone(),
        run_config.test_timeout,
    );

    for (i, (slug, bug_samples)) in bugs.into_iter().enumerate().skip(start as usize) {
        let attempt_id = i as u64;
        let Some(bug) = BugId::parse(&slug) else {
            warn!(slug = %slug, "skipping malformed bug slug");
            log.save_checkpoint(attempt_id + 1)?;
            continue;
        };

        if let Err(err) = repo::verify_work_tree(&run_config.base_dir, &slug) {
            warn!(slug = %slug, error = %err, "work tree not available; recording aborted bug");
            log.append_eval(&EvalRow {
                attempt_id,
                bug_id: slug.clone(),
                reward: false,
                classification: format!("Work tree not available: {err}"),
                width_attempt: 0,
                depth_iteration: 0,
            })?;
            log.save_checkpoint(attempt_id + 1)?;
            continue;
        }

        let merged = dataset::merge_samples(bug_samples);
        let verdict = search::run_bug(
            &run_config,
            &client,
            &validator,
            &log,
            attempt_id,
            &bug,
            &merged,
            &exceptions,
        )
        .await?;
        match verdict {
            SearchVerdict::Succeeded => info!(slug = %slug, "bug repaired"),
            SearchVerdict::Exhausted => info!(slug = %slug, "attempt budget exhausted"),
            SearchVerdict::Aborted => warn!(slug = %slug, "bug aborted"),
        }
        log.save_checkpoint(attempt_id + 1)?;
    }

    info!("repair run complete");
    Ok(())
}

fn configure(
    api_key: Option<String>,
    api_base: Option<String>,
    model: Option<String>,
    show: bool,
) -> Result<()> {
    let mut stored = StoredConfig::load();
    let changed = stored.update(api_key, api_base, model)?;
    if changed {
        stored.save()?;
        println!("Saved {}", StoredConfig::location());
    }
    if show || !changed {
        println!("Config file: {}", StoredConfig::location());
        println!(
            "  api_key:  {}",
            if stored.api_key.is_some() {
                "(set)"
            } else {
                "(not set)"
            }
        );
        println!(
            "  api_base: {}",
            stored.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
        );
        println!(
            "  model:    {}",
            stored.model.as_deref().unwrap_or(DEFAULT_MODEL)
        );
    }
    Ok(())
}

fn checkout(base_dir: &Path, slugs: &[String], runner: &str) -> Result<()> {
    for slug in slugs {
        let Some(bug) = BugId::parse(slug) else {
            warn!(slug = %slug, "skipping malformed bug slug");
            continue;
        };
        if repo::verify_work_tree(base_dir, slug).is_ok() {
            info!(slug = %slug, "work tree already present");
            continue;
        }
        repo::checkout_bug(runner, base_dir, &bug)?;
        info!(slug = %slug, "checked out");
    }
    Ok(())
}
