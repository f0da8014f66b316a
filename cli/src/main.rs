use std::path::{Component, Path, PathBuf};
use std::sync::Once;
use std::time::Duration;

use anyhow::Context;
use blockrt_core::rt::env_toggle_enabled;
use blockrt_core::{SchedulerConfig, ThreadManager};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};

mod headless;
mod project;

use headless::HeadlessStage;
use project::Project;

static TRACE_INIT: Once = Once::new();
const TRACE_ENV: &str = "BLOCKRT_TRACE";
const DEFAULT_TRACE_FILTER: &str = "blockrt::rt=debug,blockrt::rt::error=warn,blockrt=info";

#[derive(Debug, Parser)]
#[command(name = "blockrt", author, version, about = "Run block-script projects headlessly", long_about = None)]
struct CliArgs {
    #[command(subcommand)]
    command: Option<Commands>,

    /// If no subcommand, run this project with default settings
    #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
    file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start every green-flag script and tick until all scripts finish.
    Run {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
        #[command(flatten)]
        options: RunOptions,
    },
    /// Load a project and report what it contains without running it.
    Check {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
    },
}

#[derive(Debug, Clone, Args)]
struct RunOptions {
    /// Time slice of one process per tick, in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,
    /// Let the first script error abort the run
    #[arg(long)]
    no_catch: bool,
    /// Broadcasts leave running listener scripts alone
    #[arg(long)]
    thread_safe: bool,
    /// Give up after this many ticks
    #[arg(long, default_value_t = 100_000)]
    max_ticks: u64,
    /// Pause between ticks, in milliseconds
    #[arg(long, default_value_t = 0)]
    tick_ms: u64,
    /// Answer for the next "ask" prompt; repeatable
    #[arg(long = "answer", value_name = "TEXT")]
    answers: Vec<String>,
    /// Print every variable once the run ends
    #[arg(long)]
    vars: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            no_catch: false,
            thread_safe: false,
            max_ticks: 100_000,
            tick_ms: 0,
            answers: Vec::new(),
            vars: false,
        }
    }
}

impl RunOptions {
    /// Environment defaults with command-line flags applied on top.
    fn scheduler_config(&self, base: SchedulerConfig) -> SchedulerConfig {
        let mut config = base.with_thread_safe(self.thread_safe);
        if let Some(ms) = self.timeout_ms {
            config = config.with_timeout(Duration::from_millis(ms));
        }
        if self.no_catch {
            config = config.with_catch_errors(false);
        }
        config
    }
}

fn sanitize_path(raw: &str) -> anyhow::Result<PathBuf> {
    let p = Path::new(raw);
    if p.components().any(|comp| matches!(comp, Component::ParentDir)) {
        return Err(anyhow::anyhow!(
            "Parent directory components ('..') are not allowed in file paths."
        ));
    }
    Ok(p.to_path_buf())
}

fn parse_sanitized_path(raw: &str) -> Result<PathBuf, String> {
    sanitize_path(raw).map_err(|e| e.to_string())
}

fn filter_expr_from(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("1")
        || trimmed.eq_ignore_ascii_case("true")
        || trimmed.eq_ignore_ascii_case("on")
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn maybe_init_tracing() {
    let raw = match std::env::var(TRACE_ENV) {
        Ok(value) => value,
        Err(_) => return,
    };

    if !env_toggle_enabled(&raw) {
        return;
    }

    TRACE_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::fmt;

        let filter_expr = filter_expr_from(&raw).or_else(|| std::env::var("RUST_LOG").ok());

        let builder = fmt().with_writer(std::io::stderr);

        let builder = match filter_expr.and_then(|expr| EnvFilter::try_new(expr).ok()) {
            Some(filter) => builder.with_env_filter(filter),
            None => builder.with_env_filter(DEFAULT_TRACE_FILTER),
        };

        let _ = builder.try_init();
    });
}

/// How a run ended.
#[derive(Debug, PartialEq, Eq)]
struct RunSummary {
    ticks: u64,
    finished: bool,
    errors: Vec<String>,
}

fn run_project(project: &Project, options: &RunOptions, base: SchedulerConfig) -> anyhow::Result<RunSummary> {
    let stage = HeadlessStage::new(project, options.answers.clone());
    let config = options.scheduler_config(base);
    debug!(?config, scripts = project.script_count(), "starting project");
    let mut threads = ThreadManager::new(stage.clone(), config);
    for (top, receiver) in stage.green_flag_scripts() {
        threads.start_process(top, receiver.clone(), options.thread_safe);
    }

    let mut ticks = 0;
    while !threads.is_idle() && ticks < options.max_ticks {
        let stepped = threads.step();
        for line in stage.transcript().take() {
            println!("{}", line);
        }
        stepped.with_context(|| format!("tick {}", ticks + 1))?;
        ticks += 1;
        if options.tick_ms > 0 {
            std::thread::sleep(Duration::from_millis(options.tick_ms));
        }
    }
    let finished = threads.is_idle();
    if !finished {
        threads.stop_all();
        threads.step()?;
    }
    info!(ticks, finished, "run ended");

    if options.vars {
        for line in stage.variable_report() {
            println!("{}", line);
        }
    }
    Ok(RunSummary {
        ticks,
        finished,
        errors: stage.errors(),
    })
}

fn run_file(path: &Path, options: &RunOptions) -> anyhow::Result<()> {
    let project = Project::load(path)?;
    let summary = run_project(&project, options, SchedulerConfig::from_env())?;
    if !summary.finished {
        eprintln!("stopped after {} ticks with scripts still running", summary.ticks);
    }
    if !summary.errors.is_empty() {
        for message in &summary.errors {
            eprintln!("Error: {}", message);
        }
        std::process::exit(1);
    }
    Ok(())
}

fn check_file(path: &Path) -> anyhow::Result<()> {
    let project = Project::load(path)?;
    println!(
        "{}: {} sprite(s), {} script(s), {} custom block(s)",
        path.display(),
        project.sprites.len(),
        project.script_count(),
        project.definitions.len()
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    maybe_init_tracing();

    let CliArgs { command, file } = CliArgs::parse();
    match (command, file) {
        (Some(Commands::Run { file, options }), _) => run_file(&file, &options),
        (Some(Commands::Check { file }), _) => check_file(&file),
        (None, Some(file)) => run_file(&file, &RunOptions::default()),
        (None, None) => {
            eprintln!("Usage: blockrt [run|check] FILE (see --help)");
            std::process::exit(2);
        }
    }
}
