//! Render math fragments or whole solutions from the command line.
//!
//! ```text
//! mathfallback '$x^2 + 1$'
//! mathfallback --display --backend plain '\frac{1}{2}'
//! mathfallback --solution solution.json --log-format json
//! ```

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

use math_fallback::{
    BackendKind, BatchSummary, Orchestrator, OrchestratorConfig, RenderOptions, RenderOutcome,
    RenderStats, Result, Solution, Surface,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "mathfallback", version, about = "Render math with automatic backend fallback")]
struct Cli {
    /// Fragment to render. Read from stdin when omitted.
    content: Option<String>,

    /// Render a solution JSON file instead of a single fragment.
    #[arg(long, value_name = "PATH", conflicts_with = "content")]
    solution: Option<PathBuf>,

    /// Orchestrator configuration (TOML).
    #[arg(long = "config-file", env = "MATHFALLBACK_CONFIG_FILE", value_name = "PATH")]
    config_file: Option<PathBuf>,

    #[arg(long, action = clap::ArgAction::SetTrue)]
    display: bool,

    /// Force a backend: katex, mathml or plain.
    #[arg(long, value_name = "KIND", value_parser = parse_backend)]
    backend: Option<BackendKind>,

    /// Escalate any failure to high severity.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    critical: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
}

#[derive(Serialize)]
struct FragmentReport<'a> {
    outcome: RenderOutcome,
    surface: &'a Surface,
    stats: RenderStats,
}

#[derive(Serialize)]
struct SolutionReport<'a> {
    summary: BatchSummary,
    surface: &'a Surface,
    stats: RenderStats,
}

fn parse_backend(value: &str) -> std::result::Result<BackendKind, String> {
    value.parse().map_err(|err: math_fallback::ConfigError| err.to_string())
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    let fmt_layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
    };

    if let Err(err) = tracing_subscriber::registry().with(env_filter).with(fmt_layer).try_init() {
        eprintln!("failed to install tracing subscriber: {err}");
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config_file {
        Some(path) => OrchestratorConfig::from_path(path)?,
        None => OrchestratorConfig::default(),
    };
    let orchestrator = Orchestrator::new(config)?;
    let options = RenderOptions {
        display_mode: cli.display,
        force_backend: cli.backend,
        critical: cli.critical,
    };

    let report = match &cli.solution {
        Some(path) => {
            let solution = Solution::from_json(&std::fs::read_to_string(path)?)?;
            let mut surface = solution.to_surface(&orchestrator.config().content_marker);
            let summary = orchestrator.render_batch(&mut surface, options).await;
            serde_json::to_string_pretty(&SolutionReport {
                summary,
                surface: &surface,
                stats: orchestrator.stats(),
            })?
        }
        None => {
            let content = match cli.content {
                Some(content) => content,
                None => {
                    let mut buffer = String::new();
                    std::io::stdin().read_to_string(&mut buffer)?;
                    buffer
                }
            };
            let mut surface = Surface::new("fragment");
            let outcome = orchestrator.render(&content, &mut surface, options).await;
            serde_json::to_string_pretty(&FragmentReport {
                outcome,
                surface: &surface,
                stats: orchestrator.stats(),
            })?
        }
    };

    println!("{report}");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
