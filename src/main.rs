use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing_subscriber::EnvFilter;

mod bot;
mod citations;
mod config;
mod error;
mod eval;
mod grader;
mod models;
mod report;
mod rules;
mod runner;
mod scoring;

use bot::OpenAiBot;
use citations::CitationValidator;
use config::{EvalSettings, StyleGuide};
use grader::JudgeGrader;

#[derive(Parser)]
#[command(
    name = "shopbot-eval",
    version,
    about = "Offline quality evaluation for the shop assistant bot"
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to a TOML settings file (defaults apply without one)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for report artifacts (overrides settings)
    #[arg(long, global = true)]
    reports_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Grade bot responses against the brand style guide
    EvaluateStyle {
        /// Judge model override
        #[arg(long)]
        eval_model: Option<String>,

        /// Prompt file, one question per line
        #[arg(long, default_value = "data/style_prompts.txt")]
        prompts: PathBuf,
    },
    /// Check citations and abstention behavior on knowledge-base questions
    EvaluateRag {
        /// Prompt file: {"prompts": [{"question", "oos", "category"}]}
        #[arg(long, default_value = "data/rag_prompts.json")]
        prompts: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "shopbot_eval=debug"
    } else {
        "shopbot_eval=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Cancellation on Ctrl-C: in-flight evaluations finish, queued ones are
/// dropped, and whatever completed is still summarized and persisted.
fn install_ctrl_c(cancel: &CancellationToken) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted; finishing in-flight evaluations...");
            cancel.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut settings = match &args.config {
        Some(path) => EvalSettings::from_file(path)?,
        None => EvalSettings::default(),
    };
    if let Some(dir) = &args.reports_dir {
        settings.reports_dir = dir.display().to_string();
    }

    let guide = StyleGuide::from_file(Path::new(&settings.style_guide_path))?;
    // fail on an unknown persona before any model call is made
    guide.person(&settings.person)?;

    let cancel = CancellationToken::new();
    install_ctrl_c(&cancel);

    match args.command {
        Command::EvaluateStyle { eval_model, prompts } => {
            if let Some(model) = eval_model {
                settings.eval_model = model;
            }
            let prompt_set = config::load_style_prompts(&prompts)?;
            let bot = OpenAiBot::from_settings(&settings, &guide)?;
            let grader = JudgeGrader::from_settings(&settings, &guide)?;

            let items = eval::run_style(&settings, &bot, &grader, &prompt_set, &cancel).await;
            let summary = scoring::summarize(&items);
            report::print_style_digest(&summary, &settings);
            if let Err(err) =
                report::write_style_reports(Path::new(&settings.reports_dir), &settings, &summary, &items)
            {
                error!(error = %err, "failed to persist style reports");
                return Err(err);
            }
        }
        Command::EvaluateRag { prompts } => {
            let prompt_set = config::load_rag_prompts(&prompts)?;
            let bot = OpenAiBot::from_settings(&settings, &guide)?;
            let fallback = guide.person(&settings.person)?.no_data_fallback().to_string();
            let validator = CitationValidator::new(fallback);

            let items = eval::run_rag(&settings, &bot, &validator, &prompt_set, &cancel).await;
            let summary = scoring::summarize(&items);
            report::print_rag_digest(&summary, &settings);
            if let Err(err) =
                report::write_rag_report(Path::new(&settings.reports_dir), &settings, &summary, &items)
            {
                error!(error = %err, "failed to persist RAG report");
                return Err(err);
            }
        }
    }

    Ok(())
}
