//! tsugix - run a command, and when it crashes, ask an LLM for the fix.
//!
//! Wraps an arbitrary child command, parses its failure output into a
//! structured context, requests a structured patch from a hosted model,
//! and applies it under strict safety rules.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tsugix::config::Config;
use tsugix::llm::parse::FixSuggestion;
use tsugix::pipeline::{FixReviewer, Pipeline, PipelineOutcome, Review};
use tsugix::report::CrashReport;
use tsugix::runner::{self, EXIT_INTERRUPTED};

#[derive(Parser, Debug)]
#[command(
    name = "tsugix",
    about = "Runs a command and proposes an AI fix when it crashes",
    long_about = "Runs a command and, when it exits non-zero, parses the crash output,\n\
                  asks the configured LLM for a structured patch, and applies it\n\
                  under strict safety rules (path gate, content match, backup,\n\
                  atomic write).",
    version
)]
struct Args {
    /// Path to a config file (overrides the .tsugix.json search)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Apply the proposed fix without confirmation
    #[arg(long)]
    auto_apply: bool,

    /// Skip the pre-patch backup
    #[arg(long)]
    no_backup: bool,

    /// Re-run the original command after a successful patch
    #[arg(long)]
    rerun: bool,

    /// The command to run
    #[arg(required = true, last = true)]
    command: Vec<String>,
}

/// Prints the proposed fix, then follows the auto-apply setting.
struct CliReviewer {
    auto_apply: bool,
}

impl FixReviewer for CliReviewer {
    fn review(
        &self,
        fix: &FixSuggestion,
        _context: &tsugix::context::ErrorContext,
    ) -> Review {
        print_suggestion(fix);
        if self.auto_apply {
            Review::Approve
        } else {
            println!("  (re-run with --auto-apply to apply this fix)");
            Review::Skip
        }
    }
}

fn print_suggestion(fix: &FixSuggestion) {
    println!();
    println!("  Proposed fix (confidence {}%):", fix.confidence);
    if let Some(explanation) = &fix.explanation {
        println!("  {}", explanation);
    }
    for edit in &fix.edits {
        println!(
            "  {} lines {}-{}:",
            edit.file_path, edit.start_line, edit.end_line
        );
        for line in &edit.original_lines {
            println!("  - {}", line);
        }
        for line in edit.replacement.split('\n') {
            println!("  + {}", line);
        }
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    if args.auto_apply {
        config.auto_apply = true;
    }
    if args.no_backup {
        config.auto_backup = false;
    }
    if args.rerun {
        config.auto_rerun = true;
    }

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let working_directory = std::env::current_dir()?;
    let outcome = runner::run_command(&args.command, &working_directory, &cancel).await?;

    let Some(report) = outcome.report else {
        std::process::exit(outcome.exit_code);
    };

    let exit_code = drive_pipeline(config, report, &cancel, &args.command).await;
    std::process::exit(exit_code);
}

/// Run the fix pipeline for one crash and return the exit code the
/// wrapper should report.
async fn drive_pipeline(
    config: Config,
    report: CrashReport,
    cancel: &CancellationToken,
    command: &[String],
) -> i32 {
    let child_exit = report.exit_code();
    let auto_apply = config.auto_apply;
    let auto_rerun = config.auto_rerun;
    let pipeline = Pipeline::new(config);
    let reviewer = CliReviewer { auto_apply };

    let outcome = pipeline.run(&report, &reviewer, cancel).await;
    debug!(?outcome, "pipeline finished");

    match outcome {
        PipelineOutcome::Applied { backup_path } => {
            if backup_path.as_os_str().is_empty() {
                println!("  Fix applied.");
            } else {
                println!("  Fix applied. Backup: {}", backup_path.display());
            }
            if auto_rerun {
                println!("  Re-running: {}", command.join(" "));
                let rerun = runner::run_command(command, report.working_directory(), cancel).await;
                return match rerun {
                    Ok(outcome) => outcome.exit_code,
                    Err(_) => child_exit,
                };
            }
            child_exit
        }
        PipelineOutcome::Rejected => {
            println!("  Fix rejected.");
            child_exit
        }
        PipelineOutcome::Failed { message } => {
            eprintln!("  Fix could not be applied: {}", message);
            child_exit
        }
        PipelineOutcome::NoFix => {
            eprintln!("  The model did not produce a usable fix.");
            child_exit
        }
        PipelineOutcome::AiError { message } => {
            eprintln!("  AI request failed: {}", message);
            child_exit
        }
        PipelineOutcome::Skipped => {
            if cancel.is_cancelled() {
                EXIT_INTERRUPTED
            } else {
                child_exit
            }
        }
    }
}
