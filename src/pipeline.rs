//! Wires the whole crash-to-fix flow together and reports exactly
//! one outcome per failed run.

use crate::config::Config;
use crate::context::{ContextEngine, ErrorContext};
use crate::llm::client::{LlmClient, LlmError};
use crate::llm::parse::{parse_fix_response, FixSuggestion};
use crate::llm::prompt::build_user_payload;
use crate::patcher::{FilePatcher, PatchOptions};
use crate::report::CrashReport;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Progress of one pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Parsed,
    Prompted,
    Responded,
    Reviewed,
    Applied,
    Rejected,
    Failed,
    Skipped,
    NoFix,
    AiError,
}

/// Terminal result of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Applied { backup_path: PathBuf },
    Rejected,
    Failed { message: String },
    NoFix,
    AiError { message: String },
    Skipped,
}

/// The host's verdict on a proposed fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Review {
    Approve,
    Reject,
    Skip,
}

/// Host-mediated confirmation seam. Interactive hosts prompt; automation
/// answers from configuration.
pub trait FixReviewer {
    fn review(&self, fix: &FixSuggestion, context: &ErrorContext) -> Review;
}

/// Approves everything when `auto_apply` is set, otherwise skips.
pub struct AutoReviewer {
    pub auto_apply: bool,
}

impl FixReviewer for AutoReviewer {
    fn review(&self, _fix: &FixSuggestion, _context: &ErrorContext) -> Review {
        if self.auto_apply {
            Review::Approve
        } else {
            Review::Skip
        }
    }
}

pub struct Pipeline {
    engine: ContextEngine,
    config: Config,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self {
            engine: ContextEngine::new(),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Drive one crash report to a terminal outcome.
    pub async fn run(
        &self,
        report: &CrashReport,
        reviewer: &dyn FixReviewer,
        cancel: &CancellationToken,
    ) -> PipelineOutcome {
        let mut state = PipelineState::Idle;
        debug!(?state, command = %report.command(), "pipeline started");

        let Some(context) = self.engine.process(report) else {
            debug!("no stderr to analyze");
            return PipelineOutcome::Skipped;
        };
        state = PipelineState::Parsed;
        debug!(?state, language = %context.language, "crash parsed");

        let client = match LlmClient::from_config(&self.config) {
            Ok(client) => client,
            Err(err) => {
                info!(%err, "no LLM client available, skipping fix");
                return PipelineOutcome::Skipped;
            }
        };

        let system = self.config.system_prompt();
        let user = build_user_payload(&context);
        state = PipelineState::Prompted;
        debug!(?state, payload_bytes = user.len(), "prompt ready");

        let response = match client.request_fix(system, &user, cancel).await {
            Ok(text) => text,
            Err(err) if err.is_cancelled() => {
                info!("fix request cancelled");
                return PipelineOutcome::Skipped;
            }
            Err(err) => {
                state = PipelineState::AiError;
                debug!(?state, %err, "LLM call failed");
                return PipelineOutcome::AiError {
                    message: err.to_string(),
                };
            }
        };
        state = PipelineState::Responded;
        debug!(?state, response_bytes = response.len(), "response received");

        self.review_and_apply(&response, &context, reviewer)
    }

    /// Parse, confirm, and apply. Split out so the post-transport half is
    /// testable without a network.
    fn review_and_apply(
        &self,
        response: &str,
        context: &ErrorContext,
        reviewer: &dyn FixReviewer,
    ) -> PipelineOutcome {
        let Some(fix) = parse_fix_response(response) else {
            debug!("response contained no valid fix");
            return PipelineOutcome::NoFix;
        };

        match reviewer.review(&fix, context) {
            Review::Approve => {}
            Review::Reject => return PipelineOutcome::Rejected,
            Review::Skip => return PipelineOutcome::Skipped,
        }
        debug!(state = ?PipelineState::Reviewed, confidence = fix.confidence, "fix confirmed");

        let patcher = FilePatcher::new(PatchOptions {
            root_directory: self
                .config
                .root_directory(&context.working_directory),
            allow_outside_root: false,
            create_backup: self.config.auto_backup,
            verify_content: true,
        });

        let result = patcher.apply(&fix);
        if result.success {
            info!(backup = %result.backup_path.display(), "fix applied");
            PipelineOutcome::Applied {
                backup_path: result.backup_path,
            }
        } else {
            PipelineOutcome::Failed {
                message: result
                    .error_message
                    .unwrap_or_else(|| "patch failed".to_string()),
            }
        }
    }
}

/// Classify an [`LlmError`] the way the orchestrator does; exposed for
/// hosts that drive the transport directly.
pub fn outcome_for_llm_error(err: &LlmError) -> PipelineOutcome {
    if err.is_cancelled() {
        PipelineOutcome::Skipped
    } else {
        PipelineOutcome::AiError {
            message: err.to_string(),
        }
    }
}
