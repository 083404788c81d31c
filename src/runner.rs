//! Runs the wrapped child command, teeing its output while buffering
//! stderr for the pipeline.

use crate::report::CrashReport;
use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Exit code when the command binary cannot be found.
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit code for a run interrupted by the user.
pub const EXIT_INTERRUPTED: i32 = 130;

/// What happened to the child process.
#[derive(Debug)]
pub struct RunOutcome {
    pub exit_code: i32,
    /// Present when the child exited non-zero with something on stderr.
    pub report: Option<CrashReport>,
}

/// Spawn `command` in `working_directory`, stream its output through to
/// the parent, and capture stderr. Cancellation kills the child and maps
/// to the interrupted exit code.
pub async fn run_command(
    command: &[String],
    working_directory: &Path,
    cancel: &CancellationToken,
) -> Result<RunOutcome> {
    let (program, args) = command
        .split_first()
        .context("no command given to run")?;

    let mut child = match Command::new(program)
        .args(args)
        .current_dir(working_directory)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            eprintln!("tsugix: command not found: {}", program);
            return Ok(RunOutcome {
                exit_code: EXIT_NOT_FOUND,
                report: None,
            });
        }
        Err(err) => return Err(err).context(format!("failed to spawn {}", program)),
    };

    let stderr_buffer = Arc::new(Mutex::new(String::new()));

    let stdout = child.stdout.take().context("child stdout not captured")?;
    let stdout_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            println!("{}", line);
        }
    });

    let stderr = child.stderr.take().context("child stderr not captured")?;
    let buffer_for_reader = Arc::clone(&stderr_buffer);
    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            eprintln!("{}", line);
            let mut buffer = buffer_for_reader
                .lock()
                .expect("stderr buffer lock poisoned");
            buffer.push_str(&line);
            buffer.push('\n');
        }
    });

    let status = tokio::select! {
        status = child.wait() => status.context("waiting for child")?,
        _ = cancel.cancelled() => {
            debug!("cancellation requested, killing child");
            let _ = child.kill().await;
            let _ = stdout_task.await;
            let _ = stderr_task.await;
            return Ok(RunOutcome {
                exit_code: EXIT_INTERRUPTED,
                report: None,
            });
        }
    };

    // Drain both streams before reading the buffer.
    let _ = stdout_task.await;
    let _ = stderr_task.await;

    let exit_code = exit_code_of(&status);
    debug!(exit_code, "child exited");

    if exit_code == 0 {
        return Ok(RunOutcome {
            exit_code,
            report: None,
        });
    }

    let stderr_text = stderr_buffer
        .lock()
        .expect("stderr buffer lock poisoned")
        .clone();

    let report = if stderr_text.trim().is_empty() {
        None
    } else {
        Some(CrashReport::new(
            stderr_text,
            exit_code,
            command.join(" "),
            working_directory.to_path_buf(),
        ))
    };

    Ok(RunOutcome { exit_code, report })
}

/// A signal death reports as 128 + signal where we can see it; SIGINT is
/// the interrupted code.
fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
