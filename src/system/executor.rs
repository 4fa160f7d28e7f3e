// src/system/executor.rs

use crate::CancellationToken;
use std::io::{ErrorKind, Read, Write};
use std::process::{Command as StdCommand, Stdio};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command could not be parsed: {0}")]
    CommandParse(String),
    #[error("No command specified to run.")]
    EmptyCommand,
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, std::io::Error),
    #[error("Command '{command}' exited with a non-zero error code: {stderr}")]
    NonZeroExitStatus { command: String, stderr: String },
    #[error("Command '{command}' produced output that was not valid UTF-8")]
    InvalidUtf8Output {
        command: String,
        #[source]
        source: std::string::FromUtf8Error,
    },
    #[error("Operation was cancelled by the user.")]
    Cancelled,
}

/// Fails with `Cancelled` once the user has pressed Ctrl+C.
pub fn check_for_cancellation(token: &CancellationToken) -> Result<(), ExecutionError> {
    if token.load(Ordering::SeqCst) {
        Err(ExecutionError::Cancelled)
    } else {
        Ok(())
    }
}

/// Splits a configured command line (e.g. `kubectl --context dev`) into
/// the program and its leading arguments.
pub fn split_command_line(command_line: &str) -> Result<(String, Vec<String>), ExecutionError> {
    let mut parts = shlex::split(command_line.trim())
        .ok_or_else(|| ExecutionError::CommandParse(command_line.to_string()))?
        .into_iter();
    let program = parts.next().ok_or(ExecutionError::EmptyCommand)?;
    Ok((program, parts.collect()))
}

fn spawn_reader<R: Read + Send + 'static>(mut source: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Err(e) = source.read_to_end(&mut buffer) {
            log::warn!("Failed to read child output: {}", e);
        }
        buffer
    })
}

/// Runs a program to completion and captures its standard output.
///
/// `stdin`, when given, is written to the child and then closed. The wait can
/// be interrupted through the cancellation token, in which case the child is
/// killed.
pub fn execute_and_capture_output(
    program: &str,
    args: &[String],
    stdin: Option<&str>,
    cancellation_token: &CancellationToken,
) -> Result<String, ExecutionError> {
    check_for_cancellation(cancellation_token)?;

    let display = format!("{} {}", program, args.join(" "));
    log::debug!("Running '{}'", display);

    let mut child = StdCommand::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ExecutionError::CommandFailed(display.clone(), e))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        if let Err(e) = pipe.write_all(input.as_bytes())
            && e.kind() != ErrorKind::BrokenPipe
        {
            return Err(ExecutionError::CommandFailed(display, e));
        }
        // Dropping the pipe closes the child's stdin.
    }

    let stdout_reader = child.stdout.take().map(spawn_reader);
    let stderr_reader = child.stderr.take().map(spawn_reader);

    // Non-blocking wait loop to allow for cancellation.
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if check_for_cancellation(cancellation_token).is_err() {
                    log::debug!(
                        "Cancellation requested, killing child process (PID: {})...",
                        child.id()
                    );
                    if let Err(e) = child.kill() {
                        log::warn!("Failed to kill child process {}: {}", child.id(), e);
                    }
                    child.wait().ok();
                    return Err(ExecutionError::Cancelled);
                }
                thread::sleep(Duration::from_millis(100));
            }
            Err(e) => return Err(ExecutionError::CommandFailed(display, e)),
        }
    };

    let stdout = stdout_reader
        .map(|h| h.join().unwrap_or_default())
        .unwrap_or_default();
    let stderr = stderr_reader
        .map(|h| h.join().unwrap_or_default())
        .unwrap_or_default();

    if !status.success() {
        return Err(ExecutionError::NonZeroExitStatus {
            command: display,
            stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
        });
    }

    String::from_utf8(stdout).map_err(|e| ExecutionError::InvalidUtf8Output {
        command: display,
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_split_command_line() {
        let (program, args) = split_command_line("kubectl --context 'kind dev'").unwrap();
        assert_eq!(program, "kubectl");
        assert_eq!(args, vec!["--context".to_string(), "kind dev".to_string()]);

        assert!(matches!(split_command_line("   "), Err(ExecutionError::EmptyCommand)));
        assert!(matches!(
            split_command_line("kubectl 'unterminated"),
            Err(ExecutionError::CommandParse(_))
        ));
    }

    #[test]
    fn test_cancelled_token_stops_before_spawning() {
        let token = Arc::new(AtomicBool::new(true));
        let result = execute_and_capture_output("definitely-not-a-program", &[], None, &token);
        assert!(matches!(result, Err(ExecutionError::Cancelled)));
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_output_with_stdin() {
        let token = Arc::new(AtomicBool::new(false));
        let output = execute_and_capture_output("cat", &[], Some("manifest"), &token).unwrap();
        assert_eq!(output, "manifest");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_reports_stderr() {
        let token = Arc::new(AtomicBool::new(false));
        let args = vec!["-c".to_string(), "echo boom >&2; exit 3".to_string()];
        let result = execute_and_capture_output("sh", &args, None, &token);
        assert!(matches!(
            result,
            Err(ExecutionError::NonZeroExitStatus { stderr, .. }) if stderr == "boom"
        ));
    }

    #[test]
    fn test_missing_program_fails_to_spawn() {
        let token = Arc::new(AtomicBool::new(false));
        let result = execute_and_capture_output("definitely-not-a-program-kubesol", &[], None, &token);
        assert!(matches!(result, Err(ExecutionError::CommandFailed(_, _))));
    }
}
