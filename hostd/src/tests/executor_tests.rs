//! Tests for the command executor
//!
//! The executor's contract is that it never errors: success, failure,
//! timeout and spawn problems all come back as result values.

use crate::executor::CommandExecutor;
use std::time::Duration;

fn executor() -> CommandExecutor {
    CommandExecutor::new(300_000, 60_000, false)
}

#[tokio::test]
async fn test_successful_command_trims_stdout() {
    let result = executor().execute("echo '  hello world  '").await;
    assert!(result.ok);
    assert_eq!(result.stdout, "hello world");
    assert!(result.error.is_none());
    assert!(result.duration_ms > 0.0);
}

#[tokio::test]
async fn test_shell_features_available() {
    // Handlers rely on pipelines and redirection; the executor must hand
    // the string to a real shell.
    let result = executor()
        .execute("printf 'a\\nb\\nc\\n' | wc -l | tr -d ' '")
        .await;
    assert!(result.ok);
    assert_eq!(result.stdout, "3");
}

#[tokio::test]
async fn test_nonzero_exit_without_stderr_synthesizes_error() {
    let result = executor().execute("exit 3").await;
    assert!(!result.ok);
    assert_eq!(result.error.as_deref(), Some("exit 3"));
}

#[tokio::test]
async fn test_nonzero_exit_surfaces_stderr() {
    let result = executor()
        .execute("echo 'device busy' >&2; exit 1")
        .await;
    assert!(!result.ok);
    assert_eq!(result.error.as_deref(), Some("device busy"));
}

#[tokio::test]
async fn test_stdout_preserved_on_failure() {
    let result = executor()
        .execute("echo 'partial work done'; echo 'bad' >&2; exit 2")
        .await;
    assert!(!result.ok);
    assert_eq!(result.stdout, "partial work done");
    assert_eq!(result.error.as_deref(), Some("bad"));
}

#[tokio::test]
async fn test_timeout_message_and_partial_output() {
    let result = executor()
        .execute_with_timeout("echo started; sleep 30", Duration::from_millis(500))
        .await;
    assert!(!result.ok);
    let error = result.error.as_deref().unwrap();
    assert_eq!(error, "Command timed out after 500ms");
    // Output produced before the deadline is preserved.
    assert_eq!(result.stdout, "started");
}

#[tokio::test]
async fn test_timeout_duration_is_bounded() {
    let start = std::time::Instant::now();
    let result = executor()
        .execute_with_timeout("sleep 30", Duration::from_millis(300))
        .await;
    assert!(!result.ok);
    // Deadline plus the reader grace, not the sleep's 30 seconds.
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_unknown_command_is_failure_not_panic() {
    let result = executor()
        .execute("this_command_does_not_exist_anywhere 2>/dev/null")
        .await;
    assert!(!result.ok);
    assert!(result.error.is_some());
}

#[tokio::test]
async fn test_pfexec_prefix_only_when_enabled() {
    let privileged = CommandExecutor::new(1000, 1000, true);
    assert_eq!(privileged.privileged("zoneadm list"), "pfexec zoneadm list");

    let plain = CommandExecutor::new(1000, 1000, false);
    assert_eq!(plain.privileged("zoneadm list"), "zoneadm list");
}
