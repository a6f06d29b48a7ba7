use std::ffi::OsString;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use cph::Error;
use cph::judge::{
    ExecutionTarget, Judge, JudgeOutcome, MAX_OUTPUT_CHARS, RunResult, TRUNCATION_MARKER, Verdict,
};

const TIMEOUT: Duration = Duration::from_secs(10);

fn sh(script: &str) -> ExecutionTarget {
    ExecutionTarget::command("sh", ["-c", script])
}

async fn judge(
    target: &ExecutionTarget,
    input: &str,
    expected: &str,
    timeout: Duration,
) -> RunResult {
    let outcome = Judge::new()
        .run(target, input, expected, timeout, &CancellationToken::new())
        .await
        .expect("judge run failed");
    match outcome {
        JudgeOutcome::Finished(result) => result,
        JudgeOutcome::Cancelled => panic!("run was cancelled"),
    }
}

#[tokio::test]
async fn test_sum_passes() {
    let result = judge(&sh("read a b; echo $((a + b))"), "1 2\n", "3", TIMEOUT).await;
    assert!(result.pass());
    assert_eq!(result.verdict(), Verdict::Accepted);
    assert_eq!(result.stdout, "3\n");
    assert_eq!(result.stderr, "");
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.exit_signal, None);
    assert!(!result.timed_out);
}

#[tokio::test]
async fn test_surrounding_whitespace_is_ignored() {
    let result = judge(&sh("printf '  3'"), "", "3\n\n", TIMEOUT).await;
    assert!(result.pass());
}

#[tokio::test]
async fn test_wrong_answer() {
    let result = judge(&sh("echo 1 2"), "", "1  2", TIMEOUT).await;
    assert!(!result.pass());
    assert_eq!(result.verdict(), Verdict::WrongAnswer);
}

#[tokio::test]
async fn test_stdin_is_closed_after_input() {
    let result = judge(&sh("cat"), "a\nb\n", "a\nb", TIMEOUT).await;
    assert!(result.pass());
    assert_eq!(result.stdout, "a\nb\n");
}

#[tokio::test]
async fn test_program_ignoring_large_input() {
    let input = "9 ".repeat(500_000);
    let result = judge(&sh("echo 3"), &input, "3", TIMEOUT).await;
    assert!(result.pass());
}

#[tokio::test]
async fn test_exit_code_is_informational() {
    let result = judge(&sh("echo 3; exit 4"), "", "3", TIMEOUT).await;
    assert_eq!(result.exit_code, Some(4));
    assert!(result.pass());
}

#[tokio::test]
async fn test_stdout_and_stderr_are_separate() {
    let result = judge(&sh("echo out; echo err >&2"), "", "out", TIMEOUT).await;
    assert_eq!(result.stdout, "out\n");
    assert_eq!(result.stderr, "err\n");
    assert!(result.pass());
}

#[tokio::test]
async fn test_infinite_loop_times_out() {
    let timeout = Duration::from_millis(300);
    let start = Instant::now();
    let result = judge(&sh("while :; do :; done"), "", "", timeout).await;

    assert!(result.timed_out);
    assert!(!result.pass());
    assert_eq!(result.verdict(), Verdict::TimeLimitExceeded);
    assert!(result.elapsed_ms >= 300);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_timeout_ignores_partial_output() {
    let timeout = Duration::from_millis(300);
    let start = Instant::now();
    let result = judge(&sh("echo 3; sleep 10"), "", "3", timeout).await;

    assert!(result.timed_out);
    assert!(!result.pass());
    // The whole process group is killed, including `sleep`
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_signal_is_recorded() {
    let result = judge(&sh("kill -SEGV $$"), "", "", TIMEOUT).await;
    assert_eq!(result.exit_signal.as_deref(), Some("SIGSEGV"));
    assert_eq!(result.exit_code, None);
    assert!(!result.pass());
    assert_eq!(result.verdict(), Verdict::RuntimeError);
}

#[tokio::test]
async fn test_signal_fails_matching_output() {
    let result = judge(&sh("echo 3; kill -ABRT $$"), "", "3", TIMEOUT).await;
    assert_eq!(result.stdout, "3\n");
    assert_eq!(result.exit_signal.as_deref(), Some("SIGABRT"));
    assert!(!result.pass());
}

#[tokio::test]
async fn test_long_output_is_truncated() {
    let result = judge(&sh("yes | head -c 300000"), "", "", TIMEOUT).await;
    assert!(result.stdout.ends_with(TRUNCATION_MARKER));
    assert_eq!(result.stdout.len(), MAX_OUTPUT_CHARS + TRUNCATION_MARKER.len());
    assert_eq!(&result.stdout[..MAX_OUTPUT_CHARS], "y\n".repeat(MAX_OUTPUT_CHARS / 2));
}

#[tokio::test]
async fn test_long_stderr_is_truncated() {
    let result = judge(&sh("yes | head -c 300000 >&2; echo 3"), "", "3", TIMEOUT).await;
    assert!(result.pass());
    assert!(result.stderr.ends_with(TRUNCATION_MARKER));
    assert_eq!(result.stderr.len(), MAX_OUTPUT_CHARS + TRUNCATION_MARKER.len());
    assert_eq!(&result.stderr[..MAX_OUTPUT_CHARS], "y\n".repeat(MAX_OUTPUT_CHARS / 2));
}

#[tokio::test]
async fn test_background_process_holding_output_does_not_delay_verdict() {
    let start = Instant::now();
    let result = judge(&sh("echo 3; sleep 30 &"), "", "3", TIMEOUT).await;
    assert!(result.pass());
    assert_eq!(result.stdout, "3\n");
    assert!(
        start.elapsed() < Duration::from_millis(450),
        "verdict took {:?}",
        start.elapsed()
    );
}

#[tokio::test]
async fn test_background_processes_die_with_the_program() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("survived");
    let target = ExecutionTarget::command(
        "sh",
        [
            OsString::from("-c"),
            OsString::from("echo 3; (sleep 1; touch \"$0\") >/dev/null 2>&1 &"),
            marker.clone().into_os_string(),
        ],
    );

    let result = judge(&target, "", "3", TIMEOUT).await;
    assert!(result.pass());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists(), "background process outlived the judged program");
}

#[tokio::test]
async fn test_custom_output_limit() {
    let target = sh("echo 0123456789");
    let outcome = Judge::new()
        .with_output_limit(4)
        .run(&target, "", "", TIMEOUT, &CancellationToken::new())
        .await
        .unwrap();
    let JudgeOutcome::Finished(result) = outcome else {
        panic!("run was cancelled");
    };
    assert_eq!(result.stdout, format!("0123{TRUNCATION_MARKER}"));
}

#[tokio::test]
async fn test_missing_program() {
    let target = ExecutionTarget::command("/nonexistent/solution", Vec::<String>::new());
    let outcome = Judge::new()
        .run(&target, "", "", TIMEOUT, &CancellationToken::new())
        .await;
    match outcome {
        Err(Error::JudgeLaunch { program, .. }) => assert_eq!(program, "/nonexistent/solution"),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn test_cancellation_kills_the_process() {
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let start = Instant::now();
    let outcome = Judge::new()
        .run(&sh("sleep 10"), "", "", TIMEOUT, &cancel)
        .await
        .unwrap();
    assert!(matches!(outcome, JudgeOutcome::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(5));
}
