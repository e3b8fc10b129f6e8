//! The Timeout / Recovery Harness (§4.A): runs one health-check attempt
//! under a deadline with crash containment, and builds synthetic results
//! on failure.
//!
//! This is the trust boundary around code that calls into native
//! libraries (NVML, ioctls) that can deadlock or crash. A panic
//! originating purely in managed Rust is contained here via
//! `tokio::spawn` + `JoinError::is_panic()` — the idiomatic equivalent of
//! goroutine-local `recover()` — but a panic that crosses into a foreign
//! library as a raw signal (SIGSEGV) is explicitly out of scope (§4.A
//! rationale, §9 design notes) and will still take the process down.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::model::{CheckerResult, HealthResult, Severity};

/// Runs `fn_` to completion, timeout, or panic, always producing a
/// well-formed outcome (§4.A contract, cases 1/3/4). Case 2 — `fn_`
/// returning `Err` — is surfaced to the caller directly; the harness
/// never fabricates a Result for that case.
///
/// `fn_` receives a [`CancellationToken`] derived from `parent`: it is
/// cancelled when the deadline fires (the harness aborts the task) or
/// when `parent` itself is cancelled (tokio-util propagates that to
/// every child token automatically).
pub async fn run_with_timeout<F, Fut>(
    name: &str,
    node: &str,
    deadline: Duration,
    parent: &CancellationToken,
    fn_: F,
) -> Result<HealthResult>
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<HealthResult>> + Send + 'static,
{
    let start = Instant::now();
    let child = parent.child_token();
    let join_handle = tokio::spawn(fn_(child));
    let abort_handle = join_handle.abort_handle();

    let outcome = tokio::time::timeout(deadline, join_handle).await;
    let elapsed = start.elapsed();

    match outcome {
        // Case 1: fn returned before the deadline with a Result.
        Ok(Ok(Ok(mut result))) => {
            result
                .checkers
                .push(CheckerResult::all_normal(format!("{name}HealthCheckTimeout"), "", ""));
            info!(
                component = name,
                outcome = "ok",
                elapsed_ms = elapsed.as_millis() as u64,
                "health check completed"
            );
            Ok(result)
        }
        // Case 2: fn returned an error — surfaced as-is, nothing synthesized.
        Ok(Ok(Err(e))) => {
            warn!(
                component = name,
                outcome = "error",
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "health check returned an error"
            );
            Err(e)
        }
        // Case 4: fn panicked inside the managed-language layer.
        Ok(Err(join_err)) => {
            let message = panic_message(join_err);
            error!(
                component = name,
                outcome = "panic",
                elapsed_ms = elapsed.as_millis() as u64,
                message = %message,
                "health check panicked"
            );
            let checker = CheckerResult::synthetic(
                format!("{name}HealthCheckPanic"),
                Severity::Critical,
                message,
            );
            Ok(HealthResult::synthetic(name, node, chrono::Utc::now(), checker))
        }
        // Case 3: the deadline fired first.
        Err(_elapsed) => {
            abort_handle.abort();
            warn!(
                component = name,
                outcome = "timeout",
                elapsed_ms = elapsed.as_millis() as u64,
                deadline_ms = deadline.as_millis() as u64,
                "health check timed out"
            );
            let checker = CheckerResult::synthetic(
                format!("{name}HealthCheckTimeout"),
                Severity::Critical,
                format!("deadline of {:?} exceeded", deadline),
            );
            Ok(HealthResult::synthetic(name, node, chrono::Utc::now(), checker))
        }
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "health check task was cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "health check panicked with a non-string payload".to_string()
    }
}
