// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::process::{ProcessRunner, RUNNER_ERROR_EXIT_CODE};
use anyhow::Result;
use nix::sys::signal::Signal;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::{Duration, timeout};
use tracing::{info, warn};

pub const SIGKILL_TIMEOUT: Duration = Duration::from_secs(10);

/// Send SIGTERM, wait up to `grace`, then SIGKILL. Returns the exit code.
pub async fn terminate(runner: &mut ProcessRunner, grace: Duration) -> i32 {
    if !runner.is_running() {
        return RUNNER_ERROR_EXIT_CODE;
    }
    info!(process = %runner.name, "sending SIGTERM");
    runner.send_signal(Signal::SIGTERM);

    if let Ok(code) = timeout(grace, runner.wait()).await {
        return code;
    }
    warn!(
        process = %runner.name,
        "stop timeout ({}s) reached, sending SIGKILL",
        grace.as_secs_f32()
    );
    runner.send_signal(Signal::SIGKILL);
    match timeout(SIGKILL_TIMEOUT, runner.wait()).await {
        Ok(code) => code,
        Err(_) => {
            warn!(process = %runner.name, "still running after SIGKILL, giving up");
            RUNNER_ERROR_EXIT_CODE
        }
    }
}

/// Resolve on the first SIGTERM or SIGINT delivered to the supervisor.
pub async fn wait_for_signal() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::tests::make_descriptor;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_terminate_graceful() {
        let mut runner = ProcessRunner::spawn(&make_descriptor("sleep 60"), Uuid::new_v4()).unwrap();
        let code = terminate(&mut runner, Duration::from_secs(5)).await;
        assert_eq!(code, 128 + Signal::SIGTERM as i32);
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn test_terminate_escalates_to_sigkill() {
        let mut runner = ProcessRunner::spawn(
            &make_descriptor("trap '' TERM; while true; do sleep 1; done"),
            Uuid::new_v4(),
        )
        .unwrap();
        // Give the shell time to install its trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let code = terminate(&mut runner, Duration::from_millis(500)).await;
        assert_eq!(code, 128 + Signal::SIGKILL as i32);
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn test_terminate_already_exited() {
        let mut runner = ProcessRunner::spawn(&make_descriptor("true"), Uuid::new_v4()).unwrap();
        runner.wait().await;
        assert_eq!(
            terminate(&mut runner, Duration::from_secs(1)).await,
            RUNNER_ERROR_EXIT_CODE
        );
    }
}
