// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::descriptor::ProcessDescriptor;
use crate::error::{Result, SchedulerError};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};
use tracing::{info, warn};
use uuid::Uuid;

pub const SHELL: &str = "/bin/sh";

/// Exit code reported when waiting on a child fails at the OS level.
pub const RUNNER_ERROR_EXIT_CODE: i32 = -1;

/// One run of one process. The child leads its own process group so signals
/// reach everything the shell started.
pub struct ProcessRunner {
    pub name: String,
    run_id: Uuid,
    child: Child,
    pid: Option<u32>,
    exited: bool,
}

impl ProcessRunner {
    pub fn spawn(descriptor: &ProcessDescriptor, run_id: Uuid) -> Result<Self> {
        let name = descriptor.name().to_string();
        let launch_error = |reason: String| SchedulerError::Launch {
            process: name.clone(),
            reason,
        };

        let mut cmd = Command::new(SHELL);
        cmd.arg("-c").arg(descriptor.command());
        for (k, v) in descriptor.environment() {
            cmd.env(k, v);
        }
        cmd.stdin(Stdio::null());

        if let Some(path) = descriptor.log_location() {
            let stdout = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| launch_error(format!("opening {}: {e}", path.display())))?;
            let stderr = stdout
                .try_clone()
                .map_err(|e| launch_error(format!("duplicating {}: {e}", path.display())))?;
            cmd.stdout(stdout);
            cmd.stderr(stderr);
        } else {
            cmd.stdout(Stdio::inherit());
            cmd.stderr(Stdio::inherit());
        }

        cmd.process_group(0);
        cmd.kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| launch_error(format!("{SHELL} -c {:?}: {e}", descriptor.command())))?;

        let pid = child.id();
        info!(
            process = %name,
            pid = pid.unwrap_or(0),
            run_id = %run_id,
            cmd = %descriptor.command(),
            "spawned"
        );
        Ok(Self {
            name,
            run_id,
            child,
            pid,
            exited: false,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn is_running(&self) -> bool {
        !self.exited
    }

    /// Signal the whole process group. No-op once the child has been reaped.
    pub fn send_signal(&self, sig: Signal) {
        if self.exited {
            return;
        }
        if let Some(pid) = self.pid
            && let Err(e) = signal::killpg(Pid::from_raw(pid as i32), sig)
        {
            warn!(process = %self.name, pid, "failed to send {sig}: {e}");
        }
    }

    /// Wait for the child to exit and return its exit code. OS errors map to
    /// [`RUNNER_ERROR_EXIT_CODE`]. Cancel safe.
    pub async fn wait(&mut self) -> i32 {
        let code = match self.child.wait().await {
            Ok(status) => exit_code(&status),
            Err(e) => {
                warn!(process = %self.name, "error waiting for exit, treating as failure: {e}");
                RUNNER_ERROR_EXIT_CODE
            }
        };
        self.exited = true;
        info!(
            process = %self.name,
            pid = self.pid.unwrap_or(0),
            exit_code = code,
            "exited"
        );
        code
    }
}

/// Exit code, or `128 + signo` when the process was killed by a signal.
pub fn exit_code(status: &ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(sig)) => 128 + sig,
        (None, None) => RUNNER_ERROR_EXIT_CODE,
    }
}
