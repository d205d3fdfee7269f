// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Restart policy evaluation.
//! Decides what happens to a process after its run exits.

use crate::descriptor::{RestartMode, RestartPolicy};
use crate::state::ProcessState;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartAction {
    /// Schedule a new run once the fixed backoff has elapsed.
    RestartAfter(Duration),
    /// Restart budget exhausted.
    MarkFailed,
    /// Exit accepted, no further run.
    MarkCompleted,
}

/// Apply `policy` to the exit of the run recorded in `state`.
/// `state.restarts` is the number of restarts already performed.
pub fn evaluate(policy: &RestartPolicy, state: &ProcessState, exit_code: i32) -> RestartAction {
    match policy.mode {
        RestartMode::Never => RestartAction::MarkCompleted,
        RestartMode::OnFailure if exit_code == 0 => RestartAction::MarkCompleted,
        RestartMode::OnFailure | RestartMode::Always => {
            if policy.has_budget(state.restarts) {
                RestartAction::RestartAfter(policy.backoff)
            } else {
                RestartAction::MarkFailed
            }
        }
    }
}
