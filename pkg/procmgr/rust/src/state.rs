// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// Waiting for its dependencies, or disabled.
    #[default]
    Pending,
    /// Child process is alive.
    Running,
    /// Exited, a restart is scheduled.
    Restarting,
    /// Exited, no further restart scheduled.
    Completed,
    /// Restart budget exhausted, launch error, or unsatisfiable dependencies.
    Failed,
}

impl ProcessStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessStatus::Completed | ProcessStatus::Failed)
    }

    pub(crate) fn can_transition_to(self, next: ProcessStatus) -> bool {
        use ProcessStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Restarting)
                | (Running, Failed)
                | (Restarting, Running)
                | (Restarting, Completed)
                | (Restarting, Failed)
                // operator restart starts a new instance
                | (Completed, Pending)
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Pending => write!(f, "pending"),
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Restarting => write!(f, "restarting"),
            ProcessStatus::Completed => write!(f, "completed"),
            ProcessStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Readiness signal pushed by a health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// The live record of one process instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessState {
    pub name: String,
    pub status: ProcessStatus,
    /// Cumulative across runs; survives state replacement.
    pub restarts: u32,
    /// Exit code of the current run, `None` until it exits.
    pub exit_code: Option<i32>,
    pub run_id: Option<Uuid>,
}

impl ProcessState {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ProcessStatus::Pending,
            restarts: 0,
            exit_code: None,
            run_id: None,
        }
    }

    /// Fresh record for a new run. Only the restart counter carries over.
    pub(crate) fn next_run(&self, run_id: Uuid, count_restart: bool) -> Self {
        Self {
            name: self.name.clone(),
            status: ProcessStatus::Running,
            restarts: if count_restart {
                self.restarts + 1
            } else {
                self.restarts
            },
            exit_code: None,
            run_id: Some(run_id),
        }
    }

    pub(crate) fn with_exit(&self, status: ProcessStatus, exit_code: Option<i32>) -> Self {
        Self {
            status,
            exit_code,
            ..self.clone()
        }
    }
}

/// Point-in-time copy of the state table used for readiness decisions.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    pub states: BTreeMap<String, ProcessState>,
    pub health: BTreeMap<String, HealthStatus>,
}

impl StateSnapshot {
    pub fn status(&self, name: &str) -> Option<ProcessStatus> {
        self.states.get(name).map(|s| s.status)
    }

    pub fn health(&self, name: &str) -> HealthStatus {
        self.health.get(name).copied().unwrap_or_default()
    }
}
