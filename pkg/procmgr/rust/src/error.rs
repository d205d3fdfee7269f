// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Scheduler errors.
//! Startup errors (graph construction, descriptor validation) abort the
//! supervisor; runtime errors are contained to the process they name.

use crate::state::ProcessStatus;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    // Startup errors
    #[error("dependency cycle detected: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("process '{process}' depends on unknown process '{dependency}'")]
    UnknownDependency { process: String, dependency: String },

    #[error("invalid descriptor for '{process}': {reason}")]
    InvalidDescriptor { process: String, reason: String },

    #[error("process '{0}' is defined more than once")]
    DuplicateProcess(String),

    // Per-process runtime errors
    #[error("failed to launch '{process}': {reason}")]
    Launch { process: String, reason: String },

    #[error("process '{process}' can never start: dependency '{dependency}' is unsatisfiable")]
    Deadlocked { process: String, dependency: String },

    #[error("invalid transition for '{process}' from {from} to {to}")]
    InvalidTransition {
        process: String,
        from: ProcessStatus,
        to: ProcessStatus,
    },

    // Control errors
    #[error("process '{0}' not found")]
    ProcessNotFound(String),

    #[error("process '{0}' is not running")]
    NotRunning(String),

    #[error("process '{0}' is disabled")]
    ProcessDisabled(String),

    #[error("supervisor is shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_path() {
        let err = SchedulerError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn test_transition_message() {
        let err = SchedulerError::InvalidTransition {
            process: "db".into(),
            from: ProcessStatus::Completed,
            to: ProcessStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            "invalid transition for 'db' from completed to running"
        );
    }
}
