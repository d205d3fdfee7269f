// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Local process supervisor: starts a set of named commands in dependency
//! order, restarts them according to their policy and records every
//! lifecycle transition.

pub mod config;
pub mod descriptor;
pub mod env;
pub mod error;
pub mod events;
pub mod graph;
pub mod process;
pub mod restart;
pub mod scheduler;
pub mod shutdown;
pub mod state;
pub mod table;

pub use descriptor::{
    Condition, Dependency, DescriptorStore, ProcessDescriptor, RestartMode, RestartPolicy,
};
pub use error::{Result, SchedulerError};
pub use events::LifecycleEvent;
pub use graph::DependencyGraph;
pub use scheduler::{RunReport, SchedulerOptions, Supervisor, SupervisorHandle};
pub use state::{HealthStatus, ProcessState, ProcessStatus, StateSnapshot};
pub use table::StateTable;
