// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Process descriptors and the store that owns them.
//! Descriptors are immutable once built; the store is read-only after
//! construction and is shared without locking.

use crate::error::{Result, SchedulerError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// What an upstream process must reach before a dependency edge is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Condition {
    #[default]
    #[serde(rename = "process_started")]
    Started,
    #[serde(rename = "process_completed")]
    CompletedAny,
    #[serde(rename = "process_completed_successfully")]
    CompletedSuccessfully,
    #[serde(rename = "process_healthy")]
    Healthy,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Started => write!(f, "process_started"),
            Condition::CompletedAny => write!(f, "process_completed"),
            Condition::CompletedSuccessfully => write!(f, "process_completed_successfully"),
            Condition::Healthy => write!(f, "process_healthy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RestartMode {
    Always,
    OnFailure,
    #[default]
    #[serde(rename = "no", alias = "never")]
    Never,
}

impl fmt::Display for RestartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartMode::Always => write!(f, "always"),
            RestartMode::OnFailure => write!(f, "on-failure"),
            RestartMode::Never => write!(f, "no"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub mode: RestartMode,
    /// Fixed delay applied before every restart.
    pub backoff: Duration,
    /// 0 means unlimited.
    pub max_restarts: u32,
}

impl RestartPolicy {
    pub fn never() -> Self {
        Self::default()
    }

    pub fn always(backoff: Duration, max_restarts: u32) -> Self {
        Self {
            mode: RestartMode::Always,
            backoff,
            max_restarts,
        }
    }

    pub fn on_failure(backoff: Duration, max_restarts: u32) -> Self {
        Self {
            mode: RestartMode::OnFailure,
            backoff,
            max_restarts,
        }
    }

    /// True while `restarts` has not used up the budget.
    pub fn has_budget(&self, restarts: u32) -> bool {
        self.max_restarts == 0 || restarts < self.max_restarts
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            mode: RestartMode::Never,
            backoff: DEFAULT_BACKOFF,
            max_restarts: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub target: String,
    pub condition: Condition,
}

#[derive(Debug, Clone)]
pub struct ProcessDescriptor {
    name: String,
    command: String,
    environment: Vec<(String, String)>,
    restart_policy: RestartPolicy,
    dependencies: Vec<Dependency>,
    disabled: bool,
    log_location: Option<PathBuf>,
}

impl ProcessDescriptor {
    pub fn builder(name: impl Into<String>, command: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder {
            name: name.into(),
            command: command.into(),
            environment: Vec::new(),
            restart_policy: RestartPolicy::default(),
            dependencies: Vec::new(),
            disabled: false,
            log_location: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn environment(&self) -> &[(String, String)] {
        &self.environment
    }

    pub fn restart_policy(&self) -> &RestartPolicy {
        &self.restart_policy
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn log_location(&self) -> Option<&PathBuf> {
        self.log_location.as_ref()
    }
}

pub struct DescriptorBuilder {
    name: String,
    command: String,
    environment: Vec<(String, String)>,
    restart_policy: RestartPolicy,
    dependencies: Vec<Dependency>,
    disabled: bool,
    log_location: Option<PathBuf>,
}

impl DescriptorBuilder {
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.push((key.into(), value.into()));
        self
    }

    pub fn environment(mut self, vars: Vec<(String, String)>) -> Self {
        self.environment.extend(vars);
        self
    }

    pub fn restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    /// Declaring the same target twice keeps the last condition.
    pub fn depends_on(mut self, target: impl Into<String>, condition: Condition) -> Self {
        let target = target.into();
        self.dependencies.retain(|d| d.target != target);
        self.dependencies.push(Dependency { target, condition });
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn log_location(mut self, path: Option<PathBuf>) -> Self {
        self.log_location = path;
        self
    }

    pub fn build(self) -> Result<ProcessDescriptor> {
        if self.name.trim().is_empty() {
            return Err(SchedulerError::InvalidDescriptor {
                process: self.name,
                reason: "name must not be empty".to_string(),
            });
        }
        if self.command.trim().is_empty() {
            return Err(SchedulerError::InvalidDescriptor {
                process: self.name,
                reason: "command must not be empty".to_string(),
            });
        }
        if let Some(dep) = self.dependencies.iter().find(|d| d.target.trim().is_empty()) {
            return Err(SchedulerError::InvalidDescriptor {
                process: self.name.clone(),
                reason: format!("dependency name {:?} is empty", dep.target),
            });
        }

        let mut dependencies = self.dependencies;
        dependencies.sort_by(|a, b| a.target.cmp(&b.target));

        Ok(ProcessDescriptor {
            name: self.name,
            command: self.command,
            environment: self.environment,
            restart_policy: self.restart_policy,
            dependencies,
            disabled: self.disabled,
            log_location: self.log_location,
        })
    }
}

/// Validated, name-indexed set of descriptors. Iteration is sorted by name.
#[derive(Debug, Clone, Default)]
pub struct DescriptorStore {
    descriptors: BTreeMap<String, ProcessDescriptor>,
}

impl DescriptorStore {
    pub fn new(descriptors: Vec<ProcessDescriptor>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for descriptor in descriptors {
            let name = descriptor.name().to_string();
            if map.insert(name.clone(), descriptor).is_some() {
                return Err(SchedulerError::DuplicateProcess(name));
            }
        }
        Ok(Self { descriptors: map })
    }

    pub fn get(&self, name: &str) -> Option<&ProcessDescriptor> {
        self.descriptors.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessDescriptor> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let d = ProcessDescriptor::builder("web", "sleep 1").build().unwrap();
        assert_eq!(d.name(), "web");
        assert_eq!(d.command(), "sleep 1");
        assert!(d.dependencies().is_empty());
        assert!(!d.is_disabled());
        assert_eq!(d.restart_policy().mode, RestartMode::Never);
        assert_eq!(d.restart_policy().backoff, DEFAULT_BACKOFF);
    }

    #[test]
    fn test_builder_rejects_empty_command() {
        let err = ProcessDescriptor::builder("web", "  ").build().unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidDescriptor { .. }));
    }

    #[test]
    fn test_builder_rejects_empty_name() {
        assert!(ProcessDescriptor::builder("", "true").build().is_err());
    }

    #[test]
    fn test_dependencies_sorted_and_deduplicated() {
        let d = ProcessDescriptor::builder("app", "true")
            .depends_on("zeta", Condition::Started)
            .depends_on("alpha", Condition::Healthy)
            .depends_on("zeta", Condition::CompletedSuccessfully)
            .build()
            .unwrap();
        let deps: Vec<_> = d
            .dependencies()
            .iter()
            .map(|d| (d.target.as_str(), d.condition))
            .collect();
        assert_eq!(
            deps,
            vec![
                ("alpha", Condition::Healthy),
                ("zeta", Condition::CompletedSuccessfully)
            ]
        );
    }

    #[test]
    fn test_store_rejects_duplicates() {
        let a1 = ProcessDescriptor::builder("a", "true").build().unwrap();
        let a2 = ProcessDescriptor::builder("a", "false").build().unwrap();
        let err = DescriptorStore::new(vec![a1, a2]).unwrap_err();
        assert_eq!(err, SchedulerError::DuplicateProcess("a".into()));
    }

    #[test]
    fn test_store_sorted_names() {
        let store = DescriptorStore::new(vec![
            ProcessDescriptor::builder("charlie", "true").build().unwrap(),
            ProcessDescriptor::builder("alpha", "true").build().unwrap(),
            ProcessDescriptor::builder("bravo", "true").build().unwrap(),
        ])
        .unwrap();
        let names: Vec<_> = store.names().collect();
        assert_eq!(names, vec!["alpha", "bravo", "charlie"]);
    }

    #[test]
    fn test_restart_budget() {
        let unlimited = RestartPolicy::always(Duration::ZERO, 0);
        assert!(unlimited.has_budget(u32::MAX - 1));

        let limited = RestartPolicy::on_failure(Duration::ZERO, 2);
        assert!(limited.has_budget(1));
        assert!(!limited.has_budget(2));
    }

    #[test]
    fn test_condition_serde_names() {
        let c: Condition = serde_yaml::from_str("process_completed_successfully").unwrap();
        assert_eq!(c, Condition::CompletedSuccessfully);
        let c: Condition = serde_yaml::from_str("process_healthy").unwrap();
        assert_eq!(c, Condition::Healthy);
        assert_eq!(Condition::default(), Condition::Started);
    }

    #[test]
    fn test_restart_mode_serde_names() {
        let m: RestartMode = serde_yaml::from_str("on-failure").unwrap();
        assert_eq!(m, RestartMode::OnFailure);
        let m: RestartMode = serde_yaml::from_str("no").unwrap();
        assert_eq!(m, RestartMode::Never);
        let m: RestartMode = serde_yaml::from_str("never").unwrap();
        assert_eq!(m, RestartMode::Never);
        assert_eq!(RestartMode::Always.to_string(), "always");
    }
}
