// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::descriptor::{
    Condition, DEFAULT_BACKOFF, DescriptorStore, ProcessDescriptor, RestartMode, RestartPolicy,
};
use crate::env::parse_environment;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const DEFAULT_CONFIG_PATH: &str = "/etc/datadog-agent/process-compose.yaml";

fn default_backoff_seconds() -> u64 {
    DEFAULT_BACKOFF.as_secs()
}

/// Top-level project file. Unknown keys are ignored.
#[derive(Debug, Deserialize)]
pub struct ProjectConfig {
    pub version: Option<String>,
    pub log_location: Option<PathBuf>,
    pub log_level: Option<String>,
    #[serde(default)]
    pub environment: Vec<String>,
    #[serde(default)]
    pub processes: BTreeMap<String, ProcessConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessConfig {
    pub command: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub environment: Vec<String>,
    pub log_location: Option<PathBuf>,
    #[serde(default)]
    pub availability: RestartPolicyConfig,
    #[serde(default)]
    pub depends_on: BTreeMap<String, DependencyConfig>,
}

#[derive(Debug, Deserialize)]
pub struct RestartPolicyConfig {
    #[serde(default)]
    pub restart: RestartMode,
    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: u64,
    #[serde(default)]
    pub max_restarts: u32,
}

impl Default for RestartPolicyConfig {
    fn default() -> Self {
        Self {
            restart: RestartMode::default(),
            backoff_seconds: default_backoff_seconds(),
            max_restarts: 0,
        }
    }
}

impl From<&RestartPolicyConfig> for RestartPolicy {
    fn from(cfg: &RestartPolicyConfig) -> Self {
        RestartPolicy {
            mode: cfg.restart,
            backoff: Duration::from_secs(cfg.backoff_seconds),
            max_restarts: cfg.max_restarts,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DependencyConfig {
    #[serde(default)]
    pub condition: Condition,
}

pub fn config_path() -> PathBuf {
    std::env::var("DD_PROCSCHED_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

pub fn load_project(path: &Path) -> Result<ProjectConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let project: ProjectConfig =
        serde_yaml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    debug!(
        path = %path.display(),
        processes = project.processes.len(),
        "loaded project config"
    );
    Ok(project)
}

impl ProjectConfig {
    /// Build the validated descriptor set. Project-wide environment entries
    /// come first so per-process entries override them.
    pub fn descriptors(&self) -> Result<DescriptorStore> {
        let shared_env = parse_environment(&self.environment);
        let mut descriptors = Vec::with_capacity(self.processes.len());

        for (name, cfg) in &self.processes {
            let mut builder = ProcessDescriptor::builder(name.as_str(), cfg.command.as_str())
                .environment(shared_env.clone())
                .environment(parse_environment(&cfg.environment))
                .restart_policy(RestartPolicy::from(&cfg.availability))
                .disabled(cfg.disabled)
                .log_location(cfg.log_location.clone());
            for (target, dep) in &cfg.depends_on {
                builder = builder.depends_on(target.as_str(), dep.condition);
            }
            descriptors.push(
                builder
                    .build()
                    .with_context(|| format!("process '{name}'"))?,
            );
        }

        Ok(DescriptorStore::new(descriptors)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_project(yaml: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("process-compose.yaml");
        fs::write(&path, yaml).unwrap();
        (dir, path)
    }

    #[test]
    fn test_parse_full_project() {
        let (_dir, path) = write_project(
            r#"
version: "0.5"
log_level: debug
log_location: /tmp/procsched.log
environment:
  - SHARED=1
  - OVERRIDE=project
processes:
  migrate:
    command: ./migrate.sh
    availability:
      restart: on-failure
      backoff_seconds: 3
      max_restarts: 2
  web:
    command: ./web --port 8080
    environment:
      - OVERRIDE=web
    log_location: /tmp/web.log
    depends_on:
      migrate:
        condition: process_completed_successfully
      db:
        condition: process_healthy
  db:
    command: postgres
    disabled: true
    x-custom-extension: ignored
"#,
        );

        let project = load_project(&path).unwrap();
        assert_eq!(project.version.as_deref(), Some("0.5"));
        assert_eq!(project.log_level.as_deref(), Some("debug"));
        assert_eq!(
            project.log_location.as_deref(),
            Some(Path::new("/tmp/procsched.log"))
        );

        let store = project.descriptors().unwrap();
        assert_eq!(store.len(), 3);

        let migrate = store.get("migrate").unwrap();
        assert_eq!(
            *migrate.restart_policy(),
            RestartPolicy::on_failure(Duration::from_secs(3), 2)
        );

        let web = store.get("web").unwrap();
        let deps: Vec<_> = web
            .dependencies()
            .iter()
            .map(|d| (d.target.as_str(), d.condition))
            .collect();
        assert_eq!(
            deps,
            vec![
                ("db", Condition::Healthy),
                ("migrate", Condition::CompletedSuccessfully)
            ]
        );
        assert_eq!(
            web.environment().last(),
            Some(&("OVERRIDE".to_string(), "web".to_string()))
        );
        assert_eq!(web.environment()[0], ("SHARED".into(), "1".into()));
        assert_eq!(web.log_location(), Some(&PathBuf::from("/tmp/web.log")));

        assert!(store.get("db").unwrap().is_disabled());
    }

    #[test]
    fn test_minimal_process_defaults() {
        let (_dir, path) = write_project("processes:\n  once:\n    command: 'true'\n");
        let store = load_project(&path).unwrap().descriptors().unwrap();
        let once = store.get("once").unwrap();
        assert_eq!(once.restart_policy().mode, RestartMode::Never);
        assert_eq!(once.restart_policy().backoff, DEFAULT_BACKOFF);
        assert_eq!(once.restart_policy().max_restarts, 0);
        assert!(!once.is_disabled());
        assert!(once.log_location().is_none());
    }

    #[test]
    fn test_dependency_condition_defaults_to_started() {
        let (_dir, path) = write_project(
            "processes:\n  a:\n    command: 'true'\n  b:\n    command: 'true'\n    depends_on:\n      a: {}\n",
        );
        let store = load_project(&path).unwrap().descriptors().unwrap();
        assert_eq!(
            store.get("b").unwrap().dependencies()[0].condition,
            Condition::Started
        );
    }

    #[test]
    fn test_restart_never_alias() {
        let (_dir, path) = write_project(
            "processes:\n  a:\n    command: 'true'\n    availability:\n      restart: never\n",
        );
        let store = load_project(&path).unwrap().descriptors().unwrap();
        assert_eq!(
            store.get("a").unwrap().restart_policy().mode,
            RestartMode::Never
        );
    }

    #[test]
    fn test_unknown_restart_mode_is_rejected() {
        let (_dir, path) = write_project(
            "processes:\n  a:\n    command: 'true'\n    availability:\n      restart: sometimes\n",
        );
        assert!(load_project(&path).is_err());
    }

    #[test]
    fn test_unknown_condition_is_rejected() {
        let (_dir, path) = write_project(
            "processes:\n  a:\n    command: 'true'\n  b:\n    command: 'true'\n    depends_on:\n      a:\n        condition: eventually\n",
        );
        assert!(load_project(&path).is_err());
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let (_dir, path) = write_project("processes:\n  a:\n    command: ''\n");
        let err = load_project(&path).unwrap().descriptors().unwrap_err();
        assert!(format!("{err:#}").contains("command must not be empty"));
    }

    #[test]
    fn test_missing_file() {
        assert!(load_project(Path::new("/nonexistent/process-compose.yaml")).is_err());
    }

    #[test]
    fn test_empty_project() {
        let (_dir, path) = write_project("version: '0.5'\n");
        let store = load_project(&path).unwrap().descriptors().unwrap();
        assert!(store.is_empty());
    }
}
