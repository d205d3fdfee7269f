// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Shared state table.
//! One lock guards the process states, health signals, event log and
//! deadlock reports together, so every snapshot is consistent across
//! processes. Writes are crate-private: only the scheduler loop mutates.

use crate::error::{Result, SchedulerError};
use crate::events::LifecycleEvent;
use crate::state::{HealthStatus, ProcessState, ProcessStatus, StateSnapshot};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 1024;
/// Transitions kept for [`StateTable::events`]; older ones are dropped.
pub const EVENT_HISTORY_CAPACITY: usize = 4096;

#[derive(Default)]
struct Inner {
    states: BTreeMap<String, ProcessState>,
    health: BTreeMap<String, HealthStatus>,
    events: VecDeque<LifecycleEvent>,
    history_capacity: usize,
    deadlocked: BTreeMap<String, SchedulerError>,
}

#[derive(Clone)]
pub struct StateTable {
    inner: Arc<Mutex<Inner>>,
    events_tx: broadcast::Sender<LifecycleEvent>,
}

impl StateTable {
    /// Every named process starts `Pending`.
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self::with_history_capacity(names, EVENT_HISTORY_CAPACITY)
    }

    pub(crate) fn with_history_capacity<'a>(
        names: impl IntoIterator<Item = &'a str>,
        history_capacity: usize,
    ) -> Self {
        let states = names
            .into_iter()
            .map(|name| (name.to_string(), ProcessState::pending(name)))
            .collect();
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                states,
                history_capacity,
                ..Inner::default()
            })),
            events_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.lock();
        StateSnapshot {
            states: inner.states.clone(),
            health: inner.health.clone(),
        }
    }

    pub fn get(&self, name: &str) -> Option<ProcessState> {
        self.lock().states.get(name).cloned()
    }

    pub fn list(&self) -> BTreeMap<String, ProcessState> {
        self.lock().states.clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().states.contains_key(name)
    }

    /// Recent transition history, oldest first, bounded by
    /// [`EVENT_HISTORY_CAPACITY`]. Long-running observers should use
    /// [`StateTable::subscribe`].
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.lock().events.iter().cloned().collect()
    }

    /// Receives every transition applied after the call.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events_tx.subscribe()
    }

    pub fn health(&self, name: &str) -> HealthStatus {
        self.lock().health.get(name).copied().unwrap_or_default()
    }

    pub fn deadlocked(&self) -> Vec<SchedulerError> {
        self.lock().deadlocked.values().cloned().collect()
    }

    pub(crate) fn set_health(&self, name: &str, status: HealthStatus) -> Result<()> {
        let mut inner = self.lock();
        if !inner.states.contains_key(name) {
            return Err(SchedulerError::ProcessNotFound(name.to_string()));
        }
        inner.health.insert(name.to_string(), status);
        Ok(())
    }

    pub(crate) fn set_deadlocked(&self, deadlocked: BTreeMap<String, SchedulerError>) {
        self.lock().deadlocked = deadlocked;
    }

    /// Replace the record with a fresh `Running` one for `run_id`.
    pub(crate) fn start_run(
        &self,
        name: &str,
        run_id: Uuid,
        count_restart: bool,
    ) -> Result<LifecycleEvent> {
        self.commit(name, |current| current.next_run(run_id, count_restart))
    }

    pub(crate) fn record_exit(
        &self,
        name: &str,
        status: ProcessStatus,
        exit_code: Option<i32>,
    ) -> Result<LifecycleEvent> {
        self.commit(name, |current| current.with_exit(status, exit_code))
    }

    /// Back to `Pending` as a new instance; the restart counter is kept.
    pub(crate) fn reset(&self, name: &str) -> Result<LifecycleEvent> {
        self.commit(name, |current| ProcessState {
            restarts: current.restarts,
            ..ProcessState::pending(current.name.as_str())
        })
    }

    fn commit(
        &self,
        name: &str,
        next: impl FnOnce(&ProcessState) -> ProcessState,
    ) -> Result<LifecycleEvent> {
        let mut inner = self.lock();
        let current = inner
            .states
            .get(name)
            .ok_or_else(|| SchedulerError::ProcessNotFound(name.to_string()))?;
        let next = next(current);

        if !current.status.can_transition_to(next.status) {
            warn!(
                process = %name,
                from = %current.status,
                to = %next.status,
                "rejected lifecycle transition"
            );
            return Err(SchedulerError::InvalidTransition {
                process: name.to_string(),
                from: current.status,
                to: next.status,
            });
        }

        let event = LifecycleEvent {
            name: name.to_string(),
            from: current.status,
            to: next.status,
            exit_code: next.exit_code,
            run_id: next.run_id,
            timestamp: SystemTime::now(),
        };
        info!(
            process = %name,
            from = %event.from,
            to = %event.to,
            exit_code = ?event.exit_code,
            restarts = next.restarts,
            "lifecycle transition"
        );

        inner.states.insert(name.to_string(), next);
        if inner.events.len() >= inner.history_capacity {
            inner.events.pop_front();
        }
        inner.events.push_back(event.clone());
        // No subscribers is fine; the log above keeps the history.
        let _ = self.events_tx.send(event.clone());
        Ok(event)
    }
}
