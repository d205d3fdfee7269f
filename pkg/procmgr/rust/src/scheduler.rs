// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Scheduler
//! Single coordinating loop for every lifecycle decision:
//! - launches processes whose dependencies are ready
//! - applies restart policies to exit events, with fixed backoff timers
//! - reports processes whose dependencies can never be satisfied
//! - executes operator stop/restart requests and supervisor shutdown
//!
//! Per-run monitor tasks and backoff timers only send events; every state
//! table write happens on the loop.

use crate::descriptor::DescriptorStore;
use crate::error::{Result, SchedulerError};
use crate::events::LifecycleEvent;
use crate::graph::DependencyGraph;
use crate::process::ProcessRunner;
use crate::restart::{self, RestartAction};
use crate::shutdown::{self, SIGKILL_TIMEOUT};
use crate::state::{HealthStatus, ProcessState, ProcessStatus, StateSnapshot};
use crate::table::StateTable;
use nix::sys::signal::Signal;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, sleep, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

const SIGTERM_EXIT_CODE: i32 = 128 + Signal::SIGTERM as i32;

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Time a process gets between SIGTERM and SIGKILL.
    pub shutdown_grace: Duration,
    /// Return from [`Supervisor::run`] once nothing is running or waiting
    /// on a backoff timer.
    pub exit_on_quiescence: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            exit_on_quiescence: true,
        }
    }
}

/// Final outcome of [`Supervisor::run`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub states: BTreeMap<String, ProcessState>,
    /// Launch errors, in order, followed by deadlock reports.
    pub errors: Vec<SchedulerError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
            && self
                .states
                .values()
                .all(|s| s.status != ProcessStatus::Failed)
    }
}

enum SchedulerEvent {
    Exited {
        name: String,
        run_id: Uuid,
        exit_code: i32,
    },
    BackoffElapsed {
        name: String,
        run_id: Uuid,
    },
    Health {
        name: String,
        status: HealthStatus,
    },
    Stop {
        name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Restart {
        name: String,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Cloneable access to a supervisor: read-only snapshots plus control
/// operations executed by the scheduler loop.
#[derive(Clone)]
pub struct SupervisorHandle {
    table: StateTable,
    tx: mpsc::UnboundedSender<SchedulerEvent>,
    shutdown: CancellationToken,
}

impl SupervisorHandle {
    pub fn get_state(&self, name: &str) -> Option<ProcessState> {
        self.table.get(name)
    }

    pub fn list_states(&self) -> BTreeMap<String, ProcessState> {
        self.table.list()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.table.events()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.table.subscribe()
    }

    pub fn deadlocked(&self) -> Vec<SchedulerError> {
        self.table.deadlocked()
    }

    /// Push a health probe result. `Unknown` never satisfies a
    /// `process_healthy` dependency.
    pub fn set_health(&self, name: &str, status: HealthStatus) -> Result<()> {
        if !self.table.contains(name) {
            return Err(SchedulerError::ProcessNotFound(name.to_string()));
        }
        self.tx
            .send(SchedulerEvent::Health {
                name: name.to_string(),
                status,
            })
            .map_err(|_| SchedulerError::ShuttingDown)
    }

    pub async fn request_stop(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.request(|reply| SchedulerEvent::Stop { name, reply })
            .await
    }

    pub async fn request_restart(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.request(|reply| SchedulerEvent::Restart { name, reply })
            .await
    }

    /// Begin supervisor shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<()>>) -> SchedulerEvent,
    ) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(SchedulerError::ShuttingDown);
        }
        let (reply, response) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| SchedulerError::ShuttingDown)?;
        response.await.unwrap_or(Err(SchedulerError::ShuttingDown))
    }
}

pub struct Supervisor {
    store: Arc<DescriptorStore>,
    graph: Arc<DependencyGraph>,
    table: StateTable,
    options: SchedulerOptions,
    tx: mpsc::UnboundedSender<SchedulerEvent>,
    rx: mpsc::UnboundedReceiver<SchedulerEvent>,
    shutdown: CancellationToken,
}

impl Supervisor {
    /// Build the dependency graph and an all-`Pending` state table.
    /// Graph errors abort here, before anything runs.
    pub fn new(store: DescriptorStore, options: SchedulerOptions) -> Result<Self> {
        let graph = DependencyGraph::build(&store)?;
        let table = StateTable::new(store.names());
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            store: Arc::new(store),
            graph: Arc::new(graph),
            table,
            options,
            tx,
            rx,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            table: self.table.clone(),
            tx: self.tx.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Drive the scheduler until quiescence (if enabled) or shutdown.
    pub async fn run(self) -> RunReport {
        let Supervisor {
            store,
            graph,
            table,
            options,
            tx,
            mut rx,
            shutdown,
        } = self;

        let mut coordinator = Coordinator {
            store,
            graph,
            table,
            options,
            tx,
            shutdown,
            runs: HashMap::new(),
            timers: HashMap::new(),
            backoff_elapsed: BTreeSet::new(),
            stop_requested: BTreeSet::new(),
            restart_requested: BTreeSet::new(),
            deadlocked: BTreeMap::new(),
            errors: Vec::new(),
            shutting_down: false,
            quiescent_reported: false,
        };
        coordinator.run(&mut rx).await
    }
}

struct ActiveRun {
    run_id: Uuid,
    stop: CancellationToken,
}

struct BackoffTimer {
    run_id: Uuid,
    cancel: CancellationToken,
}

struct Coordinator {
    store: Arc<DescriptorStore>,
    graph: Arc<DependencyGraph>,
    table: StateTable,
    options: SchedulerOptions,
    tx: mpsc::UnboundedSender<SchedulerEvent>,
    shutdown: CancellationToken,

    runs: HashMap<String, ActiveRun>,
    timers: HashMap<String, BackoffTimer>,
    /// `Restarting` processes whose backoff is over, waiting on readiness.
    backoff_elapsed: BTreeSet<String>,
    stop_requested: BTreeSet<String>,
    restart_requested: BTreeSet<String>,
    deadlocked: BTreeMap<String, SchedulerError>,
    errors: Vec<SchedulerError>,
    shutting_down: bool,
    quiescent_reported: bool,
}

impl Coordinator {
    async fn run(&mut self, rx: &mut mpsc::UnboundedReceiver<SchedulerEvent>) -> RunReport {
        info!(processes = self.store.len(), "scheduler started");
        if self.shutdown.is_cancelled() {
            info!("shutdown requested before start, nothing launched");
            return self.report();
        }
        self.reconcile();

        loop {
            if self.is_quiescent() {
                self.settle();
                if self.options.exit_on_quiescence {
                    break;
                }
            } else {
                self.quiescent_reported = false;
            }

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.shutdown_all(rx).await;
                    break;
                }
                Some(event) = rx.recv() => {
                    self.handle_event(event);
                    self.reconcile();
                }
            }
        }

        info!("scheduler stopped");
        self.report()
    }

    fn is_quiescent(&self) -> bool {
        self.runs.is_empty() && self.timers.is_empty()
    }

    fn handle_event(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::Exited {
                name,
                run_id,
                exit_code,
            } => self.on_exit(&name, run_id, exit_code),
            SchedulerEvent::BackoffElapsed { name, run_id } => {
                self.on_backoff_elapsed(&name, run_id)
            }
            SchedulerEvent::Health { name, status } => {
                debug!(process = %name, health = %status, "health signal");
                if let Err(e) = self.table.set_health(&name, status) {
                    warn!(error = %e, "dropping health signal");
                }
            }
            SchedulerEvent::Stop { name, reply } => {
                let _ = reply.send(self.stop(&name));
            }
            SchedulerEvent::Restart { name, reply } => {
                let _ = reply.send(self.restart(&name));
            }
        }
    }

    // -- scheduling --

    /// Launch every eligible process until a pass launches nothing, then
    /// look for processes that can never start.
    fn reconcile(&mut self) {
        if self.shutting_down {
            return;
        }
        let mut attempted = BTreeSet::new();
        loop {
            let snapshot = self.table.snapshot();
            let eligible: Vec<String> = self
                .store
                .names()
                .filter(|name| !attempted.contains(*name))
                .filter(|name| self.is_eligible(name, &snapshot))
                .map(str::to_string)
                .collect();
            if eligible.is_empty() {
                break;
            }
            for name in eligible {
                self.launch(&name, &snapshot);
                attempted.insert(name);
            }
        }
        self.detect_deadlocks();
    }

    /// Waiting to run: non-disabled `Pending`, or `Restarting` past its backoff.
    fn is_waiting(&self, name: &str, snapshot: &StateSnapshot) -> bool {
        match snapshot.status(name) {
            Some(ProcessStatus::Pending) => self
                .store
                .get(name)
                .is_some_and(|d| !d.is_disabled()),
            Some(ProcessStatus::Restarting) => self.backoff_elapsed.contains(name),
            Some(
                ProcessStatus::Running | ProcessStatus::Completed | ProcessStatus::Failed,
            )
            | None => false,
        }
    }

    fn is_eligible(&self, name: &str, snapshot: &StateSnapshot) -> bool {
        self.is_waiting(name, snapshot) && self.graph.ready_predecessors(name, snapshot)
    }

    fn launch(&mut self, name: &str, snapshot: &StateSnapshot) {
        let Some(descriptor) = self.store.get(name) else {
            return;
        };
        let is_restart = snapshot.status(name) == Some(ProcessStatus::Restarting);
        self.backoff_elapsed.remove(name);

        let run_id = Uuid::new_v4();
        match ProcessRunner::spawn(descriptor, run_id) {
            Ok(runner) => {
                if let Err(e) = self.table.start_run(name, run_id, is_restart) {
                    error!(process = %name, error = %e, "failed to record launch");
                    return;
                }
                self.watch(runner);
            }
            Err(err) => {
                error!(process = %name, error = %err, "launch failed");
                let last_exit = snapshot.states.get(name).and_then(|s| s.exit_code);
                self.apply(self.table.record_exit(name, ProcessStatus::Failed, last_exit));
                self.errors.push(err);
            }
        }
    }

    /// Spawn the monitor task for one run. It reports exactly one `Exited`
    /// event: the natural exit, or the result of terminating the run once
    /// its stop token is cancelled.
    fn watch(&mut self, runner: ProcessRunner) {
        let name = runner.name.clone();
        let run_id = runner.run_id();
        let stop = self.shutdown.child_token();
        self.runs.insert(
            name.clone(),
            ActiveRun {
                run_id,
                stop: stop.clone(),
            },
        );

        let tx = self.tx.clone();
        let grace = self.options.shutdown_grace;
        tokio::spawn(async move {
            let mut runner = runner;
            let exited = tokio::select! {
                code = runner.wait() => Some(code),
                _ = stop.cancelled() => None,
            };
            let exit_code = match exited {
                Some(code) => code,
                None => shutdown::terminate(&mut runner, grace).await,
            };
            if tx
                .send(SchedulerEvent::Exited {
                    name,
                    run_id,
                    exit_code,
                })
                .is_err()
            {
                debug!("scheduler gone, dropping exit event");
            }
        });
    }

    // -- exits and restarts --

    fn on_exit(&mut self, name: &str, run_id: Uuid, exit_code: i32) {
        let Some(state) = self.table.get(name) else {
            return;
        };
        if state.run_id != Some(run_id) || state.status != ProcessStatus::Running {
            debug!(process = %name, run_id = %run_id, "ignoring exit of a stale run");
            return;
        }
        if self.runs.get(name).is_some_and(|r| r.run_id == run_id) {
            self.runs.remove(name);
        }

        let stop_requested = self.stop_requested.remove(name);
        let restart_requested = self.restart_requested.remove(name);

        if stop_requested && !self.shutting_down {
            self.apply(
                self.table
                    .record_exit(name, ProcessStatus::Completed, Some(exit_code)),
            );
            return;
        }
        if self.shutting_down {
            let status = shutdown_outcome(exit_code);
            if status == ProcessStatus::Failed {
                warn!(process = %name, exit_code, "process did not stop cleanly");
            }
            self.apply(self.table.record_exit(name, status, Some(exit_code)));
            return;
        }
        if restart_requested {
            self.apply(
                self.table
                    .record_exit(name, ProcessStatus::Restarting, Some(exit_code)),
            );
            self.backoff_elapsed.insert(name.to_string());
            return;
        }

        let Some(descriptor) = self.store.get(name) else {
            return;
        };
        let policy = descriptor.restart_policy();
        match restart::evaluate(policy, &state, exit_code) {
            RestartAction::MarkCompleted => {
                self.apply(
                    self.table
                        .record_exit(name, ProcessStatus::Completed, Some(exit_code)),
                );
            }
            RestartAction::MarkFailed => {
                warn!(
                    process = %name,
                    exit_code,
                    restarts = state.restarts,
                    max_restarts = policy.max_restarts,
                    policy = %policy.mode,
                    "restart budget exhausted"
                );
                self.apply(
                    self.table
                        .record_exit(name, ProcessStatus::Failed, Some(exit_code)),
                );
            }
            RestartAction::RestartAfter(delay) => {
                if self
                    .apply(
                        self.table
                            .record_exit(name, ProcessStatus::Restarting, Some(exit_code)),
                    )
                    .is_some()
                {
                    self.schedule_restart(name, run_id, delay);
                }
            }
        }
    }

    fn schedule_restart(&mut self, name: &str, run_id: Uuid, delay: Duration) {
        info!(
            process = %name,
            delay_secs = delay.as_secs_f64(),
            "scheduling restart"
        );
        let cancel = self.shutdown.child_token();
        self.timers.insert(
            name.to_string(),
            BackoffTimer {
                run_id,
                cancel: cancel.clone(),
            },
        );

        let tx = self.tx.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = sleep(delay) => {
                    let _ = tx.send(SchedulerEvent::BackoffElapsed { name, run_id });
                }
            }
        });
    }

    fn on_backoff_elapsed(&mut self, name: &str, run_id: Uuid) {
        if self
            .timers
            .get(name)
            .is_none_or(|timer| timer.run_id != run_id)
        {
            return;
        }
        self.timers.remove(name);
        if self.shutting_down {
            return;
        }
        if let Some(state) = self.table.get(name)
            && state.status == ProcessStatus::Restarting
            && state.run_id == Some(run_id)
        {
            debug!(process = %name, "backoff elapsed");
            self.backoff_elapsed.insert(name.to_string());
        }
    }

    fn cancel_backoff(&mut self, name: &str) {
        if let Some(timer) = self.timers.remove(name) {
            timer.cancel.cancel();
        }
        self.backoff_elapsed.remove(name);
    }

    /// End a `Restarting` process without another run: `Completed` if its
    /// last exit was clean, `Failed` otherwise.
    fn finish_restarting(&mut self, name: &str) {
        self.cancel_backoff(name);
        if let Some(state) = self.table.get(name)
            && state.status == ProcessStatus::Restarting
        {
            let status = if state.exit_code == Some(0) {
                ProcessStatus::Completed
            } else {
                ProcessStatus::Failed
            };
            self.apply(self.table.record_exit(name, status, state.exit_code));
        }
    }

    // -- deadlocks --

    /// Walk the graph in dependency order and collect every waiting process
    /// with an edge that can never be satisfied. Blocked `Restarting`
    /// processes are failed, which may block their own dependents in turn.
    fn detect_deadlocks(&mut self) {
        let mut deadlocked = BTreeMap::new();
        loop {
            let snapshot = self.table.snapshot();
            let mut blocked: BTreeSet<String> = self
                .store
                .iter()
                .filter(|d| d.is_disabled())
                .map(|d| d.name().to_string())
                .collect();
            deadlocked.clear();
            let mut to_fail = Vec::new();

            for name in self.graph.topological_order() {
                if !self.is_waiting(name, &snapshot) {
                    continue;
                }
                if let Some(edge) = self.graph.blocking_dependency(name, &snapshot, &blocked) {
                    let err = SchedulerError::Deadlocked {
                        process: name.clone(),
                        dependency: edge.to.clone(),
                    };
                    if snapshot.status(name) == Some(ProcessStatus::Restarting) {
                        to_fail.push(err);
                    } else {
                        deadlocked.insert(name.clone(), err);
                    }
                    blocked.insert(name.clone());
                }
            }

            if to_fail.is_empty() {
                break;
            }
            for err in to_fail {
                if let SchedulerError::Deadlocked { process, .. } = &err {
                    warn!(process = %process, error = %err, "cannot restart");
                    self.cancel_backoff(process);
                    let last_exit = snapshot.states.get(process).and_then(|s| s.exit_code);
                    self.apply(self.table.record_exit(process, ProcessStatus::Failed, last_exit));
                }
                self.errors.push(err);
            }
        }

        for (name, err) in &deadlocked {
            if !self.deadlocked.contains_key(name) {
                warn!(process = %name, error = %err, "process deadlocked");
            }
        }
        self.deadlocked = deadlocked;
        self.table.set_deadlocked(self.deadlocked.clone());
    }

    /// Quiescent: whatever still waits can never start.
    fn settle(&mut self) {
        if self.quiescent_reported {
            return;
        }
        self.quiescent_reported = true;

        let snapshot = self.table.snapshot();
        for name in self.store.names() {
            if self.is_waiting(name, &snapshot) && !self.deadlocked.contains_key(name) {
                let dependency = self
                    .graph
                    .dependencies(name)
                    .iter()
                    .find(|edge| !edge.is_satisfied(&snapshot))
                    .map(|edge| edge.to.clone())
                    .unwrap_or_default();
                let err = SchedulerError::Deadlocked {
                    process: name.to_string(),
                    dependency,
                };
                warn!(process = %name, error = %err, "process deadlocked");
                self.deadlocked.insert(name.to_string(), err);
            }
        }
        self.table.set_deadlocked(self.deadlocked.clone());
        info!(
            deadlocked = self.deadlocked.len(),
            "no process running or waiting to restart"
        );
    }

    // -- operator requests --

    fn stop(&mut self, name: &str) -> Result<()> {
        if self.shutting_down {
            return Err(SchedulerError::ShuttingDown);
        }
        let state = self
            .table
            .get(name)
            .ok_or_else(|| SchedulerError::ProcessNotFound(name.to_string()))?;
        match state.status {
            ProcessStatus::Running => {
                info!(process = %name, "stop requested");
                self.restart_requested.remove(name);
                if let Some(run) = self.runs.get(name) {
                    self.stop_requested.insert(name.to_string());
                    run.stop.cancel();
                }
                Ok(())
            }
            ProcessStatus::Restarting => {
                info!(process = %name, "stop requested, cancelling pending restart");
                self.finish_restarting(name);
                Ok(())
            }
            ProcessStatus::Pending | ProcessStatus::Completed | ProcessStatus::Failed => {
                Err(SchedulerError::NotRunning(name.to_string()))
            }
        }
    }

    fn restart(&mut self, name: &str) -> Result<()> {
        if self.shutting_down {
            return Err(SchedulerError::ShuttingDown);
        }
        let descriptor = self
            .store
            .get(name)
            .ok_or_else(|| SchedulerError::ProcessNotFound(name.to_string()))?;
        if descriptor.is_disabled() {
            return Err(SchedulerError::ProcessDisabled(name.to_string()));
        }
        let state = self
            .table
            .get(name)
            .ok_or_else(|| SchedulerError::ProcessNotFound(name.to_string()))?;

        info!(process = %name, status = %state.status, "restart requested");
        match state.status {
            ProcessStatus::Running => {
                if let Some(run) = self.runs.get(name) {
                    self.stop_requested.remove(name);
                    self.restart_requested.insert(name.to_string());
                    run.stop.cancel();
                }
            }
            ProcessStatus::Restarting => {
                if let Some(timer) = self.timers.remove(name) {
                    timer.cancel.cancel();
                }
                self.backoff_elapsed.insert(name.to_string());
            }
            ProcessStatus::Completed | ProcessStatus::Failed => {
                self.table.reset(name)?;
            }
            ProcessStatus::Pending => {}
        }
        Ok(())
    }

    // -- shutdown --

    async fn shutdown_all(&mut self, rx: &mut mpsc::UnboundedReceiver<SchedulerEvent>) {
        info!(running = self.runs.len(), "shutting down");
        self.shutting_down = true;

        let restarting: Vec<String> = self
            .timers
            .keys()
            .cloned()
            .chain(self.backoff_elapsed.iter().cloned())
            .collect();
        for name in restarting {
            self.finish_restarting(&name);
        }

        for run in self.runs.values() {
            run.stop.cancel();
        }

        let deadline =
            Instant::now() + self.options.shutdown_grace + SIGKILL_TIMEOUT + Duration::from_secs(1);
        while !self.runs.is_empty() {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(event)) => self.handle_event(event),
                Ok(None) => break,
                Err(_) => {
                    let names: Vec<String> = self.runs.keys().cloned().collect();
                    for name in names {
                        warn!(process = %name, "no exit reported before shutdown deadline");
                        self.apply(self.table.record_exit(&name, ProcessStatus::Failed, None));
                    }
                    self.runs.clear();
                }
            }
        }
    }

    // -- helpers --

    fn apply(&self, result: Result<LifecycleEvent>) -> Option<LifecycleEvent> {
        match result {
            Ok(event) => Some(event),
            Err(e) => {
                error!(error = %e, "state table update failed");
                None
            }
        }
    }

    fn report(&self) -> RunReport {
        let mut errors = self.errors.clone();
        errors.extend(self.deadlocked.values().cloned());
        RunReport {
            states: self.table.list(),
            errors,
        }
    }
}

/// Final status of a run that exits after shutdown began: a clean exit or
/// the SIGTERM we sent is `Completed`, anything else (including SIGKILL) is
/// `Failed`.
fn shutdown_outcome(exit_code: i32) -> ProcessStatus {
    if exit_code == 0 || exit_code == SIGTERM_EXIT_CODE {
        ProcessStatus::Completed
    } else {
        ProcessStatus::Failed
    }
}
