//! Run coordinator
//!
//! Drives one execution of the task graph per due logical timestamp.
//!
//! The coordinator is single-owner state: it is only mutated from the task
//! calling [`Coordinator::tick`]. Steps run on spawned workers that report
//! back over a channel, and outputs are published to the
//! [`OutputExchange`] by the coordinator when it applies those reports.
//!
//! A tick:
//! 1. applies operator commands and worker reports
//! 2. fails runs that outlived their timeout
//! 3. admits the timestamps the run clock says are due
//! 4. activates queued runs up to `max_active_runs`
//! 5. dispatches every Ready step
//! 6. finalizes runs that reached a terminal status

pub mod board;
pub mod retry;
pub mod run;
pub mod worker;

pub use board::{CoordinatorHandle, RunBoard};

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use stratus_core::domain::run::{RunInstance, RunStatus};
use tokio::sync::{Semaphore, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::clock;
use crate::definition::PipelineDefinition;
use crate::error::{EngineError, Result};
use crate::exchange::OutputExchange;
use crate::graph::TaskGraph;
use crate::ledger::RunLedger;
use crate::steps::{StepContext, StepRegistry};

use board::Command;
use run::{CancelReason, RunState};
use worker::{StepEvent, StepJob};

/// How long shutdown waits for in-flight steps to acknowledge cancellation
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// What a tick did
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// Logical timestamps admitted by this tick, ascending
    pub admitted: Vec<DateTime<Utc>>,
    /// Reports of runs that reached a terminal status
    pub finished: Vec<RunInstance>,
    /// Runs still queued or executing
    pub in_flight: usize,
}

impl TickOutcome {
    pub fn is_idle(&self) -> bool {
        self.in_flight == 0
    }
}

enum Wake {
    Event(StepEvent),
    Command(Command),
    Deadline,
}

pub struct Coordinator {
    definition: PipelineDefinition,
    graph: TaskGraph,
    steps: StepRegistry,
    ledger: Arc<dyn RunLedger>,
    exchange: OutputExchange,
    semaphore: Arc<Semaphore>,
    events_tx: mpsc::UnboundedSender<StepEvent>,
    events_rx: mpsc::UnboundedReceiver<StepEvent>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    handle: CoordinatorHandle,
    /// Latest logical timestamp admitted so far
    watermark: Option<DateTime<Utc>>,
    /// Admitted runs waiting for an active slot, oldest first
    queued: VecDeque<RunState>,
    active: BTreeMap<DateTime<Utc>, RunState>,
}

impl Coordinator {
    /// Builds the graph, checks every step has an action and restores the
    /// watermark and interrupted runs from the ledger
    pub async fn new(
        definition: PipelineDefinition,
        steps: StepRegistry,
        ledger: Arc<dyn RunLedger>,
    ) -> Result<Self> {
        let graph = definition.graph()?;
        steps.validate(&graph)?;

        let resume = ledger.resume().await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let board = RunBoard::new(&definition.id);
        board.publish(
            resume.watermark,
            0,
            resume.history.iter().chain(&resume.unfinished).cloned(),
        );

        let queued: VecDeque<RunState> = resume
            .unfinished
            .iter()
            .map(|report| {
                info!(
                    "[{}] Resuming interrupted run {}",
                    report.logical_timestamp, report.id
                );
                RunState::resumed(report, &graph)
            })
            .collect();

        info!(
            "Coordinator for '{}' ready: {} steps, {} location(s), watermark {:?}",
            definition.id,
            graph.len(),
            definition.locations.len(),
            resume.watermark
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(definition.max_parallel_steps.max(1))),
            definition,
            graph,
            steps,
            ledger,
            exchange: OutputExchange::new(),
            events_tx,
            events_rx,
            commands_rx,
            handle: CoordinatorHandle::new(board, commands_tx),
            watermark: resume.watermark,
            queued,
            active: BTreeMap::new(),
        })
    }

    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }

    /// Runs queued or executing
    pub fn in_flight(&self) -> usize {
        self.queued.len() + self.active.len()
    }

    /// Admits due runs and advances every active run as far as it can go
    /// without waiting
    ///
    /// Step failures are recorded on their runs; only broken invariants and
    /// ledger failures are returned as errors.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<TickOutcome> {
        while let Ok(command) = self.commands_rx.try_recv() {
            self.handle_command(command);
        }
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply(event)?;
        }

        self.expire_runs();
        let admitted = self.admit(now).await?;
        self.activate().await?;
        self.dispatch()?;

        let mut finished = Vec::new();
        let finalized = self.finalize(&mut finished).await;
        self.publish_board(&finished);
        finalized?;

        Ok(TickOutcome {
            admitted,
            finished,
            in_flight: self.in_flight(),
        })
    }

    /// Waits until a worker reports, a command arrives or a run deadline
    /// passes, and applies what happened
    pub async fn wait_for_progress(&mut self) -> Result<()> {
        let deadline = self.active.values().filter_map(RunState::deadline).min();

        let wake = tokio::select! {
            Some(event) = self.events_rx.recv() => Wake::Event(event),
            Some(command) = self.commands_rx.recv() => Wake::Command(command),
            _ = sleep_until(deadline) => Wake::Deadline,
        };

        match wake {
            Wake::Event(event) => self.apply(event)?,
            Wake::Command(command) => self.handle_command(command),
            Wake::Deadline => {}
        }
        Ok(())
    }

    /// Ticks with a fixed clock until no run is queued or executing
    pub async fn run_until_idle(&mut self, now: DateTime<Utc>) -> Result<TickOutcome> {
        let mut total = TickOutcome::default();

        loop {
            let outcome = self.tick(now).await?;
            total.admitted.extend(outcome.admitted);
            total.finished.extend(outcome.finished);

            if outcome.in_flight == 0 {
                return Ok(total);
            }
            self.wait_for_progress().await?;
        }
    }

    /// Cancels every active run and waits for their steps to stop
    ///
    /// Runs interrupted this way are not recorded as cancelled, so the
    /// ledger still lists them as unfinished and they resume on restart.
    pub async fn shutdown(&mut self) -> Result<()> {
        let now = Utc::now();
        for run in self.active.values_mut() {
            run.cancel(CancelReason::Shutdown, now);
        }

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while self.active.values().any(|run| run.in_flight() > 0) {
                match self.events_rx.recv().await {
                    Some(event) => self.apply(event)?,
                    None => break,
                }
            }
            Ok::<(), EngineError>(())
        })
        .await;

        match drained {
            Ok(result) => result?,
            Err(_) => warn!(
                "Steps still running after {:?}, abandoning them",
                SHUTDOWN_GRACE
            ),
        }

        self.finalize(&mut Vec::new()).await?;
        info!(
            "Coordinator stopped with {} run(s) left to resume",
            self.queued.len() + self.active.len()
        );
        Ok(())
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Cancel {
                logical_timestamp,
                reply,
            } => {
                let accepted = self.cancel_run(logical_timestamp, CancelReason::Requested);
                // The requester may have given up waiting
                let _ = reply.send(accepted);
            }
        }
    }

    fn cancel_run(&mut self, logical_timestamp: DateTime<Utc>, reason: CancelReason) -> bool {
        let now = Utc::now();

        if let Some(run) = self.active.get_mut(&logical_timestamp) {
            let cancelled = run.cancel(reason, now);
            if cancelled {
                warn!("[{}] Run cancelled: {:?}", logical_timestamp, reason);
            }
            return cancelled;
        }

        let position = self
            .queued
            .iter()
            .position(|run| run.logical_timestamp() == logical_timestamp);
        match position.and_then(|index| self.queued.remove(index)) {
            Some(mut run) => {
                run.cancel(reason, now);
                warn!("[{}] Queued run cancelled: {:?}", logical_timestamp, reason);
                // Finalized on the next pass like any other terminal run
                self.active.insert(logical_timestamp, run);
                true
            }
            None => false,
        }
    }

    fn apply(&mut self, event: StepEvent) -> Result<()> {
        match event {
            StepEvent::AttemptStarted {
                run,
                step,
                attempt,
                at,
            } => {
                if let Some(state) = self.active.get_mut(&run) {
                    debug!("[{}] {} running (attempt {})", run, step, attempt);
                    state.attempt_started(&step, attempt, at);
                }
            }
            StepEvent::AttemptFailed {
                run,
                step,
                attempt,
                error,
                retry_in,
            } => {
                if let Some(state) = self.active.get_mut(&run) {
                    debug!(
                        "[{}] {} attempt {} failed, retry in {:?}",
                        run, step, attempt, retry_in
                    );
                    state.attempt_failed(&step, error);
                }
            }
            StepEvent::Finished {
                run,
                step,
                outcome,
                at,
            } => {
                let Some(state) = self.active.get_mut(&run) else {
                    warn!("[{}] Dropping outcome of {} for unknown run", run, step);
                    return Ok(());
                };

                match outcome {
                    Ok(output) => {
                        if state.is_live(&step) {
                            self.exchange.publish(run, &step, output)?;
                            info!("[{}] {} succeeded", run, step);
                        }
                        state.finish(&step, Ok(()), &self.graph, at);
                    }
                    Err(e) => {
                        if state.finish(&step, Err(e.to_string()), &self.graph, at) {
                            error!("[{}] {} failed: {}", run, step, e);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn expire_runs(&mut self) {
        let now = Instant::now();
        let limit = self.definition.run_timeout;

        for (logical_timestamp, run) in self.active.iter_mut() {
            if run.is_expired(now) {
                warn!(
                    "[{}] Run exceeded timeout of {:?}, cancelling",
                    logical_timestamp, limit
                );
                run.cancel(CancelReason::Timeout(limit), Utc::now());
            }
        }
    }

    async fn admit(&mut self, now: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>> {
        let due = clock::due_runs(&self.definition, self.watermark, now);

        for logical_timestamp in &due {
            let run = RunState::new(*logical_timestamp, &self.graph);
            self.ledger.record(&run.snapshot()).await?;
            self.watermark = Some(*logical_timestamp);

            info!("[{}] Run admitted", logical_timestamp);
            self.queued.push_back(run);
        }

        Ok(due)
    }

    async fn activate(&mut self) -> Result<()> {
        let limit = self.definition.max_active_runs.max(1);

        while self.running_runs() < limit {
            let Some(mut run) = self.queued.pop_front() else {
                break;
            };

            run.activate(self.definition.run_timeout);
            if let Err(e) = self.ledger.record(&run.snapshot()).await {
                // Stays first in line for the next tick
                run.deactivate();
                self.queued.push_front(run);
                return Err(e);
            }

            info!("[{}] Run started", run.logical_timestamp());
            self.active.insert(run.logical_timestamp(), run);
        }

        Ok(())
    }

    fn running_runs(&self) -> usize {
        self.active
            .values()
            .filter(|run| !run.status().is_terminal())
            .count()
    }

    fn dispatch(&mut self) -> Result<()> {
        for (logical_timestamp, run) in self.active.iter_mut() {
            for step in run.take_ready(&self.graph) {
                let action = self.steps.get(step.kind).ok_or_else(|| {
                    EngineError::Assertion(format!("no action registered for {}", step))
                })?;

                let inputs = self
                    .graph
                    .dependencies_of(&step)
                    .iter()
                    .filter_map(|dep| {
                        self.exchange
                            .get(*logical_timestamp, dep)
                            .map(|output| (dep.clone(), output))
                    })
                    .collect();

                let location = step
                    .location
                    .as_deref()
                    .and_then(|name| self.graph.location(name))
                    .cloned();

                let ctx = StepContext::new(
                    *logical_timestamp,
                    step,
                    location,
                    inputs,
                    run.cancel_token().child_token(),
                );

                StepJob {
                    ctx,
                    action,
                    retry: self.definition.retry.clone(),
                }
                .spawn(self.semaphore.clone(), self.events_tx.clone());
            }
        }

        Ok(())
    }

    /// Records settled runs and drops them from the active set
    ///
    /// A run leaves the active set only once its report is in the ledger, so
    /// a failed write is retried by the next call. Reports recorded before a
    /// failure are still pushed to `finished`.
    async fn finalize(&mut self, finished: &mut Vec<RunInstance>) -> Result<()> {
        let settled: Vec<DateTime<Utc>> = self
            .active
            .iter()
            .filter(|(_, run)| run.is_settled())
            .map(|(logical_timestamp, _)| *logical_timestamp)
            .collect();

        for logical_timestamp in settled {
            let Some(run) = self.active.get_mut(&logical_timestamp) else {
                continue;
            };
            run.close(Utc::now());

            // Interrupted by shutdown: the ledger keeps it as unfinished
            if run.cancel_reason() != Some(CancelReason::Shutdown) {
                let report = run.snapshot();
                self.ledger.record(&report).await?;
                log_outcome(&report);
                finished.push(report);
            }

            self.active.remove(&logical_timestamp);
            self.exchange.clear_run(logical_timestamp);
        }

        Ok(())
    }

    fn publish_board(&self, finished: &[RunInstance]) {
        let reports = self
            .queued
            .iter()
            .chain(self.active.values())
            .map(RunState::snapshot)
            .chain(finished.iter().cloned());

        self.handle
            .board()
            .publish(self.watermark, self.running_runs(), reports);
    }
}

fn log_outcome(report: &RunInstance) {
    let at = report.logical_timestamp;
    match report.status {
        RunStatus::Success => info!("[{}] Run succeeded ({} steps)", at, report.steps.len()),
        RunStatus::Failed => {
            let failed: Vec<String> = report
                .failures()
                .iter()
                .map(|execution| execution.step.to_string())
                .collect();
            let locations: Vec<&str> = report.affected_locations().into_iter().collect();
            error!(
                "[{}] Run failed{}: failed steps [{}], affected locations [{}]",
                at,
                report
                    .reason
                    .as_deref()
                    .map(|reason| format!(" ({})", reason))
                    .unwrap_or_default(),
                failed.join(", "),
                locations.join(", ")
            );
        }
        RunStatus::Cancelled => warn!(
            "[{}] Run cancelled: {}",
            at,
            report.reason.as_deref().unwrap_or("no reason given")
        ),
        RunStatus::Pending | RunStatus::Running => {}
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
