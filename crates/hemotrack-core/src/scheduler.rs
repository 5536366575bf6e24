//! Per-source scheduling with an overlap guard and a bounded worker pool.
//!
//! Each enabled source gets one ticker on its own cadence. Runs are
//! dispatched onto a shared, fixed-size worker pool so a slow source
//! cannot starve others, while the in-flight flag keeps runs for a single
//! source strictly serialized. A trigger that fires while the previous
//! run is still executing is skipped, never queued; a misfire while the
//! process was down is not retroactively executed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::{Source, SourcesConfig};
use crate::error::PipelineError;
use crate::report::{RunEvent, RunReporter};
use crate::traits::SourceRunner;

/// Outcome of firing a trigger, manual or scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The run was handed to the worker pool.
    Dispatched,
    /// A run for this source is still in flight; this fire was dropped.
    SkippedOverlap,
    /// The source is paused; nothing was dispatched.
    Paused,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker pool size shared across all sources.
    pub workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// Per-source trigger state, owned solely by the scheduler and reached
/// only through its public operations.
struct TriggerState {
    source: Source,
    in_flight: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    cancel: CancellationToken,
    ticker: JoinHandle<()>,
}

/// Owns the trigger set and dispatches runs to a [`SourceRunner`].
pub struct Scheduler<Run, R>
where
    Run: SourceRunner,
    R: RunReporter + 'static,
{
    runner: Run,
    reporter: Arc<R>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    triggers: Arc<Mutex<HashMap<String, TriggerState>>>,
}

impl<Run, R> Scheduler<Run, R>
where
    Run: SourceRunner,
    R: RunReporter + 'static,
{
    pub fn new(runner: Run, reporter: Arc<R>, config: SchedulerConfig) -> Self {
        Self {
            runner,
            reporter,
            permits: Arc::new(Semaphore::new(config.workers.max(1))),
            cancel: CancellationToken::new(),
            triggers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedule every enabled source from a configuration. Intended for
    /// process start; use [`reload`](Self::reload) afterwards.
    pub async fn schedule_all(&self, config: &SourcesConfig) {
        let mut triggers = self.triggers.lock().await;
        for source in config.enabled() {
            if triggers.contains_key(&source.id) {
                continue;
            }
            let state = self.spawn_trigger(source.clone(), None, None);
            self.reporter.report(RunEvent::Scheduled {
                source_id: &source.id,
                cadence: source.cadence.interval(),
            });
            triggers.insert(source.id.clone(), state);
        }
    }

    /// Re-derive the trigger set from a changed configuration:
    /// add new sources, drop removed or disabled ones, and reschedule
    /// sources whose cadence or fetch parameters changed — without
    /// touching unaffected sources.
    pub async fn reload(&self, config: &SourcesConfig) {
        let mut triggers = self.triggers.lock().await;

        let keep: Vec<String> = config.enabled().map(|s| s.id.clone()).collect();
        let removed: Vec<String> = triggers
            .keys()
            .filter(|id| !keep.contains(*id))
            .cloned()
            .collect();
        for id in removed {
            if let Some(state) = triggers.remove(&id) {
                state.cancel.cancel();
                state.ticker.abort();
                self.reporter.report(RunEvent::Removed { source_id: &id });
            }
        }

        for source in config.enabled() {
            let changed = match triggers.get(&source.id) {
                None => {
                    let state = self.spawn_trigger(source.clone(), None, None);
                    self.reporter.report(RunEvent::Scheduled {
                        source_id: &source.id,
                        cadence: source.cadence.interval(),
                    });
                    triggers.insert(source.id.clone(), state);
                    continue;
                }
                Some(existing) => config_changed(&existing.source, source),
            };
            if !changed {
                continue;
            }
            // Keep the in-flight and paused flags so the overlap guard
            // survives a reschedule.
            if let Some(old) = triggers.remove(&source.id) {
                old.cancel.cancel();
                old.ticker.abort();
                let state =
                    self.spawn_trigger(source.clone(), Some(old.in_flight), Some(old.paused));
                self.reporter.report(RunEvent::Rescheduled {
                    source_id: &source.id,
                    cadence: source.cadence.interval(),
                });
                triggers.insert(source.id.clone(), state);
            }
        }
    }

    /// Manually fire a source's trigger. Respects the same overlap guard
    /// as scheduled fires, so it is safe to call repeatedly.
    pub async fn trigger(&self, source_id: &str) -> Result<TriggerOutcome, PipelineError> {
        let triggers = self.triggers.lock().await;
        let state = triggers
            .get(source_id)
            .ok_or_else(|| PipelineError::UnknownSource(source_id.to_string()))?;
        if state.paused.load(Ordering::SeqCst) {
            return Ok(TriggerOutcome::Paused);
        }
        Ok(self.dispatch(&state.source, &state.in_flight))
    }

    pub async fn pause(&self, source_id: &str) -> Result<(), PipelineError> {
        let triggers = self.triggers.lock().await;
        let state = triggers
            .get(source_id)
            .ok_or_else(|| PipelineError::UnknownSource(source_id.to_string()))?;
        state.paused.store(true, Ordering::SeqCst);
        self.reporter.report(RunEvent::Paused { source_id });
        Ok(())
    }

    pub async fn resume(&self, source_id: &str) -> Result<(), PipelineError> {
        let triggers = self.triggers.lock().await;
        let state = triggers
            .get(source_id)
            .ok_or_else(|| PipelineError::UnknownSource(source_id.to_string()))?;
        state.paused.store(false, Ordering::SeqCst);
        self.reporter.report(RunEvent::Resumed { source_id });
        Ok(())
    }

    /// Ids currently carrying a trigger.
    pub async fn scheduled_sources(&self) -> Vec<String> {
        let triggers = self.triggers.lock().await;
        let mut ids: Vec<_> = triggers.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Stop all tickers and cancel in-flight runs. A run cancelled before
    /// its transactional commit simply discards its in-memory batch.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut triggers = self.triggers.lock().await;
        for (_, state) in triggers.drain() {
            state.ticker.abort();
        }
    }

    fn spawn_trigger(
        &self,
        source: Source,
        in_flight: Option<Arc<AtomicBool>>,
        paused: Option<Arc<AtomicBool>>,
    ) -> TriggerState {
        let in_flight = in_flight.unwrap_or_default();
        let paused = paused.unwrap_or_default();
        let cancel = self.cancel.child_token();

        let ticker = {
            let source = source.clone();
            let in_flight = Arc::clone(&in_flight);
            let paused = Arc::clone(&paused);
            let cancel = cancel.clone();
            let runner = self.runner.clone();
            let reporter = Arc::clone(&self.reporter);
            let permits = Arc::clone(&self.permits);

            tokio::spawn(async move {
                let period = source.cadence.interval();
                // First fire happens one full cadence after scheduling;
                // missed ticks are skipped, never caught up.
                let mut interval =
                    tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        _ = interval.tick() => {
                            if paused.load(Ordering::SeqCst) {
                                tracing::debug!(source_id = %source.id, "Tick while paused");
                                continue;
                            }
                            dispatch_run(
                                &runner,
                                &reporter,
                                &permits,
                                &cancel,
                                &source,
                                &in_flight,
                            );
                        }
                    }
                }
            })
        };

        TriggerState {
            source,
            in_flight,
            paused,
            cancel,
            ticker,
        }
    }

    fn dispatch(&self, source: &Source, in_flight: &Arc<AtomicBool>) -> TriggerOutcome {
        dispatch_run(
            &self.runner,
            &self.reporter,
            &self.permits,
            &self.cancel,
            source,
            in_flight,
        )
    }
}

/// Clears the in-flight flag when the dispatched task ends, panics
/// included.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn dispatch_run<Run, R>(
    runner: &Run,
    reporter: &Arc<R>,
    permits: &Arc<Semaphore>,
    cancel: &CancellationToken,
    source: &Source,
    in_flight: &Arc<AtomicBool>,
) -> TriggerOutcome
where
    Run: SourceRunner,
    R: RunReporter + 'static,
{
    if in_flight.swap(true, Ordering::SeqCst) {
        reporter.report(RunEvent::SkippedOverlap {
            source_id: &source.id,
        });
        return TriggerOutcome::SkippedOverlap;
    }

    let runner = runner.clone();
    let source = source.clone();
    let permits = Arc::clone(permits);
    let cancel = cancel.clone();
    let guard = InFlightGuard(Arc::clone(in_flight));

    tokio::spawn(async move {
        let _guard = guard;
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!(source_id = %source.id, "Run cancelled before dispatch");
            }
            permit = permits.acquire_owned() => {
                let Ok(_permit) = permit else { return };
                tokio::select! {
                    () = cancel.cancelled() => {
                        tracing::debug!(source_id = %source.id, "Run cancelled mid-flight");
                    }
                    () = runner.run(&source) => {}
                }
            }
        }
    });

    TriggerOutcome::Dispatched
}

fn config_changed(old: &Source, new: &Source) -> bool {
    old.cadence != new.cadence
        || old.url != new.url
        || old.adapter != new.adapter
        || old.timeout_secs != new.timeout_secs
        || old.max_retries != new.max_retries
        || old.min_fetch_interval_secs != new.min_fetch_interval_secs
}
