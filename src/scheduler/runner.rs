use crate::config::types::ScheduleConfig;
use crate::directory::GroupDirectory;
use crate::scheduler::orchestrator::{Orchestrator, OrchestratorError, TaskResult};
use crate::scheduler::triggers::{build_triggers, next_fire, Activity, Trigger};
use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Per-firing outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Tally {
    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }

    fn record(&mut self, result: &TaskResult) {
        match result {
            TaskResult::Succeeded => self.succeeded += 1,
            TaskResult::Skipped(_) => self.skipped += 1,
            TaskResult::Failed(_) => self.failed += 1,
        }
    }
}

/// Time-of-day trigger loop that fans each firing out over every eligible group
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    directory: Arc<dyn GroupDirectory>,
    triggers: Vec<Trigger>,
    max_concurrent_tasks: usize,
    stagger: Duration,
    utc_offset: FixedOffset,
}

impl Scheduler {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        directory: Arc<dyn GroupDirectory>,
        schedule: &ScheduleConfig,
    ) -> Result<Self, String> {
        let triggers = build_triggers(schedule)?;
        let utc_offset = orchestrator.settings().utc_offset;
        Ok(Self {
            orchestrator,
            directory,
            triggers,
            max_concurrent_tasks: schedule.max_concurrent_tasks.max(1),
            stagger: schedule.stagger,
            utc_offset,
        })
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    /// Run one activity for every eligible group and wait for all of them.
    /// Group `i` starts after `i * stagger`, then waits for a concurrency slot.
    pub async fn fire(&self, activity: Activity) -> Tally {
        let targets = match self.directory.targets().await {
            Ok(targets) => targets,
            Err(e) => {
                tracing::error!(activity = %activity, error = %e, "Could not resolve groups");
                return Tally::default();
            }
        };
        if targets.is_empty() {
            tracing::info!(activity = %activity, "No eligible groups");
            return Tally::default();
        }

        tracing::info!(
            activity = %activity,
            groups = targets.len(),
            max_concurrent = self.max_concurrent_tasks,
            stagger_ms = self.stagger.as_millis() as u64,
            "Trigger fired"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_tasks));
        let handles: Vec<_> = targets
            .into_iter()
            .enumerate()
            .map(|(index, target)| {
                let orchestrator = self.orchestrator.clone();
                let semaphore = semaphore.clone();
                let delay = self.stagger * index as u32;
                tokio::spawn(async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return TaskResult::Failed(OrchestratorError::Task(
                                "task semaphore closed".to_string(),
                            ))
                        }
                    };
                    orchestrator.run_task(activity, &target).await
                })
            })
            .collect();

        let mut tally = Tally::default();
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(result) => tally.record(&result),
                Err(e) => {
                    tracing::error!(activity = %activity, error = %e, "Group task panicked");
                    tally.failed += 1;
                }
            }
        }

        tracing::info!(
            activity = %activity,
            succeeded = tally.succeeded,
            skipped = tally.skipped,
            failed = tally.failed,
            total = tally.total(),
            "Trigger finished"
        );
        tally
    }

    /// Sleep until each trigger is due and fire it, until `shutdown` is cancelled
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        if self.triggers.is_empty() {
            tracing::warn!("No triggers configured, scheduler idle");
            shutdown.cancelled().await;
            return;
        }

        for trigger in &self.triggers {
            tracing::info!(at = %trigger.at, activity = %trigger.activity, "Trigger registered");
        }

        let mut last_fired: Option<DateTime<FixedOffset>> = None;
        loop {
            let now = Utc::now().with_timezone(&self.utc_offset);
            let after = match last_fired {
                Some(fired) if fired > now => fired,
                _ => now,
            };
            let Some((at, activities)) = next_fire(&self.triggers, after) else {
                tracing::warn!("Could not compute next trigger time, scheduler idle");
                shutdown.cancelled().await;
                return;
            };

            let wait = (at - now).to_std().unwrap_or(Duration::ZERO);
            tracing::debug!(next = %at, wait_secs = wait.as_secs(), "Waiting for next trigger");

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Scheduler stopping");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            last_fired = Some(at);
            for activity in activities {
                let scheduler = self.clone();
                tokio::spawn(async move {
                    scheduler.fire(activity).await;
                });
            }
        }
    }
}
