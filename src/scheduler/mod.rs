pub mod locks;
pub mod orchestrator;
pub mod runner;
pub mod triggers;

pub use locks::GroupLocks;
pub use orchestrator::{
    CollectOutcome, Orchestrator, OrchestratorError, OrchestratorSettings, ReportOutcome,
    SkipReason, TaskResult,
};
pub use runner::{Scheduler, Tally};
pub use triggers::{build_triggers, next_fire, Activity, TimeOfDay, Trigger};
