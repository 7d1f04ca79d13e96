use crate::batch::{epoch_seconds, Batch, BatchSummary, Quote, TokenUsage, Topic, UserTitle};
use crate::config::resolve_utc_offset;
use crate::config::types::{AnalysisConfig, Config, IncrementalConfig};
use crate::directory::GroupTarget;
use crate::extraction::{
    prompt, ExtractionInput, ExtractionKind, ExtractionRequest, ExtractionResponse,
};
use crate::merge::{merge_batches, AggregateState, WindowSummary};
use crate::report::{ReportError, ReportMode, ReportPayload, ReportSink, ReportStatistics};
use crate::resilience::ResilienceContext;
use crate::scheduler::locks::GroupLocks;
use crate::scheduler::triggers::Activity;
use crate::source::{FetchWindow, Message, MessageSource, SourceError, SourceRegistry};
use crate::stats::{clean_messages, compute_batch_stats, rank_users, BatchStats, UserRank};
use crate::storage::{BatchStore, StorageError};
use chrono::{FixedOffset, Utc};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::Instrument;

const SECONDS_PER_DAY: f64 = 86_400.0;
const PEAK_HOURS: usize = 3;

/// Shared ownership of a group's lock
type HeldLock = Arc<OwnedMutexGuard<()>>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("message source error: {0}")]
    Source(#[from] SourceError),

    #[error("report error: {0}")]
    Report(#[from] ReportError),

    #[error("{activity} timed out after {after:?}")]
    Timeout { activity: Activity, after: Duration },

    #[error("task failed: {0}")]
    Task(String),
}

/// Why an entry point did nothing. Skips are normal outcomes, not failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NoMessages,
    BelowThreshold { count: usize, minimum: usize },
    NoBatches,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoMessages => f.write_str("no new messages"),
            SkipReason::BelowThreshold { count, minimum } => {
                write!(f, "{} messages, below minimum of {}", count, minimum)
            }
            SkipReason::NoBatches => f.write_str("no batches in window"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CollectOutcome {
    Collected {
        batch: BatchSummary,
        /// Watermark after the save
        watermark: i64,
    },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    Dispatched {
        window_label: String,
        batch_count: usize,
        message_count: u64,
        cleaned: usize,
    },
    Skipped(SkipReason),
}

/// Outcome of one per-group task as seen by the scheduler
#[derive(Debug)]
pub enum TaskResult {
    Succeeded,
    Skipped(SkipReason),
    Failed(OrchestratorError),
}

impl TaskResult {
    fn from_collect(result: Result<CollectOutcome, OrchestratorError>) -> Self {
        match result {
            Ok(CollectOutcome::Collected { .. }) => TaskResult::Succeeded,
            Ok(CollectOutcome::Skipped(reason)) => TaskResult::Skipped(reason),
            Err(e) => TaskResult::Failed(e),
        }
    }

    fn from_report(result: Result<ReportOutcome, OrchestratorError>) -> Self {
        match result {
            Ok(ReportOutcome::Dispatched { .. }) => TaskResult::Succeeded,
            Ok(ReportOutcome::Skipped(reason)) => TaskResult::Skipped(reason),
            Err(e) => TaskResult::Failed(e),
        }
    }

    fn log(&self, activity: Activity) {
        match self {
            TaskResult::Succeeded => tracing::info!(activity = %activity, "Task succeeded"),
            TaskResult::Skipped(reason) => {
                tracing::info!(activity = %activity, reason = %reason, "Task skipped")
            }
            TaskResult::Failed(OrchestratorError::Timeout { after, .. }) => {
                tracing::error!(activity = %activity, after = ?after, "Task timed out, abandoned")
            }
            TaskResult::Failed(e) => tracing::error!(activity = %activity, error = %e, "Task failed"),
        }
    }
}

/// The knobs the orchestrator reads, lifted out of [`Config`]
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub analysis: AnalysisConfig,
    pub incremental: IncrementalConfig,
    pub collect_timeout: Duration,
    pub report_timeout: Duration,
    pub max_tokens: u32,
    pub utc_offset: FixedOffset,
    /// Platform id -> backend id used as the session default
    pub platform_backends: HashMap<String, String>,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Result<Self, OrchestratorError> {
        let utc_offset = resolve_utc_offset(config.analysis.utc_offset.as_deref())
            .map_err(OrchestratorError::Configuration)?;
        let platform_backends = config
            .platforms
            .iter()
            .filter_map(|(id, platform)| {
                platform.default_backend.clone().map(|backend| (id.clone(), backend))
            })
            .collect();

        Ok(Self {
            analysis: config.analysis.clone(),
            incremental: config.schedule.incremental.clone(),
            collect_timeout: config.schedule.collect_timeout,
            report_timeout: config.schedule.report_timeout,
            max_tokens: config.extraction.max_tokens,
            utc_offset,
            platform_backends,
        })
    }

    fn window_seconds(&self) -> f64 {
        f64::from(self.analysis.days) * SECONDS_PER_DAY
    }
}

/// Runs the per-group work behind every trigger: batch collection, final
/// reports over the sliding window and the single-pass traditional report.
pub struct Orchestrator {
    settings: OrchestratorSettings,
    store: Arc<dyn BatchStore>,
    sources: SourceRegistry,
    resilience: Arc<ResilienceContext>,
    sink: Option<Arc<dyn ReportSink>>,
    locks: GroupLocks,
}

impl Orchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        store: Arc<dyn BatchStore>,
        sources: SourceRegistry,
        resilience: Arc<ResilienceContext>,
    ) -> Self {
        Self {
            settings,
            store,
            sources,
            resilience,
            sink: None,
            locks: GroupLocks::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn BatchStore> {
        &self.store
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub fn resilience(&self) -> &Arc<ResilienceContext> {
        &self.resilience
    }

    pub fn locks(&self) -> &GroupLocks {
        &self.locks
    }

    fn source(&self, platform_id: &str) -> Result<Arc<dyn MessageSource>, OrchestratorError> {
        self.sources.get(platform_id).ok_or_else(|| {
            OrchestratorError::Configuration(format!(
                "no message source for platform '{}'",
                platform_id
            ))
        })
    }

    fn sink(&self) -> Result<Arc<dyn ReportSink>, OrchestratorError> {
        self.sink
            .clone()
            .ok_or_else(|| OrchestratorError::Configuration("no report sink configured".to_string()))
    }

    fn session_backend(&self, platform_id: &str) -> Option<&str> {
        self.settings.platform_backends.get(platform_id).map(String::as_str)
    }

    /// Run one activity for one group under the group's lock and the
    /// activity's deadline. Never returns an error: failures are captured in
    /// the result so sibling tasks are unaffected.
    pub async fn run_task(&self, activity: Activity, target: &GroupTarget) -> TaskResult {
        let span = tracing::info_span!(
            "task",
            activity = %activity,
            group_id = %target.group_id,
            platform_id = %target.platform_id
        );
        self.run_task_inner(activity, target).instrument(span).await
    }

    async fn run_task_inner(&self, activity: Activity, target: &GroupTarget) -> TaskResult {
        let (group_id, platform_id) = (target.group_id.as_str(), target.platform_id.as_str());

        let result = match activity {
            Activity::CollectBatch => {
                let outcome = self
                    .locked(activity, group_id, self.settings.collect_timeout, |held| {
                        self.collect_batch_held(group_id, platform_id, Some(held))
                    })
                    .await;
                let collected = matches!(outcome, Ok(CollectOutcome::Collected { .. }));
                let result = TaskResult::from_collect(outcome);

                if collected && self.settings.incremental.report_immediately {
                    tracing::info!("Generating final report immediately after batch");
                    let follow_up = TaskResult::from_report(
                        self.locked(
                            Activity::FinalReport,
                            group_id,
                            self.settings.report_timeout,
                            |_| self.generate_final_report(group_id, platform_id),
                        )
                        .await,
                    );
                    follow_up.log(Activity::FinalReport);
                }
                result
            }
            Activity::FinalReport => TaskResult::from_report(
                self.locked(activity, group_id, self.settings.report_timeout, |_| {
                    self.generate_final_report(group_id, platform_id)
                })
                .await,
            ),
            Activity::TraditionalReport => TaskResult::from_report(
                self.locked(activity, group_id, self.settings.report_timeout, |_| {
                    self.run_traditional_analysis(group_id, platform_id)
                })
                .await,
            ),
        };

        result.log(activity);
        result
    }

    /// Hold the group lock and enforce the deadline, which also covers the
    /// wait for the lock. `work` gets a share of the guard; the lock is only
    /// released once every share is dropped, so writes detached by `work`
    /// keep the group locked after a deadline abandons the task.
    async fn locked<'a, T, F, Fut>(
        &'a self,
        activity: Activity,
        group_id: &'a str,
        limit: Duration,
        work: F,
    ) -> Result<T, OrchestratorError>
    where
        F: FnOnce(HeldLock) -> Fut,
        Fut: Future<Output = Result<T, OrchestratorError>> + 'a,
    {
        let task = async {
            let guard: HeldLock = Arc::new(self.locks.lock(group_id).await);
            work(guard.clone()).await
        };
        match tokio::time::timeout(limit, task).await {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::Timeout {
                activity,
                after: limit,
            }),
        }
    }

    /// Fetch messages past the group's watermark, fold them into a new batch
    /// and advance the watermark. Callers other than [`Orchestrator::run_task`]
    /// must not run this concurrently for the same group.
    pub async fn collect_batch(
        &self,
        group_id: &str,
        platform_id: &str,
    ) -> Result<CollectOutcome, OrchestratorError> {
        self.collect_batch_held(group_id, platform_id, None).await
    }

    /// `held` travels with the detached save so the group stays locked until
    /// both writes land
    async fn collect_batch_held(
        &self,
        group_id: &str,
        platform_id: &str,
        held: Option<HeldLock>,
    ) -> Result<CollectOutcome, OrchestratorError> {
        let source = self.source(platform_id)?;
        let watermark = self.store.get_last_analyzed_timestamp(group_id).await?;

        let window = if watermark > 0 {
            FetchWindow::Since(watermark)
        } else {
            FetchWindow::LastDays(self.settings.analysis.days)
        };
        let fetched = source
            .fetch_messages(group_id, window, self.settings.incremental.max_messages)
            .await?;
        if fetched.is_empty() {
            return Ok(CollectOutcome::Skipped(SkipReason::NoMessages));
        }

        let messages: Vec<Message> = clean_messages(
            fetched,
            &self.settings.analysis.bot_self_ids,
            &self.settings.analysis.command_prefixes,
        )
        .into_iter()
        .filter(|msg| msg.timestamp > watermark)
        .collect();

        let minimum = self.settings.incremental.min_messages;
        if messages.len() < minimum {
            return Ok(CollectOutcome::Skipped(SkipReason::BelowThreshold {
                count: messages.len(),
                minimum,
            }));
        }

        let tz = self.settings.utc_offset;
        let stats = compute_batch_stats(&messages, &tz);
        let transcript = prompt::transcript(&messages, &tz);
        let session = self.session_backend(platform_id);

        let (topics, quotes) = tokio::join!(
            self.extract(
                ExtractionKind::Topics,
                ExtractionInput::Transcript(transcript.clone()),
                self.settings.incremental.topics_per_batch,
                session,
            ),
            self.extract(
                ExtractionKind::Quotes,
                ExtractionInput::Transcript(transcript),
                self.settings.incremental.quotes_per_batch,
                session,
            ),
        );

        let mut token_usage = topics.1;
        token_usage.accumulate(&quotes.1);
        let batch = build_batch(
            group_id,
            stats,
            topics.0.into_topics(),
            quotes.0.into_quotes(),
            token_usage,
        );
        let new_watermark = batch.last_message_timestamp;
        let summary = batch.summary();

        // Save and watermark run detached so a deadline cannot separate them
        let store = self.store.clone();
        let group = group_id.to_string();
        tokio::spawn(async move {
            let _held = held;
            store.save_batch(&batch).await?;
            store.update_last_analyzed_timestamp(&group, new_watermark).await
        })
        .await
        .map_err(|e| OrchestratorError::Task(e.to_string()))??;

        tracing::info!(
            batch_id = %summary.batch_id,
            messages = summary.message_count,
            topics = summary.topics_count,
            quotes = summary.quotes_count,
            watermark = new_watermark,
            "Batch collected"
        );

        Ok(CollectOutcome::Collected {
            batch: summary,
            watermark: new_watermark,
        })
    }

    /// Merge every batch in the trailing window into one report, dispatch it
    /// and drop batches older than twice the window.
    pub async fn generate_final_report(
        &self,
        group_id: &str,
        platform_id: &str,
    ) -> Result<ReportOutcome, OrchestratorError> {
        let sink = self.sink()?;
        let window_end = epoch_seconds(Utc::now());
        let window_start = window_end - self.settings.window_seconds();

        let batches = self.store.query_batches(group_id, window_start, window_end).await?;
        if batches.is_empty() {
            return Ok(ReportOutcome::Skipped(SkipReason::NoBatches));
        }

        let mut aggregate = merge_batches(&batches, window_start, window_end);
        tracing::info!(
            batches = aggregate.batch_count,
            messages = aggregate.message_count,
            topics = aggregate.topics.len(),
            quotes = aggregate.quotes.len(),
            "Window merged"
        );

        let mut titles = Vec::new();
        if !aggregate.user_stats.is_empty() {
            let top_users = aggregate.user_ranking(self.settings.analysis.max_user_titles);
            let (response, usage) = self
                .extract_titles(top_users, self.session_backend(platform_id))
                .await;
            titles = response;
            aggregate.token_usage.accumulate(&usage);
        }

        let payload = self.build_payload(
            group_id,
            platform_id,
            ReportMode::Incremental,
            &aggregate,
            titles,
        );
        sink.dispatch(&payload, group_id, platform_id).await?;

        let retain_after = window_end - 2.0 * self.settings.window_seconds();
        let cleaned = match self.store.cleanup_old_batches(group_id, retain_after).await {
            Ok(removed) => {
                if removed > 0 {
                    tracing::info!(removed, "Expired batches cleaned up");
                }
                removed
            }
            Err(e) => {
                tracing::warn!(error = %e, "Batch cleanup failed, report already sent");
                0
            }
        };

        Ok(ReportOutcome::Dispatched {
            window_label: payload.window_label,
            batch_count: aggregate.batch_count,
            message_count: aggregate.message_count,
            cleaned,
        })
    }

    /// Single pass over the whole window without touching the batch store
    pub async fn run_traditional_analysis(
        &self,
        group_id: &str,
        platform_id: &str,
    ) -> Result<ReportOutcome, OrchestratorError> {
        let source = self.source(platform_id)?;
        let sink = self.sink()?;
        let analysis = &self.settings.analysis;

        let fetched = source
            .fetch_messages(group_id, FetchWindow::LastDays(analysis.days), analysis.max_messages)
            .await?;
        if fetched.is_empty() {
            return Ok(ReportOutcome::Skipped(SkipReason::NoMessages));
        }

        let messages = clean_messages(fetched, &analysis.bot_self_ids, &analysis.command_prefixes);
        if messages.len() < analysis.min_messages_threshold {
            return Ok(ReportOutcome::Skipped(SkipReason::BelowThreshold {
                count: messages.len(),
                minimum: analysis.min_messages_threshold,
            }));
        }

        let tz = self.settings.utc_offset;
        let stats = compute_batch_stats(&messages, &tz);
        let transcript = prompt::transcript(&messages, &tz);
        let top_users = rank_users(&stats.user_stats, analysis.max_user_titles);
        let session = self.session_backend(platform_id);

        let (topics, quotes, titles) = tokio::join!(
            self.extract(
                ExtractionKind::Topics,
                ExtractionInput::Transcript(transcript.clone()),
                analysis.max_topics,
                session,
            ),
            self.extract(
                ExtractionKind::Quotes,
                ExtractionInput::Transcript(transcript),
                analysis.max_quotes,
                session,
            ),
            self.extract_titles(top_users, session),
        );

        let mut token_usage = topics.1;
        token_usage.accumulate(&quotes.1);
        token_usage.accumulate(&titles.1);

        let window_end = epoch_seconds(Utc::now());
        let window_start = window_end - self.settings.window_seconds();
        let batch = build_batch(
            group_id,
            stats,
            topics.0.into_topics(),
            quotes.0.into_quotes(),
            token_usage,
        );
        let aggregate = merge_batches(std::slice::from_ref(&batch), window_start, window_end);

        let mut payload =
            self.build_payload(group_id, platform_id, ReportMode::Traditional, &aggregate, titles.0);
        payload.statistics.batch_count = 0;
        sink.dispatch(&payload, group_id, platform_id).await?;

        Ok(ReportOutcome::Dispatched {
            window_label: payload.window_label,
            batch_count: 0,
            message_count: aggregate.message_count,
            cleaned: 0,
        })
    }

    /// Read-only view of the current window
    pub async fn get_window_summary(&self, group_id: &str) -> Result<WindowSummary, OrchestratorError> {
        let window_end = epoch_seconds(Utc::now());
        let window_start = window_end - self.settings.window_seconds();
        let batches = self.store.query_batches(group_id, window_start, window_end).await?;
        let aggregate = merge_batches(&batches, window_start, window_end);
        Ok(aggregate.summary(&self.settings.utc_offset))
    }

    pub async fn batch_summaries(&self, group_id: &str) -> Result<Vec<BatchSummary>, OrchestratorError> {
        Ok(self.store.get_all_batch_summaries(group_id).await?)
    }

    async fn extract(
        &self,
        kind: ExtractionKind,
        input: ExtractionInput,
        max_items: usize,
        session: Option<&str>,
    ) -> (Extracted, TokenUsage) {
        if max_items == 0 {
            return (Extracted::default(), TokenUsage::default());
        }

        let request = ExtractionRequest {
            kind,
            input,
            max_items,
            max_tokens: self.settings.max_tokens,
        };
        match self.resilience.extract(&request, session).await.into_response() {
            Some(response) => {
                let usage = response.token_usage;
                (Extracted(Some(response)), usage)
            }
            None => {
                tracing::info!(kind = %kind, "Extraction produced no result, continuing without it");
                (Extracted::default(), TokenUsage::default())
            }
        }
    }

    async fn extract_titles(
        &self,
        top_users: Vec<UserRank>,
        session: Option<&str>,
    ) -> (Vec<UserTitle>, TokenUsage) {
        if top_users.is_empty() {
            return (Vec::new(), TokenUsage::default());
        }
        let max_items = top_users.len();
        let (extracted, usage) = self
            .extract(ExtractionKind::Titles, ExtractionInput::Users(top_users), max_items, session)
            .await;
        (extracted.into_titles(), usage)
    }

    fn build_payload(
        &self,
        group_id: &str,
        platform_id: &str,
        mode: ReportMode,
        aggregate: &AggregateState,
        user_titles: Vec<UserTitle>,
    ) -> ReportPayload {
        let tz = &self.settings.utc_offset;
        let hourly_activity = aggregate.hourly_activity();

        ReportPayload {
            group_id: group_id.to_string(),
            platform_id: platform_id.to_string(),
            mode,
            window_label: aggregate.window_label(tz),
            generated_at: Utc::now().timestamp(),
            statistics: ReportStatistics {
                message_count: aggregate.message_count,
                character_count: aggregate.character_count,
                participant_count: aggregate.participant_ids.len(),
                most_active_period: aggregate.most_active_period(),
                peak_hours: aggregate.peak_hours(PEAK_HOURS),
                hourly_activity,
                user_ranking: aggregate.user_ranking(self.settings.analysis.max_user_titles),
                emoji_stats: aggregate.emoji_stats.clone(),
                token_usage: aggregate.token_usage,
                batch_count: aggregate.batch_count,
            },
            topics: aggregate.topics.iter().take(self.settings.analysis.max_topics).cloned().collect(),
            quotes: aggregate.quotes.iter().take(self.settings.analysis.max_quotes).cloned().collect(),
            user_titles,
        }
    }
}

/// Response of one extraction, empty when the resilience layer gave up
#[derive(Default)]
struct Extracted(Option<ExtractionResponse>);

impl Extracted {
    fn into_topics(self) -> Vec<Topic> {
        self.0.map(|r| r.into_topics()).unwrap_or_default()
    }

    fn into_quotes(self) -> Vec<Quote> {
        self.0.map(|r| r.into_quotes()).unwrap_or_default()
    }

    fn into_titles(self) -> Vec<UserTitle> {
        self.0.map(|r| r.into_titles()).unwrap_or_default()
    }
}

fn build_batch(
    group_id: &str,
    stats: BatchStats,
    topics: Vec<Topic>,
    quotes: Vec<Quote>,
    token_usage: TokenUsage,
) -> Batch {
    let mut batch = Batch::new(group_id);
    batch.message_count = stats.message_count;
    batch.character_count = stats.character_count;
    batch.hourly_message_counts = stats.hourly_message_counts;
    batch.hourly_character_counts = stats.hourly_character_counts;
    batch.user_stats = stats.user_stats;
    batch.emoji_stats = stats.emoji_stats;
    batch.participant_ids = stats.participant_ids.into_iter().collect();
    batch.last_message_timestamp = stats.last_message_timestamp;
    batch.topics = topics;
    batch.quotes = quotes;
    batch.token_usage = token_usage;
    batch
}
