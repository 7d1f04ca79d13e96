use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub platforms: HashMap<String, PlatformConfig>,
    #[serde(default)]
    pub groups: GroupListConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("~/.local/share/chatdigest/batches.duckdb")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(rename = "type")]
    pub kind: PlatformKind,
    pub path: PathBuf,
    /// Backend used when no task-specific or primary backend resolves
    #[serde(default)]
    pub default_backend: Option<String>,
    /// Groups served by this platform; empty means "ask the source"
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Jsonl,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupListConfig {
    #[serde(default)]
    pub mode: ListMode,
    /// Bare group ids or `platform:GroupMessage:group` origin strings
    #[serde(default)]
    pub list: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListMode {
    Whitelist,
    Blacklist,
    #[default]
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Window length for final reports
    #[serde(default = "default_days")]
    pub days: u32,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Minimum messages for a traditional (single pass) report
    #[serde(default = "default_min_messages_threshold")]
    pub min_messages_threshold: usize,
    #[serde(default = "default_max_topics")]
    pub max_topics: usize,
    #[serde(default = "default_max_quotes")]
    pub max_quotes: usize,
    #[serde(default = "default_max_user_titles")]
    pub max_user_titles: usize,
    #[serde(default)]
    pub bot_self_ids: Vec<String>,
    #[serde(default = "default_command_prefixes")]
    pub command_prefixes: Vec<String>,
    /// Offset such as `+08:00`; the host's local offset when absent
    #[serde(default)]
    pub utc_offset: Option<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            days: default_days(),
            max_messages: default_max_messages(),
            min_messages_threshold: default_min_messages_threshold(),
            max_topics: default_max_topics(),
            max_quotes: default_max_quotes(),
            max_user_titles: default_max_user_titles(),
            bot_self_ids: Vec::new(),
            command_prefixes: default_command_prefixes(),
            utc_offset: None,
        }
    }
}

fn default_days() -> u32 {
    1
}

fn default_max_messages() -> usize {
    1000
}

fn default_min_messages_threshold() -> usize {
    50
}

fn default_max_topics() -> usize {
    5
}

fn default_max_quotes() -> usize {
    5
}

fn default_max_user_titles() -> usize {
    10
}

fn default_command_prefixes() -> Vec<String> {
    vec!["/".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: ScheduleMode,
    /// Final report times, `HH:MM`
    #[serde(default = "default_report_times")]
    pub report_times: Vec<String>,
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Delay between consecutive group starts within one firing
    #[serde(default = "default_stagger", with = "humantime_serde")]
    pub stagger: Duration,
    #[serde(default = "default_collect_timeout", with = "humantime_serde")]
    pub collect_timeout: Duration,
    #[serde(default = "default_report_timeout", with = "humantime_serde")]
    pub report_timeout: Duration,
    #[serde(default)]
    pub incremental: IncrementalConfig,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: ScheduleMode::default(),
            report_times: default_report_times(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            stagger: default_stagger(),
            collect_timeout: default_collect_timeout(),
            report_timeout: default_report_timeout(),
            incremental: IncrementalConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_report_times() -> Vec<String> {
    vec!["23:30".to_string()]
}

fn default_max_concurrent_tasks() -> usize {
    5
}

fn default_stagger() -> Duration {
    Duration::from_secs(2)
}

fn default_collect_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_report_timeout() -> Duration {
    Duration::from_secs(1200)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    Incremental,
    #[default]
    Traditional,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementalConfig {
    #[serde(default = "default_active_start_hour")]
    pub active_start_hour: u32,
    #[serde(default = "default_active_end_hour")]
    pub active_end_hour: u32,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,
    #[serde(default = "default_max_daily_analyses")]
    pub max_daily_analyses: u32,
    /// Collections with fewer cleaned messages are skipped
    #[serde(default = "default_batch_min_messages")]
    pub min_messages: usize,
    #[serde(default = "default_batch_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_per_batch")]
    pub topics_per_batch: usize,
    #[serde(default = "default_per_batch")]
    pub quotes_per_batch: usize,
    /// Debug aid: run the final report right after every successful collection
    #[serde(default)]
    pub report_immediately: bool,
}

impl Default for IncrementalConfig {
    fn default() -> Self {
        Self {
            active_start_hour: default_active_start_hour(),
            active_end_hour: default_active_end_hour(),
            interval_minutes: default_interval_minutes(),
            max_daily_analyses: default_max_daily_analyses(),
            min_messages: default_batch_min_messages(),
            max_messages: default_batch_max_messages(),
            topics_per_batch: default_per_batch(),
            quotes_per_batch: default_per_batch(),
            report_immediately: false,
        }
    }
}

fn default_active_start_hour() -> u32 {
    8
}

fn default_active_end_hour() -> u32 {
    23
}

fn default_interval_minutes() -> u32 {
    120
}

fn default_max_daily_analyses() -> u32 {
    8
}

fn default_batch_min_messages() -> usize {
    20
}

fn default_batch_max_messages() -> usize {
    300
}

fn default_per_batch() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// In-flight extraction calls across all groups and backends
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
    /// Attempts per logical extraction call
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_backoff", with = "humantime_serde")]
    pub backoff: Duration,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_timeout", with = "humantime_serde")]
    pub recovery_timeout: Duration,
    #[serde(default = "default_call_timeout", with = "humantime_serde")]
    pub call_timeout: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: default_max_concurrent_calls(),
            retries: default_retries(),
            backoff: default_backoff(),
            failure_threshold: default_failure_threshold(),
            recovery_timeout: default_recovery_timeout(),
            call_timeout: default_call_timeout(),
        }
    }
}

fn default_max_concurrent_calls() -> usize {
    3
}

fn default_retries() -> u32 {
    2
}

fn default_backoff() -> Duration {
    Duration::from_secs(2)
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(180)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub primary: Option<String>,
    #[serde(default)]
    pub topic_backend: Option<String>,
    #[serde(default)]
    pub quote_backend: Option<String>,
    #[serde(default)]
    pub title_backend: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            primary: None,
            topic_backend: None,
            quote_backend: None,
            title_backend: None,
            max_tokens: default_max_tokens(),
            backends: HashMap::new(),
        }
    }
}

fn default_max_tokens() -> u32 {
    10000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(rename = "type")]
    pub kind: BackendKind,
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_backend_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Http,
}

fn default_backend_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_temperature() -> f32 {
    0.6
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_report_dir")]
    pub output_dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_report_dir(),
        }
    }
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("~/.local/share/chatdigest/reports")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:7180".to_string()
}
