/// End-to-end tests for the incremental pipeline:
/// exported history on disk -> batch collection -> DuckDB -> final report file.
use async_trait::async_trait;
use chatdigest::batch::{Batch, TokenUsage, Topic, UserTitle};
use chatdigest::config::parse::parse_config;
use chatdigest::config::types::Config;
use chatdigest::directory::ConfigDirectory;
use chatdigest::extraction::{
    ExtractedItems, ExtractionBackend, ExtractionError, ExtractionKind, ExtractionRequest,
    ExtractionResponse,
};
use chatdigest::report::FileReportSink;
use chatdigest::resilience::{BackendRegistry, ResilienceContext};
use chatdigest::scheduler::{
    Activity, CollectOutcome, Orchestrator, OrchestratorSettings, ReportOutcome, Scheduler,
    SkipReason,
};
use chatdigest::source::SourceRegistry;
use chatdigest::storage::{BatchStore, DuckDbStorage};
use chrono::Utc;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Answers every request with one fixed item and counts the calls
#[derive(Default)]
struct CannedBackend {
    calls: AtomicUsize,
}

#[async_trait]
impl ExtractionBackend for CannedBackend {
    async fn extract(
        &self,
        request: &ExtractionRequest,
    ) -> Result<ExtractionResponse, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let items = match request.kind {
            ExtractionKind::Topics => ExtractedItems::Topics(vec![Topic {
                name: "Weekend hiking plan".to_string(),
                contributor_ids: vec!["1001".to_string()],
                contributor_names: vec!["alice".to_string()],
                detail_text: "Route and meeting time".to_string(),
            }]),
            ExtractionKind::Quotes => ExtractedItems::Quotes(Vec::new()),
            ExtractionKind::Titles => ExtractedItems::Titles(vec![UserTitle {
                name: "alice".to_string(),
                user_id: "1001".to_string(),
                title: "Trail Boss".to_string(),
                mbti: "ENTJ".to_string(),
                reason: "Organised everything".to_string(),
            }]),
        };
        Ok(ExtractionResponse {
            items,
            token_usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 20,
                total_tokens: 120,
            },
        })
    }
}

struct Deployment {
    _dir: TempDir,
    history_dir: std::path::PathBuf,
    reports_dir: std::path::PathBuf,
    config: Config,
    store: Arc<DuckDbStorage>,
    backend: Arc<CannedBackend>,
    orchestrator: Arc<Orchestrator>,
}

async fn deploy(extra_yaml: &str) -> Deployment {
    let dir = TempDir::new().unwrap();
    let history_dir = dir.path().join("history");
    let reports_dir = dir.path().join("reports");
    std::fs::create_dir_all(&history_dir).unwrap();

    let yaml = format!(
        r#"
storage:
  path: {db}
platforms:
  qq:
    type: jsonl
    path: {history}
analysis:
  days: 1
  utc_offset: "+08:00"
  command_prefixes: ["/"]
schedule:
  mode: incremental
  stagger: 0s
  incremental:
    min_messages: 3
report:
  output_dir: {reports}
{extra}
"#,
        db = dir.path().join("batches.duckdb").display(),
        history = history_dir.display(),
        reports = reports_dir.display(),
        extra = extra_yaml,
    );
    let config = parse_config(&yaml).unwrap();

    let store = Arc::new(DuckDbStorage::new(&config.storage.path).unwrap());
    store.init_schema().await.unwrap();

    let backend = Arc::new(CannedBackend::default());
    let mut registry = BackendRegistry::new();
    registry.register("canned", backend.clone());
    let resilience = ResilienceContext::new(registry, &config.resilience);

    let settings = OrchestratorSettings::from_config(&config).unwrap();
    let orchestrator = Orchestrator::new(
        settings,
        store.clone(),
        SourceRegistry::from_config(&config.platforms),
        Arc::new(resilience),
    )
    .with_sink(Arc::new(FileReportSink::new(config.report.output_dir.clone())));

    Deployment {
        _dir: dir,
        history_dir,
        reports_dir,
        config,
        store,
        backend,
        orchestrator: Arc::new(orchestrator),
    }
}

fn append_history(dir: &Path, group_id: &str, messages: &[(&str, &str, i64, &str)]) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(format!("{}.jsonl", group_id)))
        .unwrap();
    for (sender_id, name, ts, text) in messages {
        let line = serde_json::json!({
            "message_id": format!("{}-{}", sender_id, ts),
            "sender_id": sender_id,
            "sender_name": name,
            "text": text,
            "timestamp": ts,
        });
        writeln!(file, "{}", line).unwrap();
    }
}

fn report_files(reports_dir: &Path, platform: &str, group: &str) -> Vec<std::path::PathBuf> {
    let dir = reports_dir.join(platform).join(group);
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}

#[tokio::test]
async fn test_collect_collect_report_cycle() {
    let d = deploy("").await;
    let base = Utc::now().timestamp() - 7_200;

    append_history(
        &d.history_dir,
        "g1",
        &[
            ("1001", "alice", base, "anyone up for hiking?"),
            ("1002", "bob", base + 10, "sure, where?"),
            ("1001", "alice", base + 20, "the ridge trail"),
            ("1003", "carol", base + 30, "/help"),
            ("1002", "bob", base + 40, "count me in"),
        ],
    );

    let first = d.orchestrator.collect_batch("g1", "qq").await.unwrap();
    let first_watermark = match first {
        CollectOutcome::Collected { batch, watermark } => {
            // The command line is cleaned out before counting
            assert_eq!(batch.message_count, 4);
            assert_eq!(batch.topics_count, 1);
            assert_eq!(batch.participants, 2);
            watermark
        }
        CollectOutcome::Skipped(reason) => panic!("unexpected skip: {}", reason),
    };
    assert_eq!(first_watermark, base + 40);
    assert_eq!(d.store.get_last_analyzed_timestamp("g1").await.unwrap(), base + 40);

    // Nothing new since the watermark
    let idle = d.orchestrator.collect_batch("g1", "qq").await.unwrap();
    assert_eq!(idle, CollectOutcome::Skipped(SkipReason::NoMessages));

    append_history(
        &d.history_dir,
        "g1",
        &[
            ("1003", "carol", base + 100, "I'll bring snacks"),
            ("1001", "alice", base + 110, "great"),
            ("1003", "carol", base + 120, "meet at 8?"),
        ],
    );

    let second = d.orchestrator.collect_batch("g1", "qq").await.unwrap();
    match second {
        CollectOutcome::Collected { batch, watermark } => {
            assert_eq!(batch.message_count, 3);
            assert_eq!(watermark, base + 120);
        }
        CollectOutcome::Skipped(reason) => panic!("unexpected skip: {}", reason),
    }
    assert_eq!(d.store.get_batch_count("g1").await.unwrap(), 2);

    let report = d.orchestrator.generate_final_report("g1", "qq").await.unwrap();
    match report {
        ReportOutcome::Dispatched {
            batch_count,
            message_count,
            cleaned,
            ..
        } => {
            assert_eq!(batch_count, 2);
            assert_eq!(message_count, 7);
            assert_eq!(cleaned, 0);
        }
        ReportOutcome::Skipped(reason) => panic!("unexpected skip: {}", reason),
    }

    let files = report_files(&d.reports_dir, "qq", "g1");
    assert_eq!(files.len(), 1);
    let payload: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&files[0]).unwrap()).unwrap();
    assert_eq!(payload["mode"], "incremental");
    assert_eq!(payload["statistics"]["message_count"], 7);
    assert_eq!(payload["statistics"]["participant_count"], 3);
    assert_eq!(payload["statistics"]["batch_count"], 2);
    // Same topic from both batches collapses into one
    assert_eq!(payload["topics"].as_array().unwrap().len(), 1);
    assert_eq!(payload["user_titles"][0]["title"], "Trail Boss");
    // Two batches x (topics + quotes) + one title call
    assert_eq!(payload["statistics"]["token_usage"]["total_tokens"], 600);
    assert_eq!(d.backend.calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_final_report_cleans_up_expired_batches() {
    let d = deploy("").await;
    let now = Utc::now().timestamp() as f64;

    let mut expired = Batch::with_timestamp("g1", now - 3.0 * 86_400.0);
    expired.message_count = 50;
    d.store.save_batch(&expired).await.unwrap();

    let mut kept_outside_window = Batch::with_timestamp("g1", now - 1.5 * 86_400.0);
    kept_outside_window.message_count = 40;
    d.store.save_batch(&kept_outside_window).await.unwrap();

    let mut current = Batch::with_timestamp("g1", now - 600.0);
    current.message_count = 12;
    current.participant_ids = vec!["1001".to_string()];
    d.store.save_batch(&current).await.unwrap();

    let outcome = d.orchestrator.generate_final_report("g1", "qq").await.unwrap();
    match outcome {
        ReportOutcome::Dispatched {
            batch_count,
            message_count,
            cleaned,
            ..
        } => {
            assert_eq!(batch_count, 1);
            assert_eq!(message_count, 12);
            assert_eq!(cleaned, 1);
        }
        ReportOutcome::Skipped(reason) => panic!("unexpected skip: {}", reason),
    }

    let remaining = d.store.get_batch_index("g1").await.unwrap();
    let ids: Vec<&str> = remaining.iter().map(|e| e.batch_id.as_str()).collect();
    assert_eq!(ids.len(), 2);
    assert!(!ids.contains(&expired.batch_id.as_str()));
}

#[tokio::test]
async fn test_state_survives_reopening_the_database() {
    let d = deploy("").await;
    let base = Utc::now().timestamp() - 3_600;
    append_history(
        &d.history_dir,
        "g1",
        &[
            ("1001", "alice", base, "one"),
            ("1002", "bob", base + 1, "two"),
            ("1001", "alice", base + 2, "three"),
        ],
    );
    d.orchestrator.collect_batch("g1", "qq").await.unwrap();
    drop(d.orchestrator);
    drop(d.store);

    let reopened = DuckDbStorage::new(&d.config.storage.path).unwrap();
    reopened.init_schema().await.unwrap();
    assert_eq!(reopened.get_last_analyzed_timestamp("g1").await.unwrap(), base + 2);
    assert_eq!(reopened.get_batch_count("g1").await.unwrap(), 1);
}

#[tokio::test]
async fn test_scheduler_fires_across_discovered_groups() {
    let d = deploy(
        r#"
groups:
  mode: blacklist
  list: ["muted"]
"#,
    )
    .await;
    let base = Utc::now().timestamp() - 3_600;
    let busy = [
        ("1001", "alice", base, "a"),
        ("1002", "bob", base + 1, "b"),
        ("1001", "alice", base + 2, "c"),
    ];
    append_history(&d.history_dir, "g1", &busy);
    append_history(&d.history_dir, "g2", &busy);
    append_history(&d.history_dir, "muted", &busy);
    append_history(&d.history_dir, "quiet", &[("1001", "alice", base, "hello")]);

    let directory = ConfigDirectory::new(
        d.config.groups.clone(),
        &d.config.platforms,
        d.orchestrator.sources().clone(),
    );
    let scheduler =
        Scheduler::new(d.orchestrator.clone(), Arc::new(directory), &d.config.schedule).unwrap();

    let tally = scheduler.fire(Activity::CollectBatch).await;
    assert_eq!(tally.succeeded, 2);
    assert_eq!(tally.skipped, 1);
    assert_eq!(tally.failed, 0);

    assert_eq!(d.store.get_batch_count("g1").await.unwrap(), 1);
    assert_eq!(d.store.get_batch_count("g2").await.unwrap(), 1);
    assert_eq!(d.store.get_batch_count("muted").await.unwrap(), 0);

    let tally = scheduler.fire(Activity::FinalReport).await;
    assert_eq!(tally.succeeded, 2);
    assert_eq!(tally.skipped, 1);
    assert_eq!(report_files(&d.reports_dir, "qq", "g1").len(), 1);
    assert_eq!(report_files(&d.reports_dir, "qq", "g2").len(), 1);
    assert!(report_files(&d.reports_dir, "qq", "quiet").is_empty());
}

#[tokio::test]
async fn test_traditional_report_leaves_store_untouched() {
    let d = deploy("").await;
    let base = Utc::now().timestamp() - 3_600;
    let lines: Vec<(String, i64)> = (0..12).map(|i| (format!("line {}", i), base + i)).collect();
    let messages: Vec<(&str, &str, i64, &str)> = lines
        .iter()
        .enumerate()
        .map(|(i, (text, ts))| {
            if i % 2 == 0 {
                ("1001", "alice", *ts, text.as_str())
            } else {
                ("1002", "bob", *ts, text.as_str())
            }
        })
        .collect();
    append_history(&d.history_dir, "g1", &messages);

    let outcome = d.orchestrator.run_traditional_analysis("g1", "qq").await.unwrap();
    match outcome {
        ReportOutcome::Dispatched {
            batch_count,
            message_count,
            ..
        } => {
            assert_eq!(batch_count, 0);
            assert_eq!(message_count, 12);
        }
        ReportOutcome::Skipped(reason) => panic!("unexpected skip: {}", reason),
    }

    assert_eq!(d.store.get_batch_count("g1").await.unwrap(), 0);
    assert_eq!(d.store.get_last_analyzed_timestamp("g1").await.unwrap(), 0);

    let files = report_files(&d.reports_dir, "qq", "g1");
    let payload: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&files[0]).unwrap()).unwrap();
    assert_eq!(payload["mode"], "traditional");
    assert_eq!(payload["statistics"]["batch_count"], 0);
}
