pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# CHATDIGEST CONFIGURATION
# =============================================================================
# Periodic digests of group chats. In incremental mode small batches are
# collected through the day and merged into one report at report time; in
# traditional mode the whole window is analysed in a single pass.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/chatdigest/config.yml
#   3. /etc/chatdigest/config.yml

# =============================================================================
# PLATFORMS
# =============================================================================
# Each platform provides messages for its groups. A `jsonl` platform reads
# <path>/<group_id>.jsonl, one message object per line.

platforms:
  qq:
    type: jsonl
    path: ~/.local/share/chatdigest/exports/qq
    # Backend used when no task-specific or primary backend resolves
    default_backend: local
    # Groups to analyse in addition to whatever the platform discovers
    groups: []

# =============================================================================
# GROUP FILTER
# =============================================================================
# mode: none | whitelist | blacklist
# Entries are bare group ids or `platform:GroupMessage:group_id` strings.

groups:
  mode: none
  list: []

# =============================================================================
# ANALYSIS
# =============================================================================

analysis:
  # Length of the sliding report window
  days: 1
  # Cap on messages fetched for a traditional report
  max_messages: 1000
  # Traditional reports need at least this many messages
  min_messages_threshold: 50
  max_topics: 5
  max_quotes: 5
  max_user_titles: 10
  # Messages from these accounts are ignored
  bot_self_ids: []
  command_prefixes: ["/"]
  # Timezone used for hourly statistics and trigger times; host offset if unset
  utc_offset: "+08:00"

# =============================================================================
# SCHEDULE
# =============================================================================

schedule:
  enabled: true
  # incremental | traditional
  mode: incremental
  # Final report times (HH:MM)
  report_times: ["23:30"]
  max_concurrent_tasks: 5
  # Group i starts after i * stagger
  stagger: 2s
  collect_timeout: 10m
  report_timeout: 20m
  incremental:
    # Collection runs from active_start_hour:00 every interval_minutes,
    # stopping before active_end_hour:00
    active_start_hour: 8
    active_end_hour: 23
    interval_minutes: 120
    max_daily_analyses: 8
    # Skip a collection with fewer new messages than this
    min_messages: 20
    max_messages: 300
    topics_per_batch: 3
    quotes_per_batch: 3
    # Debug aid: generate the final report after every collection
    report_immediately: false

# =============================================================================
# RESILIENCE
# =============================================================================
# Shared by every group: a failing backend is isolated for all of them.

resilience:
  # In-flight extraction calls across all groups and backends
  max_concurrent_calls: 3
  # Attempts per extraction, with linear backoff between them
  retries: 2
  backoff: 2s
  # Consecutive failures before a backend's circuit opens
  failure_threshold: 5
  recovery_timeout: 60s
  call_timeout: 3m

# =============================================================================
# EXTRACTION BACKENDS
# =============================================================================
# OpenAI-compatible chat completion endpoints. Resolution order per call:
# task backend, primary, platform default_backend, first backend by id.
# String values may reference environment variables, which are expanded on load.

extraction:
  primary: local
  # topic_backend: local
  # quote_backend: local
  # title_backend: local
  max_tokens: 10000
  backends:
    local:
      type: http
      base_url: http://127.0.0.1:8000/v1
      model: qwen2.5-14b-instruct
      timeout: 2m
      temperature: 0.6

# =============================================================================
# OUTPUT
# =============================================================================

storage:
  path: ~/.local/share/chatdigest/batches.duckdb

report:
  # Reports land in <output_dir>/<platform>/<group>/<timestamp>.json
  output_dir: ~/.local/share/chatdigest/reports

web:
  # Read-only status API
  enabled: false
  listen: 127.0.0.1:7180
"#
    .to_string()
}
