use super::types::*;
use crate::config::{env_var_regex, expand_env_vars, expand_tilde, resolve_utc_offset};
use crate::scheduler::triggers::TimeOfDay;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(inner) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), inner),
        )),
        other => other,
    })
}

/// Parse, expand and validate config text
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml)?;
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;
    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = env_var_regex()?;
    let mut unexpanded: Vec<String> = re
        .captures_iter(yaml_string)
        .map(|cap| cap[1].to_string())
        .collect();

    if unexpanded.is_empty() {
        return Ok(());
    }

    unexpanded.sort();
    unexpanded.dedup();

    Err(ConfigError::Validation(format!(
        "environment variables are not set: {}\n\
         set them before starting, or replace the $env{{...}} references with literal values",
        unexpanded.join(", ")
    )))
}

fn expand_paths(config: &mut Config) {
    config.storage.path = expand_tilde(&config.storage.path);
    config.report.output_dir = expand_tilde(&config.report.output_dir);
    for platform in config.platforms.values_mut() {
        platform.path = expand_tilde(&platform.path);
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    validate_analysis(&config.analysis, &mut errors);
    validate_schedule(&config.schedule, &mut errors);
    validate_resilience(&config.resilience, &mut errors);
    validate_backends(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_analysis(analysis: &AnalysisConfig, errors: &mut Vec<String>) {
    if analysis.days == 0 {
        errors.push("analysis.days must be at least 1".to_string());
    }
    if analysis.max_messages == 0 {
        errors.push("analysis.max_messages must be greater than 0".to_string());
    }
    if let Err(e) = resolve_utc_offset(analysis.utc_offset.as_deref()) {
        errors.push(format!("analysis.{}", e));
    }
}

fn validate_schedule(schedule: &ScheduleConfig, errors: &mut Vec<String>) {
    if schedule.max_concurrent_tasks == 0 {
        errors.push("schedule.max_concurrent_tasks must be greater than 0".to_string());
    }

    if schedule.report_times.is_empty() && schedule.enabled {
        errors.push("schedule.report_times must contain at least one time".to_string());
    }
    for (i, time) in schedule.report_times.iter().enumerate() {
        if let Err(e) = TimeOfDay::parse(time) {
            errors.push(format!("schedule.report_times[{}]: {}", i, e));
        }
    }

    let inc = &schedule.incremental;
    if inc.active_start_hour > 23 {
        errors.push(format!(
            "schedule.incremental.active_start_hour must be 0-23, got {}",
            inc.active_start_hour
        ));
    }
    if inc.active_end_hour > 24 {
        errors.push(format!(
            "schedule.incremental.active_end_hour must be 0-24, got {}",
            inc.active_end_hour
        ));
    }
    if inc.active_start_hour >= inc.active_end_hour {
        errors.push(format!(
            "schedule.incremental.active_start_hour ({}) must be before active_end_hour ({})",
            inc.active_start_hour, inc.active_end_hour
        ));
    }
    if inc.interval_minutes == 0 {
        errors.push("schedule.incremental.interval_minutes must be greater than 0".to_string());
    }
    if inc.max_daily_analyses == 0 {
        errors.push("schedule.incremental.max_daily_analyses must be greater than 0".to_string());
    }
    if inc.max_messages == 0 {
        errors.push("schedule.incremental.max_messages must be greater than 0".to_string());
    }
}

fn validate_resilience(resilience: &ResilienceConfig, errors: &mut Vec<String>) {
    if resilience.max_concurrent_calls == 0 {
        errors.push("resilience.max_concurrent_calls must be greater than 0".to_string());
    }
    if resilience.retries == 0 {
        errors.push("resilience.retries must be at least 1".to_string());
    }
    if resilience.failure_threshold == 0 {
        errors.push("resilience.failure_threshold must be at least 1".to_string());
    }
}

fn validate_backends(config: &Config, errors: &mut Vec<String>) {
    let extraction = &config.extraction;

    for (id, backend) in &extraction.backends {
        if backend.base_url.trim().is_empty() {
            errors.push(format!("extraction.backends.{}: base_url cannot be empty", id));
        }
        if backend.model.trim().is_empty() {
            errors.push(format!("extraction.backends.{}: model cannot be empty", id));
        }
    }

    let mut references: Vec<(String, &String)> = [
        ("extraction.primary", &extraction.primary),
        ("extraction.topic_backend", &extraction.topic_backend),
        ("extraction.quote_backend", &extraction.quote_backend),
        ("extraction.title_backend", &extraction.title_backend),
    ]
    .into_iter()
    .filter_map(|(field, id)| id.as_ref().map(|id| (field.to_string(), id)))
    .collect();

    let mut platform_ids: Vec<&String> = config.platforms.keys().collect();
    platform_ids.sort();
    for platform_id in platform_ids {
        if let Some(id) = &config.platforms[platform_id].default_backend {
            references.push((format!("platforms.{}.default_backend", platform_id), id));
        }
    }

    for (field, id) in references {
        if !extraction.backends.contains_key(id.as_str()) {
            errors.push(format!("{}: unknown backend '{}'", field, id));
        }
    }
}
