use crate::config::types::{ScheduleConfig, ScheduleMode};
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    /// Parse `HH:MM`; the full-width colon `：` is accepted too
    pub fn parse(text: &str) -> Result<Self, String> {
        let normalized = text.trim().replace('：', ":");
        let (hour, minute) = normalized
            .split_once(':')
            .ok_or_else(|| format!("invalid time '{}', expected HH:MM", text))?;

        let hour: u32 = hour
            .trim()
            .parse()
            .map_err(|_| format!("invalid hour in '{}'", text))?;
        let minute: u32 = minute
            .trim()
            .parse()
            .map_err(|_| format!("invalid minute in '{}'", text))?;

        Self::new(hour, minute).ok_or_else(|| format!("time '{}' out of range", text))
    }

    fn as_naive(self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Activity {
    CollectBatch,
    FinalReport,
    TraditionalReport,
}

impl Activity {
    pub fn name(self) -> &'static str {
        match self {
            Activity::CollectBatch => "collect_batch",
            Activity::FinalReport => "final_report",
            Activity::TraditionalReport => "traditional_report",
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub at: TimeOfDay,
    pub activity: Activity,
}

/// Collection times: from `start_hour:00` every `interval_minutes`, stopping
/// before `end_hour:00` or once `max_daily` times are produced
pub fn incremental_trigger_times(
    start_hour: u32,
    end_hour: u32,
    interval_minutes: u32,
    max_daily: u32,
) -> Vec<TimeOfDay> {
    let mut times = Vec::new();
    if interval_minutes == 0 {
        return times;
    }

    let end = end_hour.min(24) * 60;
    let mut minute_of_day = start_hour * 60;
    while minute_of_day < end && (times.len() as u32) < max_daily {
        if let Some(time) = TimeOfDay::new(minute_of_day / 60, minute_of_day % 60) {
            times.push(time);
        }
        minute_of_day += interval_minutes;
    }
    times
}

pub fn build_triggers(schedule: &ScheduleConfig) -> Result<Vec<Trigger>, String> {
    let report_times = schedule
        .report_times
        .iter()
        .map(|t| TimeOfDay::parse(t))
        .collect::<Result<Vec<_>, _>>()?;

    let mut triggers = Vec::new();
    match schedule.mode {
        ScheduleMode::Incremental => {
            let inc = &schedule.incremental;
            for at in incremental_trigger_times(
                inc.active_start_hour,
                inc.active_end_hour,
                inc.interval_minutes,
                inc.max_daily_analyses,
            ) {
                triggers.push(Trigger {
                    at,
                    activity: Activity::CollectBatch,
                });
            }
            for at in report_times {
                triggers.push(Trigger {
                    at,
                    activity: Activity::FinalReport,
                });
            }
        }
        ScheduleMode::Traditional => {
            for at in report_times {
                triggers.push(Trigger {
                    at,
                    activity: Activity::TraditionalReport,
                });
            }
        }
    }
    Ok(triggers)
}

/// Earliest instant strictly after `after` at which some trigger fires, with
/// every activity due at that instant
pub fn next_fire(
    triggers: &[Trigger],
    after: DateTime<FixedOffset>,
) -> Option<(DateTime<FixedOffset>, Vec<Activity>)> {
    let tz = *after.offset();
    let today = after.date_naive();

    let mut best: Option<(DateTime<FixedOffset>, Vec<Activity>)> = None;
    for trigger in triggers {
        let Some(time) = trigger.at.as_naive() else {
            continue;
        };

        let mut candidate = tz.from_local_datetime(&today.and_time(time)).single()?;
        if candidate <= after {
            candidate += Duration::days(1);
        }

        let earlier = match &best {
            Some((at, _)) => candidate < *at,
            None => true,
        };
        if earlier {
            best = Some((candidate, vec![trigger.activity]));
        } else if let Some((at, activities)) = &mut best {
            if *at == candidate && !activities.contains(&trigger.activity) {
                activities.push(trigger.activity);
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::IncrementalConfig;

    fn t(hour: u32, minute: u32) -> TimeOfDay {
        TimeOfDay::new(hour, minute).unwrap()
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(TimeOfDay::parse("23:30").unwrap(), t(23, 30));
        assert_eq!(TimeOfDay::parse(" 7：05 ").unwrap(), t(7, 5));
        assert!(TimeOfDay::parse("24:00").is_err());
        assert!(TimeOfDay::parse("12:60").is_err());
        assert!(TimeOfDay::parse("noon").is_err());
        assert_eq!(t(7, 5).to_string(), "07:05");
    }

    #[test]
    fn test_incremental_trigger_times() {
        assert_eq!(
            incremental_trigger_times(8, 23, 120, 8),
            vec![t(8, 0), t(10, 0), t(12, 0), t(14, 0), t(16, 0), t(18, 0), t(20, 0), t(22, 0)]
        );
        // Capped by max_daily
        assert_eq!(incremental_trigger_times(8, 23, 120, 3), vec![t(8, 0), t(10, 0), t(12, 0)]);
        // End hour is exclusive
        assert_eq!(incremental_trigger_times(9, 10, 30, 10), vec![t(9, 0), t(9, 30)]);
        assert!(incremental_trigger_times(8, 23, 0, 10).is_empty());
    }

    #[test]
    fn test_build_triggers_by_mode() {
        let mut schedule = ScheduleConfig {
            report_times: vec!["22:00".to_string()],
            incremental: IncrementalConfig {
                active_start_hour: 8,
                active_end_hour: 12,
                interval_minutes: 120,
                ..Default::default()
            },
            ..Default::default()
        };

        schedule.mode = ScheduleMode::Incremental;
        let triggers = build_triggers(&schedule).unwrap();
        assert_eq!(triggers.len(), 3);
        assert_eq!(triggers.iter().filter(|t| t.activity == Activity::CollectBatch).count(), 2);
        assert_eq!(triggers[2].activity, Activity::FinalReport);

        schedule.mode = ScheduleMode::Traditional;
        let triggers = build_triggers(&schedule).unwrap();
        assert_eq!(
            triggers,
            vec![Trigger {
                at: t(22, 0),
                activity: Activity::TraditionalReport
            }]
        );

        schedule.report_times = vec!["late".to_string()];
        assert!(build_triggers(&schedule).is_err());
    }

    #[test]
    fn test_next_fire_is_strictly_after() {
        let tz = FixedOffset::east_opt(8 * 3600).unwrap();
        let triggers = vec![
            Trigger {
                at: t(8, 0),
                activity: Activity::CollectBatch,
            },
            Trigger {
                at: t(22, 0),
                activity: Activity::CollectBatch,
            },
            Trigger {
                at: t(22, 0),
                activity: Activity::FinalReport,
            },
        ];

        let morning = tz.with_ymd_and_hms(2024, 3, 1, 7, 59, 0).unwrap();
        let (at, due) = next_fire(&triggers, morning).unwrap();
        assert_eq!(at, tz.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
        assert_eq!(due, vec![Activity::CollectBatch]);

        // Exactly at a trigger time moves on to the next one
        let (at, due) = next_fire(&triggers, at).unwrap();
        assert_eq!(at, tz.with_ymd_and_hms(2024, 3, 1, 22, 0, 0).unwrap());
        assert_eq!(due, vec![Activity::CollectBatch, Activity::FinalReport]);

        // Wraps to the following day
        let (at, _) = next_fire(&triggers, at).unwrap();
        assert_eq!(at, tz.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap());

        assert!(next_fire(&[], morning).is_none());
    }
}
