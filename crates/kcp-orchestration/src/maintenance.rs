//! Maintenance windows and maintenance policies.
//!
//! Runtimes report a daily maintenance window in the Gardener format
//! `HHMMSS±HHMM`. A [`MaintenancePolicy`] can override the window and the set of
//! allowed weekdays per plan, global account or region. [`next_window`] turns
//! the (possibly overridden) time-of-day window into the next concrete window.
//!
//! ## Policy document
//!
//! ```json
//! {
//!   "rules": [
//!     {
//!       "match": { "plan": "^trial$", "globalAccountID": "", "region": "europe" },
//!       "days": ["Sat", "Sun"],
//!       "timeBegin": "010000+0000",
//!       "timeEnd": "050000+0000"
//!     }
//!   ],
//!   "default": { "days": ["Mon", "Tue", "Wed", "Thu", "Fri"], "timeBegin": "", "timeEnd": "" }
//! }
//! ```

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::operation::{Runtime, ScheduledWindow};

/// Parses a Gardener maintenance time (`HHMMSS±HHMM`) into a UTC time of day.
///
/// # Errors
///
/// Returns [`Error::InvalidMaintenanceWindow`] if the value does not match the format.
pub fn parse_window_time(raw: &str) -> Result<NaiveTime> {
    let invalid = || Error::InvalidMaintenanceWindow {
        message: format!("'{raw}' does not match HHMMSS±HHMM"),
    };

    let bytes = raw.as_bytes();
    if bytes.len() != 11 || !raw.is_ascii() {
        return Err(invalid());
    }
    let sign = match bytes[6] {
        b'+' => 1,
        b'-' => -1,
        _ => return Err(invalid()),
    };
    let digits = |range: std::ops::Range<usize>| -> Result<u32> {
        let part = &raw[range];
        if !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        part.parse().map_err(|_| invalid())
    };

    let local = NaiveTime::from_hms_opt(digits(0..2)?, digits(2..4)?, digits(4..6)?)
        .ok_or_else(invalid)?;
    let (offset_hours, offset_minutes) = (digits(7..9)?, digits(9..11)?);
    if offset_hours > 23 || offset_minutes > 59 {
        return Err(invalid());
    }

    let offset = Duration::minutes(sign * i64::from(offset_hours * 60 + offset_minutes));
    let (utc, _) = local.overflowing_sub_signed(offset);
    Ok(utc)
}

/// Computes the next concrete maintenance window relative to `now`.
///
/// The window `[begin, end)` is built on today's date; an `end` at or before
/// `begin` crosses midnight. The window moves to the first allowed weekday
/// starting from today. If it already elapsed, it moves to the next allowed day
/// strictly after today. An empty `days` set allows every day.
#[must_use]
pub fn next_window(
    now: DateTime<Utc>,
    begin: NaiveTime,
    end: NaiveTime,
    days: &[Weekday],
) -> ScheduledWindow {
    let today = now.date_naive();
    let window_on = |offset: i64| {
        let begin_at = today.and_time(begin).and_utc() + Duration::days(offset);
        let mut end_at = today.and_time(end).and_utc() + Duration::days(offset);
        if end_at <= begin_at {
            end_at += Duration::days(1);
        }
        ScheduledWindow {
            begin: begin_at,
            end: end_at,
        }
    };

    let window = window_on(days_until_allowed(today.weekday(), days, 0));
    if window.end <= now {
        return window_on(days_until_allowed(today.weekday(), days, 1));
    }
    window
}

/// Returns the smallest offset `>= start` (within one week) landing on an allowed day.
fn days_until_allowed(from: Weekday, days: &[Weekday], start: i64) -> i64 {
    if days.is_empty() {
        return start;
    }
    let from = i64::from(from.num_days_from_monday());
    (start..start + 7)
        .find(|offset| {
            let candidate = (from + offset).rem_euclid(7);
            days.iter()
                .any(|day| i64::from(day.num_days_from_monday()) == candidate)
        })
        .unwrap_or(start)
}

/// Match criteria of a policy rule. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenancePolicyMatch {
    /// Regex over the service plan name.
    #[serde(default)]
    pub plan: String,
    /// Regex over the global account ID.
    #[serde(default, rename = "globalAccountID")]
    pub global_account_id: String,
    /// Regex over the region.
    #[serde(default)]
    pub region: String,
}

/// Overrides applied by a rule or the default entry. Empty fields keep the runtime's value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenancePolicyEntry {
    /// Allowed weekdays (`Mon` .. `Sun`).
    #[serde(default)]
    pub days: Vec<String>,
    /// Window start in `HHMMSS±HHMM`.
    #[serde(default)]
    pub time_begin: String,
    /// Window end in `HHMMSS±HHMM`.
    #[serde(default)]
    pub time_end: String,
}

/// A policy rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenancePolicyRule {
    /// Match criteria.
    #[serde(default, rename = "match")]
    pub matcher: MaintenancePolicyMatch,
    /// Overrides.
    #[serde(flatten)]
    pub entry: MaintenancePolicyEntry,
}

/// Ordered maintenance rules plus a default entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenancePolicy {
    /// Rules evaluated in order; the first match wins.
    #[serde(default)]
    pub rules: Vec<MaintenancePolicyRule>,
    /// Applied when no rule matches.
    #[serde(default)]
    pub default: MaintenancePolicyEntry,
}

impl MaintenancePolicy {
    /// Parses a policy from its JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::Serialization {
            message: format!("invalid maintenance policy: {e}"),
        })
    }

    /// Validates regexes, days and times and returns the compiled policy.
    ///
    /// # Errors
    ///
    /// Returns an error if any rule carries an invalid regex, weekday or time.
    pub fn compile(&self) -> Result<CompiledMaintenancePolicy> {
        let rules = self
            .rules
            .iter()
            .map(|rule| {
                Ok(CompiledRule {
                    plan: compile_optional(&rule.matcher.plan)?,
                    global_account_id: compile_optional(&rule.matcher.global_account_id)?,
                    region: compile_optional(&rule.matcher.region)?,
                    overrides: WindowOverrides::parse(&rule.entry)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CompiledMaintenancePolicy {
            rules,
            default: WindowOverrides::parse(&self.default)?,
        })
    }
}

fn compile_optional(pattern: &str) -> Result<Option<Regex>> {
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(pattern)
        .map(Some)
        .map_err(|e| Error::InvalidMaintenanceWindow {
            message: format!("invalid policy match '{pattern}': {e}"),
        })
}

#[derive(Debug, Clone, Default)]
struct WindowOverrides {
    days: Vec<Weekday>,
    begin: Option<NaiveTime>,
    end: Option<NaiveTime>,
}

impl WindowOverrides {
    fn parse(entry: &MaintenancePolicyEntry) -> Result<Self> {
        let days = entry
            .days
            .iter()
            .map(|day| {
                day.parse::<Weekday>()
                    .map_err(|_| Error::InvalidMaintenanceWindow {
                        message: format!("invalid weekday '{day}'"),
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        let parse_time = |raw: &str| {
            if raw.is_empty() {
                Ok(None)
            } else {
                parse_window_time(raw).map(Some)
            }
        };

        Ok(Self {
            days,
            begin: parse_time(&entry.time_begin)?,
            end: parse_time(&entry.time_end)?,
        })
    }

    fn apply(&self, runtime: &mut Runtime) {
        if !self.days.is_empty() {
            runtime.maintenance_days.clone_from(&self.days);
        }
        if let Some(begin) = self.begin {
            runtime.maintenance_window_begin = begin;
        }
        if let Some(end) = self.end {
            runtime.maintenance_window_end = end;
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    plan: Option<Regex>,
    global_account_id: Option<Regex>,
    region: Option<Regex>,
    overrides: WindowOverrides,
}

impl CompiledRule {
    fn matches(&self, runtime: &Runtime) -> bool {
        let matches = |regex: &Option<Regex>, value: &str| {
            regex.as_ref().map_or(true, |regex| regex.is_match(value))
        };
        matches(&self.plan, &runtime.plan_name)
            && matches(&self.global_account_id, &runtime.global_account_id)
            && matches(&self.region, &runtime.region)
    }
}

/// A validated maintenance policy ready to be applied to runtimes.
#[derive(Debug, Clone, Default)]
pub struct CompiledMaintenancePolicy {
    rules: Vec<CompiledRule>,
    default: WindowOverrides,
}

impl CompiledMaintenancePolicy {
    /// Overrides the runtime's days and window per the first matching rule, or the default.
    pub fn apply(&self, runtime: &mut Runtime) {
        match self.rules.iter().find(|rule| rule.matches(runtime)) {
            Some(rule) => rule.overrides.apply(runtime),
            None => self.default.apply(runtime),
        }
    }
}

/// Source of named configuration documents (e.g. a config map).
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Returns the document stored under `name`, if any.
    async fn get(&self, name: &str) -> Result<Option<String>>;
}

/// In-memory [`ConfigSource`].
#[derive(Debug, Default)]
pub struct StaticConfigSource {
    entries: RwLock<HashMap<String, String>>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("config source lock poisoned")
}

impl StaticConfigSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a document under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn insert(&self, name: impl Into<String>, document: impl Into<String>) -> Result<()> {
        self.entries
            .write()
            .map_err(poison_err)?
            .insert(name.into(), document.into());
        Ok(())
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        let entries = self.entries.read().map_err(poison_err)?;
        Ok(entries.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn time(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn runtime(plan: &str, global_account: &str, region: &str) -> Runtime {
        Runtime {
            instance_id: "i".into(),
            runtime_id: "r".into(),
            global_account_id: global_account.into(),
            sub_account_id: "sa".into(),
            shoot_name: "shoot".into(),
            plan_name: plan.into(),
            region: region.into(),
            maintenance_window_begin: time(22, 0, 0),
            maintenance_window_end: time(23, 0, 0),
            maintenance_days: vec![],
        }
    }

    #[test]
    fn parses_gardener_window_times() {
        assert_eq!(parse_window_time("220000+0000").unwrap(), time(22, 0, 0));
        assert_eq!(parse_window_time("010000+0200").unwrap(), time(23, 0, 0));
        assert_eq!(parse_window_time("233000-0100").unwrap(), time(0, 30, 0));
    }

    #[test]
    fn rejects_malformed_window_times() {
        for raw in ["", "2200+0000", "220000 0000", "250000+0000", "22000a+0000", "220000+2500"] {
            assert!(parse_window_time(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn window_later_today_stays_today() {
        // 2024-05-15 is a Wednesday.
        let now = Utc.with_ymd_and_hms(2024, 5, 15, 10, 0, 0).unwrap();
        let window = next_window(now, time(22, 0, 0), time(23, 0, 0), &[]);
        assert_eq!(window.begin, Utc.with_ymd_and_hms(2024, 5, 15, 22, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 5, 15, 23, 0, 0).unwrap());
    }

    #[test]
    fn window_crossing_midnight_ends_next_day() {
        let now = Utc.with_ymd_and_hms(2024, 5, 15, 10, 0, 0).unwrap();
        let window = next_window(now, time(22, 0, 0), time(2, 0, 0), &[]);
        assert_eq!(window.begin, Utc.with_ymd_and_hms(2024, 5, 15, 22, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 5, 16, 2, 0, 0).unwrap());
    }

    #[test]
    fn elapsed_window_moves_to_next_day() {
        let now = Utc.with_ymd_and_hms(2024, 5, 15, 10, 0, 0).unwrap();
        let window = next_window(now, time(1, 0, 0), time(3, 0, 0), &[]);
        assert_eq!(window.begin, Utc.with_ymd_and_hms(2024, 5, 16, 1, 0, 0).unwrap());
    }

    #[test]
    fn window_ending_now_has_elapsed() {
        let now = Utc.with_ymd_and_hms(2024, 5, 15, 3, 0, 0).unwrap();
        let window = next_window(now, time(1, 0, 0), time(3, 0, 0), &[]);
        assert_eq!(window.begin, Utc.with_ymd_and_hms(2024, 5, 16, 1, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 5, 16, 3, 0, 0).unwrap());
    }

    #[test]
    fn open_window_is_kept() {
        let now = Utc.with_ymd_and_hms(2024, 5, 15, 10, 0, 0).unwrap();
        let window = next_window(now, time(9, 0, 0), time(11, 0, 0), &[]);
        assert_eq!(window.begin, Utc.with_ymd_and_hms(2024, 5, 15, 9, 0, 0).unwrap());
        assert!(window.end > now);
    }

    #[test]
    fn window_waits_for_allowed_day() {
        // Wednesday -> next allowed day is Saturday.
        let now = Utc.with_ymd_and_hms(2024, 5, 15, 10, 0, 0).unwrap();
        let window = next_window(now, time(22, 0, 0), time(23, 0, 0), &[Weekday::Sat]);
        assert_eq!(window.begin, Utc.with_ymd_and_hms(2024, 5, 18, 22, 0, 0).unwrap());
    }

    #[test]
    fn elapsed_window_on_only_allowed_day_moves_a_week() {
        let now = Utc.with_ymd_and_hms(2024, 5, 15, 10, 0, 0).unwrap();
        let window = next_window(now, time(1, 0, 0), time(2, 0, 0), &[Weekday::Wed]);
        assert_eq!(window.begin, Utc.with_ymd_and_hms(2024, 5, 22, 1, 0, 0).unwrap());
    }

    #[test]
    fn first_matching_rule_wins() {
        let policy = MaintenancePolicy::from_json(
            r#"{
                "rules": [
                    {"match": {"plan": "^trial$"}, "days": ["Sat"], "timeBegin": "010000+0000", "timeEnd": "020000+0000"},
                    {"match": {"region": "europe"}, "days": ["Sun"]}
                ],
                "default": {"days": ["Mon"]}
            }"#,
        )
        .unwrap()
        .compile()
        .unwrap();

        let mut trial = runtime("trial", "GA1", "europe-west");
        policy.apply(&mut trial);
        assert_eq!(trial.maintenance_days, vec![Weekday::Sat]);
        assert_eq!(trial.maintenance_window_begin, time(1, 0, 0));
        assert_eq!(trial.maintenance_window_end, time(2, 0, 0));

        let mut europe = runtime("azure", "GA1", "europe-west");
        policy.apply(&mut europe);
        assert_eq!(europe.maintenance_days, vec![Weekday::Sun]);
        assert_eq!(europe.maintenance_window_begin, time(22, 0, 0));

        let mut other = runtime("azure", "GA1", "us-east");
        policy.apply(&mut other);
        assert_eq!(other.maintenance_days, vec![Weekday::Mon]);
    }

    #[test]
    fn invalid_policy_fails_to_compile() {
        let bad_regex = MaintenancePolicy {
            rules: vec![MaintenancePolicyRule {
                matcher: MaintenancePolicyMatch {
                    plan: "(".into(),
                    ..MaintenancePolicyMatch::default()
                },
                entry: MaintenancePolicyEntry::default(),
            }],
            default: MaintenancePolicyEntry::default(),
        };
        assert!(bad_regex.compile().is_err());

        let bad_day = MaintenancePolicy {
            rules: vec![],
            default: MaintenancePolicyEntry {
                days: vec!["Someday".into()],
                ..MaintenancePolicyEntry::default()
            },
        };
        assert!(bad_day.compile().is_err());
        assert!(MaintenancePolicy::from_json("not json").is_err());
    }

    #[tokio::test]
    async fn static_config_source_returns_documents() {
        let source = StaticConfigSource::new();
        source.insert("orchestration-config", "{}").unwrap();
        assert_eq!(source.get("orchestration-config").await.unwrap().as_deref(), Some("{}"));
        assert!(source.get("missing").await.unwrap().is_none());
    }
}
