//! Time handling for layer time dimensions.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::warn;

use crate::error::{ConfigError, ConfigResult};
use crate::fragment::is_integer;

/// How a layer's time dimension is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeRes {
    /// One time value per local solar day.
    Solar,
    /// One time value per UTC date (daily or coarser summary products).
    Summary,
    /// Full timestamps.
    Subday,
}

impl TimeRes {
    /// Parse a `time_resolution` token.
    ///
    /// The legacy tokens `raw`, `day`, `month` and `year` are accepted and
    /// mapped onto their replacements, with a warning logged once per token.
    pub fn parse(token: &str, layer: &str) -> ConfigResult<Self> {
        let (res, deprecated) = match token {
            "solar" => (TimeRes::Solar, false),
            "summary" => (TimeRes::Summary, false),
            "subday" => (TimeRes::Subday, false),
            "raw" => (TimeRes::Solar, true),
            "day" | "month" | "year" => (TimeRes::Summary, true),
            other => {
                return Err(ConfigError::config(format!(
                    "Invalid time resolution value {} in named layer {}",
                    other, layer
                )))
            }
        };
        if deprecated && first_use_of_deprecated(token) {
            warn!(
                token = %token,
                replacement = %res.as_str(),
                "Deprecated time_resolution value - please update your configuration"
            );
        }
        Ok(res)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRes::Solar => "solar",
            TimeRes::Summary => "summary",
            TimeRes::Subday => "subday",
        }
    }

    pub fn is_subday(&self) -> bool {
        matches!(self, TimeRes::Subday)
    }

    pub fn is_solar(&self) -> bool {
        matches!(self, TimeRes::Solar)
    }

    /// Map a dataset timestamp onto the time value published for it.
    ///
    /// Solar resolution shifts by the dataset's centre longitude (15 degrees
    /// per hour) before truncating to a date.
    pub fn bucket(&self, time: DateTime<Utc>, centre_lon: Option<f64>) -> DateTime<Utc> {
        match self {
            TimeRes::Subday => time,
            TimeRes::Summary => start_of_day(time.date_naive()),
            TimeRes::Solar => {
                let offset_secs = centre_lon.map(|lon| (lon / 15.0 * 3600.0) as i64).unwrap_or(0);
                start_of_day((time + Duration::seconds(offset_secs)).date_naive())
            }
        }
    }
}

fn first_use_of_deprecated(token: &str) -> bool {
    static SEEN: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    let seen = SEEN.get_or_init(|| Mutex::new(HashSet::new()));
    let mut seen = seen.lock().unwrap_or_else(|e| e.into_inner());
    seen.insert(token.to_string())
}

/// Midnight UTC on `date`.
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// Parse an ISO 8601 timestamp, assuming UTC when no offset is given.
pub fn parse_iso8601(s: &str) -> Option<DateTime<Utc>> {
    // Try full datetime with timezone
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // Try without timezone (assume UTC)
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }
    None
}

/// Parse an ISO 8601 calendar date.
pub fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// Which time a layer shows when a request does not name one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultTimeRule {
    Latest,
    Earliest,
    At(DateTime<Utc>),
}

impl DefaultTimeRule {
    /// Parse `default_time`: "latest", "earliest", or an ISO date (a full
    /// timestamp for sub-day layers).
    pub fn parse(value: Option<&Value>, res: TimeRes, layer: &str) -> ConfigResult<Self> {
        let invalid = |v: &dyn std::fmt::Display| {
            ConfigError::config(format!(
                "Invalid default_time value in layer {}: {}",
                layer, v
            ))
        };
        let text = match value {
            None | Some(Value::Null) => return Ok(DefaultTimeRule::Latest),
            Some(Value::String(s)) => s.as_str(),
            Some(other) => return Err(invalid(other)),
        };
        match text {
            "latest" => Ok(DefaultTimeRule::Latest),
            "earliest" => Ok(DefaultTimeRule::Earliest),
            literal if res.is_subday() => parse_iso8601(literal)
                .map(DefaultTimeRule::At)
                .ok_or_else(|| invalid(&literal)),
            literal => parse_iso_date(literal)
                .map(|d| DefaultTimeRule::At(start_of_day(d)))
                .ok_or_else(|| invalid(&literal)),
        }
    }

    /// Pick the default from a sorted, non-empty list of available times.
    ///
    /// An explicit time missing from the list falls back to the latest time.
    pub fn resolve(&self, times: &[DateTime<Utc>], layer: &str) -> Option<DateTime<Utc>> {
        match self {
            DefaultTimeRule::Latest => times.last().copied(),
            DefaultTimeRule::Earliest => times.first().copied(),
            DefaultTimeRule::At(t) => {
                if times.binary_search(t).is_ok() {
                    Some(*t)
                } else {
                    warn!(
                        layer = %layer,
                        default_time = %t,
                        "default_time is not a valid time for this layer, using the latest time instead"
                    );
                    times.last().copied()
                }
            }
        }
    }
}

/// A regular time axis: one time value every `interval` days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeAxis {
    pub interval: u32,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl TimeAxis {
    /// Parse a `time_axis` block. Only legal for non-subday layers.
    pub fn parse(cfg: &Value, res: TimeRes, layer: &str) -> ConfigResult<Self> {
        if res.is_subday() {
            return Err(ConfigError::config(format!(
                "Regular time axis is not supported for sub-day time resolutions (layer {})",
                layer
            )));
        }
        let interval = match cfg.get("time_interval") {
            None => 1,
            Some(v) if is_integer(v) => match v.as_u64() {
                Some(n) if n > 0 && n <= u32::MAX as u64 => n as u32,
                _ => {
                    return Err(ConfigError::config(format!(
                        "time_interval must be a positive integer (layer {})",
                        layer
                    )))
                }
            },
            Some(_) => {
                return Err(ConfigError::config(format!(
                    "time_interval must be a positive integer (layer {})",
                    layer
                )))
            }
        };
        let start = Self::parse_date(cfg, "start_date", layer)?;
        let end = Self::parse_date(cfg, "end_date", layer)?;
        if let (Some(s), Some(e)) = (start, end) {
            if e < s {
                return Err(ConfigError::config(format!(
                    "time_axis end_date must be greater than or equal to the start_date if both are provided (layer {})",
                    layer
                )));
            }
        }
        Ok(Self {
            interval,
            start,
            end,
        })
    }

    fn parse_date(cfg: &Value, key: &str, layer: &str) -> ConfigResult<Option<NaiveDate>> {
        match cfg.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => parse_iso_date(s).map(Some).ok_or_else(|| {
                ConfigError::config(format!(
                    "time_axis {} is not a valid ISO format date string (layer {})",
                    key, layer
                ))
            }),
            Some(_) => Err(ConfigError::config(format!(
                "time_axis {} is not a valid ISO format date string (layer {})",
                key, layer
            ))),
        }
    }

    /// Generate the axis between the configured (or data-derived) bounds.
    pub fn dates(&self, data_start: NaiveDate, data_end: NaiveDate) -> Vec<DateTime<Utc>> {
        let start = self.start.unwrap_or(data_start);
        let end = self.end.unwrap_or(data_end);
        let step = Duration::days(i64::from(self.interval));
        let mut out = Vec::new();
        let mut current = start;
        while current <= end {
            out.push(start_of_day(current));
            current += step;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    #[test]
    fn test_parse_iso8601() {
        let dt = parse_iso8601("2024-01-15T12:00:00Z").unwrap();
        assert_eq!(dt.year(), 2024);
        assert_eq!(dt.month(), 1);
        assert_eq!(dt.day(), 15);
        assert_eq!(dt.hour(), 12);
        assert!(parse_iso8601("2024-01-15T12:00:00").is_some());
        assert!(parse_iso8601("yesterday").is_none());
    }

    #[test]
    fn test_time_res_aliases() {
        assert_eq!(TimeRes::parse("raw", "l").unwrap(), TimeRes::Solar);
        assert_eq!(TimeRes::parse("month", "l").unwrap(), TimeRes::Summary);
        assert_eq!(TimeRes::parse("subday", "l").unwrap(), TimeRes::Subday);
        assert!(TimeRes::parse("fortnight", "l").is_err());
    }

    #[test]
    fn test_solar_bucket_shifts_by_longitude() {
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 20, 0, 0).unwrap();
        // 150E is UTC+10 solar: 06:00 next day.
        assert_eq!(
            TimeRes::Solar.bucket(t, Some(150.0)),
            start_of_day(NaiveDate::from_ymd_opt(2024, 1, 16).unwrap())
        );
        assert_eq!(
            TimeRes::Summary.bucket(t, Some(150.0)),
            start_of_day(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
        );
        assert_eq!(TimeRes::Subday.bucket(t, None), t);
    }

    #[test]
    fn test_default_time_rule() {
        assert_eq!(
            DefaultTimeRule::parse(None, TimeRes::Summary, "l").unwrap(),
            DefaultTimeRule::Latest
        );
        assert_eq!(
            DefaultTimeRule::parse(Some(&json!("earliest")), TimeRes::Summary, "l").unwrap(),
            DefaultTimeRule::Earliest
        );
        let rule = DefaultTimeRule::parse(Some(&json!("2020-03-01")), TimeRes::Solar, "l").unwrap();
        assert_eq!(
            rule,
            DefaultTimeRule::At(start_of_day(NaiveDate::from_ymd_opt(2020, 3, 1).unwrap()))
        );
        assert!(DefaultTimeRule::parse(Some(&json!("2020-03-01T10:00:00")), TimeRes::Summary, "l").is_err());
        assert!(DefaultTimeRule::parse(Some(&json!("2020-03-01T10:00:00Z")), TimeRes::Subday, "l").is_ok());
        assert!(DefaultTimeRule::parse(Some(&json!(5)), TimeRes::Subday, "l").is_err());
    }

    #[test]
    fn test_default_time_resolve_falls_back_to_latest() {
        let d = |day| start_of_day(NaiveDate::from_ymd_opt(2021, 1, day).unwrap());
        let times = vec![d(1), d(2), d(3)];
        assert_eq!(DefaultTimeRule::Earliest.resolve(&times, "l"), Some(d(1)));
        assert_eq!(DefaultTimeRule::At(d(2)).resolve(&times, "l"), Some(d(2)));
        assert_eq!(DefaultTimeRule::At(d(9)).resolve(&times, "l"), Some(d(3)));
    }

    #[test]
    fn test_time_axis() {
        let axis = TimeAxis::parse(
            &json!({"time_interval": 2, "start_date": "2021-01-01"}),
            TimeRes::Summary,
            "l",
        )
        .unwrap();
        let dates = axis.dates(
            NaiveDate::from_ymd_opt(2020, 12, 1).unwrap(),
            NaiveDate::from_ymd_opt(2021, 1, 6).unwrap(),
        );
        assert_eq!(dates.len(), 3);
        assert_eq!(dates[1].day(), 3);

        assert!(TimeAxis::parse(&json!({}), TimeRes::Subday, "l").is_err());
        assert!(TimeAxis::parse(&json!({"time_interval": 0}), TimeRes::Summary, "l").is_err());
        assert!(TimeAxis::parse(&json!({"time_interval": 1.5}), TimeRes::Summary, "l").is_err());
        assert!(TimeAxis::parse(
            &json!({"start_date": "2021-02-01", "end_date": "2021-01-01"}),
            TimeRes::Summary,
            "l"
        )
        .is_err());
        assert!(TimeAxis::parse(&json!({"start_date": "Feb 1"}), TimeRes::Summary, "l").is_err());
    }
}
