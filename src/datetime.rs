// ABOUTME: Timezone handling plus ISO-8601 datetime and duration parsing

use crate::errors::SyntaxError;
use chrono::{
    DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, Offset, TimeDelta, TimeZone, Utc,
};
use regex::Regex;
use std::sync::OnceLock;

/// The timezone applied to naive datetime values. The specially supported
/// names are "local" and "utc"; anything else must be given as an explicit
/// fixed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tz {
    Local,
    Utc,
    Offset(FixedOffset),
}

impl Tz {
    /// Look up one of the specially supported (case-insensitive) timezone
    /// names.
    pub fn named(name: &str) -> Option<Tz> {
        match name.to_ascii_lowercase().as_str() {
            "local" => Some(Tz::Local),
            "utc" => Some(Tz::Utc),
            _ => None,
        }
    }

    /// Interpret a naive local datetime in this timezone. Ambiguous local
    /// times (DST folds) resolve to the earlier instant.
    pub fn resolve(&self, naive: NaiveDateTime) -> DateTime<FixedOffset> {
        match self {
            Tz::Local => Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.fixed_offset())
                .unwrap_or_else(|| naive.and_utc().fixed_offset()),
            Tz::Utc => naive.and_utc().fixed_offset(),
            Tz::Offset(offset) => offset
                .from_local_datetime(&naive)
                .earliest()
                .unwrap_or_else(|| naive.and_utc().fixed_offset()),
        }
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        match self {
            Tz::Local => Local::now().fixed_offset(),
            Tz::Utc => Utc::now().fixed_offset(),
            Tz::Offset(offset) => Utc::now().with_timezone(offset),
        }
    }

    /// Midnight at the start of the current day in this timezone.
    pub fn today(&self) -> DateTime<FixedOffset> {
        let naive = self.now().date_naive().and_hms_opt(0, 0, 0)
            .unwrap_or_else(|| self.now().naive_local());
        self.resolve(naive)
    }

    pub fn offset(&self) -> FixedOffset {
        match self {
            Tz::Local => Local::now().offset().fix(),
            Tz::Utc => Utc.fix(),
            Tz::Offset(offset) => *offset,
        }
    }
}

impl Default for Tz {
    fn default() -> Self {
        Tz::Local
    }
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%#z",
    "%Y-%m-%d %H:%M:%S%.f%#z",
    "%Y-%m-%dT%H:%M%#z",
    "%Y-%m-%d %H:%M%#z",
];

/// Parse an ISO-8601 style timestamp. Timestamps without a timezone are
/// interpreted in *default_timezone*; a bare date becomes midnight of that
/// day.
pub fn parse_datetime(
    string: &str,
    default_timezone: Tz,
) -> Result<DateTime<FixedOffset>, SyntaxError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(string) {
        return Ok(dt);
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(string, format) {
            return Ok(dt);
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(string, format) {
            return Ok(default_timezone.resolve(naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(string, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(default_timezone.resolve(naive));
        }
    }
    Err(SyntaxError::Datetime {
        value: string.to_string(),
    })
}

fn timedelta_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        let number = r"[0-9]+([,.][0-9]+)?";
        let pattern = format!(
            r"^P(?P<weeks>{number}W)?(?P<days>{number}D)?(T(?P<hours>{number}H)?(?P<minutes>{number}M)?(?P<seconds>{number}S)?)?$"
        );
        Regex::new(&pattern).expect("the timedelta pattern is statically valid")
    })
}

/// Parse an ISO-8601 duration string, e.g. `P1DT4H3M2S`. Components accept
/// fractions written with either a dot or a comma.
pub fn parse_timedelta(string: &str) -> Result<TimeDelta, SyntaxError> {
    let error = |message: &str| SyntaxError::Timedelta {
        message: message.to_string(),
        value: string.to_string(),
    };
    if string == "P" {
        return Err(error("empty timedelta string"));
    }
    let captures = timedelta_regex()
        .captures(string)
        .ok_or_else(|| error("invalid timedelta string"))?;
    let component = |name: &str| -> f64 {
        captures
            .name(name)
            .map(|m| {
                let digits = &m.as_str()[..m.as_str().len() - 1];
                digits.replace(',', ".").parse::<f64>().unwrap_or(0.0)
            })
            .unwrap_or(0.0)
    };
    let total_seconds = component("weeks") * 604_800.0
        + component("days") * 86_400.0
        + component("hours") * 3_600.0
        + component("minutes") * 60.0
        + component("seconds");
    TimeDelta::from_std(std::time::Duration::from_secs_f64(total_seconds))
        .map_err(|_| error("timedelta out of range"))
}

/// Render a timedelta in the same ISO-8601 duration syntax the grammar
/// accepts.
pub fn format_timedelta(delta: &TimeDelta) -> String {
    let (sign, delta) = if *delta < TimeDelta::zero() {
        ("-", -*delta)
    } else {
        ("", *delta)
    };
    let mut seconds = delta.num_seconds();
    let nanos = delta.subsec_nanos();
    let days = seconds / 86_400;
    seconds %= 86_400;
    let hours = seconds / 3_600;
    seconds %= 3_600;
    let minutes = seconds / 60;
    seconds %= 60;

    let mut out = format!("{sign}P");
    if days != 0 {
        out.push_str(&format!("{days}D"));
    }
    let mut time = String::new();
    if hours != 0 {
        time.push_str(&format!("{hours}H"));
    }
    if minutes != 0 {
        time.push_str(&format!("{minutes}M"));
    }
    if nanos != 0 {
        let fraction = format!("{:.9}", nanos as f64 / 1_000_000_000.0);
        time.push_str(&format!("{seconds}{}S", fraction[1..].trim_end_matches('0')));
    } else if seconds != 0 || (days == 0 && hours == 0 && minutes == 0) {
        time.push_str(&format!("{seconds}S"));
    }
    if !time.is_empty() {
        out.push('T');
        out.push_str(&time);
    }
    out
}
