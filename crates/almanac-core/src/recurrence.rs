//! iCal-style recurrence rules: a lenient parser, the short human label shown
//! next to recurring events, and occurrence expansion for the day view.

use std::sync::OnceLock;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Weekday};
use regex::Regex;
use tracing::trace;

use crate::datetime::{add_years_clamped, format_until_date, weekday_full_name, weekday_short_name};

/// Upper bound on periods walked while expanding a single rule.
const MAX_EXPANSION_PERIODS: u32 = 50_000;

pub const DEFAULT_SERIES_YEARS: i32 = 2;

const FALLBACK_LABEL: &str = "Recurring";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "DAILY" => Some(Self::Daily),
            "WEEKLY" => Some(Self::Weekly),
            "MONTHLY" => Some(Self::Monthly),
            "YEARLY" => Some(Self::Yearly),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Daily => "Daily",
            Self::Weekly => "Weekly",
            Self::Monthly => "Monthly",
            Self::Yearly => "Yearly",
        }
    }
}

/// One `BYDAY` entry such as `MO`, `2TU` or `-1FR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByDay {
    pub ordinal: Option<i32>,
    pub weekday: Weekday,
}

impl ByDay {
    fn parse(token: &str) -> Option<Self> {
        static BYDAY_RE: OnceLock<Option<Regex>> = OnceLock::new();
        let re = BYDAY_RE
            .get_or_init(|| Regex::new(r"^(?P<ord>[+-]?\d{1,2})?(?P<day>MO|TU|WE|TH|FR|SA|SU)$").ok())
            .as_ref()?;

        let upper = token.trim().to_ascii_uppercase();
        let caps = re.captures(&upper)?;
        let weekday = match caps.name("day")?.as_str() {
            "MO" => Weekday::Mon,
            "TU" => Weekday::Tue,
            "WE" => Weekday::Wed,
            "TH" => Weekday::Thu,
            "FR" => Weekday::Fri,
            "SA" => Weekday::Sat,
            "SU" => Weekday::Sun,
            _ => return None,
        };
        let ordinal = match caps.name("ord") {
            Some(m) => match m.as_str().parse::<i32>() {
                Ok(0) | Err(_) => return None,
                Ok(n) => Some(n),
            },
            None => None,
        };
        Some(Self { ordinal, weekday })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub freq: Option<Frequency>,
    /// As written in the rule; `None` when absent or not a positive integer.
    pub interval: Option<u32>,
    pub by_day: Vec<ByDay>,
    pub by_month: Vec<u32>,
    pub count: Option<u32>,
    pub until: Option<NaiveDate>,
}

impl RecurrenceRule {
    /// Never fails: unknown keys are ignored and unusable values dropped.
    pub fn parse(raw: &str) -> Self {
        let mut rule = Self::default();
        let body = raw.trim();
        let body = match (body.get(..6), body.get(6..)) {
            (Some(prefix), Some(rest)) if prefix.eq_ignore_ascii_case("RRULE:") => rest,
            _ => body,
        };

        for token in body.split(';') {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            let key = key.trim().to_ascii_uppercase();
            let value = value.trim();
            if value.is_empty() {
                continue;
            }

            match key.as_str() {
                "FREQ" => rule.freq = Frequency::parse(value),
                "INTERVAL" => rule.interval = value.parse::<u32>().ok().filter(|n| *n > 0),
                "BYDAY" => {
                    rule.by_day = value.split(',').filter_map(ByDay::parse).collect();
                }
                "BYMONTH" => {
                    rule.by_month = value
                        .split(',')
                        .filter_map(|m| m.trim().parse::<u32>().ok())
                        .filter(|m| (1..=12).contains(m))
                        .collect();
                }
                "COUNT" => rule.count = value.parse::<u32>().ok(),
                "UNTIL" => rule.until = parse_rule_until(value),
                other => trace!(key = other, "ignoring unsupported rrule key"),
            }
        }

        rule
    }

    fn step(&self) -> u32 {
        self.interval.unwrap_or(1)
    }

    /// Instance starts of the series anchored at `dtstart` that fall inside
    /// `[window_start, window_end]`, honoring `INTERVAL`, `COUNT` and `UNTIL`.
    ///
    /// `COUNT` is spent on every instance from `dtstart` on, including the ones
    /// before the window.
    pub fn occurrences_between(
        &self,
        dtstart: NaiveDateTime,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> Vec<NaiveDateTime> {
        let mut out = Vec::new();
        if window_end < window_start {
            return out;
        }

        let Some(freq) = self.freq else {
            if dtstart >= window_start && dtstart <= window_end {
                out.push(dtstart);
            }
            return out;
        };

        let mut horizon = window_end.date();
        if let Some(until) = self.until {
            horizon = horizon.min(until);
        }

        let mut emitted = 0u32;
        for period in 0..MAX_EXPANSION_PERIODS {
            let Some(period_start) = self.period_start(freq, dtstart.date(), period) else {
                break;
            };
            if period_start > horizon {
                break;
            }

            for candidate in self.period_candidates(freq, dtstart, period_start) {
                if candidate < dtstart {
                    continue;
                }
                if candidate.date() > horizon || candidate > window_end {
                    return out;
                }
                emitted += 1;
                if candidate >= window_start {
                    out.push(candidate);
                }
                if self.count.is_some_and(|count| emitted >= count) {
                    return out;
                }
            }
        }

        out
    }

    /// First calendar day of the `period`-th interval after `anchor`.
    fn period_start(&self, freq: Frequency, anchor: NaiveDate, period: u32) -> Option<NaiveDate> {
        let offset = i64::from(period) * i64::from(self.step());
        match freq {
            Frequency::Daily => anchor.checked_add_signed(Duration::days(offset)),
            Frequency::Weekly => {
                let monday = anchor
                    - Duration::days(i64::from(anchor.weekday().num_days_from_monday()));
                monday.checked_add_signed(Duration::weeks(offset))
            }
            Frequency::Monthly => {
                let (year, month) = add_months(anchor.year(), anchor.month(), offset)?;
                NaiveDate::from_ymd_opt(year, month, 1)
            }
            Frequency::Yearly => {
                let year = i32::try_from(i64::from(anchor.year()) + offset).ok()?;
                NaiveDate::from_ymd_opt(year, 1, 1)
            }
        }
    }

    fn period_candidates(
        &self,
        freq: Frequency,
        dtstart: NaiveDateTime,
        period_start: NaiveDate,
    ) -> Vec<NaiveDateTime> {
        let time = dtstart.time();
        let mut days: Vec<NaiveDate> = match freq {
            Frequency::Daily => {
                let keep = self.by_day.is_empty()
                    || self.by_day.iter().any(|d| d.weekday == period_start.weekday());
                if keep { vec![period_start] } else { vec![] }
            }
            Frequency::Weekly => {
                let mut weekdays: Vec<Weekday> = self.by_day.iter().map(|d| d.weekday).collect();
                if weekdays.is_empty() {
                    weekdays.push(dtstart.weekday());
                }
                weekdays
                    .into_iter()
                    .map(|wd| period_start + Duration::days(i64::from(wd.num_days_from_monday())))
                    .collect()
            }
            Frequency::Monthly => {
                if !self.by_month.is_empty() && !self.by_month.contains(&period_start.month()) {
                    vec![]
                } else {
                    self.days_in_month(period_start.year(), period_start.month(), dtstart.day())
                }
            }
            Frequency::Yearly => {
                let months = if self.by_month.is_empty() {
                    vec![dtstart.month()]
                } else {
                    self.by_month.clone()
                };
                months
                    .into_iter()
                    .flat_map(|m| self.days_in_month(period_start.year(), m, dtstart.day()))
                    .collect()
            }
        };

        days.sort();
        days.dedup();
        days.into_iter().map(|d| d.and_time(time)).collect()
    }

    /// Matching days of one month: `BYDAY` entries when present, otherwise the
    /// anchor's day-of-month (skipped in months that lack it).
    fn days_in_month(&self, year: i32, month: u32, anchor_day: u32) -> Vec<NaiveDate> {
        if self.by_day.is_empty() {
            return NaiveDate::from_ymd_opt(year, month, anchor_day)
                .into_iter()
                .collect();
        }

        let mut out = Vec::new();
        for by_day in &self.by_day {
            match by_day.ordinal {
                Some(n) => out.extend(nth_weekday_in_month(year, month, by_day.weekday, n)),
                None => out.extend(all_weekdays_in_month(year, month, by_day.weekday)),
            }
        }
        out
    }
}

/// Short human label for a recurrence rule, e.g. `Every 2 Weekly`,
/// `1st Monday`, `Mon, Wed until 12/31/2025`. Never empty.
///
/// The `Every {n} ` prefix only decorates the plain frequency label; weekday
/// based labels drop the interval.
pub fn describe_recurrence(rrule: &str, until: Option<NaiveDate>) -> String {
    let rule = RecurrenceRule::parse(rrule);

    let interval_prefix = match rule.interval {
        Some(n) if n != 1 => format!("Every {n} "),
        _ => String::new(),
    };

    let ordinal_single = match rule.by_day.as_slice() {
        [single] => single.ordinal.map(|n| (n, single.weekday)),
        _ => None,
    };
    let has_ordinals = rule.by_day.iter().any(|d| d.ordinal.is_some());

    let mut label = match (rule.freq, ordinal_single) {
        (Some(Frequency::Monthly | Frequency::Yearly), Some((n, weekday))) => {
            format!("{} {}", ordinal_word(n), weekday_full_name(weekday))
        }
        (Some(Frequency::Weekly), _) if !rule.by_day.is_empty() && !has_ordinals => rule
            .by_day
            .iter()
            .map(|d| weekday_short_name(d.weekday))
            .collect::<Vec<_>>()
            .join(", "),
        (Some(freq), _) => format!("{interval_prefix}{}", freq.label()),
        (None, _) => FALLBACK_LABEL.to_string(),
    };

    if let Some(until) = until {
        label.push_str(" until ");
        label.push_str(&format_until_date(until));
    }

    label
}

/// `1st`, `2nd`, `3rd`, `4th`, `11th`, `22nd`; `-1` reads `Last`.
///
/// Negative ordinals count from the end of the month (`-2` reads `2nd to last`)
/// rather than being printed as raw numerals.
pub fn ordinal_word(n: i32) -> String {
    if n == -1 {
        return "Last".to_string();
    }
    if n < 0 {
        return format!("{} to last", ordinal_word(-n));
    }
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

/// End of a series that was saved without an explicit end date.
pub fn default_series_end(start: NaiveDate, years: i32) -> NaiveDate {
    add_years_clamped(start, years)
}

fn parse_rule_until(raw: &str) -> Option<NaiveDate> {
    let digits = raw.get(..8)?;
    NaiveDate::parse_from_str(digits, "%Y%m%d").ok()
}

fn add_months(year: i32, month: u32, offset: i64) -> Option<(i32, u32)> {
    let zero_based = i64::from(year) * 12 + i64::from(month) - 1 + offset;
    let year = i32::try_from(zero_based.div_euclid(12)).ok()?;
    let month = u32::try_from(zero_based.rem_euclid(12) + 1).ok()?;
    Some((year, month))
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = add_months(year, month, 1)?;
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

/// Positive `n` counts from the start of the month, negative from the end.
fn nth_weekday_in_month(year: i32, month: u32, weekday: Weekday, n: i32) -> Option<NaiveDate> {
    let target = if n > 0 {
        let first = NaiveDate::from_ymd_opt(year, month, 1)?;
        let diff = (7 + weekday.num_days_from_monday() - first.weekday().num_days_from_monday()) % 7;
        first + Duration::days(i64::from(diff)) + Duration::weeks(i64::from(n - 1))
    } else {
        let last = last_day_of_month(year, month)?;
        let diff = (7 + last.weekday().num_days_from_monday() - weekday.num_days_from_monday()) % 7;
        last - Duration::days(i64::from(diff)) - Duration::weeks(i64::from(-n - 1))
    };
    (target.month() == month).then_some(target)
}

fn all_weekdays_in_month(year: i32, month: u32, weekday: Weekday) -> Vec<NaiveDate> {
    (1..=5)
        .filter_map(|n| nth_weekday_in_month(year, month, weekday, n))
        .collect()
}
