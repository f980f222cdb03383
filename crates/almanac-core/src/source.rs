use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::datetime::{parse_event_date, parse_event_timestamp};
use crate::event::EventRecord;
use crate::recurrence::{DEFAULT_SERIES_YEARS, RecurrenceRule, default_series_end};

/// Shortest trimmed search query that reaches the collaborator.
pub const MIN_QUERY_LEN: usize = 2;

const INSTANCE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to fetch events for {query}: {reason}")]
    FetchFailed { query: String, reason: String },
}

impl SourceError {
    pub fn fetch_failed(query: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::FetchFailed {
            query: query.into(),
            reason: reason.to_string(),
        }
    }

    /// Same failure, reported against the query the caller asked about.
    fn for_query(self, query: impl Into<String>) -> Self {
        match self {
            Self::FetchFailed { reason, .. } => Self::FetchFailed {
                query: query.into(),
                reason,
            },
        }
    }
}

/// Whatever owns the events. The day view only ever talks to this.
pub trait EventSource {
    /// Records starting on `date`, plus the ones from the day before that are
    /// still running at midnight so they can be shown as ongoing.
    fn events_for_date(&self, date: NaiveDate) -> Result<Vec<EventRecord>, SourceError>;

    fn search_events(&self, query: &str) -> Result<Vec<EventRecord>, SourceError>;
}

/// Events stored one JSON record per line in `events.data`.
#[derive(Debug)]
pub struct JsonlEventSource {
    pub data_dir: PathBuf,
    pub events_path: PathBuf,
    min_query_len: usize,
    series_years: i32,
}

impl JsonlEventSource {
    #[instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> Result<Self, SourceError> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .map_err(|err| SourceError::fetch_failed(data_dir.display().to_string(), err))?;

        let events_path = data_dir.join("events.data");
        if !events_path.exists() {
            fs::write(&events_path, "")
                .map_err(|err| SourceError::fetch_failed(events_path.display().to_string(), err))?;
        }

        info!(
            data_dir = %data_dir.display(),
            events = %events_path.display(),
            "opened event source"
        );

        Ok(Self {
            data_dir,
            events_path,
            min_query_len: MIN_QUERY_LEN,
            series_years: DEFAULT_SERIES_YEARS,
        })
    }

    pub fn with_min_query_len(mut self, len: usize) -> Self {
        self.min_query_len = len;
        self
    }

    pub fn with_series_years(mut self, years: i32) -> Self {
        self.series_years = years;
        self
    }

    #[instrument(skip(self))]
    pub fn load_records(&self) -> Result<Vec<EventRecord>, SourceError> {
        load_jsonl(&self.events_path)
    }

    /// Concrete instances of a recurring record that start on `first..=last`.
    /// A record whose timestamps do not parse is passed through untouched so
    /// the day loader can report it.
    fn expand_series(&self, record: &EventRecord, rrule: &str, first: NaiveDate, last: NaiveDate) -> Vec<EventRecord> {
        let (Ok(start), Ok(end)) = (
            parse_event_timestamp(&record.start),
            parse_event_timestamp(&record.end),
        ) else {
            return vec![record.clone()];
        };

        let series_end = record
            .recurring_until
            .as_deref()
            .and_then(|raw| parse_event_date(raw).ok())
            .unwrap_or_else(|| default_series_end(start.date(), self.series_years));

        let mut rule = RecurrenceRule::parse(rrule);
        rule.until = Some(rule.until.map_or(series_end, |until| until.min(series_end)));

        let duration = end - start;
        let window_start = first.and_time(NaiveTime::default());
        let window_end = end_of_day(last);

        rule.occurrences_between(start, window_start, window_end)
            .into_iter()
            .filter_map(|instance_start| {
                let instance_end = instance_start.checked_add_signed(duration)?;
                starts_or_runs_into(last, instance_start, instance_end)
                    .then(|| instance_record(record, instance_start, instance_end))
            })
            .collect()
    }
}

impl EventSource for JsonlEventSource {
    #[instrument(skip(self), fields(date = %date))]
    fn events_for_date(&self, date: NaiveDate) -> Result<Vec<EventRecord>, SourceError> {
        let previous_day = date.pred_opt();
        let records = self
            .load_records()
            .map_err(|err| err.for_query(date.to_string()))?;

        let mut out = Vec::new();
        for record in &records {
            if let Some(rrule) = record.recurrence_rule() {
                out.extend(self.expand_series(record, rrule, previous_day.unwrap_or(date), date));
                continue;
            }

            match parse_event_timestamp(&record.start) {
                Ok(start) if start.date() == date => out.push(record.clone()),
                Ok(start) if Some(start.date()) == previous_day => {
                    // An unparseable end is left for the day loader to reject.
                    let runs_into = parse_event_timestamp(&record.end)
                        .map_or(true, |end| starts_or_runs_into(date, start, end));
                    if runs_into {
                        out.push(record.clone());
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(title = %record.title, error = %err, "passing through unparseable record");
                    out.push(record.clone());
                }
            }
        }

        out.sort_by_key(|record| parse_event_timestamp(&record.start).ok());
        debug!(count = out.len(), "collected records for date");
        Ok(out)
    }

    #[instrument(skip(self))]
    fn search_events(&self, query: &str) -> Result<Vec<EventRecord>, SourceError> {
        let needle = query.trim().to_lowercase();
        if needle.chars().count() < self.min_query_len {
            debug!(min = self.min_query_len, "query below minimum length");
            return Ok(vec![]);
        }

        let records = self.load_records().map_err(|err| err.for_query(query))?;

        let mut matches: Vec<EventRecord> = records
            .into_iter()
            .filter(|record| record_matches(record, &needle))
            .collect();
        matches.sort_by_key(|record| parse_event_timestamp(&record.start).ok());

        debug!(count = matches.len(), "search matched records");
        Ok(matches)
    }
}

fn record_matches(record: &EventRecord, needle: &str) -> bool {
    [
        Some(record.title.as_str()),
        record.description.as_deref(),
        record.venue.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|field| field.to_lowercase().contains(needle))
}

/// Starts on `date`, or started earlier and is still running at its midnight.
fn starts_or_runs_into(date: NaiveDate, start: NaiveDateTime, end: NaiveDateTime) -> bool {
    start.date() == date || end > date.and_time(NaiveTime::default())
}

fn instance_record(series: &EventRecord, start: NaiveDateTime, end: NaiveDateTime) -> EventRecord {
    let mut instance = series.clone();
    instance.start = start.format(INSTANCE_TIMESTAMP_FORMAT).to_string();
    instance.end = end.format(INSTANCE_TIMESTAMP_FORMAT).to_string();
    instance
}

fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(23, 59, 59)
        .unwrap_or_else(|| date.and_time(NaiveTime::default()))
}

#[instrument(skip(path))]
fn load_jsonl(path: &Path) -> Result<Vec<EventRecord>, SourceError> {
    debug!(file = %path.display(), "loading jsonl");
    let query = path.display().to_string();
    let file = fs::File::open(path)
        .map_err(|err| SourceError::fetch_failed(&query, format!("{}: {err}", path.display())))?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line
            .map_err(|err| SourceError::fetch_failed(&query, format!("{}: {err}", path.display())))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        // Missing or null title and timestamps deserialize as empty and are
        // rejected per record by the day loader.
        let record: EventRecord = serde_json::from_str(trimmed).map_err(|err| {
            warn!(file = %path.display(), line = idx + 1, error = %err, "corrupt event line");
            SourceError::fetch_failed(&query, format!("{} line {}: {err}", path.display(), idx + 1))
        })?;
        out.push(record);
    }

    debug!(count = out.len(), "loaded records from jsonl");
    Ok(out)
}
