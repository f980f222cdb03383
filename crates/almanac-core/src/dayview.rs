use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime, Timelike};
use tracing::{debug, instrument, warn};

use crate::datetime::format_clock_label;
use crate::event::{Event, EventRecord};

/// Events sharing one displayed start time.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeGroup {
    /// Minute-resolution start time; groups sort on this, never on `label`.
    pub time: NaiveTime,
    pub label: String,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayBucket {
    pub date: NaiveDate,
    /// Started the previous day and still running at midnight.
    pub ongoing: Vec<TimeGroup>,
    pub new: Vec<TimeGroup>,
    /// Records dropped as malformed while loading.
    pub skipped: usize,
}

impl DayBucket {
    pub fn len(&self) -> usize {
        self.ongoing
            .iter()
            .chain(self.new.iter())
            .map(|group| group.events.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchGroups {
    pub query: String,
    pub groups: Vec<TimeGroup>,
    pub skipped: usize,
}

impl SearchGroups {
    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|group| group.events.is_empty())
    }
}

/// Splits a day's events into ongoing and new and groups each side by start
/// time. Pure: the same inputs always give the same bucket.
#[instrument(skip(events), fields(date = %query_date, count = events.len()))]
pub fn partition_and_group(query_date: NaiveDate, events: &[Event]) -> DayBucket {
    // `None` only for the earliest representable date, which has no ongoing events.
    let previous_day = query_date.pred_opt();
    let start_of_day = query_date.and_time(NaiveTime::default());

    let (ongoing, new): (Vec<Event>, Vec<Event>) = events
        .iter()
        .cloned()
        .partition(|event| Some(event.start.date()) == previous_day && event.end > start_of_day);

    debug!(ongoing = ongoing.len(), new = new.len(), "partitioned day");

    DayBucket {
        date: query_date,
        ongoing: group_by_time(&ongoing),
        new: group_by_time(&new),
        skipped: 0,
    }
}

/// Groups by minute-resolution start time, chronologically. Input order is kept
/// inside each group.
pub fn group_by_time(events: &[Event]) -> Vec<TimeGroup> {
    let mut groups: BTreeMap<NaiveTime, Vec<Event>> = BTreeMap::new();
    for event in events {
        groups.entry(minute_key(event.start.time())).or_default().push(event.clone());
    }

    groups
        .into_iter()
        .map(|(time, events)| TimeGroup {
            time,
            label: format_clock_label(time),
            events,
        })
        .collect()
}

/// Validates wire records and buckets the valid ones. A malformed record is
/// logged and skipped so the rest of the day still renders.
#[instrument(skip(records), fields(date = %query_date, count = records.len()))]
pub fn load_day(query_date: NaiveDate, records: Vec<EventRecord>) -> DayBucket {
    let (events, skipped) = validate_records(records);
    let mut bucket = partition_and_group(query_date, &events);
    bucket.skipped = skipped;
    bucket
}

#[instrument(skip(records), fields(count = records.len()))]
pub fn load_search(query: &str, records: Vec<EventRecord>) -> SearchGroups {
    let (events, skipped) = validate_records(records);
    SearchGroups {
        query: query.to_string(),
        groups: group_by_time(&events),
        skipped,
    }
}

fn validate_records(records: Vec<EventRecord>) -> (Vec<Event>, usize) {
    let mut events = Vec::with_capacity(records.len());
    let mut skipped = 0usize;
    for record in records {
        match Event::try_from(record) {
            Ok(event) => events.push(event),
            Err(err) => {
                warn!(error = %err, "skipping malformed event");
                skipped += 1;
            }
        }
    }
    (events, skipped)
}

fn minute_key(time: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time)
}
