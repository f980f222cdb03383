use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::datetime::{parse_event_date, parse_event_timestamp};
use crate::recurrence::{RecurrenceRule, describe_recurrence};

#[derive(Debug, Error)]
pub enum EventError {
    #[error("malformed event data in {title:?}: field `{field}`: {reason}")]
    MalformedEventData {
        title: String,
        field: &'static str,
        reason: String,
    },
}

/// An event exactly as the collaborator hands it over. Timestamps stay raw
/// until [`Event::try_from`] validates them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    #[serde(default)]
    pub id: Option<u64>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub start: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub end: String,

    #[serde(default)]
    pub venue: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub is_virtual: bool,

    #[serde(default)]
    pub is_hybrid: bool,

    #[serde(default)]
    pub is_recurring: bool,

    #[serde(default)]
    pub rrule: Option<String>,

    #[serde(default)]
    pub recurring_until: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl EventRecord {
    pub fn new(title: impl Into<String>, start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            start: start.into(),
            end: end.into(),
            venue: None,
            description: None,
            url: None,
            is_virtual: false,
            is_hybrid: false,
            is_recurring: false,
            rrule: None,
            recurring_until: None,
            extra: BTreeMap::new(),
        }
    }

    /// A record counts as recurring only when it carries a non-blank rule.
    pub fn recurrence_rule(&self) -> Option<&str> {
        if !self.is_recurring {
            return None;
        }
        self.rrule
            .as_deref()
            .map(str::trim)
            .filter(|rule| !rule.is_empty())
    }
}

/// Validated event with start/end in project-local wall-clock time.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: Option<u64>,
    pub title: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub venue: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub is_virtual: bool,
    pub is_hybrid: bool,
    pub is_recurring: bool,
    pub rrule: Option<String>,
    pub recurring_until: Option<NaiveDate>,
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Event {
    /// Inner text of the recurrence suffix, e.g. `Mon, Wed until 12/31/2025`.
    pub fn recurrence_label(&self) -> Option<String> {
        if !self.is_recurring {
            return None;
        }
        let rrule = self.rrule.as_deref()?;
        let until = self
            .recurring_until
            .or_else(|| RecurrenceRule::parse(rrule).until);
        Some(describe_recurrence(rrule, until))
    }
}

impl TryFrom<EventRecord> for Event {
    type Error = EventError;

    fn try_from(record: EventRecord) -> Result<Self, Self::Error> {
        let malformed = |field: &'static str, err: anyhow::Error| EventError::MalformedEventData {
            title: record.title.clone(),
            field,
            reason: format!("{err:#}"),
        };

        let start = parse_event_timestamp(&record.start).map_err(|e| malformed("start", e))?;
        let end = parse_event_timestamp(&record.end).map_err(|e| malformed("end", e))?;
        let recurring_until = match record.recurring_until.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                Some(parse_event_date(raw).map_err(|e| malformed("recurring_until", e))?)
            }
            _ => None,
        };

        Ok(Self {
            id: record.id,
            title: record.title,
            start,
            end,
            venue: record.venue.filter(|v| !v.trim().is_empty()),
            description: record.description.filter(|d| !d.trim().is_empty()),
            url: record.url.filter(|u| !u.trim().is_empty()),
            is_virtual: record.is_virtual,
            is_hybrid: record.is_hybrid,
            is_recurring: record.is_recurring,
            rrule: record.rrule,
            recurring_until,
            extra: record.extra,
        })
    }
}
