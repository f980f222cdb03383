//! Request bookkeeping around the day view: which query is current, which
//! responses arrived too late to matter, and when a burst of search input has
//! settled.

use std::time::{Duration as StdDuration, Instant};

use chrono::NaiveDate;
use tracing::{debug, instrument};

use crate::dayview::{DayBucket, SearchGroups, load_day, load_search};
use crate::source::{EventSource, MIN_QUERY_LEN, SourceError};

pub const DEFAULT_DEBOUNCE: StdDuration = StdDuration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewQuery {
    Day(NaiveDate),
    Search(String),
}

impl ViewQuery {
    /// A search box shorter than `min_len` (after trimming) shows the current
    /// day instead of searching.
    pub fn from_search_input(input: &str, current_day: NaiveDate, min_len: usize) -> Self {
        let trimmed = input.trim();
        if trimmed.chars().count() < min_len {
            Self::Day(current_day)
        } else {
            Self::Search(trimmed.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub seq: u64,
    pub query: ViewQuery,
}

/// Hands out increasing sequence numbers; only the newest ticket's response
/// is ever accepted.
#[derive(Debug, Default)]
pub struct QueryTracker {
    latest: u64,
}

impl QueryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&mut self, query: ViewQuery) -> Ticket {
        self.latest += 1;
        debug!(seq = self.latest, ?query, "issued query");
        Ticket {
            seq: self.latest,
            query,
        }
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        ticket.seq == self.latest
    }

    pub fn resolve<T>(&self, ticket: &Ticket, result: T) -> Option<T> {
        if self.is_current(ticket) {
            Some(result)
        } else {
            debug!(seq = ticket.seq, latest = self.latest, "dropping stale response");
            None
        }
    }
}

/// Trailing-edge debounce driven by caller-supplied instants.
#[derive(Debug)]
pub struct Debouncer<T> {
    quiet: StdDuration,
    pending: Option<(T, Instant)>,
}

impl<T> Debouncer<T> {
    pub fn new(quiet: StdDuration) -> Self {
        Self { quiet, pending: None }
    }

    /// Replaces any pending value and restarts the quiet period.
    pub fn input(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now));
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Takes the pending value now, without waiting out the quiet period.
    pub fn flush(&mut self) -> Option<T> {
        self.pending.take().map(|(value, _)| value)
    }

    /// Fires at most once per burst.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        let settled = self
            .pending
            .as_ref()
            .is_some_and(|(_, at)| now.saturating_duration_since(*at) >= self.quiet);
        if settled {
            self.pending.take().map(|(value, _)| value)
        } else {
            None
        }
    }
}

impl<T> Default for Debouncer<T> {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum View {
    Day(DayBucket),
    Search(SearchGroups),
}

/// Ties an [`EventSource`] to the current day and a [`QueryTracker`].
pub struct Session<S> {
    source: S,
    tracker: QueryTracker,
    current_day: NaiveDate,
    min_query_len: usize,
    search_input: Debouncer<String>,
}

impl<S: EventSource> Session<S> {
    pub fn new(source: S, current_day: NaiveDate) -> Self {
        Self {
            source,
            tracker: QueryTracker::new(),
            current_day,
            min_query_len: MIN_QUERY_LEN,
            search_input: Debouncer::default(),
        }
    }

    pub fn with_min_query_len(mut self, len: usize) -> Self {
        self.min_query_len = len;
        self
    }

    pub fn with_debounce(mut self, quiet: StdDuration) -> Self {
        self.search_input = Debouncer::new(quiet);
        self
    }

    pub fn current_day(&self) -> NaiveDate {
        self.current_day
    }

    pub fn show_day(&mut self, date: NaiveDate) -> Ticket {
        self.current_day = date;
        self.tracker.issue(ViewQuery::Day(date))
    }

    /// Stays on the last representable day instead of stepping past it.
    pub fn next_day(&mut self) -> Ticket {
        self.show_day(self.current_day.succ_opt().unwrap_or(self.current_day))
    }

    /// Stays on the first representable day instead of stepping past it.
    pub fn previous_day(&mut self) -> Ticket {
        self.show_day(self.current_day.pred_opt().unwrap_or(self.current_day))
    }

    pub fn search(&mut self, input: &str) -> Ticket {
        let query = ViewQuery::from_search_input(input, self.current_day, self.min_query_len);
        self.tracker.issue(query)
    }

    /// Records the search box contents; nothing is issued until typing settles.
    pub fn type_search(&mut self, input: &str, now: Instant) {
        self.search_input.input(input.to_string(), now);
    }

    pub fn poll_search(&mut self, now: Instant) -> Option<Ticket> {
        let input = self.search_input.poll(now)?;
        Some(self.search(&input))
    }

    /// Issues whatever was typed last, skipping the rest of the quiet period.
    pub fn submit_search(&mut self) -> Option<Ticket> {
        let input = self.search_input.flush()?;
        Some(self.search(&input))
    }

    /// Runs the collaborator for `ticket`. Safe to call for a stale ticket;
    /// [`Session::complete`] decides whether the result is used.
    #[instrument(skip(self), fields(seq = ticket.seq))]
    pub fn fetch(&self, ticket: &Ticket) -> Result<View, SourceError> {
        match &ticket.query {
            ViewQuery::Day(date) => {
                let records = self.source.events_for_date(*date)?;
                Ok(View::Day(load_day(*date, records)))
            }
            ViewQuery::Search(query) => {
                let records = self.source.search_events(query)?;
                Ok(View::Search(load_search(query, records)))
            }
        }
    }

    pub fn complete(&self, ticket: &Ticket, result: Result<View, SourceError>) -> Option<Result<View, SourceError>> {
        self.tracker.resolve(ticket, result)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::time::{Duration, Instant};

    use chrono::NaiveDate;

    use super::{Debouncer, QueryTracker, Session, View, ViewQuery};
    use crate::event::EventRecord;
    use crate::source::{EventSource, SourceError};

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[derive(Default)]
    struct RecordingSource {
        calls: RefCell<Vec<String>>,
    }

    impl EventSource for RecordingSource {
        fn events_for_date(&self, date: NaiveDate) -> Result<Vec<EventRecord>, SourceError> {
            self.calls.borrow_mut().push(format!("date:{date}"));
            Ok(vec![EventRecord::new(
                "Market",
                format!("{date}T10:00:00"),
                format!("{date}T14:00:00"),
            )])
        }

        fn search_events(&self, query: &str) -> Result<Vec<EventRecord>, SourceError> {
            self.calls.borrow_mut().push(format!("search:{query}"));
            if query == "boom" {
                return Err(SourceError::fetch_failed(query, "connection reset"));
            }
            Ok(vec![])
        }
    }

    #[test]
    fn only_latest_ticket_is_accepted() {
        let mut tracker = QueryTracker::new();
        let first = tracker.issue(ViewQuery::Day(day(2026, 3, 14)));
        let second = tracker.issue(ViewQuery::Day(day(2026, 3, 15)));

        assert!(second.seq > first.seq);
        assert_eq!(tracker.resolve(&first, "slow"), None);
        assert_eq!(tracker.resolve(&second, "fast"), Some("fast"));
    }

    #[test]
    fn short_search_input_falls_back_to_day() {
        let today = day(2026, 3, 14);
        assert_eq!(ViewQuery::from_search_input(" j ", today, 2), ViewQuery::Day(today));
        assert_eq!(
            ViewQuery::from_search_input(" jazz ", today, 2),
            ViewQuery::Search("jazz".to_string())
        );
    }

    #[test]
    fn debouncer_fires_once_after_quiet_period() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(300));

        debouncer.input("ja", start);
        debouncer.input("jaz", start + Duration::from_millis(100));
        assert_eq!(debouncer.poll(start + Duration::from_millis(350)), None);

        assert_eq!(debouncer.poll(start + Duration::from_millis(400)), Some("jaz"));
        assert_eq!(debouncer.poll(start + Duration::from_millis(900)), None);
        assert!(!debouncer.is_pending());
    }

    #[test]
    fn debouncer_cancel_drops_pending_value() {
        let start = Instant::now();
        let mut debouncer = Debouncer::default();
        debouncer.input(1, start);
        debouncer.cancel();
        assert_eq!(debouncer.poll(start + Duration::from_secs(1)), None);
    }

    #[test]
    fn session_navigation_discards_stale_day() {
        let mut session = Session::new(RecordingSource::default(), day(2026, 3, 14));
        let stale = session.next_day();
        let current = session.next_day();
        assert_eq!(session.current_day(), day(2026, 3, 16));

        let late = session.fetch(&stale);
        assert!(session.complete(&stale, late).is_none());

        let fresh = session.fetch(&current);
        let Some(Ok(View::Day(bucket))) = session.complete(&current, fresh) else {
            panic!("expected current day view");
        };
        assert_eq!(bucket.date, day(2026, 3, 16));
        assert_eq!(bucket.len(), 1);
    }

    #[test]
    fn session_waits_for_typing_to_settle() {
        let start = Instant::now();
        let mut session =
            Session::new(RecordingSource::default(), day(2026, 3, 14)).with_debounce(Duration::from_millis(500));

        session.type_search("ja", start);
        session.type_search("jazz", start + Duration::from_millis(200));
        assert!(session.poll_search(start + Duration::from_millis(600)).is_none());

        let ticket = session
            .poll_search(start + Duration::from_millis(700))
            .expect("settled search");
        assert_eq!(ticket.query, ViewQuery::Search("jazz".to_string()));
        assert!(session.poll_search(start + Duration::from_secs(5)).is_none());

        session.type_search("j", start + Duration::from_secs(6));
        let submitted = session.submit_search().expect("submitted search");
        assert_eq!(submitted.query, ViewQuery::Day(day(2026, 3, 14)));
        assert!(session.submit_search().is_none());
    }

    #[test]
    fn day_stepping_stops_at_calendar_bounds() {
        let mut session = Session::new(RecordingSource::default(), NaiveDate::MAX);
        assert_eq!(session.next_day().query, ViewQuery::Day(NaiveDate::MAX));

        let mut session = Session::new(RecordingSource::default(), NaiveDate::MIN);
        assert_eq!(session.previous_day().query, ViewQuery::Day(NaiveDate::MIN));
        assert_eq!(session.current_day(), NaiveDate::MIN);
    }

    #[test]
    fn session_search_surfaces_fetch_failure() {
        let mut session = Session::new(RecordingSource::default(), day(2026, 3, 14));
        let ticket = session.search("boom");
        let result = session.fetch(&ticket);
        assert!(matches!(
            session.complete(&ticket, result),
            Some(Err(SourceError::FetchFailed { .. }))
        ));

        let back = session.previous_day();
        assert_eq!(back.query, ViewQuery::Day(day(2026, 3, 13)));
        assert_eq!(
            session.source.calls.borrow().as_slice(),
            ["search:boom".to_string()]
        );
    }
}
