use std::fs;

use almanac_core::dayview::{load_day, load_search};
use almanac_core::event::EventRecord;
use almanac_core::render::{RenderStyle, Renderer};
use almanac_core::source::{EventSource, JsonlEventSource};
use chrono::{NaiveDate, NaiveTime};
use tempfile::tempdir;

fn write_events(source: &JsonlEventSource, records: &[EventRecord]) {
    let mut body = String::new();
    for record in records {
        body.push_str(&serde_json::to_string(record).expect("serialize record"));
        body.push('\n');
    }
    fs::write(&source.events_path, body).expect("write events");
}

fn fixture() -> Vec<EventRecord> {
    let mut late_show = EventRecord::new("Late show", "2026-03-13T22:00:00", "2026-03-14T01:30:00");
    late_show.venue = Some("Blue Room".to_string());

    let mut market = EventRecord::new("Farmers market", "2026-03-14T09:00:00", "2026-03-14T13:00:00");
    market.venue = Some("Town square".to_string());
    market.description = Some("Local produce".to_string());

    let mut choir = EventRecord::new("Choir practice", "2026-03-07T18:00:00", "2026-03-07T19:30:00");
    choir.is_recurring = true;
    choir.rrule = Some("FREQ=WEEKLY;BYDAY=SA".to_string());

    let happy_hour = EventRecord::new("Happy hour", "2026-03-13T17:00:00", "2026-03-13T19:00:00");
    let broken = EventRecord::new("Mystery", "sometime", "2026-03-14T10:00:00");
    let elsewhere = EventRecord::new("Spring gala", "2026-04-01T19:00:00", "2026-04-01T23:00:00");

    vec![late_show, happy_hour, market, choir, broken, elsewhere]
}

#[test]
fn day_view_from_jsonl_source() {
    let temp = tempdir().expect("tempdir");
    let source = JsonlEventSource::open(temp.path()).expect("open source");
    write_events(&source, &fixture());

    let date = NaiveDate::from_ymd_opt(2026, 3, 14).expect("valid date");
    let records = source.events_for_date(date).expect("load day");
    assert!(records.iter().all(|record| record.title != "Happy hour"));
    let bucket = load_day(date, records);

    assert_eq!(bucket.skipped, 1);
    assert_eq!(bucket.ongoing.len(), 1);
    assert_eq!(bucket.ongoing[0].events[0].title, "Late show");

    let labels: Vec<&str> = bucket.new.iter().map(|group| group.label.as_str()).collect();
    assert_eq!(labels, ["9:00AM", "6:00PM"]);

    let choir = &bucket.new[1].events[0];
    assert_eq!(choir.title, "Choir practice");
    assert_eq!(choir.start, date.and_hms_opt(18, 0, 0).expect("valid time"));
    assert_eq!(choir.end.time(), NaiveTime::from_hms_opt(19, 30, 0).expect("valid time"));
    assert_eq!(choir.recurrence_label().as_deref(), Some("Sat"));

    let mut out = Vec::new();
    Renderer::with_style(RenderStyle::Arrow, false)
        .write_day(&mut out, &bucket)
        .expect("render day");
    let rendered = String::from_utf8(out).expect("utf8");
    assert!(rendered.starts_with("Saturday (03-14-26)\nONGOING\n"));
    assert!(rendered.contains("\u{2192} Choir practice : No venue : 6:00PM - 7:30PM (Sat)"));
    assert!(rendered.ends_with("1 event could not be shown.\n"));
}

#[test]
fn recurring_series_stops_at_recurring_until() {
    let temp = tempdir().expect("tempdir");
    let source = JsonlEventSource::open(temp.path()).expect("open source");

    let mut choir = EventRecord::new("Choir practice", "2026-03-07T18:00:00", "2026-03-07T19:30:00");
    choir.is_recurring = true;
    choir.rrule = Some("FREQ=WEEKLY;BYDAY=SA".to_string());
    choir.recurring_until = Some("2026-03-20".to_string());
    write_events(&source, &[choir]);

    let inside = NaiveDate::from_ymd_opt(2026, 3, 14).expect("valid date");
    let day = load_day(inside, source.events_for_date(inside).expect("load day"));
    assert_eq!(day.len(), 1);
    assert_eq!(
        day.new[0].events[0].recurrence_label().as_deref(),
        Some("Sat until 3/20/2026")
    );

    let after = NaiveDate::from_ymd_opt(2026, 3, 21).expect("valid date");
    let records = source.events_for_date(after).expect("load day");
    assert!(records.is_empty());
}

#[test]
fn search_reads_the_same_store() {
    let temp = tempdir().expect("tempdir");
    let source = JsonlEventSource::open(temp.path()).expect("open source");
    write_events(&source, &fixture());

    let results = load_search("MARKET", source.search_events("MARKET").expect("search"));
    assert_eq!(results.groups.len(), 1);
    assert_eq!(results.groups[0].events[0].title, "Farmers market");

    assert!(source.search_events("m").expect("short query").is_empty());
    assert!(
        source
            .search_events("no such thing")
            .expect("search")
            .is_empty()
    );
}
