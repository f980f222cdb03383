use std::io::{self, IsTerminal, Write};
use std::str::FromStr;

use anyhow::anyhow;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::{format_clock_label, format_day_heading};
use crate::dayview::{DayBucket, SearchGroups, TimeGroup};
use crate::event::Event;

const ARROW: &str = "\u{2192}";
const ONGOING_HEADER: &str = "ONGOING";
const EMPTY_DAY: &str = "No events scheduled for this day.";
const EMPTY_SEARCH: &str = "No events found matching your search.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStyle {
    /// One `→ title : venue : start - end : description` line per event.
    Arrow,
    /// Time column plus title, venue on its own line.
    Compact,
}

impl FromStr for RenderStyle {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arrow" | "line" => Ok(Self::Arrow),
            "compact" | "list" => Ok(Self::Compact),
            other => Err(anyhow!("invalid render.style: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    style: RenderStyle,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };
        let style = cfg
            .get("render.style")
            .map(|raw| raw.parse::<RenderStyle>())
            .transpose()?
            .unwrap_or(RenderStyle::Arrow);

        Ok(Self { color, style })
    }

    pub fn with_style(style: RenderStyle, color: bool) -> Self {
        Self { color, style }
    }

    pub fn style(&self) -> RenderStyle {
        self.style
    }

    #[tracing::instrument(skip(self, bucket), fields(date = %bucket.date))]
    pub fn print_day(&mut self, bucket: &DayBucket) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_day(&mut out, bucket)
    }

    #[tracing::instrument(skip(self, results), fields(query = %results.query))]
    pub fn print_search(&mut self, results: &SearchGroups) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_search(&mut out, results)
    }

    pub fn write_day<W: Write>(&self, out: &mut W, bucket: &DayBucket) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(&format_day_heading(bucket.date), "1"))?;

        if bucket.is_empty() {
            writeln!(out, "{EMPTY_DAY}")?;
        } else {
            let width = time_column_width(bucket.ongoing.iter().chain(bucket.new.iter()));
            if !bucket.ongoing.is_empty() {
                writeln!(out, "{}", self.paint(ONGOING_HEADER, "33"))?;
                for group in &bucket.ongoing {
                    for event in &group.events {
                        self.write_event(out, group, event, true, width)?;
                    }
                }
            }
            self.write_groups(out, &bucket.new, width)?;
        }

        self.write_skipped(out, bucket.skipped)
    }

    pub fn write_search<W: Write>(&self, out: &mut W, results: &SearchGroups) -> anyhow::Result<()> {
        if results.is_empty() {
            writeln!(out, "{EMPTY_SEARCH}")?;
        } else {
            let width = time_column_width(results.groups.iter());
            self.write_groups(out, &results.groups, width)?;
        }
        self.write_skipped(out, results.skipped)
    }

    fn write_groups<W: Write>(&self, out: &mut W, groups: &[TimeGroup], width: usize) -> anyhow::Result<()> {
        for group in groups {
            if self.style == RenderStyle::Arrow {
                writeln!(out, "{}", self.paint(&group.label, "36"))?;
            }
            for event in &group.events {
                self.write_event(out, group, event, false, width)?;
            }
        }
        Ok(())
    }

    fn write_event<W: Write>(
        &self,
        out: &mut W,
        group: &TimeGroup,
        event: &Event,
        ongoing: bool,
        width: usize,
    ) -> anyhow::Result<()> {
        let suffix = self.event_suffix(event);
        match self.style {
            RenderStyle::Arrow => {
                let start = format_clock_label(event.start.time());
                let end = format_clock_label(event.end.time());
                let venue = event.venue.as_deref().unwrap_or("No venue");
                let mut line = format!("{ARROW} {} : {venue} : {start} - {end}", event.title);
                if let Some(description) = &event.description {
                    line.push_str(" : ");
                    line.push_str(description);
                }
                writeln!(out, "{line}{suffix}")?;
                if let Some(url) = &event.url {
                    writeln!(out, "  {}", self.paint(url, "4"))?;
                }
            }
            RenderStyle::Compact => {
                let padding = width.saturating_sub(UnicodeWidthStr::width(group.label.as_str()));
                let marker = if ongoing { " (ongoing)" } else { "" };
                writeln!(
                    out,
                    "{}{}  {}{marker}{suffix}",
                    self.paint(&group.label, "36"),
                    " ".repeat(padding),
                    event.title
                )?;
                let indent = " ".repeat(width + 2);
                if let Some(description) = &event.description {
                    writeln!(out, "{indent}{description}")?;
                }
                if let Some(venue) = &event.venue {
                    writeln!(out, "{indent}at {venue}")?;
                }
            }
        }
        Ok(())
    }

    fn event_suffix(&self, event: &Event) -> String {
        let mut suffix = String::new();
        if event.is_virtual {
            suffix.push(' ');
            suffix.push_str(&self.paint("[Virtual]", "34"));
        }
        if event.is_hybrid {
            suffix.push(' ');
            suffix.push_str(&self.paint("[Hybrid]", "32"));
        }
        if let Some(label) = event.recurrence_label() {
            suffix.push(' ');
            suffix.push_str(&self.paint(&format!("({label})"), "3"));
        }
        suffix
    }

    fn write_skipped<W: Write>(&self, out: &mut W, skipped: usize) -> anyhow::Result<()> {
        if skipped > 0 {
            let noun = if skipped == 1 { "event" } else { "events" };
            writeln!(out, "{}", self.paint(&format!("{skipped} {noun} could not be shown."), "2"))?;
        }
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn time_column_width<'a>(groups: impl Iterator<Item = &'a TimeGroup>) -> usize {
    groups
        .map(|group| UnicodeWidthStr::width(group.label.as_str()))
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{RenderStyle, Renderer};
    use crate::dayview::{load_day, load_search};
    use crate::event::EventRecord;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 14).expect("valid date")
    }

    fn render_day(style: RenderStyle, records: Vec<EventRecord>) -> String {
        let bucket = load_day(day(), records);
        let mut out = Vec::new();
        Renderer::with_style(style, false)
            .write_day(&mut out, &bucket)
            .expect("render day");
        String::from_utf8(out).expect("utf8 output")
    }

    fn sample_records() -> Vec<EventRecord> {
        let mut overnight = EventRecord::new("Night market", "2026-03-13T20:00:00", "2026-03-14T02:00:00");
        overnight.venue = Some("Pier 4".to_string());

        let mut talk = EventRecord::new("Rust meetup", "2026-03-14T10:00:00", "2026-03-14T11:30:00");
        talk.venue = Some("Library".to_string());
        talk.description = Some("Lightning talks".to_string());
        talk.is_hybrid = true;

        let mut standup = EventRecord::new("Standup", "2026-03-14T09:00:00", "2026-03-14T09:15:00");
        standup.is_virtual = true;
        standup.is_recurring = true;
        standup.rrule = Some("FREQ=WEEKLY;BYDAY=MO,WE".to_string());

        vec![overnight, talk, standup]
    }

    #[test]
    fn arrow_style_matches_day_layout() {
        let rendered = render_day(RenderStyle::Arrow, sample_records());
        let expected = "\
Saturday (03-14-26)
ONGOING
\u{2192} Night market : Pier 4 : 8:00PM - 2:00AM
9:00AM
\u{2192} Standup : No venue : 9:00AM - 9:15AM [Virtual] (Mon, Wed)
10:00AM
\u{2192} Rust meetup : Library : 10:00AM - 11:30AM : Lightning talks [Hybrid]
";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn compact_style_aligns_time_column() {
        let rendered = render_day(RenderStyle::Compact, sample_records());
        let expected = "\
Saturday (03-14-26)
ONGOING
8:00PM   Night market (ongoing)
         at Pier 4
9:00AM   Standup [Virtual] (Mon, Wed)
10:00AM  Rust meetup [Hybrid]
         Lightning talks
         at Library
";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn empty_day_and_skipped_records_are_reported() {
        let rendered = render_day(
            RenderStyle::Arrow,
            vec![EventRecord::new("Broken", "??", "2026-03-14T10:00:00")],
        );
        assert_eq!(
            rendered,
            "Saturday (03-14-26)\nNo events scheduled for this day.\n1 event could not be shown.\n"
        );
    }

    #[test]
    fn empty_search_message() {
        let results = load_search("zzz", vec![]);
        let mut out = Vec::new();
        Renderer::with_style(RenderStyle::Arrow, false)
            .write_search(&mut out, &results)
            .expect("render search");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "No events found matching your search.\n"
        );
    }

    #[test]
    fn parses_style_names() {
        assert_eq!("Compact".parse::<RenderStyle>().expect("compact"), RenderStyle::Compact);
        assert_eq!("arrow".parse::<RenderStyle>().expect("arrow"), RenderStyle::Arrow);
        assert!("fancy".parse::<RenderStyle>().is_err());
    }
}
