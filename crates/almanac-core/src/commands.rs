use std::time::Instant;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use crate::cli::Invocation;
use crate::config::Config;
use crate::datetime::{parse_day_arg, parse_event_date, project_today};
use crate::recurrence::describe_recurrence;
use crate::render::Renderer;
use crate::session::{Session, Ticket, View, ViewQuery};
use crate::source::EventSource;

const DAY_LOAD_FAILED: &str = "Error loading events. Please try again.";
const SEARCH_FAILED: &str = "Error searching events. Please try again.";

pub fn known_command_names() -> Vec<&'static str> {
    vec!["day", "search", "label", "show", "help", "version"]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(source, cfg, renderer, inv))]
pub fn dispatch<S: EventSource>(
    source: S,
    cfg: &Config,
    renderer: &mut Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let command = inv.command.as_str();
    debug!(command, args = ?inv.command_args, "dispatching command");

    match command {
        "day" => {
            let mut session = open_session(source, cfg, now)?;
            cmd_day(&mut session, renderer, &inv.command_args, now)
        }
        "search" => {
            let mut session = open_session(source, cfg, now)?;
            cmd_search(&mut session, renderer, &inv.command_args)
        }
        "label" => cmd_label(&inv.command_args),
        "show" => cmd_show(cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

fn open_session<S: EventSource>(source: S, cfg: &Config, now: DateTime<Utc>) -> anyhow::Result<Session<S>> {
    let min_len = cfg.search_min_length()?;
    let debounce = cfg.search_debounce()?;
    Ok(Session::new(source, project_today(now))
        .with_min_query_len(min_len)
        .with_debounce(debounce))
}

#[instrument(skip(session, renderer, args, now))]
fn cmd_day<S: EventSource>(
    session: &mut Session<S>,
    renderer: &mut Renderer,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let date = match args {
        [] => project_today(now),
        [token] => parse_day_arg(token, now)?,
        _ => return Err(anyhow!("day takes at most one date, got: {}", args.join(" "))),
    };

    info!(%date, "showing day");
    let ticket = session.show_day(date);
    present(session, &ticket, renderer)
}

#[instrument(skip(session, renderer, args))]
fn cmd_search<S: EventSource>(session: &mut Session<S>, renderer: &mut Renderer, args: &[String]) -> anyhow::Result<()> {
    // The whole argument list is one finished input, so it is submitted
    // without waiting out the debounce.
    let input = args.join(" ");
    session.type_search(&input, Instant::now());
    let ticket = session.submit_search().unwrap_or_else(|| session.search(&input));
    if let ViewQuery::Day(date) = &ticket.query {
        info!(%date, "search input too short; showing current day");
    }
    present(session, &ticket, renderer)
}

fn present<S: EventSource>(session: &Session<S>, ticket: &Ticket, renderer: &mut Renderer) -> anyhow::Result<()> {
    let fetched = session.fetch(ticket);
    let Some(result) = session.complete(ticket, fetched) else {
        debug!(seq = ticket.seq, "response superseded; nothing to show");
        return Ok(());
    };

    let failure = match ticket.query {
        ViewQuery::Day(_) => DAY_LOAD_FAILED,
        ViewQuery::Search(_) => SEARCH_FAILED,
    };

    match result.context(failure)? {
        View::Day(bucket) => renderer.print_day(&bucket),
        View::Search(results) => renderer.print_search(&results),
    }
}

fn cmd_label(args: &[String]) -> anyhow::Result<()> {
    let rrule = args.first().map(String::as_str).unwrap_or("");
    let until = args
        .get(1)
        .map(|raw| parse_event_date(raw).with_context(|| format!("invalid until date: {raw}")))
        .transpose()?;

    println!("{}", describe_recurrence(rrule, until));
    Ok(())
}

fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    let mut entries: Vec<_> = cfg.iter().collect();
    entries.sort();
    for (k, v) in entries {
        println!("{k}={v}");
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!("Commands: day [DATE], search QUERY..., label RRULE [UNTIL], show, help, version");
    println!("DATE: today, tomorrow, yesterday, a weekday name, +Nd/-Nd, or YYYY-MM-DD");
    Ok(())
}
