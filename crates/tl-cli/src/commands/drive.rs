//! Drive command: an interactive session fed by stdin and the GPS feed.
//!
//! Commands arrive one per line. A trailing `@lat,lng` token supplies a
//! manual position for that command instead of waiting on a fix. Closing
//! the input ends the session.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use tl_core::types::ms_to_minutes;
use tl_core::{EndOptions, IntervalKind, LatLng, LogStore, SessionSnapshot, Toggle};

use crate::tracker::{StartOutcome, Tracker};

const REFRESH_PERIOD: Duration = Duration::from_secs(1);

const HELP: &str = "commands: break, rest, fuel <litres> [cost], from <name>, to <name>, \
status, online, offline, sync, end [note], help; append @lat,lng for a manual position";

/// A command typed during a drive.
#[derive(Debug, Clone, PartialEq)]
pub enum DriveCommand {
    Break,
    Rest,
    Fuel { litres: f64, cost: Option<f64> },
    From(String),
    To(String),
    Status,
    Online,
    Offline,
    Sync,
    End(String),
    Help,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Input {
    pub command: DriveCommand,
    pub manual: Option<LatLng>,
}

/// Parses one input line. Blank lines yield `None`.
pub fn parse_input(line: &str) -> Result<Option<Input>> {
    let mut words: Vec<&str> = line.split_whitespace().collect();
    let manual = match words.last().and_then(|last| last.strip_prefix('@')) {
        Some(position) => {
            let manual = parse_position(position)?;
            words.pop();
            Some(manual)
        }
        None => None,
    };

    let Some((name, args)) = words.split_first() else {
        if manual.is_some() {
            bail!("a position needs a command");
        }
        return Ok(None);
    };
    let text = args.join(" ");

    let command = match name.to_ascii_lowercase().as_str() {
        "break" => no_args(args, DriveCommand::Break)?,
        "rest" => no_args(args, DriveCommand::Rest)?,
        "status" => no_args(args, DriveCommand::Status)?,
        "online" => no_args(args, DriveCommand::Online)?,
        "offline" => no_args(args, DriveCommand::Offline)?,
        "sync" => no_args(args, DriveCommand::Sync)?,
        "help" => DriveCommand::Help,
        "fuel" => {
            let (litres, cost) = match args {
                [litres] => (*litres, None),
                [litres, cost] => (*litres, Some(*cost)),
                _ => bail!("usage: fuel <litres> [cost]"),
            };
            DriveCommand::Fuel {
                litres: litres
                    .parse()
                    .with_context(|| format!("invalid litres `{litres}`"))?,
                cost: cost
                    .map(|cost| {
                        cost.parse()
                            .with_context(|| format!("invalid cost `{cost}`"))
                    })
                    .transpose()?,
            }
        }
        "from" if !text.is_empty() => DriveCommand::From(text),
        "to" if !text.is_empty() => DriveCommand::To(text),
        "from" | "to" => bail!("usage: {name} <name>"),
        "end" => DriveCommand::End(text),
        other => bail!("unknown command `{other}` ({HELP})"),
    };
    Ok(Some(Input { command, manual }))
}

fn no_args(args: &[&str], command: DriveCommand) -> Result<DriveCommand> {
    if args.is_empty() {
        Ok(command)
    } else {
        bail!("`{}` takes no arguments", args.join(" "))
    }
}

fn parse_position(raw: &str) -> Result<LatLng> {
    let (lat, lng) = raw
        .split_once(',')
        .with_context(|| format!("expected @lat,lng, got `@{raw}`"))?;
    let lat = lat.trim().parse().context("invalid latitude")?;
    let lng = lng.trim().parse().context("invalid longitude")?;
    Ok(LatLng::new(lat, lng).validate()?)
}

/// Departure/arrival names typed during the drive.
#[derive(Debug, Default)]
struct Names {
    departure: Option<String>,
    arrival: Option<String>,
}

impl Names {
    fn end_options(&mut self, note: String) -> EndOptions {
        EndOptions {
            end_coord: None,
            note,
            departure_name: self.departure.take(),
            arrival_name: self.arrival.take(),
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

/// Starts a session and runs it until `end` or end of input.
pub async fn run<S, R, W>(
    tracker: &mut Tracker<S>,
    input: R,
    writer: &mut W,
    fallback: Option<LatLng>,
) -> Result<()>
where
    S: LogStore,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let report = tracker.try_sync().await?;
    writeln!(writer, "{report}")?;

    match tracker.start(fallback).await.context("cannot start session")? {
        StartOutcome::Started(at) => writeln!(
            writer,
            "session started at {:.5}, {:.5}",
            at.lat, at.lng
        )?,
        StartOutcome::AlreadyActive => writeln!(writer, "session already active")?,
    }

    let mut lines = input.lines();
    let mut ticker = tokio::time::interval(REFRESH_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut names = Names::default();
    let view = tracker.snapshots();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read command")? else {
                    tracing::info!("input closed");
                    if tracker.engine().is_active() {
                        end(tracker, writer, names.end_options(String::new()), None).await?;
                    }
                    break;
                };
                match handle_line(tracker, writer, &mut names, &view, &line).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Stop) => break,
                    Err(err) => {
                        tracing::debug!(error = %err, "command failed");
                        writeln!(writer, "error: {err:#}")?;
                    }
                }
            }
            coord = tracker.next_location() => {
                tracker.on_location(coord);
            }
            // Location updates only reach `view` through the tick.
            _ = ticker.tick() => {
                tracker.refresh(Utc::now());
            }
        }
    }
    Ok(())
}

async fn handle_line<S: LogStore, W: Write>(
    tracker: &mut Tracker<S>,
    writer: &mut W,
    names: &mut Names,
    view: &watch::Receiver<Option<SessionSnapshot>>,
    line: &str,
) -> Result<Flow> {
    let Some(Input { command, manual }) = parse_input(line)? else {
        return Ok(Flow::Continue);
    };

    match command {
        DriveCommand::Break => {
            let toggle = tracker.toggle_break(manual).await?;
            writeln!(writer, "{}", toggle_message(IntervalKind::Break, toggle))?;
        }
        DriveCommand::Rest => {
            let toggle = tracker.toggle_rest(manual).await?;
            writeln!(writer, "{}", toggle_message(IntervalKind::Rest, toggle))?;
        }
        DriveCommand::Fuel { litres, cost } => {
            let event = tracker.add_fuel(litres, cost, manual).await?;
            writeln!(
                writer,
                "fuel recorded: {} L, cost {}",
                event.amount_litres, event.cost
            )?;
        }
        DriveCommand::From(name) => {
            writeln!(writer, "departure: {name}")?;
            names.departure = Some(name);
        }
        DriveCommand::To(name) => {
            writeln!(writer, "arrival: {name}")?;
            names.arrival = Some(name);
        }
        DriveCommand::Status => {
            let snapshot = view.borrow().clone();
            match snapshot {
                Some(snapshot) => {
                    let queued = tracker.store().count_not_synced()?;
                    write!(
                        writer,
                        "{}",
                        render_snapshot(&snapshot, tracker.is_online(), queued)
                    )?;
                }
                None => writeln!(writer, "no active session")?,
            }
        }
        DriveCommand::Online => {
            let report = tracker.set_online(true).await?;
            writeln!(writer, "online")?;
            if let Some(report) = report {
                writeln!(writer, "{report}")?;
            }
        }
        DriveCommand::Offline => {
            tracker.set_online(false).await?;
            writeln!(writer, "offline")?;
        }
        DriveCommand::Sync => {
            let report = tracker.try_sync().await?;
            writeln!(writer, "{report}")?;
        }
        DriveCommand::End(note) => {
            end(tracker, writer, names.end_options(note), manual).await?;
            return Ok(Flow::Stop);
        }
        DriveCommand::Help => writeln!(writer, "{HELP}")?,
    }
    Ok(Flow::Continue)
}

async fn end<S: LogStore, W: Write>(
    tracker: &mut Tracker<S>,
    writer: &mut W,
    options: EndOptions,
    manual: Option<LatLng>,
) -> Result<()> {
    let ended = tracker.end(options, manual).await?;
    let entry = &ended.entry;
    writeln!(
        writer,
        "log {} saved: {:.3} km, driving {} min, break {} min",
        ended.id, entry.distance_km, entry.driving_minutes, entry.break_minutes
    )?;
    writeln!(writer, "{}", ended.report)?;
    Ok(())
}

fn toggle_message(kind: IntervalKind, toggle: Toggle) -> String {
    let state = match toggle {
        Toggle::Opened => "started",
        Toggle::Closed => "ended",
    };
    format!("{kind} {state}")
}

/// Multi-line summary of a running session.
pub fn render_snapshot(snapshot: &SessionSnapshot, online: bool, queued: usize) -> String {
    let flag = |open: bool| if open { "on" } else { "off" };
    format!(
        "elapsed {} | {:.3} km | {} point(s)\n\
         break: {} ({} min) | rest: {} ({} min)\n\
         fuel: {} L, cost {}\n\
         network: {} | queued: {queued}\n",
        format_elapsed(snapshot.elapsed_ms),
        snapshot.distance_km,
        snapshot.track_points,
        flag(snapshot.on_break),
        ms_to_minutes(snapshot.break_ms),
        flag(snapshot.resting),
        ms_to_minutes(snapshot.rest_ms),
        snapshot.fuel_litres,
        snapshot.fuel_cost,
        if online { "online" } else { "offline" },
    )
}

fn format_elapsed(ms: i64) -> String {
    let seconds = ms.max(0) / 1000;
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        seconds % 3600 / 60,
        seconds % 60
    )
}
