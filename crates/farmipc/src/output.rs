use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use farmipc_monitor::{ProcessState, StatisticsMessage};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// What happened to the message in this process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
    /// Accepted locally but not taken by any peer.
    Queued,
}

/// One message on a monitoring channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event<'a> {
    State(ProcessState),
    Statistic(&'a str),
    Command(&'a str),
}

impl Event<'_> {
    fn channel(&self) -> &'static str {
        match self {
            Event::State(_) => "state",
            Event::Statistic(_) => "statistics",
            Event::Command(_) => "command",
        }
    }

    /// Statistic name and value; unparseable frames keep the whole text as value.
    fn name_and_value(&self) -> (Option<String>, String) {
        match self {
            Event::State(state) => (None, state.to_string()),
            Event::Statistic(frame) => match StatisticsMessage::parse(frame) {
                Some(message) => (Some(message.name().to_string()), message.value().to_string()),
                None => (None, (*frame).to_string()),
            },
            Event::Command(command) => (None, (*command).to_string()),
        }
    }

    fn raw(&self) -> String {
        match self {
            Event::State(state) => state.to_string(),
            Event::Statistic(frame) | Event::Command(frame) => (*frame).to_string(),
        }
    }
}

#[derive(Serialize)]
struct EventOutput<'a> {
    channel: &'a str,
    direction: Direction,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    value: String,
    timestamp: String,
}

pub fn print_event(event: &Event<'_>, direction: Direction, format: OutputFormat) {
    let (name, value) = event.name_and_value();
    match format {
        OutputFormat::Json => {
            let out = EventOutput {
                channel: event.channel(),
                direction,
                name,
                value,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "DIRECTION", "NAME", "VALUE"])
                .add_row(vec![
                    event.channel().to_string(),
                    direction_label(direction).to_string(),
                    name.unwrap_or_default(),
                    value,
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => match name {
            Some(name) => println!(
                "{} {} {name}={value}",
                direction_label(direction),
                event.channel()
            ),
            None => println!("{} {} {value}", direction_label(direction), event.channel()),
        },
        OutputFormat::Raw => print_raw_line(&event.raw()),
    }
}

fn print_raw_line(text: &str) {
    let mut out = std::io::stdout();
    let _ = writeln!(out, "{text}");
    let _ = out.flush();
}

fn direction_label(direction: Direction) -> &'static str {
    match direction {
        Direction::Sent => "sent",
        Direction::Received => "received",
        Direction::Queued => "queued",
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
