//! Worker side: report state and statistics, then wait for one command.
//!
//! Run with:
//!   cargo run --example worker
//!
//! In another terminal:
//!   cargo run --example collector

use std::time::Duration;

use farmipc::{ChannelEndpoints, ChannelRegistry, Context, ProcessState};

fn main() {
    let mut worker = ChannelRegistry::new(Context::default(), ChannelEndpoints::default());

    worker.update_state(ProcessState::Initialized);
    for round in 1..=5 {
        worker.update_state(ProcessState::Running);
        worker.send_statistics("events", &(round * 100).to_string());
        std::thread::sleep(Duration::from_millis(500));
    }

    eprintln!("waiting for a command from the collector");
    let command = worker.get_next_command();
    eprintln!("received command {command:?}");

    worker.update_state(ProcessState::Off);
}
