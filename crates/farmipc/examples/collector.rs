//! Collector side: print what workers report, then tell them to stop.
//!
//! Run with:
//!   cargo run --example collector
//!
//! In another terminal:
//!   cargo run --example worker

use std::time::Duration;

use farmipc::{ChannelEndpoints, ChannelRegistry, Context, ProcessState, StatisticsMessage};

fn main() {
    let context = Context::default();
    let mut collector = ChannelRegistry::new(context.clone(), ChannelEndpoints::default());
    collector.set_timeout(Some(Duration::from_millis(500)));

    let mut idle_rounds = 0;
    while idle_rounds < 10 {
        let state = collector.try_to_receive_state();
        let statistic = collector.try_to_receive_statistics();

        if state == ProcessState::Timeout && statistic.is_empty() {
            idle_rounds += 1;
            continue;
        }
        idle_rounds = 0;

        if state != ProcessState::Timeout {
            eprintln!("worker state: {state}");
        }
        if let Some(message) = StatisticsMessage::parse(&statistic) {
            eprintln!("statistic {} = {}", message.name(), message.value());
        }
        if state == ProcessState::Running && statistic.ends_with(":500") {
            collector.send_command("STOP");
        }
    }

    collector.shutdown();
    if !context.shutdown(Duration::from_secs(1)) {
        eprintln!("sockets still open at exit");
    }
}
