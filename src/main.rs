use nettester::config::MeasurementConfig;
use nettester::error::Result;
use nettester::{export, measurement};
mod cmd;

use clap::Parser;
use crossbeam_channel::bounded;
use std::process;

fn run(command: cmd::Command) -> Result<()> {
    match command {
        cmd::Command::Run { config } => {
            let config = MeasurementConfig::load(&config)?;
            // Ctrl+C ends a capture-only measurement early, twice exits
            let (stop, interrupt) = bounded::<()>(1);
            if let Err(e) = ctrlc::set_handler(move || {
                if stop.try_send(()).is_err() {
                    process::exit(1);
                }
            }) {
                log::warn!("Cannot set the Ctrl-C handler: {e}");
            }
            measurement::run(&config, &interrupt)?;
        }
        cmd::Command::Pcap2trace { input, output } => {
            export::pcap_to_trace(&input, &output)?;
        }
        cmd::Command::Trace2pcap { input, output } => {
            export::trace_to_pcap(&input, &output)?;
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = cmd::Args::parse();
    if let Err(e) = run(args.command) {
        log::error!("{e}");
        process::exit(1);
    }
}
