use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a measurement: replay the traces, capture the returning packets and measure their
    /// latency.
    Run {
        #[arg(short, long, help = "Path to the TOML description of the measurement")]
        config: PathBuf,
    },
    /// Convert a pcap file into a trace file that can be replayed
    Pcap2trace {
        #[arg(help = "Input pcap file")]
        input: PathBuf,
        #[arg(help = "Output trace file")]
        output: PathBuf,
    },
    /// Convert a trace or capture file into a pcap file
    Trace2pcap {
        #[arg(help = "Input trace or capture file")]
        input: PathBuf,
        #[arg(help = "Output pcap file")]
        output: PathBuf,
    },
}
