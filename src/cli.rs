use clap::Parser;
use std::path::PathBuf;

/// jdtsd - JDTS temperature sensor daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file path (default: built-in settings)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Detach from the terminal and log to syslog
    #[arg(short = 'd', long = "daemonize")]
    pub daemonize: bool,

    /// Log every sample and reconciliation step
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Use the built-in sensor simulator instead of the device node
    #[arg(long = "simulate")]
    pub simulate: bool,
}
