//! Command-line surface, parsed with `clap`'s derive API.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "sim-runner")]
#[command(about = "OCPP 1.6-J charge-point simulator and labeled anomaly-dataset generator")]
#[command(version)]
pub struct Cli {
    /// Registered scenario name (see --list-scenarios).
    #[arg(long)]
    pub scenario: Option<String>,

    /// normal or attack.
    #[arg(long, default_value = "normal")]
    pub mode: String,

    /// Step count for the scenario's drive loop.
    #[arg(long, default_value_t = 10)]
    pub duration: u32,

    /// Number of CP clients to connect, when --cp-list is not given.
    #[arg(long, default_value_t = 1)]
    pub stations: u32,

    /// Explicit CP id list; overrides --stations.
    #[arg(long = "cp-list", num_args = 1..)]
    pub cp_list: Vec<String>,

    /// Override path for the unified CSV table.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// CSMS listen port.
    #[arg(long, default_value_t = 9000)]
    pub port: u16,

    /// Raise the default tracing level to debug.
    #[arg(short, long)]
    pub verbose: bool,

    /// Print the scenario registry and exit.
    #[arg(long)]
    pub list_scenarios: bool,
}
