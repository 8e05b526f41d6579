use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[clap(
    version = "0.1.0",
    name = "kartrace",
    about = "Headless kart races driven by autonomous racing line followers"
)]
pub struct SimOpts {
    // FLAGS ---------------------------------------------------------------------------------------
    /// Activate debug logging
    #[clap(short, long)]
    pub debug: bool,

    /// Print live standings while the race is simulated in real-time (single run only)
    #[clap(short, long)]
    pub live: bool,

    // OPTIONS -------------------------------------------------------------------------------------
    /// Set number of simulation runs (ignored in live mode)
    #[clap(short, long, default_value = "1")]
    pub no_sim_runs: u32,

    /// Set path to the simulation parameter file
    #[clap(short, long)]
    pub parfile_path: Option<PathBuf>,

    /// Set real-time factor (only relevant in live mode)
    #[clap(short, long, default_value = "1.0")]
    pub realtime_factor: f32,

    /// Set simulation timestep size in seconds, should be in the range [0.001, 0.1]
    #[clap(short, long, default_value = "0.02")]
    pub timestep_size: f32,
}
