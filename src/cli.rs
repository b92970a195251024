use clap::Parser;
use std::path::PathBuf;

/// CLI arguments for the scryd daemon.
#[derive(Parser, Debug)]
#[clap(name = "scryd")]
#[clap(about = "Watches directory trees and records per-inode event chains", long_about = None)]
pub struct Args {
    /// Path to the JSON config file
    #[clap(short, long, value_name = "FILE", default_value = "scryd.json")]
    pub config: PathBuf,
}
