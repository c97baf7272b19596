use clap::{Parser, Subcommand};

pub const VERSION: &str = "v0.1.0";

#[derive(Parser)]
#[command(name = "rollup-prover", version = VERSION, about = "Rollup proposal prover", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize configuration and home directory
    Init {},

    /// Start watching the inbox and submitting proofs
    Start {},

    /// Show the service version
    Version {},
}
