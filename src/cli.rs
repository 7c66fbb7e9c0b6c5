//! CLI argument parsing using clap v4
//!
//! Defines the command-line interface of the rankmesh binary.

use clap::{Parser, Subcommand};

/// rankmesh - collective communication for a fixed group of processes
///
/// Joins a process group over a TCP full mesh and runs collective
/// operations (all-reduce, reduce, broadcast, send, receive) across it.
#[derive(Parser, Debug)]
#[command(name = "rankmesh")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Join the configured group and run an all-reduce self-check
    Run {
        /// Path to configuration file
        #[arg(short, long, env = "RANKMESH_CONFIG")]
        config: Option<String>,

        /// This process's rank (overrides configuration)
        #[arg(short, long)]
        rank: Option<u32>,

        /// Comma separated host:port of every rank, in rank order
        #[arg(short, long)]
        peers: Option<String>,

        /// Print group statistics as JSON after leaving
        #[arg(long)]
        json: bool,
    },

    /// Run repeated all-reduces over an in-process loopback group
    Local {
        /// Number of ranks
        #[arg(short = 'n', long, default_value = "4")]
        world_size: u32,

        /// Elements per buffer
        #[arg(short, long, default_value = "1048576")]
        elements: usize,

        /// Number of all-reduce rounds
        #[arg(short, long, default_value = "10")]
        iterations: u32,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the effective configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}
