//! CLI command definitions
//!
//! All CLI structs and subcommand enums are defined here.

use clap::{Parser, Subcommand};

/// TaskMirror - mirror JIRA projects into a local SQLite table
#[derive(Parser, Debug)]
#[command(name = "taskmirror")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (default: ~/.config/taskmirror/config.yaml)
    #[arg(short, long, global = true, env = "CONFIG_PATH")]
    pub config: Option<String>,

    /// Enable verbose/debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Verify the JIRA credentials and print the authenticated user
    CheckAuth,

    /// Reconcile one or more projects now
    Sync {
        /// Project keys (default: the configured projects)
        keys: Vec<String>,

        /// Output reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// List mirrored issues of a project
    List {
        /// Project key
        key: String,

        /// Only issues with this exact status (e.g. "In Progress")
        #[arg(short, long)]
        status: Option<String>,

        /// Include soft-deleted issues
        #[arg(short, long)]
        all: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Serve the HTTP sync trigger and read API
    Serve {
        /// Listen address (overrides server.address)
        #[arg(short, long)]
        address: Option<String>,
    },

    /// Periodically sync the configured projects
    Daemon {
        /// Seconds between cycles (overrides sync.interval_secs)
        #[arg(short, long)]
        interval: Option<u64>,
    },
}
