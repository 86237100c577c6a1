//! Command line interface built on clap.
//!
//! Defines [`Cli`] with the [`Command`] tree (server, keys, node, submit,
//! poll) and the global `--config` / `--verbose` flags.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::auth::Role;
use crate::config::DEFAULT_CONFIG_FILE;

/// inferq: inference job queue with leased workers and pollable results.
#[derive(Debug, Parser)]
#[command(name = "inferq", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Enable debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run or initialize the broker.
    Server {
        #[command(subcommand)]
        action: ServerAction,
    },

    /// Manage API keys in the broker database.
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /// Run a worker node against a remote broker.
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },

    /// Submit a prompt as a new job.
    Submit {
        /// The prompt sent as a single user message.
        prompt: String,

        /// Model named in the request payload.
        #[arg(long, default_value = "gpt-3.5-turbo")]
        model: String,

        /// Higher priorities are leased first.
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i64,

        /// Block until the job finishes.
        #[arg(long, default_value_t = false)]
        wait: bool,

        /// Seconds to wait before giving up (defaults to `client.wait_timeout_secs`).
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show the status of a job.
    Poll {
        /// Job id returned by `submit`.
        id: String,

        /// Block until the job finishes.
        #[arg(long, default_value_t = false)]
        wait: bool,

        /// Seconds to wait before giving up (defaults to `client.wait_timeout_secs`).
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ServerAction {
    /// Serve the HTTP API until interrupted.
    Start {
        /// Listen address (defaults to `broker.bind`).
        #[arg(long)]
        bind: Option<String>,
    },

    /// Create the database and print a new admin key.
    Init,
}

#[derive(Debug, Subcommand)]
pub enum KeysAction {
    /// Issue a new API key and print it once.
    Add {
        /// Human readable owner of the key; recorded as `locked_by` for workers.
        name: String,

        /// Recorded with the key; not enforced on any route.
        #[arg(long, value_enum, default_value_t = RoleArg::User)]
        role: RoleArg,
    },
}

#[derive(Debug, Subcommand)]
pub enum NodeAction {
    /// Lease and process jobs until interrupted.
    Run,
    /// Process jobs until the queue is empty, then exit.
    Batch,
}

/// Role accepted on the command line, mapped to [`Role`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    Admin,
    User,
    Node,
}

impl From<RoleArg> for Role {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Admin => Role::Admin,
            RoleArg::User => Role::User,
            RoleArg::Node => Role::Node,
        }
    }
}
