//! CLI argument parsing for refqueue

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::update::{ReplicateRefUpdate, UriUpdateSet};

#[derive(Parser, Debug)]
#[command(name = "rq")]
#[command(author, version, about = "Inspect and drive a replication task queue", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Events directory (overrides the config file)
    #[arg(short, long)]
    pub events_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List task records
    List {
        /// Which directory to list
        #[arg(short, long, value_enum, default_value = "all")]
        state: ListState,

        /// Print one JSON record per line
        #[arg(long)]
        json: bool,
    },

    /// Queue a task per ref
    Create(UnitArgs),

    /// Move waiting tasks to running
    Start(UnitArgs),

    /// Move running tasks back to waiting
    Reset(UnitArgs),

    /// Move every running task back to waiting
    ResetAll,

    /// Delete running tasks
    Finish(UnitArgs),

    /// Drop waiting tasks
    Delete(UnitArgs),

    /// Exit 0 if any of the tasks is waiting, 1 otherwise
    IsWaiting(UnitArgs),

    /// Write the effective configuration to a YAML file
    WriteConfig {
        /// Destination file
        path: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListState {
    All,
    Waiting,
    Running,
    Building,
}

/// One project, one destination, one or more refs
#[derive(Args, Debug, Clone)]
pub struct UnitArgs {
    /// Project name
    #[arg(short, long)]
    pub project: String,

    /// Destination URI
    #[arg(short, long)]
    pub uri: String,

    /// Remote name
    #[arg(short, long)]
    pub remote: String,

    /// Ref to replicate (repeatable)
    #[arg(long = "ref", required = true)]
    pub refs: Vec<String>,
}

impl UnitArgs {
    pub fn to_uri_updates(&self) -> UriUpdateSet {
        UriUpdateSet::new(self.project.clone(), &self.uri, self.remote.clone(), self.refs.clone())
    }

    pub fn to_ref_updates(&self) -> Vec<ReplicateRefUpdate> {
        self.refs
            .iter()
            .map(|r| ReplicateRefUpdate::new(self.project.clone(), r.clone(), &self.uri, self.remote.clone()))
            .collect()
    }
}
