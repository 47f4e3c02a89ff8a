use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::info;

use refqueue::cli::{Cli, Command, ListState};
use refqueue::config::Config;
use refqueue::{ReplicateRefUpdate, ReplicationTasksStorage, Summary};

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(events_dir) = cli.events_dir {
        config.events_directory = events_dir;
    }

    // write-config must not provision the queue directories
    let open = || {
        info!("refqueue using {}", config.events_directory.display());
        ReplicationTasksStorage::from_config(&config).context("Failed to open task storage")
    };

    match cli.command {
        Command::List { state, json } => {
            let storage = open()?;
            let records = match state {
                ListState::All => storage.list(),
                ListState::Waiting => storage.list_waiting(),
                ListState::Running => storage.list_running(),
                ListState::Building => storage.list_building(),
            };
            print_records(&records, json)?;
        }
        Command::Create(args) => {
            let storage = open()?;
            for update in args.to_ref_updates() {
                let key = storage.create(&update);
                println!("{} {} {}", "✓".green(), key.to_string().cyan(), update);
            }
        }
        Command::Start(args) => report("start", open()?.start(&args.to_uri_updates())),
        Command::Reset(args) => report("reset", open()?.reset(&args.to_uri_updates())),
        Command::ResetAll => report("reset-all", open()?.reset_all()),
        Command::Finish(args) => report("finish", open()?.finish(&args.to_uri_updates())),
        Command::Delete(args) => {
            let storage = open()?;
            let mut summary = Summary::default();
            for update in args.to_ref_updates() {
                summary.record(storage.delete(&update));
            }
            report("delete", summary);
        }
        Command::IsWaiting(args) => {
            let waiting = open()?.is_waiting(&args.to_uri_updates());
            println!("{}", waiting);
            if !waiting {
                std::process::exit(1);
            }
        }
        Command::WriteConfig { path } => {
            config
                .save(&path)
                .context(format!("Failed to write config to {}", path.display()))?;
            println!("{} Wrote config: {}", "✓".green(), path.display());
        }
    }

    Ok(())
}

fn print_records(records: &[ReplicateRefUpdate], json: bool) -> Result<()> {
    if json {
        for record in records {
            println!("{}", serde_json::to_string(record)?);
        }
        return Ok(());
    }

    if records.is_empty() {
        println!("No tasks found");
        return Ok(());
    }

    for record in records {
        println!(
            "{}:{} {} {}",
            record.project.cyan(),
            record.ref_name.yellow(),
            record.remote,
            record.uri.dimmed()
        );
    }
    Ok(())
}

fn report(op: &str, summary: Summary) {
    let mark = if summary.failed > 0 { "✗".red() } else { "✓".green() };
    println!("{} {} {}", mark, op, summary);
}
