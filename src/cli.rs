use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::commands::{self, CommandReport};
use crate::logging;

#[derive(Debug, Parser)]
#[command(
    name = "strm-archiver",
    version,
    about = "Archive aged media directories to cold storage and leave pointer files behind"
)]
struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan every configured media directory and archive what is old enough.
    Archive {
        /// Evaluate and report without copying, writing pointers or queueing deletions.
        #[arg(long)]
        test: bool,
    },
    /// Ask a running archive pass (or the deletion daemon) to stop.
    Stop {
        #[arg(long)]
        daemon: bool,
    },
    /// Inspect or edit the deferred deletion queue.
    Deletions {
        #[command(subcommand)]
        action: DeletionsCommand,
    },
    /// Run the deferred deletion loop.
    Daemon {
        /// Run a single cycle and exit.
        #[arg(long)]
        once: bool,
    },
    /// Manage media type policies.
    Policy {
        #[command(subcommand)]
        action: PolicyCommand,
    },
    /// Show paths, configuration and queue state.
    Status,
}

#[derive(Debug, Subcommand)]
enum DeletionsCommand {
    List,
    Enqueue {
        #[arg(long)]
        path: String,
    },
    Remove {
        #[arg(long)]
        path: String,
        /// Scheduled delete time in epoch seconds, as shown by `list`.
        #[arg(long)]
        time: f64,
    },
    Clear,
    DeleteNow {
        #[arg(long)]
        path: String,
    },
}

#[derive(Debug, Subcommand)]
enum PolicyCommand {
    List,
    Set(PolicySetArgs),
    Remove {
        #[arg(long)]
        name: String,
    },
}

#[derive(Debug, Args)]
struct PolicySetArgs {
    #[arg(long)]
    name: String,
    /// Media directory relative to the local root.
    #[arg(long)]
    dir: String,
    #[arg(long)]
    creation_days: u32,
    #[arg(long)]
    mtime_days: u32,
}

fn render(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("command: {}", report.command);
    println!("ok: {}", report.ok);
    if !report.details.is_empty() {
        println!("details:");
        for line in &report.details {
            println!("  - {line}");
        }
    }
    if !report.issues.is_empty() {
        println!("issues:");
        for line in &report.issues {
            println!("  - {line}");
        }
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    if let Err(err) = logging::init() {
        eprintln!("warning: {err:#}");
    }

    let report = match cli.command {
        Command::Archive { test } => commands::archive::run(&commands::archive::ArchiveOptions {
            test_mode: test,
        })?,
        Command::Stop { daemon } => commands::stop::run(daemon)?,
        Command::Deletions { action } => {
            use commands::deletions::DeletionAction;
            let action = match action {
                DeletionsCommand::List => DeletionAction::List,
                DeletionsCommand::Enqueue { path } => DeletionAction::Enqueue { path },
                DeletionsCommand::Remove { path, time } => DeletionAction::Remove { path, time },
                DeletionsCommand::Clear => DeletionAction::Clear,
                DeletionsCommand::DeleteNow { path } => DeletionAction::DeleteNow { path },
            };
            commands::deletions::run(action)?
        }
        Command::Daemon { once } => commands::daemon::run(&commands::daemon::DaemonOptions { once })?,
        Command::Policy { action } => {
            use commands::policy::PolicyAction;
            let action = match action {
                PolicyCommand::List => PolicyAction::List,
                PolicyCommand::Set(args) => PolicyAction::Set {
                    name: args.name,
                    dir: args.dir,
                    creation_days: args.creation_days,
                    mtime_days: args.mtime_days,
                },
                PolicyCommand::Remove { name } => PolicyAction::Remove { name },
            };
            commands::policy::run(action)?
        }
        Command::Status => commands::status::run()?,
    };

    render(&report, cli.json)?;
    if !report.ok {
        anyhow::bail!("{} reported {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}
