use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};

#[derive(Debug, Parser)]
#[command(name = "mailmind", version, about = "Cached, paced AI summaries for mail")]
struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve JSON-lines requests from stdin, writing events to stdout.
    Serve,
    /// Summarize one body (file or stdin), consulting the caches first.
    Summarize {
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        provider_id: Option<String>,
        #[arg(long)]
        header_id: Option<String>,
    },
    /// Draft a reply to one body (file or stdin). Never cached.
    Reply {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Summarize messages and threads by provider id through the paced queue.
    Digest {
        #[arg(long = "message")]
        messages: Vec<String>,
        #[arg(long = "thread")]
        threads: Vec<String>,
    },
    /// Count messages received today.
    TodayCount,
    /// Show paths, effective config and cache sizes.
    Status,
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!(
        "{}: {}",
        report.command,
        if report.ok { "ok" } else { "failed" }
    );
    for line in &report.details {
        println!("  {line}");
    }
    for line in &report.issues {
        println!("  issue: {line}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let report = match cli.command {
        Command::Serve => commands::serve::run()?,
        Command::Summarize {
            file,
            provider_id,
            header_id,
        } => commands::summarize::run(&commands::summarize::SummarizeOptions {
            file,
            provider_id,
            header_id,
        })?,
        Command::Reply { file } => commands::reply::run(file)?,
        Command::Digest { messages, threads } => {
            commands::digest::run(&commands::digest::DigestOptions { messages, threads })?
        }
        Command::TodayCount => commands::today_count::run()?,
        Command::Status => commands::status::run()?,
    };

    // stdout belongs to the event stream while serving.
    if report.command == "serve" {
        for line in &report.details {
            log::info!("serve: {line}");
        }
        for line in &report.issues {
            log::error!("serve: {line}");
        }
    } else {
        print_report(&report, cli.json)?;
    }
    if !report.ok {
        std::process::exit(2);
    }
    Ok(())
}
