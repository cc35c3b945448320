use ajo_adapters::JsonLinesEventSink;
use ajo_core::EventSink;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

mod scenario;

use scenario::Scenario;

#[derive(Debug, Parser)]
#[command(name = "ajo", version, about = "Rotating savings circle scenario runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay a scenario against an in-memory bank and print the final state.
    Simulate {
        /// TOML scenario file.
        scenario: PathBuf,
        /// Abort on the first failing step.
        #[arg(long, default_value_t = false, env = "AJO_STRICT")]
        strict: bool,
        /// Append committed events to this file as JSON lines.
        #[arg(long, env = "AJO_EVENTS")]
        events: Option<PathBuf>,
    },
    /// Validate a scenario without running it.
    Check {
        /// TOML scenario file.
        scenario: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "ajo=info,ajo_core=info,info".to_string()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Simulate {
            scenario,
            strict,
            events,
        } => {
            let loaded = Scenario::load(&scenario)?;
            loaded.check()?;

            let sink = match &events {
                Some(path) => {
                    let sink = JsonLinesEventSink::append_to(path)
                        .with_context(|| format!("failed to open event file {}", path.display()))?;
                    info!(path = %path.display(), "mirroring events");
                    Some(Arc::new(sink) as Arc<dyn EventSink>)
                }
                None => None,
            };

            let report = loaded.run(strict, sink)?;
            info!(
                applied = report.steps_applied,
                failed = report.steps_failed,
                events = report.events,
                "scenario finished"
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Check { scenario } => {
            let summary = Scenario::load(&scenario)?.check()?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
