//! Command line entry point for gatewatch.

use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::{Parser, Subcommand};
use gatewatch::{commands, settings::Settings, AppState};
use serde::Serialize;

/// Licence plate monitoring for workshop arrivals
#[derive(Parser, Debug)]
#[command(name = "gatewatch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON settings file
    #[arg(short, long, global = true, default_value = "gatewatch.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Monitor a stream until Ctrl-C
    Monitor {
        /// Camera index, RTSP/HTTP URL, video file or image directory
        #[arg(short, long)]
        stream: Option<String>,

        /// Where to write blurred frames (URL, file or directory ending in '/')
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Look up a plate in the registry
    Lookup { plate: String },
    /// Record a manually entered plate as a detection
    Detect { plate: String },
    /// Detection statistics
    Stats {
        #[arg(short, long, default_value = "7")]
        days: u32,
    },
    /// List saved plate crops
    Evidence,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn monitor(
    state: &AppState,
    stream: Option<String>,
    output: Option<String>,
) -> anyhow::Result<()> {
    let started = commands::start_monitoring(state, stream, output).await?;
    println!("{}", started.message);

    let mut arrivals = state.notifier.subscribe();
    let mut check = tokio::time::interval(Duration::from_secs(1));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!("Stopping...");
                break;
            }
            arrival = arrivals.recv() => {
                if let Ok(event) = arrival {
                    println!("{}", event.message());
                }
            }
            _ = check.tick() => {
                let status = commands::monitoring_status(state).await;
                if !status.is_task_running {
                    if let Some(error) = status.session.and_then(|s| s.last_error) {
                        eprintln!("Monitoring ended: {error}");
                    }
                    break;
                }
            }
        }
    }

    let stopped = commands::stop_monitoring(state).await;
    println!("{}", stopped.message);
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let settings = Settings::load(Some(&args.config))?;
    let state = AppState::initialize(settings)?;

    match args.command {
        Command::Monitor { stream, output } => monitor(&state, stream, output).await,
        Command::Lookup { plate } => print_json(&commands::lookup_plate(&state, &plate).await?),
        Command::Detect { plate } => {
            let response = commands::submit_manual_detection(&state, &plate).await?;
            println!("{}", response.message);
            print_json(&response)
        }
        Command::Stats { days } => {
            print_json(&commands::detection_statistics(&state, days).await?)
        }
        Command::Evidence => print_json(&commands::list_evidence(&state)?),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    gatewatch::init_logging();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("gatewatch: {e:#}");
            ExitCode::FAILURE
        }
    }
}
