//! Interactive front-end for the apply pipeline.
//!
//! Reads console commands from stdin, one per line. PUT/DELETE (and anything
//! unrecognised) go into the queue; GET, STATUS and SYNC are answered locally.
//! The pipeline stops on `EXIT`, end of input, or Ctrl-C.
//!
//! ```bash
//! printf 'PUT key1 value1\nPUT key2 value2\nDELETE key1\nSYNC\nGET key2\n' \
//!   | cargo run --bin rsm -- --events json
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use replicated_state_machine::cli::{Cli, EventFormat};
use replicated_state_machine::protocol::ConsoleCommand;
use replicated_state_machine::{ApplyEvent, Change, Pipeline, spawn_pipeline};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let (pipeline, events) =
        spawn_pipeline(cli.pipeline_config()).context("failed to start pipeline")?;
    let printer = tokio::task::spawn_blocking({
        let format = cli.events;
        move || print_events(events, format)
    });

    println!("ready. Type HELP (or h) for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(err) = result {
                    warn!(error = ?err, "failed to listen for ctrl-c");
                }
                info!("interrupted, shutting down");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    info!("end of input, shutting down");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                if !handle_line(&pipeline, &line)? {
                    break;
                }
            }
        }
    }

    let report = tokio::task::spawn_blocking(move || pipeline.shutdown())
        .await
        .context("shutdown task failed")??;
    printer.await.context("event printer failed")??;

    println!("stopped at apply index {}", report.applied_index);
    if !report.abandoned.is_empty() {
        println!("{} command(s) left unapplied:", report.abandoned.len());
        for line in &report.abandoned {
            println!("  {line}");
        }
    }
    Ok(())
}

/// Runs one console line. Returns `false` when the user asked to exit.
fn handle_line(pipeline: &Pipeline, line: &str) -> Result<bool> {
    let command = match ConsoleCommand::parse(line) {
        Ok(command) => command,
        Err(err) => {
            println!("error: {err}");
            return Ok(true);
        }
    };

    match command {
        ConsoleCommand::Submit(line) => {
            // Blocks only when a bounded queue is full under the Block policy.
            let submitted = tokio::task::block_in_place(|| pipeline.submit(line));
            if let Err(err) = submitted {
                println!("error: {err}");
            }
        }
        ConsoleCommand::Get { key } => match pipeline.get(&key) {
            Some(value) => println!("{key} = {value}"),
            None => println!("{key} not found"),
        },
        ConsoleCommand::Status => print_status(pipeline),
        ConsoleCommand::Sync => {
            let index = tokio::task::block_in_place(|| pipeline.sync())
                .context("sync failed")?;
            println!("synced at apply index {index}");
        }
        ConsoleCommand::Help => println!("{}", ConsoleCommand::HELP),
        ConsoleCommand::Exit => return Ok(false),
    }
    Ok(true)
}

fn print_status(pipeline: &Pipeline) {
    let reader = pipeline.reader();
    let proposer = pipeline.proposer();
    let snapshot = reader.snapshot();

    println!(
        "apply index {} | {} key(s) | {} queued | {} dropped",
        reader.applied_index(),
        snapshot.len(),
        proposer.pending(),
        proposer.dropped()
    );
    for (key, value) in snapshot {
        println!("  {key} = {value}");
    }
}

/// Prints apply events until the worker exits and closes the stream.
fn print_events(events: Receiver<ApplyEvent>, format: EventFormat) -> Result<()> {
    for event in events {
        match format {
            EventFormat::Off => {}
            EventFormat::Json => {
                println!("{}", serde_json::to_string(&event).context("encode event")?);
            }
            EventFormat::Text => match &event.change {
                Change::Put { value } => {
                    println!("[{}] PUT {} = {}", event.index, event.key, value);
                }
                Change::Delete { existed: true } => {
                    println!("[{}] DELETE {}", event.index, event.key);
                }
                Change::Delete { existed: false } => {
                    println!("[{}] DELETE {} (absent)", event.index, event.key);
                }
            },
        }
    }
    Ok(())
}
