//! # pmq - POSIX Message Queue Demonstration Tool
//!
//! Drives the library the way an external caller would:
//!
//! - `fill`: create a queue and push random one-byte messages until the
//!   queue reports it is full
//! - `drain`: attach to an existing queue, receive everything from inside a
//!   `messages` event handler, then unlink and close the queue
//! - `info` / `unlink`: inspect or remove a queue by name
//!
//! Log verbosity follows `RUST_LOG`, or `--verbose` for debug output.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam::channel::{bounded, RecvTimeoutError};
use posix_mq::{
    cli::{Args, Command, DrainArgs, FillArgs},
    logging, utils, PosixMq, QueueConfig, QueueEvent,
};
use serde_json::json;
use tracing::{error, info, warn};

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    match args.command {
        Command::Fill(fill_args) => fill(&fill_args),
        Command::Drain(drain_args) => drain(&drain_args),
        Command::Info { name } => print_info(&name),
        Command::Unlink { name } => {
            posix_mq::unlink(&name).with_context(|| format!("Failed to unlink '{}'", name))?;
            info!("Unlinked {}", name);
            Ok(())
        }
    }
}

/// Create the queue and push until it would block
fn fill(args: &FillArgs) -> Result<()> {
    let mq = PosixMq::new();
    mq.open(&args.to_config())
        .with_context(|| format!("Failed to open '{}'", args.name))?;

    let mut rng = rand::thread_rng();
    let mut pushed = 0usize;
    loop {
        let message = [utils::random_printable(&mut rng)];
        if !mq.push_with_priority(message, args.priority)? {
            break;
        }
        pushed += 1;
    }
    info!(
        "Pushed {} messages to {} ({} queued)",
        pushed,
        args.name,
        mq.curmsgs()?
    );

    mq.close()?;
    Ok(())
}

/// Drain the queue from a `messages` handler
fn drain(args: &DrainArgs) -> Result<()> {
    let mq = PosixMq::new();
    mq.open(&args.to_config())
        .with_context(|| format!("Failed to open '{}'", args.name))?;

    let mut buf = vec![0u8; mq.msgsize()?];
    let keep = args.keep;
    let (done_tx, done_rx) = bounded(1);

    mq.on(QueueEvent::Messages, move |mq| {
        loop {
            match mq.receive(&mut buf) {
                Ok(Some(n)) => {
                    info!(
                        "Received message ({} bytes): {}",
                        n,
                        String::from_utf8_lossy(&buf[..n])
                    );
                    match mq.curmsgs() {
                        Ok(left) => info!("Messages left: {}", left),
                        Err(e) => warn!("Failed to query queue: {}", e),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Receive failed: {}", e);
                    break;
                }
            }
        }
        if !keep {
            if let Err(e) = mq.unlink() {
                warn!("Failed to unlink queue: {}", e);
            }
        }
        if let Err(e) = mq.close() {
            warn!("Failed to close queue: {}", e);
        }
        let _ = done_tx.try_send(());
    })?;

    match done_rx.recv_timeout(args.timeout) {
        Ok(()) => Ok(()),
        Err(RecvTimeoutError::Timeout) => {
            info!("No messages arrived on {} within {:?}", args.name, args.timeout);
            mq.close()?;
            Ok(())
        }
        Err(RecvTimeoutError::Disconnected) => {
            anyhow::bail!("Notification handler for {} went away", args.name)
        }
    }
}

fn print_info(name: &str) -> Result<()> {
    let mq = PosixMq::new();
    mq.open(&QueueConfig::new(name).access(posix_mq::Access::ReadOnly))
        .with_context(|| format!("Failed to open '{}'", name))?;
    let attributes = mq.attributes()?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "name": name, "attributes": attributes }))?
    );
    mq.close()?;
    Ok(())
}
