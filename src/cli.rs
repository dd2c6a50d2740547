use crate::config::{parse_mode, QueueConfig};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::time::Duration;

/// pmq - Fill, drain and inspect POSIX message queues
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,

    /// Verbose output
    #[clap(short = 'v', long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a queue and push random one-byte messages until it is full
    Fill(FillArgs),

    /// Print every queued message as it arrives, then unlink the queue
    Drain(DrainArgs),

    /// Print a queue's attributes as JSON
    Info {
        /// Queue name, e.g. /pmqtest
        #[clap(short = 'n', long, default_value = DEFAULT_QUEUE_NAME)]
        name: String,
    },

    /// Remove a queue name
    Unlink {
        /// Queue name, e.g. /pmqtest
        #[clap(short = 'n', long, default_value = DEFAULT_QUEUE_NAME)]
        name: String,
    },
}

/// Queue the demo scripts share
pub const DEFAULT_QUEUE_NAME: &str = "/pmqtest";

#[derive(ClapArgs, Debug)]
pub struct FillArgs {
    /// Queue name, e.g. /pmqtest
    #[clap(short = 'n', long, default_value = DEFAULT_QUEUE_NAME)]
    pub name: String,

    /// Permission bits in octal
    #[clap(short = 'm', long, default_value = "0777", value_parser = parse_mode)]
    pub mode: u32,

    /// Queue capacity (kernel default if unset)
    #[clap(long)]
    pub maxmsgs: Option<usize>,

    /// Maximum bytes per message (kernel default if unset)
    #[clap(long)]
    pub msgsize: Option<usize>,

    /// Message priority
    #[clap(short = 'p', long, default_value_t = 0)]
    pub priority: u32,
}

impl FillArgs {
    pub fn to_config(&self) -> QueueConfig {
        let mut config = QueueConfig::new(&self.name).create(true).mode(self.mode);
        config.maxmsgs = self.maxmsgs;
        config.msgsize = self.msgsize;
        config
    }
}

#[derive(ClapArgs, Debug)]
pub struct DrainArgs {
    /// Queue name, e.g. /pmqtest
    #[clap(short = 'n', long, default_value = DEFAULT_QUEUE_NAME)]
    pub name: String,

    /// Leave the queue in place after draining
    #[clap(long, default_value_t = false)]
    pub keep: bool,

    /// How long to wait for a message (e.g. "500ms", "10s")
    #[clap(short = 't', long, default_value = "5s", value_parser = parse_duration)]
    pub timeout: Duration,
}

impl DrainArgs {
    pub fn to_config(&self) -> QueueConfig {
        QueueConfig::new(&self.name)
    }
}

/// Parse duration from string (e.g., "10s", "5m", "500ms")
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else {
        (s, "s") // Default to seconds
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;

    Ok(match unit {
        "ms" => Duration::from_millis(num),
        "m" => Duration::from_secs(
            num.checked_mul(60)
                .ok_or_else(|| format!("Duration too large: {}", s))?,
        ),
        _ => Duration::from_secs(num),
    })
}
