//! # POSIX Message Queue Library
//!
//! Named, kernel-managed message queues exposed through a single handle type
//! with non-blocking operations and level-style arrival notifications.
//!
//! ## Architecture Overview
//!
//! The library is organized into several key modules:
//!
//! - `queue`: The [`PosixMq`] handle (open, push, receive, close, unlink)
//! - `notify`: The notification bridge that turns the kernel's one-shot
//!   arrival signal into repeatable [`QueueEvent`]s
//! - `config`: [`QueueConfig`] options, name rules and system limits
//! - `error`: The [`MqError`] taxonomy every syscall failure is mapped into
//! - `cli`, `logging`, `utils`: Support for the `pmq` demonstration binary
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use posix_mq::{PosixMq, QueueConfig, QueueEvent};
//!
//! fn main() -> anyhow::Result<()> {
//!     let producer = PosixMq::new();
//!     producer.open(&QueueConfig::new("/jobs").create(true).maxmsgs(10).msgsize(64))?;
//!
//!     let consumer = PosixMq::new();
//!     consumer.open(&QueueConfig::new("/jobs"))?;
//!     let mut buf = vec![0u8; consumer.msgsize()?];
//!     consumer.on(QueueEvent::Messages, move |mq| {
//!         // Drain until the queue reports it would block.
//!         while let Ok(Some(n)) = mq.receive(&mut buf) {
//!             println!("received {} bytes", n);
//!         }
//!     })?;
//!
//!     producer.push("hello")?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform
//!
//! Linux only: the notification bridge relies on a queue descriptor being a
//! pollable file descriptor.

/// Queue options and validation
///
/// Provides [`QueueConfig`] with builder-style setters and serde support,
/// octal mode parsing and the limits read from `/proc/sys/fs/mqueue`.
pub mod config;

/// Error taxonomy
///
/// Maps `errno` values from the mqueue syscalls into caller-actionable
/// variants. Would-block outcomes are not errors.
pub mod error;

/// Message arrival notifications
///
/// Contains the per-handle notification thread and the [`QueueEvent`]
/// enumeration handlers are registered for.
pub mod notify;

/// The queue handle
pub mod queue;

/// Command-line interface of the `pmq` demonstration binary
pub mod cli;

/// Log output formatting for the `pmq` demonstration binary
pub mod logging;

/// Unique queue names and random payloads for the demo binary and tests
pub mod utils;

pub use config::{Access, QueueConfig, SystemLimits};
pub use error::{MqError, MqResult};
pub use notify::{EventHandler, QueueEvent};
pub use queue::{priority_limit, unlink, PosixMq, QueueAttributes};

/// The current version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Permission bits for newly created queues (owner read/write)
    pub const MODE: u32 = 0o600;

    /// Capacity used when only `msgsize` is given and the kernel default
    /// cannot be read
    pub const FALLBACK_MAXMSGS: usize = 10;

    /// Message size used when only `maxmsgs` is given and the kernel default
    /// cannot be read
    pub const FALLBACK_MSGSIZE: usize = 8192;

    /// Linux `MQ_PRIO_MAX`, used when `sysconf` does not report one
    pub const MQ_PRIO_MAX: u32 = 32768;

    /// Longest queue name, excluding the leading '/'
    pub const NAME_MAX: usize = 255;

    /// Where the kernel publishes mqueue limits and defaults
    pub const PROC_MQUEUE_DIR: &str = "/proc/sys/fs/mqueue";
}
