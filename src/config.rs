//! # Queue Configuration
//!
//! [`QueueConfig`] carries every option recognised when opening a queue and
//! knows how to check itself against the naming rules and the system limits
//! published under `/proc/sys/fs/mqueue`.
//!
//! ```rust
//! use posix_mq::QueueConfig;
//!
//! let config = QueueConfig::new("/jobs").create(true).maxmsgs(10).msgsize(8);
//! assert!(config.validate().is_ok());
//! ```

use crate::defaults;
use crate::error::{MqError, MqResult};
use nix::mqueue::MQ_OFlag;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::Path;

/// Direction(s) a handle may be used in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    ReadOnly,
    WriteOnly,
    #[default]
    ReadWrite,
}

impl Access {
    pub(crate) fn flags(self) -> MQ_OFlag {
        match self {
            Access::ReadOnly => MQ_OFlag::O_RDONLY,
            Access::WriteOnly => MQ_OFlag::O_WRONLY,
            Access::ReadWrite => MQ_OFlag::O_RDWR,
        }
    }
}

/// Options for [`PosixMq::open`](crate::PosixMq::open)
///
/// `mode`, `maxmsgs` and `msgsize` only matter when the call actually creates
/// the queue; an existing queue keeps the attributes it was created with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Kernel namespace identifier, e.g. `/jobs`
    pub name: String,

    /// Create the queue if it does not exist
    #[serde(default)]
    pub create: bool,

    /// Fail if the queue already exists (implies `create`)
    #[serde(default)]
    pub exclusive: bool,

    /// Permission bits for a newly created queue, masked by the umask
    #[serde(default = "default_mode", deserialize_with = "deserialize_mode")]
    pub mode: u32,

    /// Capacity of a newly created queue
    #[serde(default)]
    pub maxmsgs: Option<usize>,

    /// Per-message byte bound of a newly created queue
    #[serde(default)]
    pub msgsize: Option<usize>,

    #[serde(default)]
    pub access: Access,
}

fn default_mode() -> u32 {
    defaults::MODE
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ModeRepr {
    Bits(u32),
    Octal(String),
}

fn deserialize_mode<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    match ModeRepr::deserialize(deserializer)? {
        ModeRepr::Bits(bits) if bits <= 0o7777 => Ok(bits),
        ModeRepr::Bits(bits) => Err(serde::de::Error::custom(format!(
            "mode {:o} has bits outside 0o7777",
            bits
        ))),
        ModeRepr::Octal(text) => parse_mode(&text).map_err(serde::de::Error::custom),
    }
}

/// Parse permission bits written in octal ("0777", "0o644", "600")
pub fn parse_mode(text: &str) -> Result<u32, String> {
    let text = text.trim();
    let digits = text.strip_prefix("0o").unwrap_or(text);
    if digits.is_empty() {
        return Err("Mode cannot be empty".to_string());
    }
    let mode = u32::from_str_radix(digits, 8)
        .map_err(|_| format!("Invalid octal mode: {}", text))?;
    if mode > 0o7777 {
        return Err(format!("Mode {} has bits outside 0o7777", text));
    }
    Ok(mode)
}

impl QueueConfig {
    /// Configuration that attaches to an existing queue read-write
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            create: false,
            exclusive: false,
            mode: defaults::MODE,
            maxmsgs: None,
            msgsize: None,
            access: Access::ReadWrite,
        }
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn maxmsgs(mut self, maxmsgs: usize) -> Self {
        self.maxmsgs = Some(maxmsgs);
        self
    }

    pub fn msgsize(mut self, msgsize: usize) -> Self {
        self.msgsize = Some(msgsize);
        self
    }

    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    /// Whether opening may create the queue
    pub fn creates(&self) -> bool {
        self.create || self.exclusive
    }

    /// Validate against the limits of the running system
    pub fn validate(&self) -> MqResult<()> {
        self.validate_with(&SystemLimits::detect())
    }

    /// Validate against explicit limits
    pub fn validate_with(&self, limits: &SystemLimits) -> MqResult<()> {
        validate_name(&self.name)?;
        if self.mode > 0o7777 {
            return Err(MqError::InvalidConfig(format!(
                "mode {:o} has bits outside 0o7777",
                self.mode
            )));
        }
        if !self.creates() {
            return Ok(());
        }
        check_attribute("maxmsgs", self.maxmsgs, limits.msg_max)?;
        check_attribute("msgsize", self.msgsize, limits.msgsize_max)?;
        Ok(())
    }

    /// Creation attributes as `(maxmsgs, msgsize)`, or `None` to let the
    /// kernel apply its own defaults.
    pub(crate) fn creation_attributes(&self, limits: &SystemLimits) -> Option<(usize, usize)> {
        match (self.maxmsgs, self.msgsize) {
            (None, None) => None,
            (maxmsgs, msgsize) => Some((
                maxmsgs
                    .or(limits.msg_default)
                    .unwrap_or(defaults::FALLBACK_MAXMSGS),
                msgsize
                    .or(limits.msgsize_default)
                    .unwrap_or(defaults::FALLBACK_MSGSIZE),
            )),
        }
    }
}

fn check_attribute(field: &str, value: Option<usize>, limit: Option<usize>) -> MqResult<()> {
    match (value, limit) {
        (Some(0), _) => Err(MqError::InvalidConfig(format!("{} cannot be zero", field))),
        (Some(value), Some(limit)) if value > limit => Err(MqError::InvalidConfig(format!(
            "{} {} exceeds the system limit of {}",
            field, value, limit
        ))),
        _ => Ok(()),
    }
}

/// Check a queue name against the POSIX naming convention.
///
/// A name is a single path component with a leading `/`.
pub fn validate_name(name: &str) -> MqResult<()> {
    let Some(rest) = name.strip_prefix('/') else {
        return Err(MqError::InvalidConfig(format!(
            "queue name '{}' must begin with '/'",
            name
        )));
    };
    if rest.is_empty() {
        return Err(MqError::InvalidConfig("queue name cannot be just '/'".to_string()));
    }
    if rest.contains('/') {
        return Err(MqError::InvalidConfig(format!(
            "queue name '{}' cannot contain '/' after the first character",
            name
        )));
    }
    if rest.contains('\0') {
        return Err(MqError::InvalidConfig(format!(
            "queue name '{}' contains a NUL byte",
            name.escape_debug()
        )));
    }
    if rest.len() > defaults::NAME_MAX {
        return Err(MqError::InvalidConfig(format!(
            "queue name is {} bytes long (maximum {})",
            rest.len(),
            defaults::NAME_MAX
        )));
    }
    Ok(())
}

/// Message queue limits published by the kernel
///
/// Any value that cannot be read is `None` and is not enforced locally; the
/// kernel still rejects out-of-range attributes with `EINVAL`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SystemLimits {
    pub msg_max: Option<usize>,
    pub msgsize_max: Option<usize>,
    pub msg_default: Option<usize>,
    pub msgsize_default: Option<usize>,
}

impl SystemLimits {
    /// Read the limits from `/proc/sys/fs/mqueue`
    pub fn detect() -> Self {
        Self::from_dir(Path::new(defaults::PROC_MQUEUE_DIR))
    }

    fn from_dir(dir: &Path) -> Self {
        let read = |file: &str| {
            fs::read_to_string(dir.join(file))
                .ok()
                .and_then(|text| text.trim().parse::<usize>().ok())
        };
        Self {
            msg_max: read("msg_max"),
            msgsize_max: read("msgsize_max"),
            msg_default: read("msg_default"),
            msgsize_default: read("msgsize_default"),
        }
    }
}
