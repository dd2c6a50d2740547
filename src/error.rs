//! # Queue Error Taxonomy
//!
//! Every failure that crosses the syscall boundary is mapped here into an
//! [`MqError`] variant the caller can act on. Raw platform error codes never
//! leak out of the crate except inside [`MqError::System`], which keeps the
//! original `errno` for diagnostics.
//!
//! "Would block" is deliberately absent: a full queue on `push` and an empty
//! queue on `receive` are ordinary outcomes (`Ok(false)` / `Ok(None)`), not
//! errors.

use nix::errno::Errno;
use std::io;
use thiserror::Error;

/// Result type for message queue operations
pub type MqResult<T> = Result<T, MqError>;

/// Errors that can occur while operating on a POSIX message queue
#[derive(Debug, Error)]
pub enum MqError {
    /// The queue name or creation attributes were rejected
    #[error("invalid queue configuration: {0}")]
    InvalidConfig(String),

    /// The named queue does not exist
    #[error("message queue '{0}' does not exist")]
    NotFound(String),

    /// Exclusive creation was requested but the queue already exists
    #[error("message queue '{0}' already exists")]
    AlreadyExists(String),

    /// Mode or ownership does not permit the requested access
    #[error("permission denied for message queue '{name}': {reason}")]
    PermissionDenied { name: String, reason: String },

    /// `open` was called on a handle that is already open
    #[error("message queue handle is already open on '{0}'")]
    AlreadyOpen(String),

    /// The handle is not open
    #[error("message queue handle is closed")]
    Closed,

    /// The message is longer than the queue's `msgsize`
    #[error("message of {len} bytes exceeds the queue msgsize of {msgsize} bytes")]
    MessageTooLarge { len: usize, msgsize: usize },

    /// The receive buffer is shorter than the queue's `msgsize`
    #[error("receive buffer of {len} bytes is smaller than the queue msgsize of {msgsize} bytes")]
    BufferTooSmall { len: usize, msgsize: usize },

    /// The message priority is outside the range the system supports
    #[error("priority {priority} is out of range (must be below {max})")]
    InvalidPriority { priority: u32, max: u32 },

    /// Catch-all for failures with no dedicated variant
    #[error("{op} failed: {source}")]
    System {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl MqError {
    /// Wrap an unmapped errno, keeping the code
    pub fn system(op: &'static str, errno: Errno) -> Self {
        Self::System {
            op,
            source: io::Error::from(errno),
        }
    }

    /// Wrap an `io::Error` coming from std or tokio
    pub fn io(op: &'static str, source: io::Error) -> Self {
        Self::System { op, source }
    }

    /// The original OS error code, if this error wraps one
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::System { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Map an errno from `mq_open` / `mq_unlink` / `mq_getattr` on `name`.
    ///
    /// Operation-specific codes (`EAGAIN`, `EMSGSIZE`, `EBADF`) are handled
    /// by the callers before falling back to this.
    pub(crate) fn from_errno(op: &'static str, name: &str, errno: Errno) -> Self {
        match errno {
            Errno::ENOENT => Self::NotFound(name.to_string()),
            Errno::EEXIST => Self::AlreadyExists(name.to_string()),
            Errno::EACCES | Errno::EPERM => Self::PermissionDenied {
                name: name.to_string(),
                reason: errno.desc().to_string(),
            },
            Errno::EINVAL | Errno::ENAMETOOLONG => {
                Self::InvalidConfig(format!("{} rejected '{}': {}", op, name, errno.desc()))
            }
            other => Self::system(op, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert!(matches!(
            MqError::from_errno("mq_open", "/q", Errno::ENOENT),
            MqError::NotFound(name) if name == "/q"
        ));
        assert!(matches!(
            MqError::from_errno("mq_open", "/q", Errno::EEXIST),
            MqError::AlreadyExists(_)
        ));
        assert!(matches!(
            MqError::from_errno("mq_open", "/q", Errno::EACCES),
            MqError::PermissionDenied { .. }
        ));
        assert!(matches!(
            MqError::from_errno("mq_open", "/q", Errno::EINVAL),
            MqError::InvalidConfig(_)
        ));
    }

    #[test]
    fn test_unmapped_errno_keeps_code() {
        let error = MqError::from_errno("mq_open", "/q", Errno::EMFILE);
        assert!(matches!(error, MqError::System { op: "mq_open", .. }));
        assert_eq!(error.raw_os_error(), Some(Errno::EMFILE as i32));
        assert_eq!(MqError::Closed.raw_os_error(), None);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(MqError::Closed.to_string(), "message queue handle is closed");
        assert_eq!(
            MqError::MessageTooLarge { len: 9, msgsize: 8 }.to_string(),
            "message of 9 bytes exceeds the queue msgsize of 8 bytes"
        );
        assert_eq!(
            MqError::InvalidPriority { priority: 40000, max: 32768 }.to_string(),
            "priority 40000 is out of range (must be below 32768)"
        );
    }
}
