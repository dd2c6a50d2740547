//! # POSIX Message Queue Handle
//!
//! [`PosixMq`] wraps one message queue descriptor and walks the
//! `Closed -> Open -> Closed` lifecycle. All queue operations are
//! non-blocking at the syscall boundary: a full queue on `push` and an empty
//! queue on `receive` come back as would-block outcomes instead of
//! suspending the caller.
//!
//! ## Sharing
//!
//! `PosixMq` is a cheap `Clone`; clones share one descriptor, one lifecycle
//! and one notification bridge. The descriptor is closed by an explicit
//! [`close`](PosixMq::close) or when the last clone is dropped.
//!
//! ## Example
//!
//! ```rust,no_run
//! use posix_mq::{PosixMq, QueueConfig};
//!
//! # fn main() -> posix_mq::MqResult<()> {
//! let mq = PosixMq::new();
//! mq.open(&QueueConfig::new("/jobs").create(true).maxmsgs(10).msgsize(64))?;
//!
//! assert!(mq.push(b"hello")?);
//!
//! let mut buf = vec![0u8; mq.msgsize()?];
//! while let Some(n) = mq.receive(&mut buf)? {
//!     println!("{}", String::from_utf8_lossy(&buf[..n]));
//! }
//!
//! mq.unlink()?;
//! mq.close()?;
//! # Ok(())
//! # }
//! ```

use crate::config::{QueueConfig, SystemLimits};
use crate::defaults;
use crate::error::{MqError, MqResult};
use crate::notify::{EventHandler, Flow, HandlerSlots, NotificationBridge, QueueEvent};
use nix::errno::Errno;
use nix::mqueue::{
    mq_attr_member_t, mq_close, mq_getattr, mq_open, mq_receive, mq_send, mq_unlink, MQ_OFlag,
    MqAttr, MqdT,
};
use nix::sys::stat::Mode;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Live snapshot of a queue's kernel attributes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct QueueAttributes {
    pub msgsize: usize,
    pub maxmsgs: usize,
    pub curmsgs: usize,
    pub nonblocking: bool,
}

impl From<&MqAttr> for QueueAttributes {
    fn from(attr: &MqAttr) -> Self {
        Self {
            msgsize: attr.msgsize() as usize,
            maxmsgs: attr.maxmsg() as usize,
            curmsgs: attr.curmsgs() as usize,
            nonblocking: attr.flags() & MQ_OFlag::O_NONBLOCK.bits() as mq_attr_member_t != 0,
        }
    }
}

/// Descriptor and attributes; present only while open
pub(crate) struct OpenQueue {
    pub(crate) name: String,
    pub(crate) mqd: MqdT,
    pub(crate) msgsize: usize,
    pub(crate) maxmsgs: usize,
}

#[derive(Default)]
pub(crate) struct State {
    pub(crate) open: Option<OpenQueue>,
    pub(crate) bridge: Option<NotificationBridge>,
}

pub(crate) struct Inner {
    pub(crate) state: Mutex<State>,
    pub(crate) handlers: Mutex<HandlerSlots>,
    /// Set when a push hit a full queue; cleared when the drain event fires
    pub(crate) drain_pending: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        // Disarm before the descriptor goes away.
        drop(state.bridge.take());
        if let Some(open) = state.open.take() {
            debug!("Dropping open message queue handle '{}'", open.name);
            if let Err(e) = mq_close(open.mqd) {
                warn!("Failed to close message queue '{}': {}", open.name, e);
            }
        }
    }
}

/// Handle on one POSIX message queue
#[derive(Clone)]
pub struct PosixMq {
    pub(crate) inner: Arc<Inner>,
}

impl Default for PosixMq {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PosixMq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        match &state.open {
            Some(open) => f
                .debug_struct("PosixMq")
                .field("name", &open.name)
                .field("msgsize", &open.msgsize)
                .field("maxmsgs", &open.maxmsgs)
                .field("armed", &state.bridge.is_some())
                .finish(),
            None => f.debug_struct("PosixMq").field("open", &false).finish(),
        }
    }
}

impl PosixMq {
    /// Create a closed handle
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                handlers: Mutex::new(HandlerSlots::default()),
                drain_pending: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    /// Open (and optionally create) the queue described by `config`.
    ///
    /// `msgsize` and `maxmsgs` are read back from the kernel afterwards, so
    /// attaching to a pre-existing queue adopts its real attributes rather
    /// than the requested ones.
    pub fn open(&self, config: &QueueConfig) -> MqResult<()> {
        let mut state = self.inner.state.lock();
        if let Some(open) = &state.open {
            return Err(MqError::AlreadyOpen(open.name.clone()));
        }

        let limits = SystemLimits::detect();
        config.validate_with(&limits)?;

        let name = config.name.as_str();
        let mut flags = config.access.flags() | MQ_OFlag::O_NONBLOCK | MQ_OFlag::O_CLOEXEC;
        let mut attr = None;
        if config.creates() {
            flags |= MQ_OFlag::O_CREAT;
            if config.exclusive {
                flags |= MQ_OFlag::O_EXCL;
            }
            attr = config
                .creation_attributes(&limits)
                .map(|(maxmsgs, msgsize)| {
                    MqAttr::new(0, maxmsgs as mq_attr_member_t, msgsize as mq_attr_member_t, 0)
                });
        }
        let mode = Mode::from_bits_truncate(config.mode as _);

        let mqd = mq_open(name, flags, mode, attr.as_ref())
            .map_err(|e| MqError::from_errno("mq_open", name, e))?;

        let attr = match mq_getattr(&mqd) {
            Ok(attr) => attr,
            Err(e) => {
                if let Err(close_err) = mq_close(mqd) {
                    warn!("Failed to close message queue '{}': {}", name, close_err);
                }
                return Err(MqError::from_errno("mq_getattr", name, e));
            }
        };

        let open = OpenQueue {
            name: name.to_string(),
            mqd,
            msgsize: attr.msgsize() as usize,
            maxmsgs: attr.maxmsg() as usize,
        };
        debug!(
            "Opened message queue '{}' (msgsize {}, maxmsgs {}, curmsgs {})",
            open.name,
            open.msgsize,
            open.maxmsgs,
            attr.curmsgs()
        );
        state.open = Some(open);
        self.inner.drain_pending.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Release the descriptor.
    ///
    /// Any notification bridge is disarmed before the descriptor is closed,
    /// so no handler runs after this returns. A second call fails with
    /// [`MqError::Closed`].
    pub fn close(&self) -> MqResult<()> {
        let (open, bridge) = {
            let mut state = self.inner.state.lock();
            let open = state.open.take().ok_or(MqError::Closed)?;
            (open, state.bridge.take())
        };

        // Joins the bridge thread unless called from one of its handlers.
        if let Some(bridge) = bridge {
            bridge.disarm();
        }
        self.inner.handlers.lock().clear();

        debug!("Closing message queue '{}'", open.name);
        mq_close(open.mqd).map_err(|e| MqError::system("mq_close", e))
    }

    /// Remove the queue's name from the kernel namespace.
    ///
    /// The handle stays usable: the queue's storage lives on until every
    /// descriptor on it, in every process, is closed.
    pub fn unlink(&self) -> MqResult<()> {
        let name = self.with_open(|open| Ok(open.name.clone()))?;
        unlink(&name)
    }

    /// Enqueue `data` at priority 0.
    ///
    /// Returns `Ok(false)` when the queue is full.
    pub fn push(&self, data: impl AsRef<[u8]>) -> MqResult<bool> {
        self.push_with_priority(data, 0)
    }

    /// Enqueue `data` at `priority`; higher priorities are dequeued first.
    ///
    /// Returns `Ok(false)` when the queue is full.
    pub fn push_with_priority(&self, data: impl AsRef<[u8]>, priority: u32) -> MqResult<bool> {
        let data = data.as_ref();
        let state = self.inner.state.lock();
        let open = state.open.as_ref().ok_or(MqError::Closed)?;

        let max = priority_limit();
        if priority >= max {
            return Err(MqError::InvalidPriority { priority, max });
        }
        if data.len() > open.msgsize {
            return Err(MqError::MessageTooLarge {
                len: data.len(),
                msgsize: open.msgsize,
            });
        }

        loop {
            match mq_send(&open.mqd, data, priority) {
                Ok(()) => return Ok(true),
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => {
                    self.inner.drain_pending.store(true, Ordering::SeqCst);
                    if let Some(bridge) = &state.bridge {
                        bridge.wake();
                    }
                    return Ok(false);
                }
                Err(Errno::EMSGSIZE) => {
                    return Err(MqError::MessageTooLarge {
                        len: data.len(),
                        msgsize: open.msgsize,
                    })
                }
                Err(Errno::EBADF) => {
                    return Err(MqError::PermissionDenied {
                        name: open.name.clone(),
                        reason: "descriptor is not open for writing".to_string(),
                    })
                }
                Err(e) => return Err(MqError::from_errno("mq_send", &open.name, e)),
            }
        }
    }

    /// Dequeue the oldest message of the highest priority into `buf`.
    ///
    /// Returns the number of bytes written, or `Ok(None)` when the queue is
    /// empty. `buf` must hold at least `msgsize` bytes.
    pub fn receive(&self, buf: &mut [u8]) -> MqResult<Option<usize>> {
        Ok(self.receive_with_priority(buf)?.map(|(len, _)| len))
    }

    /// Like [`receive`](Self::receive), also returning the message priority
    pub fn receive_with_priority(&self, buf: &mut [u8]) -> MqResult<Option<(usize, u32)>> {
        self.with_open(|open| {
            if buf.len() < open.msgsize {
                return Err(MqError::BufferTooSmall {
                    len: buf.len(),
                    msgsize: open.msgsize,
                });
            }
            let mut priority = 0u32;
            loop {
                match mq_receive(&open.mqd, buf, &mut priority) {
                    Ok(len) => return Ok(Some((len, priority))),
                    Err(Errno::EINTR) => continue,
                    Err(Errno::EAGAIN) => return Ok(None),
                    Err(Errno::EMSGSIZE) => {
                        return Err(MqError::BufferTooSmall {
                            len: buf.len(),
                            msgsize: open.msgsize,
                        })
                    }
                    Err(Errno::EBADF) => {
                        return Err(MqError::PermissionDenied {
                            name: open.name.clone(),
                            reason: "descriptor is not open for reading".to_string(),
                        })
                    }
                    Err(e) => return Err(MqError::from_errno("mq_receive", &open.name, e)),
                }
            }
        })
    }

    /// Name the handle was opened with
    pub fn name(&self) -> MqResult<String> {
        self.with_open(|open| Ok(open.name.clone()))
    }

    /// Maximum bytes per message, fixed when the queue was created
    pub fn msgsize(&self) -> MqResult<usize> {
        self.with_open(|open| Ok(open.msgsize))
    }

    /// Queue capacity, fixed when the queue was created
    pub fn maxmsgs(&self) -> MqResult<usize> {
        self.with_open(|open| Ok(open.maxmsgs))
    }

    /// Messages currently queued, queried live from the kernel
    pub fn curmsgs(&self) -> MqResult<usize> {
        Ok(self.attributes()?.curmsgs)
    }

    /// Whether the queue is at capacity, queried live from the kernel
    pub fn is_full(&self) -> MqResult<bool> {
        let attributes = self.attributes()?;
        Ok(attributes.curmsgs >= attributes.maxmsgs)
    }

    /// Live attribute snapshot
    pub fn attributes(&self) -> MqResult<QueueAttributes> {
        self.with_open(|open| {
            mq_getattr(&open.mqd)
                .map(|attr| QueueAttributes::from(&attr))
                .map_err(|e| MqError::from_errno("mq_getattr", &open.name, e))
        })
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.lock().open.is_some()
    }

    /// Register `handler` for `event`.
    ///
    /// The handler runs on the handle's notification thread and receives the
    /// handle itself, so it can drain with [`receive`](Self::receive) until
    /// `Ok(None)`. A `Messages` event means "at least one message", never
    /// "exactly one".
    ///
    /// Returns `Ok(false)` without replacing anything if a handler is
    /// already registered for `event`.
    pub fn on<F>(&self, event: QueueEvent, handler: F) -> MqResult<bool>
    where
        F: FnMut(&PosixMq) + Send + 'static,
    {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let open = state.open.as_ref().ok_or(MqError::Closed)?;

        if !self.inner.handlers.lock().insert(event, Box::new(handler)) {
            debug!("Handler for '{}' already registered on '{}'", event, open.name);
            return Ok(false);
        }

        if let Some(bridge) = &state.bridge {
            bridge.set_interest(event, true);
            return Ok(true);
        }
        let weak = Arc::downgrade(&self.inner);
        match NotificationBridge::arm(weak, &open.mqd, &open.name, event) {
            Ok(bridge) => state.bridge = Some(bridge),
            Err(e) => {
                self.inner.handlers.lock().remove(event);
                return Err(e);
            }
        }
        Ok(true)
    }

    /// Unregister the handler for `event`.
    ///
    /// When no interest remains the notification thread is stopped before
    /// this returns. Returns `Ok(false)` if nothing was registered.
    pub fn off(&self, event: QueueEvent) -> MqResult<bool> {
        let (removed, retired, on_bridge_thread) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.open.is_none() {
                return Err(MqError::Closed);
            }
            let Some(removed) = self.inner.handlers.lock().remove(event) else {
                return Ok(false);
            };
            let on_bridge_thread = state
                .bridge
                .as_ref()
                .map_or(false, NotificationBridge::is_current_thread);
            let mut retired = None;
            if let Some(bridge) = &state.bridge {
                bridge.set_interest(event, false);
                if !bridge.has_interest() {
                    retired = state.bridge.take();
                }
            }
            (removed, retired, on_bridge_thread)
        };

        if let Some(bridge) = retired {
            bridge.disarm();
        }
        if !on_bridge_thread {
            // Wait out an invocation already in flight on the bridge thread.
            drop(removed.lock());
        }
        Ok(true)
    }

    /// Run the handler for one notification; called on the bridge thread.
    pub(crate) fn dispatch(&self, event: QueueEvent) -> Flow {
        if event == QueueEvent::Drain && !self.inner.drain_pending.load(Ordering::SeqCst) {
            return Flow::Continue;
        }
        let ready = {
            let state = self.inner.state.lock();
            let Some(open) = state.open.as_ref() else {
                debug!("Suppressing '{}' event: queue handle was closed", event);
                return Flow::Stop;
            };
            match mq_getattr(&open.mqd) {
                Ok(attr) => match event {
                    QueueEvent::Messages => attr.curmsgs() > 0,
                    QueueEvent::Drain => attr.curmsgs() < attr.maxmsg(),
                },
                Err(e) => {
                    warn!("Failed to query message queue '{}': {}", open.name, e);
                    return Flow::Stop;
                }
            }
        };
        if !ready {
            return Flow::Continue;
        }
        if event == QueueEvent::Drain && !self.inner.drain_pending.swap(false, Ordering::SeqCst) {
            return Flow::Continue;
        }

        let Some(handler) = self.inner.handlers.lock().get(event) else {
            return Flow::Continue;
        };
        let mut guard = handler.lock();
        // `off` may have removed this handler while we waited for its lock.
        let current = self.inner.handlers.lock().get(event);
        if !current.map_or(false, |current| Arc::ptr_eq(&current, &handler)) {
            debug!("Skipping '{}' event: handler was unregistered", event);
            return Flow::Continue;
        }
        let callback: &mut EventHandler = &mut guard;
        callback(self);
        Flow::Continue
    }

    fn with_open<T>(&self, f: impl FnOnce(&OpenQueue) -> MqResult<T>) -> MqResult<T> {
        let state = self.inner.state.lock();
        let open = state.open.as_ref().ok_or(MqError::Closed)?;
        f(open)
    }
}

/// Remove `name` from the kernel namespace without holding a handle on it
pub fn unlink(name: &str) -> MqResult<()> {
    crate::config::validate_name(name)?;
    mq_unlink(name).map_err(|e| MqError::from_errno("mq_unlink", name, e))?;
    debug!("Unlinked message queue '{}'", name);
    Ok(())
}

/// Exclusive upper bound on message priorities
pub fn priority_limit() -> u32 {
    // SAFETY: sysconf has no preconditions.
    let limit = unsafe { libc::sysconf(libc::_SC_MQ_PRIO_MAX) };
    if limit > 0 {
        u32::try_from(limit).unwrap_or(u32::MAX)
    } else {
        defaults::MQ_PRIO_MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_handle_is_closed() {
        let mq = PosixMq::new();
        assert!(!mq.is_open());
        assert!(matches!(mq.push(b"x"), Err(MqError::Closed)));
        assert!(matches!(mq.receive(&mut [0u8; 16]), Err(MqError::Closed)));
        assert!(matches!(mq.close(), Err(MqError::Closed)));
        assert!(matches!(mq.unlink(), Err(MqError::Closed)));
        assert!(matches!(mq.msgsize(), Err(MqError::Closed)));
        assert!(matches!(mq.maxmsgs(), Err(MqError::Closed)));
        assert!(matches!(mq.curmsgs(), Err(MqError::Closed)));
        assert!(matches!(mq.on(QueueEvent::Messages, |_| {}), Err(MqError::Closed)));
        assert!(matches!(mq.off(QueueEvent::Messages), Err(MqError::Closed)));
    }

    #[test]
    fn test_open_rejects_malformed_name() {
        let mq = PosixMq::new();
        assert!(matches!(
            mq.open(&QueueConfig::new("no-slash")),
            Err(MqError::InvalidConfig(_))
        ));
        assert!(!mq.is_open());
    }

    #[test]
    fn test_closed_handle_wins_over_bad_priority() {
        let mq = PosixMq::new();
        let max = priority_limit();
        assert!(max >= 32);
        assert!(matches!(mq.push_with_priority(b"x", max), Err(MqError::Closed)));
        assert!(matches!(
            mq.push_with_priority(b"x", u32::MAX),
            Err(MqError::Closed)
        ));
    }

    #[test]
    fn test_standalone_unlink_validates_name() {
        assert!(matches!(unlink("relative"), Err(MqError::InvalidConfig(_))));
    }
}
