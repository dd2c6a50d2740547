//! # Message Arrival Notifications
//!
//! The kernel reports message arrival on an edge: it signals once when a
//! queue goes from empty to non-empty and then stays quiet until it is asked
//! again. [`NotificationBridge`] turns that into a level-style event. It
//! owns one dedicated thread per handle which:
//!
//! 1. registers a duplicate of the queue descriptor with an edge-triggered
//!    `tokio` reactor ([`AsyncFd`]),
//! 2. on every readiness edge clears the readiness (re-arms) *before*
//!    dispatching, so an arrival during the handler produces a fresh edge,
//! 3. confirms the queue is still open and the condition still holds, then
//!    runs the registered handler to completion before waiting again.
//!
//! Handlers therefore never overlap on one handle, and a `Messages` event
//! means "at least one message is queued", never "exactly one".
//!
//! ## Shutdown
//!
//! Dropping the bridge flips the `shutdown` flag on its control channel and
//! joins the thread, so no handler can run once `close` (or `off` for the
//! last interest) has returned. When the drop happens on the bridge thread
//! itself, i.e. a handler closed its own queue, the thread is detached and
//! exits as soon as the handler returns.

use crate::error::{MqError, MqResult};
use crate::queue::{Inner, PosixMq};
use crossbeam::channel::{bounded, Sender};
use nix::mqueue::MqdT;
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};
use std::str::FromStr;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Events a queue handle can raise
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueEvent {
    /// One or more messages are waiting to be received
    Messages,
    /// The queue has room again after a push on this handle found it full
    Drain,
}

impl QueueEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueEvent::Messages => "messages",
            QueueEvent::Drain => "drain",
        }
    }
}

impl fmt::Display for QueueEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "messages" => Ok(QueueEvent::Messages),
            "drain" => Ok(QueueEvent::Drain),
            other => Err(format!("Unknown queue event: {}", other)),
        }
    }
}

/// Callback invoked on the notification thread
pub type EventHandler = Box<dyn FnMut(&PosixMq) + Send + 'static>;

pub(crate) type SharedHandler = Arc<Mutex<EventHandler>>;

/// One handler slot per event
#[derive(Default)]
pub(crate) struct HandlerSlots {
    messages: Option<SharedHandler>,
    drain: Option<SharedHandler>,
}

impl HandlerSlots {
    fn slot(&mut self, event: QueueEvent) -> &mut Option<SharedHandler> {
        match event {
            QueueEvent::Messages => &mut self.messages,
            QueueEvent::Drain => &mut self.drain,
        }
    }

    /// Returns false, leaving the slot untouched, if it is occupied
    pub(crate) fn insert(&mut self, event: QueueEvent, handler: EventHandler) -> bool {
        let slot = self.slot(event);
        if slot.is_some() {
            return false;
        }
        *slot = Some(Arc::new(Mutex::new(handler)));
        true
    }

    pub(crate) fn remove(&mut self, event: QueueEvent) -> Option<SharedHandler> {
        self.slot(event).take()
    }

    pub(crate) fn get(&mut self, event: QueueEvent) -> Option<SharedHandler> {
        self.slot(event).clone()
    }

    pub(crate) fn clear(&mut self) {
        self.messages = None;
        self.drain = None;
    }
}

/// Whether the wait loop keeps going after a dispatch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

#[derive(Clone, Copy, Debug, Default)]
struct Control {
    messages: bool,
    drain: bool,
    shutdown: bool,
    wakeups: u64,
    /// Bumped every time messages interest is enabled
    messages_epoch: u64,
}

impl Control {
    fn set(&mut self, event: QueueEvent, enabled: bool) {
        match event {
            QueueEvent::Messages => {
                if enabled {
                    self.messages_epoch = self.messages_epoch.wrapping_add(1);
                }
                self.messages = enabled;
            }
            QueueEvent::Drain => self.drain = enabled,
        }
    }
}

/// Background waiter bound to one open queue handle
pub(crate) struct NotificationBridge {
    control: watch::Sender<Control>,
    thread: Option<JoinHandle<()>>,
}

impl NotificationBridge {
    /// Start the notification thread with `event` enabled.
    ///
    /// Returns once the descriptor is registered with the reactor, so an
    /// arrival right after this call is never missed.
    pub(crate) fn arm(
        queue: Weak<Inner>,
        mqd: &MqdT,
        name: &str,
        event: QueueEvent,
    ) -> MqResult<Self> {
        // SAFETY: the descriptor is open for the duration of this call; the
        // clone is an independent descriptor owned by the bridge thread.
        let fd = unsafe { BorrowedFd::borrow_raw(mqd.as_raw_fd()) }
            .try_clone_to_owned()
            .map_err(|e| MqError::io("dup", e))?;

        let mut initial = Control::default();
        initial.set(event, true);
        let (control, control_rx) = watch::channel(initial);
        let (armed_tx, armed_rx) = bounded(1);

        let thread = thread::Builder::new()
            .name(format!("pmq-notify:{}", name))
            .spawn(move || wait_loop(queue, fd, control_rx, armed_tx))
            .map_err(|e| MqError::io("spawn notification thread", e))?;

        match armed_rx.recv() {
            Ok(Ok(())) => {
                debug!("Armed '{}' notifications for message queue '{}'", event, name);
                Ok(Self {
                    control,
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(MqError::io("arm notification", e))
            }
            Err(_) => {
                let _ = thread.join();
                Err(MqError::io(
                    "arm notification",
                    io::Error::new(
                        io::ErrorKind::Other,
                        "notification thread exited before arming",
                    ),
                ))
            }
        }
    }

    pub(crate) fn set_interest(&self, event: QueueEvent, enabled: bool) {
        self.control.send_modify(|control| control.set(event, enabled));
    }

    pub(crate) fn has_interest(&self) -> bool {
        let control = self.control.borrow();
        control.messages || control.drain
    }

    /// Make the wait loop re-check pending conditions
    pub(crate) fn wake(&self) {
        self.control
            .send_modify(|control| control.wakeups = control.wakeups.wrapping_add(1));
    }

    pub(crate) fn is_current_thread(&self) -> bool {
        self.thread
            .as_ref()
            .map_or(false, |thread| thread.thread().id() == thread::current().id())
    }

    /// Stop the thread; joins it unless called from the thread itself
    pub(crate) fn disarm(self) {
        drop(self);
    }
}

impl Drop for NotificationBridge {
    fn drop(&mut self) {
        self.control.send_modify(|control| control.shutdown = true);
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.thread().id() == thread::current().id() {
            debug!("Notification thread disarmed from its own handler; detaching");
            return;
        }
        if thread.join().is_err() {
            warn!("Notification thread panicked");
        }
    }
}

fn wait_loop(
    queue: Weak<Inner>,
    fd: OwnedFd,
    mut control: watch::Receiver<Control>,
    armed: Sender<io::Result<()>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = armed.send(Err(e));
            return;
        }
    };

    runtime.block_on(async move {
        let fd = match AsyncFd::with_interest(fd, Interest::READABLE | Interest::WRITABLE) {
            Ok(fd) => fd,
            Err(e) => {
                let _ = armed.send(Err(e));
                return;
            }
        };
        let _ = armed.send(Ok(()));

        let mut seen_epoch = 0;
        loop {
            let current = *control.borrow_and_update();
            if current.shutdown {
                break;
            }
            // Messages queued before the interest was (re-)enabled raise no
            // new edge.
            if current.messages
                && current.messages_epoch != seen_epoch
                && fire(&queue, QueueEvent::Messages) == Flow::Stop
            {
                break;
            }
            seen_epoch = current.messages_epoch;
            // A full push may have been followed by room appearing before
            // any writable edge was observed.
            if current.drain && fire(&queue, QueueEvent::Drain) == Flow::Stop {
                break;
            }

            tokio::select! {
                changed = control.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                ready = fd.readable(), if current.messages => match ready {
                    Ok(mut guard) => {
                        guard.clear_ready();
                        if fire(&queue, QueueEvent::Messages) == Flow::Stop {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Waiting for messages failed: {}", e);
                        break;
                    }
                },
                ready = fd.writable(), if current.drain => match ready {
                    Ok(mut guard) => {
                        guard.clear_ready();
                        if fire(&queue, QueueEvent::Drain) == Flow::Stop {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Waiting for queue space failed: {}", e);
                        break;
                    }
                },
            }
        }
        debug!("Notification loop exiting");
    });
}

fn fire(queue: &Weak<Inner>, event: QueueEvent) -> Flow {
    match queue.upgrade() {
        Some(inner) => PosixMq::from_inner(inner).dispatch(event),
        None => Flow::Stop,
    }
}
