//! Mailbox - single-outstanding command handoff into the engine thread.
//!
//! Front ends submit one [`Command`] at a time and poll [`Mailbox::peek`]
//! until it reports [`CommandKind::Processed`].

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::command::{Command, CommandKind};

/// Sending half plus the shared slot state
#[derive(Debug)]
pub struct Mailbox {
    tx: Mutex<Sender<Command>>,
    slot: Mutex<CommandKind>,
    done: Condvar,
}

/// Receiving half, owned by the engine thread
#[derive(Debug)]
pub struct Inbox {
    rx: Receiver<Command>,
}

impl Mailbox {
    pub fn new() -> (Self, Inbox) {
        let (tx, rx) = mpsc::channel();
        let mailbox = Self {
            tx: Mutex::new(tx),
            slot: Mutex::new(CommandKind::Processed),
            done: Condvar::new(),
        };
        (mailbox, Inbox { rx })
    }

    /// Hand a command to the engine thread; `false` when nothing receives it
    pub fn submit(&self, command: Command) -> bool {
        let kind = command.kind();
        let mut slot = self.slot();
        *slot = kind;

        let tx = self.tx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if tx.send(command).is_err() {
            // no engine thread on the other end, nothing will ever serve it
            log::warn!("Engine inbox closed, {} command discarded", kind);
            *slot = CommandKind::Processed;
            self.done.notify_all();
            return false;
        }
        true
    }

    /// Disconnect the current inbox; submissions fail until [`reopen`](Self::reopen)
    pub fn close(&self) {
        let (tx, _) = mpsc::channel();
        *self.tx.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = tx;
    }

    /// Mark a command as in flight without going through the channel
    pub fn begin(&self, kind: CommandKind) {
        *self.slot() = kind;
    }

    /// Kind of the outstanding command, or `Processed`
    pub fn peek(&self) -> CommandKind {
        *self.slot()
    }

    /// Mark the outstanding command as fully applied
    pub fn complete(&self) {
        *self.slot() = CommandKind::Processed;
        self.done.notify_all();
    }

    /// Block until the slot reads `Processed` or the timeout expires
    pub fn wait_processed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot();
        while *slot != CommandKind::Processed {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            slot = self
                .done
                .wait_timeout(slot, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        true
    }

    /// Replace the channel, returning the new receiving half
    pub fn reopen(&self) -> Inbox {
        let (tx, rx) = mpsc::channel();
        *self.tx.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = tx;
        Inbox { rx }
    }

    fn slot(&self) -> MutexGuard<'_, CommandKind> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Inbox {
    /// Next pending command, without blocking
    pub fn take(&self) -> Option<Command> {
        match self.rx.try_recv() {
            Ok(command) => Some(command),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}
