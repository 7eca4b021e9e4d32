//! Debugger - engine facade and error type
//!
//! [`DebugEngine`] is the thread-safe surface front ends talk to. It owns the
//! background engine thread, which in turn owns the [`Session`] and is the
//! only thread that ever issues trace requests.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::errno::Errno;
use thiserror::Error;

use super::command::{Command, CommandKind};
use super::config::EngineConfig;
use super::events::{EventRecord, EventStream};
use super::mailbox::{Inbox, Mailbox};
use super::session::Session;
use crate::debug::{PtraceBackend, TraceBackend};

/// Debugger-specific errors
#[derive(Error, Debug)]
pub enum DebugError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is not a valid target: {reason}", .path.display())]
    Format { path: PathBuf, reason: String },

    #[error("ptrace error {} ({}) at {call}", .errno.desc(), errno_number(.errno))]
    Trace { call: &'static str, errno: Errno },

    #[error("Failed to fork target process: {0}")]
    Fork(Errno),

    #[error("{0}")]
    Protocol(String),

    #[error("Event buffer full, {size} byte record dropped")]
    Capacity { size: usize },

    #[error("No target is running")]
    NotRunning,
}

fn errno_number(errno: &Errno) -> i32 {
    *errno as i32
}

/// How long a synchronous attach waits between liveness checks
const ATTACH_POLL: Duration = Duration::from_millis(100);

/// Engine thread handle, or the session parked while no thread runs
struct Worker<B: TraceBackend> {
    thread: Option<JoinHandle<Session<B>>>,
    idle: Option<Session<B>>,
}

/// Thread-safe debugger engine
pub struct DebugEngine<B: TraceBackend + Send + 'static = PtraceBackend> {
    config: EngineConfig,
    events: Arc<EventStream>,
    mailbox: Arc<Mailbox>,
    running: Arc<AtomicBool>,
    worker: Mutex<Worker<B>>,
}

impl DebugEngine<PtraceBackend> {
    /// Create an engine tracing real processes
    pub fn new(config: EngineConfig) -> Self {
        Self::with_backend(config, PtraceBackend::new())
    }
}

impl<B: TraceBackend + Send + 'static> DebugEngine<B> {
    /// Create an engine over an arbitrary trace backend
    pub fn with_backend(config: EngineConfig, backend: B) -> Self {
        let events = Arc::new(EventStream::new(config.event_capacity));
        let session = Session::new(backend, Arc::clone(&events), &config);
        // the first inbox is replaced by `reopen` when the loop starts
        let (mailbox, _inbox) = Mailbox::new();

        Self {
            config,
            events,
            mailbox: Arc::new(mailbox),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(Worker {
                thread: None,
                idle: Some(session),
            }),
        }
    }

    /// Set the target and start debugging it on a new engine thread.
    ///
    /// Returns `false` when the engine loop is already running.
    pub fn run(&self, path: impl Into<PathBuf>) -> bool {
        let mut worker = self.worker();
        if self.is_running() {
            log::warn!("Engine loop already running, ignoring run request");
            return false;
        }
        self.spawn(
            &mut worker,
            vec![Command::SetTarget(path.into()), Command::Start],
        )
    }

    /// Attach to an existing process, returning once the attach has been applied
    pub fn attach(&self, pid: i32) {
        self.dispatch(Command::Attach { pid });
        while !self.mailbox.wait_processed(ATTACH_POLL) {
            if !self.is_running() {
                break;
            }
        }
    }

    /// Submit a command; poll [`get_command`](Self::get_command) for completion
    pub fn set_command(&self, command: Command) {
        match command {
            Command::Quit => self.quit(),
            Command::Attach { pid } => self.attach(pid),
            other => self.dispatch(other),
        }
    }

    /// Kind of the outstanding command, `Processed` once it has been applied
    pub fn get_command(&self) -> CommandKind {
        self.mailbox.peek()
    }

    /// Block until the outstanding command is processed or `timeout` expires
    pub fn wait_processed(&self, timeout: Duration) -> bool {
        self.mailbox.wait_processed(timeout)
    }

    /// Next queued event record, oldest first
    pub fn pop_data(&self) -> Option<EventRecord> {
        self.events.pop()
    }

    /// Records rejected because the event buffer was full
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the engine loop; a live tracee is killed on the way out
    pub fn quit(&self) {
        let mut worker = self.worker();
        self.mailbox.begin(CommandKind::Quit);
        self.running.store(false, Ordering::Release);
        self.reclaim(&mut worker);
        self.mailbox.complete();
    }

    fn dispatch(&self, command: Command) {
        {
            let mut worker = self.worker();
            if !self.is_running() && !self.spawn(&mut worker, Vec::new()) {
                self.mailbox.complete();
                return;
            }
        }
        let kind = command.kind();
        if !self.mailbox.submit(command) {
            self.events
                .error(format!("Engine loop stopped, {} command discarded", kind));
        }
    }

    fn spawn(&self, worker: &mut Worker<B>, initial: Vec<Command>) -> bool {
        self.reclaim(worker);
        let Some(mut session) = worker.idle.take() else {
            log::error!("Engine session lost, cannot start the engine loop");
            self.events
                .error("Engine session lost after a crash, restart the debugger");
            return false;
        };
        if session.is_fatal() {
            worker.idle = Some(session);
            log::error!("Refusing to restart the engine loop after a fork failure");
            self.events
                .error("Engine stopped after a fork failure, restart the debugger");
            return false;
        }

        let inbox = self.mailbox.reopen();
        let mailbox = Arc::clone(&self.mailbox);
        let running = Arc::clone(&self.running);
        let interval = self.config.poll_interval;

        if let Some(first) = initial.first() {
            self.mailbox.begin(first.kind());
        }
        self.running.store(true, Ordering::Release);

        let handle = thread::spawn(move || {
            log::debug!("Engine thread started");
            if !initial.is_empty() {
                for command in initial {
                    session.service(command);
                }
                mailbox.complete();
            }
            engine_loop(&mut session, &inbox, &mailbox, &running, interval);
            session.shutdown();

            // nothing can be queued after `close`; report what already was
            mailbox.close();
            while let Some(command) = inbox.take() {
                session.discard(command);
            }
            mailbox.complete();
            running.store(false, Ordering::Release);
            log::debug!("Engine thread finished");
            session
        });
        worker.thread = Some(handle);
        true
    }

    /// Join a finished or stopping engine thread and park its session
    fn reclaim(&self, worker: &mut Worker<B>) {
        if let Some(handle) = worker.thread.take() {
            match handle.join() {
                Ok(session) => worker.idle = Some(session),
                Err(_) => log::error!("Engine thread panicked"),
            }
        }
    }

    fn worker(&self) -> MutexGuard<'_, Worker<B>> {
        self.worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<B: TraceBackend + Send + 'static> Drop for DebugEngine<B> {
    fn drop(&mut self) {
        self.quit();
    }
}

fn engine_loop<B: TraceBackend>(
    session: &mut Session<B>,
    inbox: &Inbox,
    mailbox: &Mailbox,
    running: &AtomicBool,
    interval: Duration,
) {
    while running.load(Ordering::Acquire) && !session.is_fatal() {
        if let Some(command) = inbox.take() {
            session.service(command);
            mailbox.complete();
        }
        session.drain_output();
        thread::sleep(interval);
    }

    if session.is_fatal() {
        log::error!("Engine loop stopped after a fatal error");
    }
}
