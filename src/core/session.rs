//! Session - process lifecycle controller and command dispatch.
//!
//! A session lives on the engine thread and is the only owner of the tracee,
//! the breakpoint table and the output capture. Failures never propagate out
//! of [`Session::service`]; they are reported on the event stream instead.

use std::path::PathBuf;
use std::sync::Arc;

use nix::sys::signal::Signal;
use nix::unistd::Pid;

use super::breakpoints::BreakpointTable;
use super::command::Command;
use super::config::{EngineConfig, ExitPolicy};
use super::debugger::DebugError;
use super::events::{Event, EventStream};
use super::image::{self, ValidatedImage};
use super::memory;
use super::output::OutputCapture;
use super::registers;
use crate::debug::types::{Register, RegisterSet, StopStatus, TargetState};
use crate::debug::TraceBackend;

/// Largest memory snapshot a single command may request
pub const MAX_MEMORY_READ: usize = 1 << 20;

pub struct Session<B: TraceBackend> {
    backend: B,
    events: Arc<EventStream>,
    exit_policy: ExitPolicy,
    target: Option<ValidatedImage>,
    pid: Option<Pid>,
    target_running: bool,
    state: TargetState,
    wait_status: Option<StopStatus>,
    breakpoints: BreakpointTable,
    output: OutputCapture,
    fatal: bool,
}

impl<B: TraceBackend> Session<B> {
    pub fn new(backend: B, events: Arc<EventStream>, config: &EngineConfig) -> Self {
        Self {
            backend,
            events,
            exit_policy: config.exit_policy,
            target: None,
            pid: None,
            target_running: false,
            state: TargetState::NotStarted,
            wait_status: None,
            breakpoints: BreakpointTable::new(),
            output: OutputCapture::new(&config.capture_dir),
            fatal: false,
        }
    }

    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    pub fn target_running(&self) -> bool {
        self.target_running
    }

    pub fn state(&self) -> TargetState {
        self.state
    }

    pub fn wait_status(&self) -> Option<StopStatus> {
        self.wait_status
    }

    pub fn target(&self) -> Option<&ValidatedImage> {
        self.target.as_ref()
    }

    pub fn breakpoints(&self) -> &BreakpointTable {
        &self.breakpoints
    }

    /// A fork failure leaves the engine unable to continue
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    #[cfg(test)]
    pub(crate) fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Apply one command to completion
    pub fn service(&mut self, command: Command) {
        log::debug!("Servicing {:?}", command);

        if command.needs_tracee() && !self.target_running {
            self.events.warning(DebugError::NotRunning.to_string());
            return;
        }

        match command {
            Command::Continue => self.cont(),
            Command::StepSingle => self.step_single(),
            Command::ListBreakpoints => self.list_breakpoints(),
            Command::AddBreakpoint { address } => self.add_breakpoint(address),
            Command::DeleteBreakpoint { index } => self.delete_breakpoint(index),
            Command::EnableBreakpoint { index } => self.enable_breakpoint(index),
            Command::DisableBreakpoint { index } => self.disable_breakpoint(index),
            Command::ReadRegister { register } => self.read_register(register),
            Command::ReadRegisters => self.read_registers(),
            Command::WriteRegister { register, value } => self.write_register(register, value),
            Command::WriteRegisters(regs) => self.write_registers(regs),
            Command::ReadMemory { address, length } => self.read_memory(address, length),
            Command::GetTarget => self.get_target(),
            Command::SetTarget(path) => {
                self.verify_target(path);
            }
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::Attach { pid } => self.attach(Pid::from_raw(pid)),
            Command::Quit | Command::Unknown => {}
        }
    }

    /// Forward buffered target stdout to the event stream
    pub fn drain_output(&mut self) {
        match self.output.drain() {
            Ok(lines) => {
                for line in lines {
                    self.events.emit(Event::TargetOutput(line));
                }
            }
            Err(e) => log::debug!("Reading target output failed: {}", e),
        }
    }

    /// Report a command the engine loop will never service
    pub fn discard(&self, command: Command) {
        log::warn!("Discarding {:?}, engine loop stopped", command);
        self.events.error(format!(
            "Engine loop stopped, {} command discarded",
            command.kind()
        ));
    }

    /// Kill a live tracee; called on the engine thread before it exits
    pub fn shutdown(&mut self) {
        if let Some(pid) = self.pid.take() {
            if self.target_running {
                log::info!("Killing tracee {} on shutdown", pid);
                if let Err(e) = self.backend.kill(pid) {
                    log::debug!("Kill on shutdown failed: {}", e);
                }
            }
        }
        self.target_running = false;
        self.state = TargetState::Killed;
        self.breakpoints.clear_hit();
    }

    // ---- target ----------------------------------------------------------

    /// Validate and adopt a new target; an invalid one clears the target
    pub fn verify_target(&mut self, path: PathBuf) -> bool {
        match image::validate(&path) {
            Ok(validated) => {
                self.events.info(format!("Target set to {}", path.display()));
                self.target = Some(validated);
                true
            }
            Err(e) => {
                self.report(e);
                self.target = None;
                false
            }
        }
    }

    fn get_target(&self) {
        match &self.target {
            Some(target) => self.events.info(format!("Target: {}", target.path.display())),
            None => self.events.info("No Target is defined"),
        }
    }

    // ---- lifecycle -------------------------------------------------------

    fn start(&mut self) {
        if self.target_running {
            self.events.warning("Target is already running");
            return;
        }
        let Some(path) = self.target.as_ref().map(|t| t.path.clone()) else {
            self.events.warning("No Target is defined");
            return;
        };

        if let Err(e) = self.output.reset() {
            self.events.error(format!(
                "Failed to prepare output capture {}: {}",
                self.output.path().display(),
                e
            ));
            return;
        }

        let pid = match self.backend.launch(&path, self.output.path()) {
            Ok(pid) => pid,
            Err(e @ DebugError::Fork(_)) => {
                log::error!("{}", e);
                self.report(e);
                self.fatal = true;
                return;
            }
            Err(e) => {
                self.report(e);
                return;
            }
        };

        if self.adopt(pid) {
            log::info!("Debugging {} as pid {}", path.display(), pid);
            self.events
                .info(format!("Debugging started: {} (pid {})", path.display(), pid));
            self.events.emit(Event::ProcessId(pid.as_raw()));
        }
    }

    fn attach(&mut self, pid: Pid) {
        if self.target_running {
            self.events.warning("Target is already running");
            return;
        }
        if self.target.is_none() {
            self.events.warning("No Target is defined");
            return;
        }

        if let Err(e) = self.backend.attach(pid) {
            self.report(e);
            return;
        }
        if let Err(e) = self.output.reset() {
            log::debug!("Output capture reset failed: {}", e);
        }

        if self.adopt(pid) {
            let name = self
                .backend
                .process_name(pid)
                .unwrap_or_else(|| format!("<PID {}>", pid));
            log::info!("Attached to {} ({})", pid, name);
            self.events
                .info(format!("Attached to process {} ({})", pid, name));
            self.events.emit(Event::ProcessId(pid.as_raw()));
        }
    }

    /// Wait for the first stop of a new tracee and re-apply breakpoints
    fn adopt(&mut self, pid: Pid) -> bool {
        let status = match self.backend.wait(pid) {
            Ok(status) => status,
            Err(e) => {
                self.report(e);
                return false;
            }
        };
        self.wait_status = Some(status);

        if status.is_terminal() {
            self.events.error(format!(
                "Process {} ended before it could be traced ({:?})",
                pid, status
            ));
            self.state = TargetState::Exited;
            return false;
        }

        self.pid = Some(pid);
        self.target_running = true;
        self.state = TargetState::Stopped;

        if let Err(e) = self.backend.set_options(pid) {
            self.report(e);
        }
        for e in self.breakpoints.reapply(&mut self.backend, pid) {
            self.report(e);
        }
        true
    }

    fn stop(&mut self) {
        let Some(pid) = self.pid else {
            return;
        };
        match self.backend.kill(pid) {
            Ok(()) => {
                self.flush_output();
                self.pid = None;
                self.wait_status = None;
                self.target_running = false;
                self.state = TargetState::Killed;
                self.breakpoints.clear_hit();
                self.events.info(format!("Target stopped (pid {})", pid));
            }
            Err(e) => self.report(e),
        }
    }

    fn cont(&mut self) {
        if self.breakpoints.hit().is_some() {
            let before = self.pid;
            self.step_over_breakpoint();
            // the step may have ended the process or landed on another trap
            if self.pid != before || !self.target_running || self.breakpoints.hit().is_some() {
                return;
            }
        }

        let Some(pid) = self.pid else {
            return;
        };
        self.state = TargetState::Running;
        if let Err(e) = self.backend.cont(pid) {
            self.report(e);
            return;
        }
        self.wait();
    }

    fn step_single(&mut self) {
        if self.breakpoints.hit().is_some() {
            self.step_over_breakpoint();
            return;
        }

        let Some(pid) = self.pid else {
            return;
        };
        self.state = TargetState::Running;
        if let Err(e) = self.backend.step(pid) {
            self.report(e);
            return;
        }
        self.wait();
    }

    /// Execute the original instruction under a hit breakpoint, then re-arm it
    fn step_over_breakpoint(&mut self) {
        let Some(pid) = self.pid else {
            return;
        };
        let index = match self.breakpoints.lift_hit(&mut self.backend, pid) {
            Ok(Some(index)) => index,
            Ok(None) => return,
            Err(e) => {
                self.report(e);
                return;
            }
        };

        self.step_single();

        // a restarted tracee already had its traps re-applied
        if self.pid == Some(pid) && self.target_running {
            if let Err(e) = self.breakpoints.reinstate(&mut self.backend, pid, index) {
                log::debug!("Re-arming breakpoint {} failed: {}", index + 1, e);
            }
        }
    }

    fn wait(&mut self) {
        let Some(pid) = self.pid else {
            return;
        };
        let status = match self.backend.wait(pid) {
            Ok(status) => status,
            Err(e) => {
                self.report(e);
                return;
            }
        };
        self.wait_status = Some(status);

        match status {
            StopStatus::Exited(code) => self.on_exit(Event::Info(format!(
                "Target execution exited cleanly (status {})",
                code
            ))),
            StopStatus::Signaled(signal) => self.on_exit(Event::Warning(format!(
                "Target terminated by signal {}",
                signal
            ))),
            StopStatus::Stopped(signal) => self.on_stop(pid, signal),
            StopStatus::Other => {}
        }
    }

    fn on_stop(&mut self, pid: Pid, signal: Signal) {
        self.state = TargetState::Stopped;

        let single_step = match self.backend.signal_info(pid) {
            Ok(info) => {
                log::debug!(
                    "got signal {} code {} from {}",
                    info.signo,
                    info.code,
                    pid
                );
                info.is_single_step()
            }
            Err(e) => {
                log::debug!("Signal info unavailable: {}", e);
                false
            }
        };

        if signal != Signal::SIGTRAP {
            self.events
                .warning(format!("Target stopped by signal {}", signal));
            return;
        }
        if single_step {
            return;
        }

        match self.breakpoints.check_hit(&mut self.backend, pid) {
            Ok(Some(index)) => {
                let address = self.breakpoints.get(index).map(|bp| bp.address).unwrap_or_default();
                self.events
                    .info(format!("Breakpoint {} hit at {:#x}", index + 1, address));
            }
            Ok(None) => {}
            Err(e) => self.report(e),
        }
    }

    fn on_exit(&mut self, notice: Event) {
        self.target_running = false;
        self.pid = None;
        self.state = TargetState::Exited;
        self.breakpoints.clear_hit();

        self.flush_output();
        self.events.emit(notice);

        if let Err(e) = self.output.reset() {
            log::debug!("Output capture reset failed: {}", e);
        }

        match self.exit_policy {
            ExitPolicy::Restart => {
                self.events.info("Restarting target");
                self.start();
            }
            ExitPolicy::Stop => log::info!("Target exited, waiting for the next start"),
        }
    }

    fn flush_output(&mut self) {
        match self.output.flush() {
            Ok(lines) => {
                for line in lines {
                    self.events.emit(Event::TargetOutput(line));
                }
            }
            Err(e) => log::debug!("Reading target output failed: {}", e),
        }
    }

    // ---- breakpoints -----------------------------------------------------

    fn list_breakpoints(&self) {
        for line in self.breakpoints.describe() {
            self.events.info(line);
        }
    }

    fn add_breakpoint(&mut self, address: u64) {
        let Some(pid) = self.pid else {
            return;
        };
        match self.breakpoints.add(&mut self.backend, pid, address) {
            Ok(index) => self
                .events
                .info(format!("Breakpoint {} set at {:#x}", index + 1, address)),
            Err(e) => self.report(e),
        }
    }

    // without a tracee only the table changes; `reapply` patches the next one

    fn delete_breakpoint(&mut self, index: usize) {
        let result = match self.pid {
            Some(pid) => self.breakpoints.delete(&mut self.backend, pid, index),
            None => self.breakpoints.forget(index),
        };
        match result {
            Ok(bp) => self.events.info(format!(
                "Breakpoint {} at {:#x} deleted",
                index + 1,
                bp.address
            )),
            Err(e) => self.report(e),
        }
    }

    fn enable_breakpoint(&mut self, index: usize) {
        let result = match self.pid {
            Some(pid) => self.breakpoints.enable(&mut self.backend, pid, index),
            None => self.breakpoints.set_enabled(index, true),
        };
        match result {
            Ok(_) => self.events.info(format!("Breakpoint {} enabled", index + 1)),
            Err(e) => self.report(e),
        }
    }

    fn disable_breakpoint(&mut self, index: usize) {
        let result = match self.pid {
            Some(pid) => self.breakpoints.disable(&mut self.backend, pid, index),
            None => self.breakpoints.set_enabled(index, false),
        };
        match result {
            Ok(_) => self.events.info(format!("Breakpoint {} disabled", index + 1)),
            Err(e) => self.report(e),
        }
    }

    // ---- registers & memory ----------------------------------------------

    fn read_register(&self, register: Register) {
        let Some(pid) = self.pid else {
            return;
        };
        match registers::read_one(&self.backend, pid, register) {
            Ok(value) => self
                .events
                .info(format!("Register {} contents: {:#x}", register, value)),
            Err(e) => self.report(e),
        }
    }

    fn read_registers(&self) {
        let Some(pid) = self.pid else {
            return;
        };
        match registers::read_all(&self.backend, pid) {
            Ok(regs) => self.events.emit(Event::Registers(regs)),
            Err(e) => self.report(e),
        }
    }

    fn write_register(&mut self, register: Register, value: u64) {
        let Some(pid) = self.pid else {
            return;
        };
        // a new instruction pointer invalidates the trap we were stopped on
        if register == Register::Rip {
            self.breakpoints.clear_hit();
        }
        match registers::write_one(&mut self.backend, pid, register, value) {
            Ok(()) => self
                .events
                .info(format!("Wrote Register {} contents: {:#x}", register, value)),
            Err(e) => self.report(e),
        }
    }

    fn write_registers(&mut self, regs: RegisterSet) {
        let Some(pid) = self.pid else {
            return;
        };
        self.breakpoints.clear_hit();
        match registers::write_all(&mut self.backend, pid, &regs) {
            Ok(()) => self.events.info("Wrote all registers"),
            Err(e) => self.report(e),
        }
    }

    fn read_memory(&self, address: u64, length: usize) {
        let Some(pid) = self.pid else {
            return;
        };
        if length == 0 || length > MAX_MEMORY_READ {
            self.report(DebugError::Protocol(format!(
                "Invalid memory read length {} (1..={})",
                length, MAX_MEMORY_READ
            )));
            return;
        }
        match memory::read_region(&self.backend, pid, address, length, self.breakpoints.entries()) {
            Ok(bytes) => self.events.emit(Event::Memory { address, bytes }),
            Err(e) => self.report(e),
        }
    }

    fn report(&self, err: DebugError) {
        log::debug!("{}", err);
        self.events.error(err.to_string());
    }
}
