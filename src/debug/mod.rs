//! Debug module - tracing primitives behind a narrow backend trait.
//!
//! Provides:
//! - Process launch/attach/kill
//! - Continue, single-step and wait
//! - Word-level memory peek/poke and bulk reads
//! - Register fetch/store

pub mod types;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(test)]
pub(crate) mod mock;

#[cfg(target_os = "linux")]
pub use linux::PtraceBackend;

use std::path::Path;

use nix::unistd::Pid;

use crate::core::debugger::DebugError;
use types::{RegisterSet, SignalInfo, StopStatus};

/// Platform tracing primitives used by the session.
///
/// Every method is called from the engine thread only; the tracer relationship
/// is bound to whichever thread launched or attached the tracee.
pub trait TraceBackend {
    /// Fork and exec `target` under trace with its stdout sent to `stdout`
    fn launch(&mut self, target: &Path, stdout: &Path) -> Result<Pid, DebugError>;

    /// Attach to an existing process
    fn attach(&mut self, pid: Pid) -> Result<(), DebugError>;

    /// Apply tracer options once the tracee is in its first stop
    fn set_options(&mut self, pid: Pid) -> Result<(), DebugError>;

    /// Block until the tracee changes state
    fn wait(&mut self, pid: Pid) -> Result<StopStatus, DebugError>;

    /// Resume execution
    fn cont(&mut self, pid: Pid) -> Result<(), DebugError>;

    /// Execute exactly one instruction
    fn step(&mut self, pid: Pid) -> Result<(), DebugError>;

    /// Kill the tracee and reap it
    fn kill(&mut self, pid: Pid) -> Result<(), DebugError>;

    /// Read the 8-byte word at `address`
    fn peek(&self, pid: Pid, address: u64) -> Result<u64, DebugError>;

    /// Write the 8-byte word at `address`
    fn poke(&mut self, pid: Pid, address: u64, word: u64) -> Result<(), DebugError>;

    fn get_regs(&self, pid: Pid) -> Result<RegisterSet, DebugError>;

    fn set_regs(&mut self, pid: Pid, regs: &RegisterSet) -> Result<(), DebugError>;

    /// Signal that caused the current stop
    fn signal_info(&self, pid: Pid) -> Result<SignalInfo, DebugError>;

    /// Read `length` bytes starting at `address`
    fn read_memory(&self, pid: Pid, address: u64, length: usize) -> Result<Vec<u8>, DebugError> {
        peek_words(self, pid, address, length)
    }

    /// Display name of a process, if it can be resolved
    fn process_name(&self, pid: Pid) -> Option<String>;
}

/// Read memory one word at a time through [`TraceBackend::peek`]
pub(crate) fn peek_words<B: TraceBackend + ?Sized>(
    backend: &B,
    pid: Pid,
    address: u64,
    length: usize,
) -> Result<Vec<u8>, DebugError> {
    let mut bytes = Vec::with_capacity(length + 8);
    let mut cursor = address;
    while bytes.len() < length {
        let word = backend.peek(pid, cursor)?;
        bytes.extend_from_slice(&word.to_le_bytes());
        cursor = cursor.wrapping_add(8);
    }
    bytes.truncate(length);
    Ok(bytes)
}
