//! Register access built on the fetch-all/store-all primitive.

use nix::unistd::Pid;

use super::debugger::DebugError;
use crate::debug::types::{Register, RegisterSet};
use crate::debug::TraceBackend;

pub fn read_all<B: TraceBackend + ?Sized>(backend: &B, pid: Pid) -> Result<RegisterSet, DebugError> {
    backend.get_regs(pid)
}

pub fn read_one<B: TraceBackend + ?Sized>(
    backend: &B,
    pid: Pid,
    register: Register,
) -> Result<u64, DebugError> {
    Ok(backend.get_regs(pid)?.get(register))
}

/// There is no single-register store, so this is read-all, mutate, write-all
pub fn write_one<B: TraceBackend + ?Sized>(
    backend: &mut B,
    pid: Pid,
    register: Register,
    value: u64,
) -> Result<(), DebugError> {
    let mut regs = backend.get_regs(pid)?;
    regs.set(register, value);
    backend.set_regs(pid, &regs)
}

pub fn write_all<B: TraceBackend + ?Sized>(
    backend: &mut B,
    pid: Pid,
    regs: &RegisterSet,
) -> Result<(), DebugError> {
    backend.set_regs(pid, regs)
}
