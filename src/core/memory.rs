//! Memory - tracee memory operations
//!
//! Word peek/poke goes through the backend; the only write this crate ever
//! performs is the single-byte patch used by software breakpoints.

use nix::unistd::Pid;

use super::debugger::DebugError;
use crate::debug::types::Breakpoint;
use crate::debug::TraceBackend;

/// Replace the low byte of the word at `address`, keeping the other seven.
///
/// Returns the byte that was resident before the patch.
pub fn patch_byte<B: TraceBackend + ?Sized>(
    backend: &mut B,
    pid: Pid,
    address: u64,
    byte: u8,
) -> Result<u8, DebugError> {
    let word = backend.peek(pid, address)?;
    let previous = (word & 0xff) as u8;
    backend.poke(pid, address, (word & !0xff) | byte as u64)?;
    Ok(previous)
}

/// Read the byte currently resident at `address`
pub fn read_byte<B: TraceBackend + ?Sized>(
    backend: &B,
    pid: Pid,
    address: u64,
) -> Result<u8, DebugError> {
    Ok((backend.peek(pid, address)? & 0xff) as u8)
}

/// Read a memory region with enabled breakpoints shown as their original bytes
pub fn read_region<B: TraceBackend + ?Sized>(
    backend: &B,
    pid: Pid,
    address: u64,
    length: usize,
    breakpoints: &[Breakpoint],
) -> Result<Vec<u8>, DebugError> {
    let mut bytes = backend.read_memory(pid, address, length)?;
    let end = address.saturating_add(bytes.len() as u64);

    for bp in breakpoints.iter().filter(|bp| bp.enabled) {
        if bp.address >= address && bp.address < end {
            bytes[(bp.address - address) as usize] = bp.saved_byte;
        }
    }
    Ok(bytes)
}
