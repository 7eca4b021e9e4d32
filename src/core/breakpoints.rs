//! Software breakpoint table.
//!
//! Each entry patches the first byte of an instruction with `int3`. The
//! resident byte is the trap byte while the entry is enabled and the saved
//! original byte while it is disabled.

use nix::unistd::Pid;

use super::debugger::DebugError;
use super::memory::patch_byte;
use super::registers;
use crate::debug::types::{Breakpoint, Register, TRAP_BYTE};
use crate::debug::TraceBackend;

/// Ordered breakpoints plus the index of the one the tracee is stopped on
#[derive(Debug, Default)]
pub struct BreakpointTable {
    entries: Vec<Breakpoint>,
    hit: Option<usize>,
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(64),
            hit: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Breakpoint> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[Breakpoint] {
        &self.entries
    }

    /// Breakpoint the tracee is currently stopped on
    pub fn hit(&self) -> Option<usize> {
        self.hit
    }

    pub fn clear_hit(&mut self) {
        self.hit = None;
    }

    /// Patch a trap at `address` and append it; returns the new index
    pub fn add<B: TraceBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        pid: Pid,
        address: u64,
    ) -> Result<usize, DebugError> {
        if let Some(existing) = self.entries.iter().position(|bp| bp.address == address) {
            return Err(DebugError::Protocol(format!(
                "Breakpoint {} already set at {:#x}",
                existing + 1,
                address
            )));
        }

        let saved_byte = patch_byte(backend, pid, address, TRAP_BYTE)?;
        self.entries.push(Breakpoint {
            address,
            saved_byte,
            enabled: true,
        });
        log::debug!("Breakpoint at {:#x} saved byte {:#04x}", address, saved_byte);
        Ok(self.entries.len() - 1)
    }

    /// Restore the original byte and remove the entry
    pub fn delete<B: TraceBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        pid: Pid,
        index: usize,
    ) -> Result<Breakpoint, DebugError> {
        let bp = self.checked(index)?;
        if bp.enabled {
            let (address, saved) = (bp.address, bp.saved_byte);
            patch_byte(backend, pid, address, saved)?;
        }
        self.forget(index)
    }

    /// Remove an entry without touching tracee memory.
    ///
    /// Used while no tracee is live; the next launch re-applies what is left.
    pub fn forget(&mut self, index: usize) -> Result<Breakpoint, DebugError> {
        self.checked(index)?;
        self.hit = match self.hit {
            Some(hit) if hit == index => None,
            Some(hit) if hit > index => Some(hit - 1),
            other => other,
        };
        Ok(self.entries.remove(index))
    }

    /// Flip the enabled flag without touching tracee memory
    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> Result<bool, DebugError> {
        self.checked(index)?;
        let entry = &mut self.entries[index];
        let changed = entry.enabled != enabled;
        entry.enabled = enabled;
        Ok(changed)
    }

    /// Returns whether the resident byte changed
    pub fn enable<B: TraceBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        pid: Pid,
        index: usize,
    ) -> Result<bool, DebugError> {
        let bp = self.checked(index)?;
        if bp.enabled {
            return Ok(false);
        }
        let address = bp.address;
        patch_byte(backend, pid, address, TRAP_BYTE)?;
        self.entries[index].enabled = true;
        Ok(true)
    }

    /// Returns whether the resident byte changed
    pub fn disable<B: TraceBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        pid: Pid,
        index: usize,
    ) -> Result<bool, DebugError> {
        let bp = self.checked(index)?;
        if !bp.enabled {
            return Ok(false);
        }
        let (address, saved) = (bp.address, bp.saved_byte);
        patch_byte(backend, pid, address, saved)?;
        self.entries[index].enabled = false;
        Ok(true)
    }

    /// Human readable listing, count line first
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.entries.len() + 1);
        lines.push(format!("Number of breakpoints: {}", self.entries.len()));
        for (i, bp) in self.entries.iter().enumerate() {
            lines.push(format!(
                "  Breakpoint {:>4}: {:#x}{}",
                i + 1,
                bp.address,
                if bp.enabled { "" } else { " (disabled)" }
            ));
        }
        lines
    }

    /// Detect a stop one byte past an enabled breakpoint and rewind rip onto it.
    ///
    /// Leaves the hit marker untouched when nothing matches.
    pub fn check_hit<B: TraceBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        pid: Pid,
    ) -> Result<Option<usize>, DebugError> {
        let rip = registers::read_one(backend, pid, Register::Rip)?.wrapping_sub(1);

        let Some(index) = self
            .entries
            .iter()
            .position(|bp| bp.enabled && bp.address == rip)
        else {
            return Ok(None);
        };

        registers::write_one(backend, pid, Register::Rip, rip)?;
        self.hit = Some(index);
        Ok(Some(index))
    }

    /// Put the original byte of the hit breakpoint back and forget the hit.
    ///
    /// Returns the index so the trap can be reinstated after one step.
    pub fn lift_hit<B: TraceBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        pid: Pid,
    ) -> Result<Option<usize>, DebugError> {
        let Some(index) = self.hit.take() else {
            return Ok(None);
        };
        let bp = self.checked(index)?;
        let (address, saved) = (bp.address, bp.saved_byte);
        patch_byte(backend, pid, address, saved)?;
        Ok(Some(index))
    }

    /// Re-patch the trap byte of an entry lifted by [`lift_hit`](Self::lift_hit)
    pub fn reinstate<B: TraceBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        pid: Pid,
        index: usize,
    ) -> Result<(), DebugError> {
        let bp = self.checked(index)?;
        if bp.enabled {
            patch_byte(backend, pid, bp.address, TRAP_BYTE)?;
        }
        Ok(())
    }

    /// Re-create every entry against a fresh process image.
    ///
    /// Entries that cannot be patched are dropped and reported back.
    pub fn reapply<B: TraceBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        pid: Pid,
    ) -> Vec<DebugError> {
        let previous = std::mem::take(&mut self.entries);
        self.hit = None;

        let mut failures = Vec::new();
        for bp in previous {
            let result = self.add(backend, pid, bp.address).and_then(|index| {
                if bp.enabled {
                    Ok(())
                } else {
                    self.disable(backend, pid, index).map(|_| ())
                }
            });
            if let Err(e) = result {
                failures.push(e);
            }
        }
        failures
    }

    fn checked(&self, index: usize) -> Result<&Breakpoint, DebugError> {
        self.entries
            .get(index)
            .ok_or_else(|| DebugError::Protocol(format!("Invalid breakpoint number {}", index + 1)))
    }
}
