//! Commands accepted by the debug engine.

use std::fmt;
use std::path::PathBuf;

use crate::debug::types::{Register, RegisterSet};

/// A request for the engine thread. Breakpoint indices are 0-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Continue,
    StepSingle,
    ListBreakpoints,
    AddBreakpoint { address: u64 },
    DeleteBreakpoint { index: usize },
    EnableBreakpoint { index: usize },
    DisableBreakpoint { index: usize },
    ReadRegister { register: Register },
    ReadRegisters,
    WriteRegister { register: Register, value: u64 },
    WriteRegisters(RegisterSet),
    ReadMemory { address: u64, length: usize },
    GetTarget,
    SetTarget(PathBuf),
    Start,
    Stop,
    Attach { pid: i32 },
    Quit,
    Unknown,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Continue => CommandKind::Continue,
            Command::StepSingle => CommandKind::StepSingle,
            Command::ListBreakpoints => CommandKind::ListBreakpoints,
            Command::AddBreakpoint { .. } => CommandKind::AddBreakpoint,
            Command::DeleteBreakpoint { .. } => CommandKind::DeleteBreakpoint,
            Command::EnableBreakpoint { .. } => CommandKind::EnableBreakpoint,
            Command::DisableBreakpoint { .. } => CommandKind::DisableBreakpoint,
            Command::ReadRegister { .. } => CommandKind::ReadRegister,
            Command::ReadRegisters => CommandKind::ReadRegisters,
            Command::WriteRegister { .. } => CommandKind::WriteRegister,
            Command::WriteRegisters(_) => CommandKind::WriteRegisters,
            Command::ReadMemory { .. } => CommandKind::ReadMemory,
            Command::GetTarget => CommandKind::GetTarget,
            Command::SetTarget(_) => CommandKind::SetTarget,
            Command::Start => CommandKind::Start,
            Command::Stop => CommandKind::Stop,
            Command::Attach { .. } => CommandKind::Attach,
            Command::Quit => CommandKind::Quit,
            Command::Unknown => CommandKind::Unknown,
        }
    }

    /// Whether the command needs a live, stopped tracee
    pub fn needs_tracee(&self) -> bool {
        matches!(
            self,
            Command::Continue
                | Command::StepSingle
                | Command::AddBreakpoint { .. }
                | Command::ReadRegister { .. }
                | Command::ReadRegisters
                | Command::WriteRegister { .. }
                | Command::WriteRegisters(_)
                | Command::ReadMemory { .. }
                | Command::Stop
        )
    }
}

/// Fieldless mirror of [`Command`] plus the `Processed` sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommandKind {
    Unknown,
    Continue,
    StepSingle,
    ListBreakpoints,
    AddBreakpoint,
    DeleteBreakpoint,
    EnableBreakpoint,
    DisableBreakpoint,
    ReadRegister,
    ReadRegisters,
    WriteRegister,
    WriteRegisters,
    ReadMemory,
    GetTarget,
    SetTarget,
    Start,
    Stop,
    Attach,
    Quit,
    /// The last submitted command has been fully applied
    #[default]
    Processed,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
