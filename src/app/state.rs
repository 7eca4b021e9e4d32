//! Front-end view of the debug session
//!
//! Rebuilt purely from the event stream; the engine never reads it.

use crate::core::Event;
use crate::debug::types::{Register, RegisterSet};

/// Shared application state
#[derive(Debug, Default)]
pub struct AppState {
    /// Process id reported by the last start or attach
    pub pid: Option<i32>,
    /// Last full register dump
    pub registers: Option<RegisterSet>,
    /// Is a tracee believed to be alive?
    pub is_debugging: bool,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the state
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::ProcessId(pid) => {
                self.pid = Some(*pid);
                self.is_debugging = true;
                self.registers = None;
            }
            Event::Registers(regs) => self.registers = Some(*regs),
            Event::Info(text) if text.starts_with("Target execution exited") => {
                self.is_debugging = false;
            }
            Event::Warning(text) if text.starts_with("Target terminated") => {
                self.is_debugging = false;
            }
            Event::Info(text) if text.starts_with("Target stopped") => {
                self.is_debugging = false;
            }
            _ => {}
        }
    }

    /// Instruction pointer from the last register dump
    pub fn rip(&self) -> Option<u64> {
        self.registers.map(|regs| regs.get(Register::Rip))
    }
}
