//! Core module - debugging engine and session state
//!
//! This module contains the engine facade, the per-tracee session and the
//! breakpoint, register and memory operations it is built from.

pub mod breakpoints;
pub mod command;
pub mod config;
pub mod debugger;
pub mod events;
pub mod image;
pub mod mailbox;
pub mod memory;
pub mod output;
pub mod registers;
pub mod session;


// Re-export common types
pub use command::{Command, CommandKind};
pub use config::{EngineConfig, ExitPolicy};
pub use debugger::{DebugEngine, DebugError};
pub use events::{DataType, Event, EventRecord, EventStream};
