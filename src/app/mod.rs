//! App module - front-end state and commands
//!
//! Provides command parsing and session state used by the CLI.

mod commands;
mod state;

pub use commands::*;
pub use state::*;
