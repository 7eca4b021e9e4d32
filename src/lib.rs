//! Trapline - ptrace-driven debugger for 64-bit ELF targets
//!
//! The [`core::DebugEngine`] owns a background engine thread that launches or
//! attaches to one tracee, manages software breakpoints and reports results
//! as framed records on an event stream.

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
compile_error!("trapline only supports Linux on x86-64");

pub mod app;
pub mod core;
pub mod debug;
pub mod ui;
