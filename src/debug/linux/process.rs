//! Process creation and lookup using fork/exec and procfs.

use std::convert::Infallible;
use std::ffi::{CStr, CString};
use std::fs::{self, OpenOptions};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::libc;
use nix::sys::personality::{self, Persona};
use nix::sys::ptrace;
use nix::unistd::{dup2, execv, fork, ForkResult, Pid};

use super::super::types::ProcessInfo;
use crate::core::debugger::DebugError;

/// Fork a child that stops under trace right after exec'ing `target`.
///
/// The child's stdout is appended to `stdout`.
pub fn spawn_traced(target: &Path, stdout: &Path) -> Result<Pid, DebugError> {
    let program = CString::new(target.as_os_str().as_bytes()).map_err(|_| {
        DebugError::Protocol(format!("Target path {} contains a NUL byte", target.display()))
    })?;

    let capture = OpenOptions::new()
        .create(true)
        .append(true)
        .open(stdout)
        .map_err(|source| DebugError::Io {
            path: stdout.to_path_buf(),
            source,
        })?;

    // SAFETY: the child only calls async-signal-safe functions before exec
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            log::debug!("Forked tracee {} for {}", child, target.display());
            Ok(child)
        }
        Ok(ForkResult::Child) => {
            let argv = [program.as_c_str()];
            match run_child(&program, &argv, capture.as_raw_fd()) {
                Ok(never) => match never {},
                Err(_) => unsafe { libc::_exit(127) },
            }
        }
        Err(errno) => Err(DebugError::Fork(errno)),
    }
}

fn run_child(program: &CStr, argv: &[&CStr], stdout_fd: RawFd) -> nix::Result<Infallible> {
    // keep breakpoint addresses stable across restarts
    let persona = personality::get()?;
    personality::set(persona | Persona::ADDR_NO_RANDOMIZE)?;

    ptrace::traceme()?;
    dup2(stdout_fd, libc::STDOUT_FILENO)?;

    execv(program, argv)
}

/// Get process name from procfs
pub fn process_name(pid: Pid) -> Option<String> {
    let comm = fs::read_to_string(format!("/proc/{}/comm", pid)).ok()?;
    let name = comm.trim_end().to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Describe a process for lifecycle messages
pub fn process_info(pid: Pid) -> ProcessInfo {
    ProcessInfo {
        pid: pid.as_raw(),
        name: process_name(pid).unwrap_or_else(|| format!("<PID {}>", pid)),
    }
}
