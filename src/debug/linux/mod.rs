//! Linux-specific backend implementation using ptrace (nix).

mod process;

pub use process::{process_info, process_name};

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use nix::errno::Errno;
use nix::libc::c_void;
use nix::sys::ptrace::{self, AddressType, Options};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

use super::types::{RegisterSet, SignalInfo, StopStatus};
use super::TraceBackend;
use crate::core::debugger::DebugError;

/// Convert a failed tracing call into a [`DebugError::Trace`]
fn traced<T>(call: &'static str, result: nix::Result<T>) -> Result<T, DebugError> {
    result.map_err(|errno| DebugError::Trace { call, errno })
}

/// ptrace backend
#[derive(Debug, Default)]
pub struct PtraceBackend;

impl PtraceBackend {
    /// Create a new ptrace backend
    pub fn new() -> Self {
        Self
    }
}

impl TraceBackend for PtraceBackend {
    fn launch(&mut self, target: &Path, stdout: &Path) -> Result<Pid, DebugError> {
        process::spawn_traced(target, stdout)
    }

    fn attach(&mut self, pid: Pid) -> Result<(), DebugError> {
        let info = process_info(pid);
        log::info!("Attaching to process {} ({})", info.pid, info.name);
        traced("PTRACE_ATTACH", ptrace::attach(pid))
    }

    fn set_options(&mut self, pid: Pid) -> Result<(), DebugError> {
        traced(
            "PTRACE_SETOPTIONS",
            ptrace::setoptions(pid, Options::PTRACE_O_EXITKILL),
        )
    }

    fn wait(&mut self, pid: Pid) -> Result<StopStatus, DebugError> {
        let status = loop {
            match waitpid(pid, None) {
                Err(Errno::EINTR) => continue,
                other => break traced("waitpid", other)?,
            }
        };
        log::debug!("wait status {:?}", status);

        Ok(match status {
            WaitStatus::Exited(_, code) => StopStatus::Exited(code),
            WaitStatus::Signaled(_, signal, _) => StopStatus::Signaled(signal),
            WaitStatus::Stopped(_, signal) => StopStatus::Stopped(signal),
            WaitStatus::PtraceEvent(_, signal, _) => StopStatus::Stopped(signal),
            _ => StopStatus::Other,
        })
    }

    fn cont(&mut self, pid: Pid) -> Result<(), DebugError> {
        traced("PTRACE_CONT", ptrace::cont(pid, None))
    }

    fn step(&mut self, pid: Pid) -> Result<(), DebugError> {
        traced("PTRACE_SINGLESTEP", ptrace::step(pid, None))
    }

    fn kill(&mut self, pid: Pid) -> Result<(), DebugError> {
        traced("PTRACE_KILL", ptrace::kill(pid))?;
        // reap so the pid does not linger as a zombie
        let _ = waitpid(pid, None);
        Ok(())
    }

    fn peek(&self, pid: Pid, address: u64) -> Result<u64, DebugError> {
        let word = traced("PTRACE_PEEKDATA", ptrace::read(pid, address as AddressType))?;
        Ok(word as u64)
    }

    fn poke(&mut self, pid: Pid, address: u64, word: u64) -> Result<(), DebugError> {
        // SAFETY: PTRACE_POKEDATA passes `data` by value as the word to store,
        // it is never dereferenced in this process
        let result = unsafe { ptrace::write(pid, address as AddressType, word as *mut c_void) };
        traced("PTRACE_POKEDATA", result)
    }

    fn get_regs(&self, pid: Pid) -> Result<RegisterSet, DebugError> {
        traced("PTRACE_GETREGS", ptrace::getregs(pid)).map(RegisterSet::from)
    }

    fn set_regs(&mut self, pid: Pid, regs: &RegisterSet) -> Result<(), DebugError> {
        traced("PTRACE_SETREGS", ptrace::setregs(pid, (*regs).into()))
    }

    fn signal_info(&self, pid: Pid) -> Result<SignalInfo, DebugError> {
        let info = traced("PTRACE_GETSIGINFO", ptrace::getsiginfo(pid))?;
        Ok(SignalInfo {
            signo: info.si_signo,
            code: info.si_code,
        })
    }

    fn read_memory(&self, pid: Pid, address: u64, length: usize) -> Result<Vec<u8>, DebugError> {
        match read_proc_mem(pid, address, length) {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                log::debug!("/proc/{}/mem read at {:#x} failed ({}), peeking words", pid, address, e);
                super::peek_words(self, pid, address, length)
            }
        }
    }

    fn process_name(&self, pid: Pid) -> Option<String> {
        process::process_name(pid)
    }
}

fn read_proc_mem(pid: Pid, address: u64, length: usize) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(format!("/proc/{}/mem", pid))?;
    file.seek(SeekFrom::Start(address))?;

    let mut buffer = vec![0u8; length];
    file.read_exact(&mut buffer)?;
    Ok(buffer)
}
