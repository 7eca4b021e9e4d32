//! In-memory tracee used by unit tests.
//!
//! Memory is a flat byte map seeded from a code image. Every instruction is
//! one byte long unless overridden, `0xcc` traps the way `int3` does, and
//! reaching `exit_at` terminates the process. Reaching the address in
//! `kill_at` terminates it by that signal instead.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use super::types::{Register, RegisterSet, SignalInfo, StopStatus, TRAP_BYTE};
use super::TraceBackend;
use crate::core::debugger::DebugError;

/// `si_code` the kernel reports for an `int3` trap
const SI_KERNEL: i32 = 0x80;

const MAX_STEPS: usize = 10_000;

#[derive(Debug)]
pub(crate) struct FakeBackend {
    base: u64,
    image: Vec<u8>,
    memory: HashMap<u64, u8>,
    regs: RegisterSet,
    live: Option<Pid>,
    next_pid: i32,
    pending: Option<StopStatus>,
    signal: SignalInfo,
    lengths: HashMap<u64, u64>,
    capture: Option<PathBuf>,
    pub exit_at: Option<u64>,
    pub kill_at: Option<(u64, Signal)>,
    pub exit_code: i32,
    pub exit_output: Vec<u8>,
    pub fail_launch: bool,
    pub launches: usize,
    pub attached: Vec<Pid>,
}

impl FakeBackend {
    pub fn with_code(base: u64, code: &[u8]) -> Self {
        Self {
            base,
            image: code.to_vec(),
            memory: HashMap::new(),
            regs: RegisterSet::default(),
            live: None,
            next_pid: 1000,
            pending: None,
            signal: SignalInfo { signo: 0, code: 0 },
            lengths: HashMap::new(),
            capture: None,
            exit_at: None,
            kill_at: None,
            exit_code: 0,
            exit_output: Vec::new(),
            fail_launch: false,
            launches: 0,
            attached: Vec::new(),
        }
    }

    /// Give the instruction at `address` a length other than one byte
    pub fn set_instruction_len(&mut self, address: u64, len: u64) {
        self.lengths.insert(address, len);
    }

    /// Start a fresh process image without going through `launch`
    pub fn spawn(&mut self) -> Pid {
        let pid = Pid::from_raw(self.next_pid);
        self.next_pid += 1;
        self.load_image(pid);
        pid
    }

    pub fn live_pid(&self) -> Option<Pid> {
        self.live
    }

    pub fn rip(&self) -> u64 {
        self.regs.get(Register::Rip)
    }

    pub fn set_rip(&mut self, rip: u64) {
        self.regs.set(Register::Rip, rip);
    }

    /// Bytes currently resident in the live image
    pub fn bytes(&self, address: u64, len: usize) -> Vec<u8> {
        (0..len as u64)
            .map(|offset| self.memory.get(&(address + offset)).copied().unwrap_or(0))
            .collect()
    }

    fn load_image(&mut self, pid: Pid) {
        self.memory = self
            .image
            .iter()
            .enumerate()
            .map(|(offset, byte)| (self.base + offset as u64, *byte))
            .collect();
        self.regs = RegisterSet::default();
        self.regs.set(Register::Rip, self.base);
        self.regs.set(Register::Rsp, 0x7fff_f000);
        self.live = Some(pid);
    }

    fn alive(&self, pid: Pid, call: &'static str) -> Result<(), DebugError> {
        if self.live == Some(pid) {
            Ok(())
        } else {
            Err(DebugError::Trace { call, errno: Errno::ESRCH })
        }
    }

    fn exit(&mut self) -> StopStatus {
        if let Some(path) = &self.capture {
            if let Ok(mut file) = OpenOptions::new().append(true).open(path) {
                let _ = file.write_all(&self.exit_output);
            }
        }
        self.live = None;
        StopStatus::Exited(self.exit_code)
    }

    /// Execute the instruction at rip; `Some` when it ends the current run
    fn execute_one(&mut self) -> Option<StopStatus> {
        let rip = self.rip();
        if self.exit_at == Some(rip) {
            return Some(self.exit());
        }
        if let Some((_, signal)) = self.kill_at.filter(|(at, _)| *at == rip) {
            self.live = None;
            return Some(StopStatus::Signaled(signal));
        }
        match self.memory.get(&rip).copied() {
            None => {
                self.signal = SignalInfo { signo: Signal::SIGSEGV as i32, code: 1 };
                Some(StopStatus::Stopped(Signal::SIGSEGV))
            }
            Some(TRAP_BYTE) => {
                self.set_rip(rip + 1);
                self.signal = SignalInfo { signo: Signal::SIGTRAP as i32, code: SI_KERNEL };
                Some(StopStatus::Stopped(Signal::SIGTRAP))
            }
            Some(_) => {
                let len = self.lengths.get(&rip).copied().unwrap_or(1);
                self.set_rip(rip + len);
                None
            }
        }
    }
}

impl TraceBackend for FakeBackend {
    fn launch(&mut self, _target: &Path, stdout: &Path) -> Result<Pid, DebugError> {
        if self.fail_launch {
            return Err(DebugError::Fork(Errno::EAGAIN));
        }
        self.launches += 1;
        self.capture = Some(stdout.to_path_buf());
        let pid = self.spawn();
        self.signal = SignalInfo { signo: Signal::SIGTRAP as i32, code: 0 };
        self.pending = Some(StopStatus::Stopped(Signal::SIGTRAP));
        Ok(pid)
    }

    fn attach(&mut self, pid: Pid) -> Result<(), DebugError> {
        self.attached.push(pid);
        self.load_image(pid);
        self.signal = SignalInfo { signo: Signal::SIGSTOP as i32, code: 0 };
        self.pending = Some(StopStatus::Stopped(Signal::SIGSTOP));
        Ok(())
    }

    fn set_options(&mut self, pid: Pid) -> Result<(), DebugError> {
        self.alive(pid, "PTRACE_SETOPTIONS")
    }

    fn wait(&mut self, _pid: Pid) -> Result<StopStatus, DebugError> {
        self.pending.take().ok_or(DebugError::Trace {
            call: "waitpid",
            errno: Errno::ECHILD,
        })
    }

    fn cont(&mut self, pid: Pid) -> Result<(), DebugError> {
        self.alive(pid, "PTRACE_CONT")?;
        for _ in 0..MAX_STEPS {
            if let Some(status) = self.execute_one() {
                self.pending = Some(status);
                return Ok(());
            }
        }
        self.pending = Some(self.exit());
        Ok(())
    }

    fn step(&mut self, pid: Pid) -> Result<(), DebugError> {
        self.alive(pid, "PTRACE_SINGLESTEP")?;
        let status = self.execute_one().unwrap_or_else(|| {
            self.signal = SignalInfo { signo: Signal::SIGTRAP as i32, code: SignalInfo::TRAP_TRACE };
            StopStatus::Stopped(Signal::SIGTRAP)
        });
        self.pending = Some(status);
        Ok(())
    }

    fn kill(&mut self, pid: Pid) -> Result<(), DebugError> {
        self.alive(pid, "PTRACE_KILL")?;
        self.live = None;
        self.pending = None;
        Ok(())
    }

    fn peek(&self, pid: Pid, address: u64) -> Result<u64, DebugError> {
        self.alive(pid, "PTRACE_PEEKDATA")?;
        let mut word = [0u8; 8];
        for (offset, byte) in word.iter_mut().enumerate() {
            *byte = *self
                .memory
                .get(&address.wrapping_add(offset as u64))
                .ok_or(DebugError::Trace { call: "PTRACE_PEEKDATA", errno: Errno::EIO })?;
        }
        Ok(u64::from_le_bytes(word))
    }

    fn poke(&mut self, pid: Pid, address: u64, word: u64) -> Result<(), DebugError> {
        self.alive(pid, "PTRACE_POKEDATA")?;
        let mapped = (0..8u64).all(|offset| self.memory.contains_key(&address.wrapping_add(offset)));
        if !mapped {
            return Err(DebugError::Trace { call: "PTRACE_POKEDATA", errno: Errno::EIO });
        }
        for (offset, byte) in word.to_le_bytes().iter().enumerate() {
            self.memory.insert(address + offset as u64, *byte);
        }
        Ok(())
    }

    fn get_regs(&self, pid: Pid) -> Result<RegisterSet, DebugError> {
        self.alive(pid, "PTRACE_GETREGS")?;
        Ok(self.regs)
    }

    fn set_regs(&mut self, pid: Pid, regs: &RegisterSet) -> Result<(), DebugError> {
        self.alive(pid, "PTRACE_SETREGS")?;
        self.regs = *regs;
        Ok(())
    }

    fn signal_info(&self, pid: Pid) -> Result<SignalInfo, DebugError> {
        self.alive(pid, "PTRACE_GETSIGINFO")?;
        Ok(self.signal)
    }

    fn process_name(&self, _pid: Pid) -> Option<String> {
        Some("fake".to_string())
    }
}
