//! Common types for debugging functionality.

use std::fmt;
use std::str::FromStr;

use nix::libc::user_regs_struct;
use nix::sys::signal::Signal;

/// Single-byte `int3` instruction used for software breakpoints
pub const TRAP_BYTE: u8 = 0xcc;

/// Number of words in the x86-64 user register area
pub const REGISTER_COUNT: usize = 27;

/// x86-64 general purpose registers, in `user_regs_struct` order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Register {
    R15,
    R14,
    R13,
    R12,
    Rbp,
    Rbx,
    R11,
    R10,
    R9,
    R8,
    Rax,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    OrigRax,
    Rip,
    Cs,
    Eflags,
    Rsp,
    Ss,
    FsBase,
    GsBase,
    Ds,
    Es,
    Fs,
    Gs,
}

impl Register {
    pub const ALL: [Register; REGISTER_COUNT] = [
        Register::R15,
        Register::R14,
        Register::R13,
        Register::R12,
        Register::Rbp,
        Register::Rbx,
        Register::R11,
        Register::R10,
        Register::R9,
        Register::R8,
        Register::Rax,
        Register::Rcx,
        Register::Rdx,
        Register::Rsi,
        Register::Rdi,
        Register::OrigRax,
        Register::Rip,
        Register::Cs,
        Register::Eflags,
        Register::Rsp,
        Register::Ss,
        Register::FsBase,
        Register::GsBase,
        Register::Ds,
        Register::Es,
        Register::Fs,
        Register::Gs,
    ];

    /// Slot of this register inside a [`RegisterSet`]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::R15 => "r15",
            Register::R14 => "r14",
            Register::R13 => "r13",
            Register::R12 => "r12",
            Register::Rbp => "rbp",
            Register::Rbx => "rbx",
            Register::R11 => "r11",
            Register::R10 => "r10",
            Register::R9 => "r9",
            Register::R8 => "r8",
            Register::Rax => "rax",
            Register::Rcx => "rcx",
            Register::Rdx => "rdx",
            Register::Rsi => "rsi",
            Register::Rdi => "rdi",
            Register::OrigRax => "orig_rax",
            Register::Rip => "rip",
            Register::Cs => "cs",
            Register::Eflags => "eflags",
            Register::Rsp => "rsp",
            Register::Ss => "ss",
            Register::FsBase => "fs_base",
            Register::GsBase => "gs_base",
            Register::Ds => "ds",
            Register::Es => "es",
            Register::Fs => "fs",
            Register::Gs => "gs",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Register {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Register::ALL
            .iter()
            .copied()
            .find(|reg| reg.name() == wanted)
            .ok_or_else(|| format!("Unknown register '{}'", s.trim()))
    }
}

/// Full CPU register state (x64), laid out exactly like `user_regs_struct`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterSet(pub [u64; REGISTER_COUNT]);

impl RegisterSet {
    pub fn get(&self, register: Register) -> u64 {
        self.0[register.index()]
    }

    pub fn set(&mut self, register: Register, value: u64) {
        self.0[register.index()] = value;
    }

    /// Little-endian wire form used by register snapshot records
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|word| word.to_le_bytes()).collect()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != REGISTER_COUNT * 8 {
            return None;
        }
        let mut words = [0u64; REGISTER_COUNT];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(8)) {
            *word = u64::from_le_bytes(chunk.try_into().ok()?);
        }
        Some(Self(words))
    }
}

impl From<user_regs_struct> for RegisterSet {
    fn from(regs: user_regs_struct) -> Self {
        Self([
            regs.r15,
            regs.r14,
            regs.r13,
            regs.r12,
            regs.rbp,
            regs.rbx,
            regs.r11,
            regs.r10,
            regs.r9,
            regs.r8,
            regs.rax,
            regs.rcx,
            regs.rdx,
            regs.rsi,
            regs.rdi,
            regs.orig_rax,
            regs.rip,
            regs.cs,
            regs.eflags,
            regs.rsp,
            regs.ss,
            regs.fs_base,
            regs.gs_base,
            regs.ds,
            regs.es,
            regs.fs,
            regs.gs,
        ])
    }
}

impl From<RegisterSet> for user_regs_struct {
    fn from(set: RegisterSet) -> Self {
        let w = set.0;
        user_regs_struct {
            r15: w[0],
            r14: w[1],
            r13: w[2],
            r12: w[3],
            rbp: w[4],
            rbx: w[5],
            r11: w[6],
            r10: w[7],
            r9: w[8],
            r8: w[9],
            rax: w[10],
            rcx: w[11],
            rdx: w[12],
            rsi: w[13],
            rdi: w[14],
            orig_rax: w[15],
            rip: w[16],
            cs: w[17],
            eflags: w[18],
            rsp: w[19],
            ss: w[20],
            fs_base: w[21],
            gs_base: w[22],
            ds: w[23],
            es: w[24],
            fs: w[25],
            gs: w[26],
        }
    }
}

/// Software breakpoint info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    /// Breakpoint address
    pub address: u64,
    /// Original byte at this address
    pub saved_byte: u8,
    /// Is this breakpoint enabled?
    pub enabled: bool,
}

/// Outcome of waiting on the tracee
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStatus {
    /// Tracee stopped with a signal and is still traced
    Stopped(Signal),
    /// Tracee exited normally with the given code
    Exited(i32),
    /// Tracee was terminated by a signal
    Signaled(Signal),
    /// Any other wait status (continued, ptrace events, ...)
    Other,
}

impl StopStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StopStatus::Exited(_) | StopStatus::Signaled(_))
    }
}

/// Subset of `siginfo_t` the engine cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalInfo {
    pub signo: i32,
    pub code: i32,
}

impl SignalInfo {
    /// `si_code` reported for a completed `PTRACE_SINGLESTEP`
    pub const TRAP_TRACE: i32 = 2;

    /// A `SIGTRAP` raised by the single-step machinery rather than by `int3`
    pub fn is_single_step(&self) -> bool {
        self.signo == Signal::SIGTRAP as i32 && self.code == Self::TRAP_TRACE
    }
}

/// Debug session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetState {
    #[default]
    NotStarted,
    Running,
    Stopped,
    Exited,
    Killed,
}

/// Information about a running process
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    /// Process ID
    pub pid: i32,
    /// Process name (command name)
    pub name: String,
}
