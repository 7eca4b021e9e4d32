//! Command processing
//!
//! Turns REPL input into engine [`Command`]s. Breakpoint numbers are
//! 1-based on the command line and 0-based inside the engine.

use std::path::PathBuf;

use crate::core::{Command, DebugError};
use crate::debug::types::Register;

/// Bytes shown by `x <addr>` when no length is given
pub const DEFAULT_DUMP_LEN: usize = 64;

/// Front-end commands that can be executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    /// Forward to the engine
    Engine(Command),
    /// Show help
    Help,
    /// Quit application
    Quit,
}

/// Parse a command string into an [`AppCommand`]
pub fn parse_command(input: &str) -> Result<AppCommand, DebugError> {
    let mut words = input.split_whitespace();
    let Some(cmd) = words.next() else {
        return Err(DebugError::Protocol("Empty command".into()));
    };
    let args: Vec<&str> = words.collect();

    let command = match cmd {
        "r" | "run" | "start" => Command::Start,
        "c" | "cont" | "continue" => Command::Continue,
        "s" | "step" => Command::StepSingle,
        "l" | "list" => Command::ListBreakpoints,
        "b" | "break" => Command::AddBreakpoint {
            address: parse_address(required(&args, 0, "break <addr>")?)?,
        },
        "d" | "delete" => Command::DeleteBreakpoint {
            index: parse_index(required(&args, 0, "delete <n>")?)?,
        },
        "enable" => Command::EnableBreakpoint {
            index: parse_index(required(&args, 0, "enable <n>")?)?,
        },
        "disable" => Command::DisableBreakpoint {
            index: parse_index(required(&args, 0, "disable <n>")?)?,
        },
        "reg" | "register" => parse_register_command(&args)?,
        "x" | "mem" => {
            let address = parse_address(required(&args, 0, "x <addr> [len]")?)?;
            let length = match args.get(1) {
                Some(len) => parse_address(len)? as usize,
                None => DEFAULT_DUMP_LEN,
            };
            Command::ReadMemory { address, length }
        }
        // the rest of the line is the path, spaces included
        "target" => match input.trim().split_once(char::is_whitespace) {
            Some((_, path)) => Command::SetTarget(PathBuf::from(path.trim())),
            None => Command::GetTarget,
        },
        "stop" | "kill" => Command::Stop,
        "attach" => {
            let pid = required(&args, 0, "attach <pid>")?;
            Command::Attach {
                pid: pid
                    .parse()
                    .map_err(|_| DebugError::Protocol(format!("Invalid pid '{}'", pid)))?,
            }
        }
        "help" | "?" => return Ok(AppCommand::Help),
        "q" | "quit" | "exit" => return Ok(AppCommand::Quit),
        other => {
            return Err(DebugError::Protocol(format!("Unknown command: '{}'", other)));
        }
    };
    Ok(AppCommand::Engine(command))
}

fn parse_register_command(args: &[&str]) -> Result<Command, DebugError> {
    match args {
        ["read", "all"] | ["read"] => Ok(Command::ReadRegisters),
        ["read", name] => Ok(Command::ReadRegister {
            register: parse_register(name)?,
        }),
        ["write", name, value] => Ok(Command::WriteRegister {
            register: parse_register(name)?,
            value: parse_address(value)?,
        }),
        _ => Err(DebugError::Protocol(
            "Usage: reg read <name>|all, reg write <name> <value>".into(),
        )),
    }
}

fn required<'a>(args: &[&'a str], pos: usize, usage: &str) -> Result<&'a str, DebugError> {
    args.get(pos)
        .copied()
        .ok_or_else(|| DebugError::Protocol(format!("Usage: {}", usage)))
}

fn parse_register(name: &str) -> Result<Register, DebugError> {
    name.parse::<Register>().map_err(DebugError::Protocol)
}

/// 1-based breakpoint number to table index
fn parse_index(s: &str) -> Result<usize, DebugError> {
    match s.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n - 1),
        _ => Err(DebugError::Protocol(format!("Invalid breakpoint number {}", s))),
    }
}

/// Parse an address or value (supports 0x prefix and decimal)
pub fn parse_address(s: &str) -> Result<u64, DebugError> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|_| DebugError::Protocol(format!("Invalid number '{}'", s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(input: &str) -> Command {
        match parse_command(input) {
            Ok(AppCommand::Engine(command)) => command,
            other => panic!("{:?} parsed as {:?}", input, other),
        }
    }

    #[test]
    fn run_control_aliases() {
        assert_eq!(engine("r"), Command::Start);
        assert_eq!(engine("continue"), Command::Continue);
        assert_eq!(engine("  s  "), Command::StepSingle);
        assert_eq!(engine("kill"), Command::Stop);
        assert_eq!(parse_command("q").unwrap(), AppCommand::Quit);
        assert_eq!(parse_command("?").unwrap(), AppCommand::Help);
    }

    #[test]
    fn breakpoint_numbers_are_one_based() {
        assert_eq!(engine("b 0x401000"), Command::AddBreakpoint { address: 0x401000 });
        assert_eq!(engine("d 1"), Command::DeleteBreakpoint { index: 0 });
        assert_eq!(engine("disable 3"), Command::DisableBreakpoint { index: 2 });

        let err = parse_command("enable 0").unwrap_err();
        assert_eq!(err.to_string(), "Invalid breakpoint number 0");
    }

    #[test]
    fn register_commands() {
        assert_eq!(engine("reg read all"), Command::ReadRegisters);
        assert_eq!(engine("reg read RIP"), Command::ReadRegister { register: Register::Rip });
        assert_eq!(
            engine("reg write rax 42"),
            Command::WriteRegister { register: Register::Rax, value: 42 }
        );
        assert!(parse_command("reg read xmm0").is_err());
        assert!(parse_command("reg write rax").is_err());
    }

    #[test]
    fn memory_and_target_commands() {
        assert_eq!(
            engine("x 0x1000"),
            Command::ReadMemory { address: 0x1000, length: DEFAULT_DUMP_LEN }
        );
        assert_eq!(engine("mem 4096 0x10"), Command::ReadMemory { address: 0x1000, length: 16 });
        assert_eq!(engine("target"), Command::GetTarget);
        assert_eq!(
            engine("target /tmp/my prog"),
            Command::SetTarget(PathBuf::from("/tmp/my prog"))
        );
        assert_eq!(engine("attach 1234"), Command::Attach { pid: 1234 });
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_command("").is_err());
        assert!(parse_command("b").is_err());
        assert!(parse_command("b zz").is_err());
        assert!(parse_command("attach me").is_err());
        assert!(matches!(parse_command("frobnicate"), Err(DebugError::Protocol(_))));
    }
}
