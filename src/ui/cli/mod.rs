//! CLI - reedline-based REPL interface
//!
//! Thin client of [`DebugEngine`]: every line becomes one engine command,
//! and the REPL prints whatever the engine reports until it is processed.

use anyhow::Result;
use colored::Colorize;
use reedline::{Prompt, PromptHistorySearch, PromptHistorySearchStatus, Reedline, Signal};
use std::borrow::Cow;
use std::time::Duration;

use crate::app::{parse_command, AppCommand, AppState};
use crate::core::{Command, DebugEngine, Event};
use crate::debug::types::Register;
use crate::debug::TraceBackend;

/// How often the REPL drains events while a command is in flight
const REFRESH: Duration = Duration::from_millis(50);

/// Bytes per memory dump row
const DUMP_WIDTH: usize = 16;

/// Prompt showing the traced pid
pub struct TraplinePrompt {
    pid: Option<i32>,
    is_debugging: bool,
}

impl TraplinePrompt {
    pub fn new() -> Self {
        Self {
            pid: None,
            is_debugging: false,
        }
    }

    pub fn update(&mut self, state: &AppState) {
        self.pid = state.pid;
        self.is_debugging = state.is_debugging;
    }
}

impl Default for TraplinePrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompt for TraplinePrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        match (self.is_debugging, self.pid) {
            (true, Some(pid)) => Cow::Owned(format!("[dbg:{}]", pid)),
            _ => Cow::Borrowed("[---]"),
        }
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _prompt_mode: reedline::PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed("> ")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("... ")
    }

    fn render_prompt_history_search_indicator(
        &self,
        history_search: PromptHistorySearch,
    ) -> Cow<'_, str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "(failed) ",
        };
        Cow::Owned(format!("(search: {}{}) ", prefix, history_search.term))
    }
}

/// Print the help message
fn print_help() {
    println!("{}", "Trapline Commands".bold().cyan());
    println!("{}", "═".repeat(50).cyan());

    println!("\n{}", "Process:".bold().yellow());
    println!("  {}     Show or set the target", "target [path]".green());
    println!("  {}              Launch the target", "run".green());
    println!("  {}      Attach to a process", "attach <pid>".green());
    println!("  {}             Kill the tracee", "stop".green());

    println!("\n{}", "Execution:".bold().yellow());
    println!("  {}                Continue", "c".green());
    println!("  {}                Single step", "s".green());

    println!("\n{}", "Breakpoints:".bold().yellow());
    println!("  {}        Set breakpoint", "b <addr>".green());
    println!("  {}           Delete breakpoint", "d <n>".green());
    println!("  {}  Toggle breakpoint", "enable|disable <n>".green());
    println!("  {}                List breakpoints", "l".green());

    println!("\n{}", "Registers & Memory:".bold().yellow());
    println!("  {}  Read one or all registers", "reg read <name>|all".green());
    println!("  {}  Write a register", "reg write <name> <v>".green());
    println!("  {}    Dump memory", "x <addr> [len]".green());

    println!("\n{}", "Other:".bold().yellow());
    println!("  {}                Show this help", "?".green());
    println!("  {}                Quit", "q".green());
}

/// Hex/ASCII rows for a memory snapshot
pub fn dump_memory(address: u64, bytes: &[u8]) -> Vec<String> {
    bytes
        .chunks(DUMP_WIDTH)
        .enumerate()
        .map(|(row, chunk)| {
            let hex: Vec<String> = chunk.iter().map(|b| hex::encode([*b])).collect();
            let ascii: String = chunk
                .iter()
                .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
                .collect();
            format!(
                "{:#018x}  {:<width$}  {}",
                address + (row * DUMP_WIDTH) as u64,
                hex.join(" "),
                ascii,
                width = DUMP_WIDTH * 3 - 1
            )
        })
        .collect()
}

fn print_event(event: &Event) {
    match event {
        Event::Error(text) => println!("{} {}", "[!]".red(), text),
        Event::Warning(text) => println!("{} {}", "[-]".yellow(), text),
        Event::Info(text) => println!("[*] {}", text),
        Event::Debug(text) => println!("{}", text.dimmed()),
        Event::TargetOutput(line) => println!("{} {}", "out>".blue(), line),
        Event::ProcessId(pid) => log::debug!("Tracee pid {}", pid),
        Event::Registers(regs) => {
            for row in Register::ALL.chunks(3) {
                let cells: Vec<String> = row
                    .iter()
                    .map(|reg| format!("{:>8} = {:#018x}", reg.name().to_uppercase(), regs.get(*reg)))
                    .collect();
                println!("    {}", cells.join("  "));
            }
        }
        Event::Memory { address, bytes } => {
            for line in dump_memory(*address, bytes) {
                println!("    {}", line);
            }
        }
    }
}

/// Print every queued event and fold it into the front-end state
fn drain_events<B: TraceBackend + Send + 'static>(
    engine: &DebugEngine<B>,
    state: &mut AppState,
    dropped: &mut u64,
) {
    while let Some(record) = engine.pop_data() {
        match record.decode() {
            Ok(event) => {
                state.apply(&event);
                print_event(&event);
            }
            Err(e) => log::warn!("Undecodable event: {}", e),
        }
    }

    let now = engine.dropped_events();
    if now > *dropped {
        println!("{} {} event(s) dropped, buffer full", "[-]".yellow(), now - *dropped);
        *dropped = now;
    }
}

/// Run the CLI REPL against an engine
pub fn run_cli<B: TraceBackend + Send + 'static>(engine: &DebugEngine<B>) -> Result<()> {
    let mut line_editor = Reedline::create();
    let mut prompt = TraplinePrompt::new();
    let mut state = AppState::new();
    let mut dropped = 0;

    println!(
        "{}",
        "╔══════════════════════════════════════════════════════════════╗".cyan()
    );
    println!(
        "{}",
        "║  Trapline - Type '?' for help, 'q' to quit                   ║".cyan()
    );
    println!(
        "{}",
        "╚══════════════════════════════════════════════════════════════╝".cyan()
    );

    // anything the engine said before the first prompt
    engine.wait_processed(Duration::from_secs(5));
    drain_events(engine, &mut state, &mut dropped);

    loop {
        prompt.update(&state);
        let sig = line_editor.read_line(&prompt)?;
        match sig {
            Signal::Success(buffer) => {
                let input = buffer.trim();
                if input.is_empty() {
                    continue;
                }

                match parse_command(input) {
                    Ok(AppCommand::Engine(command)) => {
                        engine.set_command(command);
                        while !engine.wait_processed(REFRESH) {
                            drain_events(engine, &mut state, &mut dropped);
                        }
                        drain_events(engine, &mut state, &mut dropped);
                    }
                    Ok(AppCommand::Help) => print_help(),
                    Ok(AppCommand::Quit) => {
                        println!("[*] Shutting down...");
                        break;
                    }
                    Err(e) => {
                        println!("{} {}", "[!]".red(), e);
                        println!("    Type '?' for help");
                    }
                }
            }
            Signal::CtrlD | Signal::CtrlC => {
                println!("\n[*] Interrupted");
                break;
            }
        }
    }

    engine.set_command(Command::Quit);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_rows_are_sixteen_bytes_wide() {
        let bytes: Vec<u8> = (0x41..0x41 + 20).collect();
        let rows = dump_memory(0x1000, &bytes);
        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with("0x0000000000001000  41 42 43"));
        assert!(rows[0].ends_with("ABCDEFGHIJKLMNOP"));
        assert!(rows[1].starts_with("0x0000000000001010  51 52 53 54"));
        assert!(rows[1].ends_with("QRST"));
    }

    #[test]
    fn dump_masks_unprintable_bytes() {
        let rows = dump_memory(0, &[0x00, 0xcc, b'a']);
        assert!(rows[0].ends_with("..a"));
    }

    #[test]
    fn prompt_reflects_session() {
        let mut state = AppState::new();
        let mut prompt = TraplinePrompt::new();
        assert_eq!(prompt.render_prompt_left(), "[---]");

        state.apply(&Event::ProcessId(42));
        prompt.update(&state);
        assert_eq!(prompt.render_prompt_left(), "[dbg:42]");
    }
}
