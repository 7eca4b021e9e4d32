//! Engine facade tests with the real ptrace backend
//!
//! Run the ignored scenario with: cargo test -- --ignored

use std::path::PathBuf;
use std::time::Duration;

use trapline::core::{Command, CommandKind, DebugEngine, EngineConfig, Event, ExitPolicy};
use trapline::debug::types::Register;

fn engine() -> DebugEngine {
    DebugEngine::new(
        EngineConfig::new()
            .with_poll_interval(Duration::from_millis(1))
            .with_exit_policy(ExitPolicy::Stop),
    )
}

fn submit(engine: &DebugEngine, command: Command) -> Vec<Event> {
    engine.set_command(command);
    assert!(engine.wait_processed(Duration::from_secs(10)));
    events(engine)
}

fn events(engine: &DebugEngine) -> Vec<Event> {
    std::iter::from_fn(|| engine.pop_data())
        .map(|record| record.decode().expect("well-formed record"))
        .collect()
}

fn scratch_file(name: &str, contents: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(format!("trapline-it-{}-{}", std::process::id(), name));
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_get_target_without_target() {
    let engine = engine();
    assert_eq!(
        submit(&engine, Command::GetTarget),
        vec![Event::Info("No Target is defined".into())]
    );
}

#[test]
fn test_non_elf_target_is_rejected() {
    let engine = engine();
    let path = scratch_file("script", b"#!/bin/sh\necho hello\n");

    let got = submit(&engine, Command::SetTarget(path.clone()));
    assert!(matches!(&got[0], Event::Error(text) if text.contains("bad ELF magic")));

    let got = submit(&engine, Command::Start);
    assert_eq!(got, vec![Event::Warning("No Target is defined".into())]);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_missing_target_reports_io_error() {
    let engine = engine();
    let got = submit(&engine, Command::SetTarget(PathBuf::from("/nonexistent/trapline")));
    assert!(matches!(&got[0], Event::Error(text) if text.starts_with("Failed to read")));
}

#[test]
fn test_quit_tears_down_loop() {
    let engine = engine();
    submit(&engine, Command::GetTarget);
    assert!(engine.is_running());

    engine.set_command(Command::Quit);
    assert!(!engine.is_running());
    assert_eq!(engine.get_command(), CommandKind::Processed);
}

#[test]
#[ignore = "needs permission to ptrace child processes"]
fn test_launch_and_run_to_exit() {
    let engine = engine();
    assert!(engine.run("/bin/true"));
    assert!(engine.wait_processed(Duration::from_secs(10)));

    let got = events(&engine);
    assert!(got
        .iter()
        .any(|e| matches!(e, Event::Info(text) if text.starts_with("Debugging started"))));
    assert!(got.iter().any(|e| matches!(e, Event::ProcessId(pid) if *pid > 0)));

    let rip = match submit(&engine, Command::ReadRegisters).as_slice() {
        [Event::Registers(regs)] => regs.get(Register::Rip),
        other => panic!("unexpected {:?}", other),
    };

    // patch a trap over the entry instruction and put the byte back
    let got = submit(&engine, Command::AddBreakpoint { address: rip });
    assert_eq!(got, vec![Event::Info(format!("Breakpoint 1 set at {:#x}", rip))]);
    let got = submit(&engine, Command::ReadMemory { address: rip, length: 1 });
    assert!(matches!(got.as_slice(), [Event::Memory { bytes, .. }] if bytes[0] != 0xcc));
    let got = submit(&engine, Command::DeleteBreakpoint { index: 0 });
    assert_eq!(got, vec![Event::Info(format!("Breakpoint 1 at {:#x} deleted", rip))]);

    let got = submit(&engine, Command::Continue);
    assert!(got
        .iter()
        .any(|e| matches!(e, Event::Info(text) if text.starts_with("Target execution exited cleanly"))));

    let got = submit(&engine, Command::Continue);
    assert_eq!(got, vec![Event::Warning("No target is running".into())]);
}
