//! Trapline - headless debugger front end
//!
//! Entry point that parses arguments, configures the engine and hands
//! control to the REPL.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use trapline::core::{Command, DebugEngine, EngineConfig, ExitPolicy};
use trapline::ui::cli::run_cli;

/// Trapline: ptrace debugger for 64-bit ELF executables
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target executable to debug
    #[arg(short, long)]
    target: Option<PathBuf>,

    /// Attach to a running process instead of launching the target
    #[arg(short, long, requires = "target")]
    attach: Option<i32>,

    /// Do not relaunch the target when it exits
    #[arg(long, default_value_t = false)]
    stop_on_exit: bool,

    /// Engine loop poll interval in milliseconds
    #[arg(long, default_value_t = 10)]
    poll_ms: u64,

    /// Event buffer capacity in bytes
    #[arg(long, default_value_t = trapline::core::events::DEFAULT_CAPACITY)]
    event_capacity: usize,

    /// Directory for the target stdout capture file
    #[arg(long)]
    capture_dir: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::new()
            .with_poll_interval(Duration::from_millis(self.poll_ms.max(1)))
            .with_event_capacity(self.event_capacity)
            .with_exit_policy(if self.stop_on_exit {
                ExitPolicy::Stop
            } else {
                ExitPolicy::Restart
            });
        if let Some(dir) = &self.capture_dir {
            config = config.with_capture_dir(dir);
        }
        config
    }
}

fn main() -> anyhow::Result<()> {
    // 1. Parse command line arguments
    let args = Args::parse();

    // 2. Initialize logger with verbosity level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        match args.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        },
    ))
    .init();

    log::info!("Trapline v{} starting", env!("CARGO_PKG_VERSION"));
    log::debug!("{:?}", args);

    // 3. Bring up the engine and whatever the flags ask for
    let engine = DebugEngine::new(args.engine_config());
    match (&args.target, args.attach) {
        (Some(target), Some(pid)) => {
            engine.set_command(Command::SetTarget(target.clone()));
            engine.wait_processed(Duration::from_secs(5));
            engine.attach(pid);
        }
        (Some(target), None) => {
            engine.run(target);
        }
        _ => {}
    }

    run_cli(&engine)?;
    Ok(())
}
