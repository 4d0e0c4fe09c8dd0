//! Nozoki CLI - コマンドラインインターフェース
//!
//! デモプログラムを動かしたまま、メソッドブレークポイントを着脱するREPL

mod demo;

use anyhow::Result;
use clap::Parser;
use demo::Demo;
use nozoki_core::errors::{
    ERR_ATTACH_FAILED, ERR_HIT_NOT_FOUND, ERR_INSTANCE_NOT_FOUND, ERR_METHOD_NOT_FOUND,
};
use nozoki_core::history::DEFAULT_MAX_HITS;
use nozoki_core::{
    Breakpoints, Command, DebuggerBreakMode, HitHistory, HitRecord, MethodHandle, ObjectRef,
    SettingsConfig, Target,
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Nozoki - Live Method Breakpoints
#[derive(Parser)]
#[command(name = "nozoki")]
#[command(version = "0.1.0")]
#[command(
    about = "Capture method calls of a running program without stopping it",
    long_about = None
)]
struct Cli {
    /// Start with hit capture disabled
    #[arg(long)]
    disabled: bool,

    /// What to do with an attached debugger on each hit (none, native, throw)
    #[arg(long, default_value = "none")]
    break_mode: DebuggerBreakMode,

    /// Maximum number of frames in a captured call trace
    #[arg(long, default_value_t = 32)]
    trace_depth: usize,

    /// Append the filtered native backtrace to each call trace
    #[arg(long)]
    native_backtrace: bool,

    /// Maximum number of hits kept in the history
    #[arg(long, default_value_t = DEFAULT_MAX_HITS)]
    history_size: usize,

    /// Number of demo worker threads
    #[arg(long, default_value_t = 2)]
    workers: usize,

    /// Delay between demo calls in milliseconds
    #[arg(long, default_value_t = 500)]
    interval_ms: u64,
}

/// REPLが扱う状態
struct Session {
    engine: Breakpoints,
    history: Arc<HitHistory>,
    demo: Demo,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    println!("Nozoki - Live Method Breakpoints");
    println!("Version 0.1.0");
    println!();

    let mut session = init_session(&cli)?;
    run_repl(&mut session)?;

    session.demo.stop();
    Ok(())
}

/// ログ出力を初期化する（RUST_LOG、既定は warn）
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// エンジンと履歴を作成し、デモを起動する
fn init_session(cli: &Cli) -> Result<Session> {
    let engine = Breakpoints::new(SettingsConfig {
        enabled: !cli.disabled,
        break_mode: cli.break_mode,
        trace_depth: cli.trace_depth,
        native_backtrace: cli.native_backtrace,
    });

    let history = Arc::new(HitHistory::new(cli.history_size));
    history.attach_to(&engine);

    let mut demo = Demo::new()?;
    demo.start(cli.workers, Duration::from_millis(cli.interval_ms))?;
    println!(
        "Demo running with {} workers ({} methods)",
        cli.workers,
        demo.catalog().len()
    );
    println!();

    Ok(Session { engine, history, demo })
}

/// readline の履歴ファイル
fn history_file() -> Option<PathBuf> {
    home::home_dir().map(|home| home.join(".nozoki_history"))
}

/// REPLループを実行する
fn run_repl(session: &mut Session) -> Result<()> {
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;
    let history_path = history_file();
    if let Some(path) = &history_path {
        if rl.load_history(path).is_err() {
            debug!("no readline history at {}", path.display());
        }
    }

    loop {
        let readline = rl.readline("(nozoki) ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                match handle_command(session, line) {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    if let Some(path) = &history_path {
        if let Err(e) = rl.save_history(path) {
            warn!("failed to save readline history: {}", e);
        }
    }

    Ok(())
}

/// コマンドを処理する（終了する場合は true）
fn handle_command(session: &mut Session, line: &str) -> Result<bool> {
    // 表示の前に履歴を上限まで切り詰める
    session.history.trim();

    match Command::parse(line) {
        Some(Command::Help) => print_help(),
        Some(Command::Quit) => {
            println!("Goodbye!");
            return Ok(true);
        }
        Some(Command::Find(pattern)) => handle_find(session, &pattern)?,
        Some(Command::Attach(target)) => handle_attach(session, &target)?,
        Some(Command::Detach(target)) => handle_detach(session, &target)?,
        Some(Command::Status(target)) => handle_status(session, &target)?,
        Some(Command::DetachAll) => {
            let count = session.engine.detach_all();
            println!("Detached {} breakpoint(s)", count);
        }
        Some(Command::List) => handle_list(session),
        Some(Command::Instances) => handle_instances(session),
        Some(Command::Hits(limit)) => handle_hits(session, limit),
        Some(Command::Trace(sequence)) => handle_trace(session, sequence)?,
        Some(Command::SetEnabled(enabled)) => {
            session.engine.settings().set_enabled(enabled);
            println!("Hit capture {}", if enabled { "enabled" } else { "disabled" });
        }
        Some(Command::SetBreak(mode)) => {
            session.engine.settings().set_break_mode(mode);
            println!("Debugger break mode: {}", mode);
        }
        Some(Command::SetHistory(max_len)) => {
            session.history.set_max_len(max_len);
            let dropped = session.history.trim();
            println!("History keeps {} hit(s) ({} dropped)", max_len, dropped);
        }
        None => {
            println!("Unknown command: {}", line);
            println!("Type 'help' for available commands.");
        }
    }

    Ok(false)
}

/// 対象のメソッドとインスタンスを解決する
fn resolve_target(session: &Session, target: &Target) -> Result<(MethodHandle, Option<ObjectRef>)> {
    let method = session
        .demo
        .catalog()
        .resolve(&target.method)
        .ok_or_else(|| anyhow::anyhow!("{}: {}", ERR_METHOD_NOT_FOUND, target.method))?;

    let instance = match target.instance {
        Some(index) => Some(
            session
                .demo
                .instance(index)
                .ok_or_else(|| anyhow::anyhow!("{}: #{}", ERR_INSTANCE_NOT_FOUND, index))?,
        ),
        None => None,
    };

    Ok((method, instance))
}

fn describe(method: &MethodHandle, instance: Option<&ObjectRef>) -> String {
    match instance {
        Some(obj) => format!("{} on {:?}", method, obj),
        None => format!("{} (all instances)", method),
    }
}

/// Findコマンドを処理する
fn handle_find(session: &Session, pattern: &str) -> Result<()> {
    let methods = session.demo.catalog().find(pattern)?;
    if methods.is_empty() {
        println!("No methods matching '{}'", pattern);
        return Ok(());
    }

    println!("Methods matching '{}' ({} found):", pattern, methods.len());
    for (i, method) in methods.iter().enumerate() {
        let marker = if method.info().hookable { "" } else { "  [not hookable]" };
        println!("  {}. {}{}", i + 1, method, marker);
    }
    Ok(())
}

/// Attachコマンドを処理する
fn handle_attach(session: &Session, target: &Target) -> Result<()> {
    let (method, instance) = resolve_target(session, target)?;
    if !session.engine.attach(&method, instance.as_ref()) {
        return Err(anyhow::anyhow!("{}: {}", ERR_ATTACH_FAILED, method));
    }
    println!("Breakpoint set: {}", describe(&method, instance.as_ref()));
    Ok(())
}

/// Detachコマンドを処理する
fn handle_detach(session: &Session, target: &Target) -> Result<()> {
    let (method, instance) = resolve_target(session, target)?;
    if session.engine.detach(&method, instance.as_ref()) {
        let still_watched = session.engine.watched().iter().any(|w| w.method == method);
        if still_watched {
            println!("Breakpoint updated: {}", describe(&method, instance.as_ref()));
        } else {
            println!("Breakpoint cleared: {}", method);
        }
    } else {
        println!("No breakpoint on {}", method);
    }
    Ok(())
}

/// Statusコマンドを処理する
fn handle_status(session: &Session, target: &Target) -> Result<()> {
    let (method, instance) = resolve_target(session, target)?;
    let attached = session.engine.is_attached(&method, instance.as_ref());
    println!(
        "{}: {}",
        describe(&method, instance.as_ref()),
        if attached { "attached" } else { "not attached" }
    );
    Ok(())
}

/// Listコマンドを処理する
fn handle_list(session: &Session) {
    let watched = session.engine.watched();
    if watched.is_empty() {
        println!("No breakpoints");
        return;
    }

    println!("Breakpoints ({}):", watched.len());
    for w in &watched {
        if w.instances.is_empty() {
            println!("  {} (all instances)", w.method);
        } else {
            let instances = w
                .instances
                .iter()
                .map(|obj| format!("{:?}", obj))
                .collect::<Vec<_>>()
                .join(", ");
            println!("  {} on {}", w.method, instances);
        }
    }

    let settings = session.engine.settings().snapshot();
    println!(
        "Capture {}, break mode {}, {} hook(s) installed",
        if settings.enabled { "enabled" } else { "disabled" },
        settings.break_mode,
        session.engine.installed_count()
    );
}

/// Instancesコマンドを処理する
fn handle_instances(session: &Session) {
    println!("Instances:");
    for (i, obj) in session.demo.instances().iter().enumerate() {
        println!("  #{} {:?}", i, obj);
    }
}

/// Hitsコマンドを処理する
fn handle_hits(session: &Session, limit: Option<usize>) {
    let hits = session.history.snapshot_sorted();
    if hits.is_empty() {
        println!("No hits");
        return;
    }

    let limit = limit.unwrap_or(10).min(hits.len());
    println!("Latest {} of {} hit(s):", limit, hits.len());
    for hit in &hits[hits.len() - limit..] {
        println!("  {}", hit);
    }
}

/// Traceコマンドを処理する
fn handle_trace(session: &Session, sequence: u64) -> Result<()> {
    let hit: Arc<HitRecord> = session
        .history
        .find(sequence)
        .ok_or_else(|| anyhow::anyhow!("{}: #{}", ERR_HIT_NOT_FOUND, sequence))?;

    println!("{}", hit);
    println!("{}", hit.trace().rendered());
    Ok(())
}

fn print_help() {
    println!("Available commands:");
    println!();
    println!("  help               - Show this help message");
    println!("  quit/exit/q        - Exit");
    println!();
    println!("Breakpoint commands:");
    println!("  find <pattern>     - Find methods matching a regular expression");
    println!("  attach <m> [#n]    - Watch method m (all instances, or instance #n)");
    println!("  detach <m> [#n]    - Stop watching method m (or only instance #n)");
    println!("  status <m> [#n]    - Show whether method m is watched");
    println!("  detach-all (da)    - Remove every breakpoint");
    println!("  list (ls)          - List breakpoints and settings");
    println!("  instances (i)      - List demo instances");
    println!();
    println!("Hit commands:");
    println!("  hits [n]           - Show the latest n hits (default 10)");
    println!("  trace <#seq>       - Show the call trace of a hit");
    println!();
    println!("Settings:");
    println!("  set enabled on|off - Turn hit capture on or off");
    println!("  set break <mode>   - Debugger break mode: none, native, throw");
    println!("  set history <n>    - Maximum number of hits kept");
    println!();
    println!("Examples:");
    println!("  attach Counter::add");
    println!("  attach Greeter::greet(String) #2");
    println!("  trace #12");
}
