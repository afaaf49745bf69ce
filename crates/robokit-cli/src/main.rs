//! `robokit` – runs a unit system described by a definition document.
//!
//! ```text
//! robokit [run] [DEFINITION]   build, start, wait for Ctrl-C, shut down
//! robokit check [DEFINITION]   parse the document and list its units
//! robokit types                list the unit types this binary knows
//! robokit init                 write default settings to ~/.robokit/config.toml
//! ```
//!
//! Without a `DEFINITION` argument the `definition` setting is used (see
//! [`settings`]).  Units run against simulated hardware; while running, every
//! producer receives a `Tick` each `tick_ms` milliseconds.

mod settings;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use robokit_core::{Builder, Context, LifecycleState, Repeat, ScheduledSeries, definition};
use robokit_units::{ProducerMessage, SimBench, standard_registry};
use tokio::sync::Notify;
use tracing::{info, warn};

use settings::Settings;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Run(PathBuf),
    Check(PathBuf),
    Types,
    Init,
    Help,
}

impl Command {
    fn parse(args: &[String], settings: &Settings) -> Result<Self, String> {
        let definition = |arg: Option<&String>| -> Result<PathBuf, String> {
            arg.map(PathBuf::from)
                .or_else(|| settings.definition.clone())
                .ok_or_else(|| {
                    "no definition document given (pass a path or set `definition` in the settings)"
                        .to_string()
                })
        };
        match args.first().map(String::as_str) {
            Some("run") => Ok(Command::Run(definition(args.get(1))?)),
            Some("check") => Ok(Command::Check(definition(args.get(1))?)),
            Some("types") => Ok(Command::Types),
            Some("init") => Ok(Command::Init),
            Some("help" | "-h" | "--help") => Ok(Command::Help),
            Some(other) if other.starts_with('-') => Err(format!("unknown option '{other}'")),
            _ => Ok(Command::Run(definition(args.first())?)),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG selects the level (default "info"); ROBOKIT_LOG_FORMAT=json
    // switches to newline-delimited JSON.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("ROBOKIT_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }

    let settings = match settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}: {}", "Settings error".red(), e);
            return ExitCode::FAILURE;
        }
    };
    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match Command::parse(&args, &settings) {
        Ok(Command::Run(path)) => run(&path, &settings).await,
        Ok(Command::Check(path)) => check(&path),
        Ok(Command::Types) => {
            for name in standard_registry(&SimBench::new()).type_names() {
                println!("  • {}", name.bold());
            }
            Ok(())
        }
        Ok(Command::Init) => settings::save(&settings).map(|path| {
            println!("{} settings written to {}", "✓".green().bold(), path.display());
        }),
        Ok(Command::Help) => {
            print_usage();
            Ok(())
        }
        Err(e) => {
            print_usage();
            Err(e)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(path: &Path, settings: &Settings) -> Result<(), String> {
    let file = File::open(path)
        .map_err(|e| format!("Failed to open definition at {}: {}", path.display(), e))?;
    let bench = SimBench::new();
    let context = Builder::with_registry(standard_registry(&bench))
        .add_definitions(BufReader::new(file))
        .map_err(|e| e.to_string())?
        .build();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let interrupted = Arc::new(Notify::new());
    let handler = interrupted.clone();
    ctrlc::set_handler(move || handler.notify_one())
        .map_err(|e| format!("Failed to install Ctrl-C handler: {}", e))?;

    context.start().await;
    info!(definition = %path.display(), state = %context.state(), "system running");
    let ticks = schedule_ticks(&context, settings);
    if settings.print_status {
        print!("{}", render_states(&context.states()));
    }
    println!("{}", "Press Ctrl-C to shut down.".dimmed());

    interrupted.notified().await;
    println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
    shutdown(&context, settings).await;
    info!(
        series = ticks.len(),
        received = bench.received.count(),
        "messages received by consumers"
    );
    Ok(())
}

/// Drive every producer with a periodic `Tick`.  The series end when the
/// context shuts down.
fn schedule_ticks(context: &Context, settings: &Settings) -> Vec<ScheduledSeries> {
    if settings.tick_ms == 0 {
        return Vec::new();
    }
    let interval = Duration::from_millis(settings.tick_ms);
    let scheduler = context.scheduler();
    context
        .references_of::<ProducerMessage>()
        .iter()
        .map(|producer| {
            info!(unit = %producer.id(), ?interval, "ticking producer");
            scheduler.schedule(
                producer,
                ProducerMessage::Tick,
                interval,
                Repeat::Forever { interval },
            )
        })
        .collect()
}

async fn shutdown(context: &Context, settings: &Settings) {
    context
        .shutdown_with_grace(Duration::from_millis(settings.shutdown_drain_ms))
        .await;
    let states = context.states();
    if settings.print_status {
        print!("{}", render_states(&states));
    }
    let failed = states
        .values()
        .filter(|s| **s == LifecycleState::Failed)
        .count();
    if failed > 0 {
        warn!(failed, "some units failed");
    }
}

fn check(path: &Path) -> Result<(), String> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read definition at {}: {}", path.display(), e))?;
    let declarations = definition::declarations(&source).map_err(|e| e.to_string())?;
    let registry = standard_registry(&SimBench::new());
    let mut unknown = 0;
    for declaration in &declarations {
        let known = registry.contains(&declaration.type_name);
        if !known {
            unknown += 1;
        }
        let configured = match &declaration.config {
            Some(config) => format!("{} key(s)", config.len()),
            None => "no config".to_string(),
        };
        println!(
            "  {} {} ({}, {})",
            if known { "✓".green() } else { "✗".red() },
            declaration.id.bold(),
            declaration.type_name,
            configured
        );
    }
    if unknown > 0 {
        return Err(format!("{unknown} unit(s) use an unknown type"));
    }
    println!("{} {} unit(s) declared", "✓".green().bold(), declarations.len());
    Ok(())
}

fn render_states(states: &BTreeMap<String, LifecycleState>) -> String {
    let width = states.keys().map(String::len).max().unwrap_or(0);
    let mut out = String::new();
    for (id, state) in states {
        let label = state.as_str();
        let label = match state {
            LifecycleState::Started | LifecycleState::ShutDown => label.green(),
            LifecycleState::Failed => label.red().bold(),
            _ => label.yellow(),
        };
        out.push_str(&format!("  {id:<width$}  {label}\n"));
    }
    out
}

fn print_usage() {
    println!("{}", "robokit – unit runtime".bold().cyan());
    println!("  robokit [run] [DEFINITION]");
    println!("  robokit check [DEFINITION]");
    println!("  robokit types");
    println!("  robokit init");
}
