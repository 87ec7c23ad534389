//! `stagehand-cli` – operator console for a live dialogue session.
//!
//! This binary:
//!
//! 1. Checks for `~/.stagehand/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 2. Builds the HTTP backend, the gate client, the live loop and the
//!    timeline feed, and starts their background drivers on a Tokio runtime.
//! 3. Drops the operator into an **interactive REPL** (`/connect`, `/start`,
//!    `/pause`, `/status`, `/timeline`, …).
//! 4. Intercepts **Ctrl-C** to stop the loop and shut the drivers down.

mod config;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use stagehand_gate::GateClient;
use stagehand_runtime::{
    HttpBackend, LiveLoop, TimelineFeed, init_tracing, spawn_gate_poller, spawn_tick_driver,
    spawn_timeline_feed,
};

fn main() {
    let _telemetry = init_tracing("stagehand");

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = resolve_config(config::load(), run_first_run_wizard);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("stagehand-worker")
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };

    // ── Session wiring ────────────────────────────────────────────────────
    let backend =
        Arc::new(HttpBackend::new(cfg.backend_url.clone()).with_timeout(cfg.request_timeout()));
    let gate = Arc::new(GateClient::new(backend.clone()));
    let live = Arc::new(LiveLoop::new(
        backend.clone(),
        backend.clone(),
        gate.clone(),
        cfg.loop_config(),
    ));
    let feed = TimelineFeed::new(backend.clone());
    let timeline = feed.subscribe();

    let shutdown = Arc::new(AtomicBool::new(false));
    let drivers = {
        let _enter = runtime.enter();
        vec![
            spawn_gate_poller(gate, cfg.gate_poll_period(), shutdown.clone()),
            spawn_timeline_feed(feed, cfg.timeline_poll_period(), shutdown.clone()),
            spawn_tick_driver(live.clone(), cfg.tick_period(), shutdown.clone()),
        ]
    };
    info!(backend = backend.base_url(), "background drivers started");
    println!("  Backend: {}", backend.base_url().dimmed());

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let live_ctrlc = live.clone();
    let shutdown_ctrlc = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the live loop …".yellow().bold());
        live_ctrlc.stop();
        shutdown_ctrlc.store(true, Ordering::SeqCst);
        println!("{}", "  ✓ Loop stopped. Press Enter to exit.".green());
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use /quit to exit");
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    let shell = repl::Shell {
        live,
        timeline,
        runtime: runtime.handle().clone(),
        config: cfg,
    };
    repl::run(&shell, shutdown.clone());

    shutdown.store(true, Ordering::SeqCst);
    for driver in drivers {
        driver.abort();
    }
    runtime.shutdown_timeout(std::time::Duration::from_secs(2));
    info!("stagehand exited");
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Pick the file config, the wizard's answers or the defaults, then apply
/// `STAGEHAND_*` overrides to whichever one wins.
fn resolve_config(
    loaded: Result<Option<config::Config>, String>,
    first_run: impl FnOnce() -> config::Config,
) -> config::Config {
    let mut cfg = match loaded {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => first_run(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };
    config::apply_env_overrides(&mut cfg);
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║      Stagehand First-Run Wizard      ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up Stagehand.\n");

    let mut cfg = config::Config::default();

    cfg.backend_url = prompt_line(
        &format!("  Session backend URL [{}]: ", cfg.backend_url),
        &cfg.backend_url,
    );

    cfg.sensor_endpoint = prompt_line("  Sensor endpoint (blank to set later): ", "");

    println!("  How is the sensor driven?");
    println!("    1) Physical robot  (default)");
    println!("    2) Simulated feed");
    cfg.sensor_mode = match prompt_line("  Enter choice [1]: ", "1").as_str() {
        "2" => stagehand_types::SensorMode::Simulated,
        _ => stagehand_types::SensorMode::Robot,
    };

    let period = prompt_line(
        &format!("  Tick period in ms [{}]: ", cfg.tick_period_ms),
        &cfg.tick_period_ms.to_string(),
    );
    if let Ok(ms) = period.parse::<u64>() {
        cfg.tick_period_ms = ms;
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ______               __               __"#.bold().cyan());
    println!("{}", r#"  / __/ /____ ____ ____/ /  ___ ____  ___/ /"#.bold().cyan());
    println!("{}", r#" _\ \/ __/ _ `/ _ `/ -_) _ \/ _ `/ _ \/ _  / "#.bold().cyan());
    println!("{}", r#"/___/\__/\_,_/\_, /\__/_//_/\_,_/_//_/\_,_/  "#.bold().cyan());
    println!("{}", r#"             /___/                            "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Stagehand".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Live dialogue session console");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
