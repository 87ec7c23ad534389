//! REPL – the operator's interactive shell.
//!
//! Supported slash-commands:
//!   /connect [endpoint] [robot|sim] – open the sensor session
//!   /start, /stop                   – toggle the running flag
//!   /pause, /resume                 – toggle the external pause
//!   /status                         – loop, gate and tick summary
//!   /history                        – committed dialogue turns
//!   /timeline [turn]                – reconciled event-log projection
//!   /help
//!   /quit | /exit

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use stagehand_runtime::{LiveLoop, LoopStatus};
use stagehand_timeline::Timeline;
use stagehand_types::{DialogueTurn, SensorMode, TurnIndex};
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::config::Config;

/// A parsed slash-command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect {
        endpoint: Option<String>,
        mode: Option<SensorMode>,
    },
    Start,
    Stop,
    Pause,
    Resume,
    Status,
    History,
    Timeline { turn: Option<TurnIndex> },
    Help,
    Quit,
}

/// Parse one input line.
pub fn parse(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".to_string());
    };
    let args: Vec<&str> = words.collect();

    let command = match head {
        "/connect" => {
            let mut endpoint = None;
            let mut mode = None;
            for arg in args {
                match arg.parse::<SensorMode>() {
                    Ok(m) if mode.is_none() => mode = Some(m),
                    _ if endpoint.is_none() => endpoint = Some(arg.to_string()),
                    _ => return Err(format!("unexpected argument '{arg}'")),
                }
            }
            return Ok(Command::Connect { endpoint, mode });
        }
        "/timeline" => {
            let turn = match args.as_slice() {
                [] => None,
                [n] => Some(
                    n.parse::<TurnIndex>()
                        .map_err(|_| format!("'{n}' is not a turn number"))?,
                ),
                _ => return Err("usage: /timeline [turn]".to_string()),
            };
            return Ok(Command::Timeline { turn });
        }
        "/start" => Command::Start,
        "/stop" => Command::Stop,
        "/pause" => Command::Pause,
        "/resume" => Command::Resume,
        "/status" => Command::Status,
        "/history" => Command::History,
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        other => return Err(format!("unknown command '{other}'")),
    };
    if let Some(extra) = args.first() {
        return Err(format!("{head} takes no arguments (got '{extra}')"));
    }
    Ok(command)
}

/// Everything the shell needs to act on the running session.
pub struct Shell {
    pub live: Arc<LiveLoop>,
    pub timeline: watch::Receiver<Arc<Timeline>>,
    pub runtime: Handle,
    pub config: Config,
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(shell: &Shell, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "stagehand>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match parse(input) {
            Ok(Command::Quit) => {
                shell.live.stop();
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Ok(command) => shell.execute(command),
            Err(e) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                e.yellow(),
                "/help".bold()
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

impl Shell {
    fn execute(&self, command: Command) {
        match command {
            Command::Connect { endpoint, mode } => self.cmd_connect(endpoint, mode),
            Command::Start => match self.live.start() {
                Ok(()) => println!("{} live loop running", "✓".green().bold()),
                Err(e) => println!("{}: {} (try /connect first)", "Cannot start".red(), e),
            },
            Command::Stop => {
                self.live.stop();
                println!("{} live loop stopped", "■".yellow().bold());
            }
            Command::Pause => {
                self.live.set_external_pause(true);
                println!("{} generation paused by operator", "‖".yellow().bold());
            }
            Command::Resume => {
                self.live.set_external_pause(false);
                println!("{} operator pause lifted", "▶".green().bold());
            }
            Command::Status => {
                for line in render_status(&self.live.status()) {
                    println!("{line}");
                }
            }
            Command::History => {
                for line in render_history(&self.live.history()) {
                    println!("{line}");
                }
            }
            Command::Timeline { turn } => {
                let timeline = self.timeline.borrow().clone();
                for line in render_timeline(&timeline, turn) {
                    println!("{line}");
                }
            }
            Command::Help => cmd_help(),
            Command::Quit => {}
        }
    }

    fn cmd_connect(&self, endpoint: Option<String>, mode: Option<SensorMode>) {
        let endpoint = endpoint.unwrap_or_else(|| self.config.sensor_endpoint.clone());
        if endpoint.is_empty() {
            println!(
                "{} no sensor endpoint given and none configured",
                "Error:".red()
            );
            return;
        }
        let mode = mode.unwrap_or(self.config.sensor_mode);

        print!("  Connecting to {} ({}) … ", endpoint.bold(), mode);
        io::stdout().flush().ok();
        match self.runtime.block_on(self.live.connect(&endpoint, mode)) {
            Ok(()) => println!("{}", "connected".green()),
            Err(e) => println!("{}: {}", "FAILED".red(), e),
        }
    }
}

fn cmd_help() {
    println!();
    println!("{}", "Stagehand Commands".bold().underline());
    println!(
        "  {} – open the sensor session",
        "/connect [endpoint] [robot|sim]".bold().cyan()
    );
    println!("  {}  – start / stop the live loop", "/start  /stop".bold().cyan());
    println!("  {} – operator pause", "/pause  /resume".bold().cyan());
    println!("  {}        – loop and gate summary", "/status".bold().cyan());
    println!("  {}       – committed dialogue", "/history".bold().cyan());
    println!("  {} – reconciled event log", "/timeline [turn]".bold().cyan());
    println!("  {}   – exit", "/quit  /exit".bold().cyan());
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Rendering
// ─────────────────────────────────────────────────────────────────────────────

fn render_status(status: &LoopStatus) -> Vec<String> {
    let mut lines = vec![format!("{}", "Live Loop".bold().underline())];
    lines.push(format!("  state          : {}", status.state.to_string().bold()));
    match (&status.endpoint, status.mode) {
        (Some(endpoint), Some(mode)) => {
            lines.push(format!("  sensor         : {endpoint} ({mode})"))
        }
        _ => lines.push(format!("  sensor         : {}", "not connected".dimmed())),
    }
    let gate = if status.gate.allows_generation() {
        status.gate.to_string().green()
    } else {
        status.gate.to_string().yellow()
    };
    lines.push(format!("  gate           : {gate}"));
    lines.push(format!("  operator pause : {}", status.external_pause));
    lines.push(format!("  history        : {} turn(s)", status.history_len));
    match &status.signals {
        Some(signals) if !signals.is_empty() => {
            let keys: Vec<&str> = signals.0.keys().map(String::as_str).collect();
            lines.push(format!("  signals        : {}", keys.join(", ")));
        }
        Some(_) => lines.push(format!("  signals        : {}", "(empty)".dimmed())),
        None => {}
    }
    if let Some(silence) = &status.silence {
        lines.push(format!(
            "  silence        : {} ({:.1}s)",
            silence.kind, silence.duration
        ));
    }
    lines.push(format!(
        "  ticks          : {} ({} skipped while busy)",
        status.ticks, status.overlapping_ticks
    ));
    if let Some(outcome) = &status.last_outcome {
        lines.push(format!("  last outcome   : {outcome}"));
    }
    if let Some(error) = &status.last_error {
        lines.push(format!("  last error     : {}", error.red()));
    }
    if let Some(at) = status.last_commit_at {
        lines.push(format!(
            "  last commit    : {}",
            at.with_timezone(&chrono::Local).format("%H:%M:%S")
        ));
    }
    lines
}

fn render_history(history: &[DialogueTurn]) -> Vec<String> {
    if history.is_empty() {
        return vec![format!("  {}", "(no dialogue yet)".dimmed())];
    }
    history
        .iter()
        .enumerate()
        .map(|(i, turn)| format!("  {:>3}  {}: {}", i + 1, turn.speaker.bold(), turn.content))
        .collect()
}

fn render_timeline(timeline: &Timeline, only: Option<TurnIndex>) -> Vec<String> {
    let turns: Vec<TurnIndex> = match only {
        Some(turn) => vec![turn],
        None => timeline.turns(),
    };
    if turns.is_empty() {
        return vec![format!("  {}", "(event log is empty)".dimmed())];
    }

    let mut lines = Vec::new();
    for turn in turns {
        let view = timeline.turn(turn);
        let beat = view.beat().unwrap_or("-");
        lines.push(format!("  {} [{}]", format!("turn {turn}").bold(), beat.cyan()));
        match view.speak {
            Some(speak) => lines.push(format!("    {}: {}", speak.speaker.bold(), speak.text)),
            None => lines.push(format!("    {}", "(no speech recorded)".dimmed())),
        }
        if let Some(director) = view.director {
            if let Some(status) = &director.status {
                lines.push(format!("    director: {status}"));
            }
            if let Some(guidance) = &director.guidance {
                lines.push(format!("    guidance: {guidance}"));
            }
        }
        if let Some(rag) = view.rag {
            let previews = &rag.previews;
            let sources: Vec<String> = [
                ("few_shot", &previews.few_shot),
                ("persona", &previews.persona),
                ("knowledge", &previews.knowledge),
            ]
            .into_iter()
            .filter_map(|(name, preview)| preview.as_ref().map(|p| format!("{name}={p}")))
            .collect();
            if !sources.is_empty() {
                lines.push(format!("    rag: {}", sources.join(", ")));
            }
        }
        if let Some(prompt) = view.prompt {
            lines.push(format!("    prompt tail: {}", prompt.prompt_tail.dimmed()));
        }
        for thought in timeline.thoughts_for(turn) {
            lines.push(format!("    ~ {} {}", thought.timestamp.dimmed(), thought.content));
        }
    }
    lines
}
