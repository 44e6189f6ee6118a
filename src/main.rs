use std::error::Error;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use deskpilot_lib::agent_engine::{AgentEvent, EventBus};
use deskpilot_lib::config::{self, AppConfig, CONFIG_FILE};
use deskpilot_lib::tools::approval::{ApprovalGate, StaticApproval, StdinApproval};
use deskpilot_lib::{build_tool_registry, AgentController, Mode, PilotError};

#[derive(Parser, Debug)]
#[command(name = "deskpilot", version, about = "Natural-language desktop automation agent")]
struct Cli {
    /// Path to config.toml; searched for when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Approve sensitive tools without asking.
    #[arg(long, global = true)]
    yes: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive session; `/ask` and `/agent` switch modes.
    Chat,
    /// Plan and execute one request.
    Ask {
        #[arg(long)]
        image: Option<String>,
        #[arg(required = true)]
        request: Vec<String>,
    },
    /// Drive the screen autonomously toward a goal.
    Agent {
        #[arg(required = true)]
        goal: Vec<String>,
    },
    /// List the registered tools.
    Tools,
    /// Write a starter config.toml.
    Init {
        #[arg(long, default_value = CONFIG_FILE)]
        path: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

/// Logs go to stderr and, when the log directory is writable, to a plain-text file.
fn init_tracing() {
    let log_dir = config::log_dir(std::env::var_os(config::LOG_DIR_ENV).map(PathBuf::from));
    let file_layer = log_dir
        .and_then(|dir| match config::open_log_file(&dir) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("file logging disabled ({}): {e}", dir.display());
                None
            }
        })
        .map(|file| fmt::layer().with_ansi(false).with_writer(Mutex::new(file)));

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    // .env is optional
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    tracing::debug!(?cli, "arguments parsed");

    if let Some(Command::Init { path, force }) = &cli.command {
        return init_config(path, *force);
    }

    let app_config = match &cli.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config()?,
    };
    let approval: Arc<dyn ApprovalGate> = if cli.yes {
        Arc::new(StaticApproval(true))
    } else {
        Arc::new(StdinApproval)
    };
    let registry = Arc::new(build_tool_registry(&app_config, approval));

    if let Some(Command::Tools) = &cli.command {
        print_tools(&app_config, &registry.catalog().render_for_prompt());
        return Ok(());
    }

    let events = EventBus::new();
    spawn_progress_printer(&events);
    let controller = AgentController::from_config(&app_config, registry, events)?;

    match cli.command.unwrap_or(Command::Chat) {
        Command::Ask { image, request } => {
            let reply = controller.process(&request.join(" "), image.as_deref(), Mode::Ask).await?;
            println!("{reply}");
        }
        Command::Agent { goal } => {
            let reply = controller.process(&goal.join(" "), None, Mode::Agent).await?;
            println!("{reply}");
        }
        Command::Chat => run_chat(&controller).await?,
        Command::Tools | Command::Init { .. } => {}
    }
    Ok(())
}

async fn run_chat(controller: &AgentController) -> Result<(), Box<dyn Error>> {
    println!("DeskPilot ready. /ask plan-execute, /agent autonomous, /image <path> attach, /quit exit.");
    let mut mode = Mode::Ask;
    let mut image: Option<String> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/ask" => {
                mode = Mode::Ask;
                println!("mode: ask");
                continue;
            }
            "/agent" => {
                mode = Mode::Agent;
                println!("mode: agent");
                continue;
            }
            _ => {}
        }
        if let Some(path) = line.strip_prefix("/image ") {
            image = Some(path.trim().to_string());
            println!("image attached to the next request");
            continue;
        }

        match controller.process(line, image.take().as_deref(), mode).await {
            Ok(reply) => println!("\n{reply}\n"),
            Err(PilotError::Busy) => println!("Agent is busy, try again shortly."),
            Err(e) => {
                tracing::error!(error = %e, "request failed");
                println!("Error: {e}");
            }
        }
    }
    Ok(())
}

fn init_config(path: &PathBuf, force: bool) -> Result<(), Box<dyn Error>> {
    if path.exists() && !force {
        return Err(format!("{} already exists; pass --force to overwrite", path.display()).into());
    }
    config::save_config(&config::starter_config(), path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn print_tools(config: &AppConfig, catalog: &str) {
    println!("{catalog}");
    let sensitive: Vec<&str> = config
        .tools
        .iter()
        .filter(|t| t.sensitive)
        .map(|t| t.name.as_str())
        .chain(config.safety.require_approval_for.iter().map(String::as_str))
        .collect();
    if !sensitive.is_empty() {
        println!("\nRequire approval in safe mode: {}", sensitive.join(", "));
    }
}

fn spawn_progress_printer(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => print_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "progress printer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn print_event(event: &AgentEvent) {
    match event {
        AgentEvent::PlanReady { instruction, steps } => {
            println!("📋 {instruction}");
            for step in steps {
                println!("   {}. {} ({})", step.step, step.directive(), step.tool);
            }
        }
        AgentEvent::StepStarted { step, total, tool, .. } => println!("▶ Step {step}/{total}: {tool}"),
        AgentEvent::StepFinished { record } => {
            let marker = if record.failed() { "❌" } else { "✓" };
            println!("  {marker} {}", record.name);
        }
        AgentEvent::IterationStarted { iteration, max } => println!("🔄 Iteration {iteration}/{max}"),
        AgentEvent::ActionChosen { thought, tool, parameters, .. } => {
            println!("  💭 {thought}");
            println!("  ▶ {tool} {parameters}");
        }
        AgentEvent::IterationFinished { record } => println!("  {} {}", record.marker(), record.tool),
        AgentEvent::Warning { message } => println!("⚠️  {message}"),
        AgentEvent::PhaseChanged { .. } | AgentEvent::LlmChunk { .. } => {}
    }
}
