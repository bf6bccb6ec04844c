//! The interactive terminal front end.

#[macro_use]
extern crate tracing;

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use simpleagent::config::{self, AppConfig};
use simpleagent::core::{Run, RunEvent, RunResult};
use simpleagent::remote::ServerState;
use simpleagent::{Error, Session, SessionBuilder, expand_mentions};
use simpleagent_openai_model::OpenAIProvider;
use tokio::io::{self, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::select;
use tracing_subscriber::EnvFilter;

const BAR_CHAR: &str = "▎";

/// Chat with a model that can call local and remote tools.
#[derive(Parser, Debug)]
#[command(name = "simpleagent", version)]
struct Args {
    /// Path to the configuration JSON file.
    #[arg(long)]
    config: PathBuf,

    /// Working directory of the file tools and `@path` mentions.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err}", "error:".bright_red().bold());
            if err.is_config_error() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(args: Args) -> Result<(), Error> {
    info!("loading configuration from {}", args.config.display());
    let config = AppConfig::load(&args.config)?;
    let provider = OpenAIProvider::new(config.provider_config_from_env()?);
    let root = resolve_root(args.root);

    let system_prompt = include_str!("./system_prompt.md")
        .replace("{{HOST_OS}}", host_os())
        .replace("{{ROOT}}", &root.to_string_lossy());
    let session = SessionBuilder::with_model_provider(provider)
        .with_system_prompt(system_prompt)
        .with_options(config.agent_options())
        .with_servers(config.servers())
        .with_root(&root)
        .build()
        .await?;

    println!("{}", "SimpleAgent interactive CLI".bold());
    println!("Mention files with @path. Type /help for commands.");
    print_servers(&session, false);
    println!();

    let mut lines = BufReader::new(io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        // Ctrl-C at the prompt ends the session, during a run it cancels.
        let line = select! {
            line = read_line(&mut lines) => line,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('/') {
            if !handle_command(&session, line).await {
                break;
            }
            continue;
        }

        let message = expand_mentions(&root, line);
        render_run(session.submit(&message)).await;
    }

    println!("Goodbye!");
    session.shutdown().await;
    Ok(())
}

/// Returns `false` when the session should end.
async fn handle_command(session: &Session, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default().to_ascii_lowercase();
    match command.as_str() {
        "/exit" | "/quit" => return false,
        "/help" => {
            println!("Available commands:");
            println!("  /exit, /quit      Exit the session");
            println!("  /help             Show this help message");
            println!("  /tools            List the tools the model can call");
            println!("  /servers          Show the state of the tool servers");
            println!("  /restart <id>     Relaunch a tool server");
            println!(
                "Press Ctrl-C while the agent works to cancel the request."
            );
            println!("The API key is read from {}.", config::API_KEY_VAR);
        }
        "/tools" => {
            for tool in session.tools() {
                let summary = tool.spec.description.trim().lines().next();
                println!(
                    "  {} {}",
                    tool.name().bright_white().bold(),
                    summary.unwrap_or_default().dimmed()
                );
            }
        }
        "/servers" => print_servers(session, true),
        "/restart" => match parts.next() {
            Some(id) => match session.restart_server(id).await {
                Ok(()) => println!("Server {id} restarted."),
                Err(err) => {
                    println!("{} {err}", "Restart failed:".bright_red());
                }
            },
            None => println!("Usage: /restart <id>"),
        },
        other => println!("Unknown command {other}, type /help for commands."),
    }
    true
}

fn print_servers(session: &Session, verbose: bool) {
    let statuses = session.server_statuses();
    if statuses.is_empty() && verbose {
        println!("No tool servers configured.");
    }
    for (id, state) in statuses {
        match state {
            ServerState::Ready if !verbose => {}
            ServerState::Ready => println!("  {id}: {}", state.bright_green()),
            _ => println!("  {id}: {}", state.bright_yellow()),
        }
    }
}

async fn render_run(mut run: Run) {
    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
    let mut progress_bar: Option<ProgressBar> = None;
    let mut streaming = false;

    loop {
        if !streaming {
            progress_bar.get_or_insert_with(|| {
                let progress_bar = ProgressBar::new_spinner();
                progress_bar.set_style(progress_style.clone());
                progress_bar.set_message("🤔 Thinking...");
                progress_bar.enable_steady_tick(Duration::from_millis(100));
                progress_bar
            });
        }

        let event = select! {
            event = run.next_event() => event,
            _ = tokio::signal::ctrl_c() => {
                run.cancel();
                continue;
            }
        };
        let Some(event) = event else {
            break;
        };

        // Clear the spinner before printing anything else.
        if let Some(progress_bar) = progress_bar.take() {
            progress_bar.finish_and_clear();
        }

        match event {
            RunEvent::Delta(text) => {
                if !streaming {
                    print!("{}🤖 ", BAR_CHAR.bright_cyan());
                    streaming = true;
                }
                print!("{}", text.bright_white());
                std::io::stdout().flush().ok();
            }
            RunEvent::ToolCall(request) => {
                end_stream(&mut streaming);
                println!(
                    "{}🔧 {} {}",
                    BAR_CHAR.bright_yellow(),
                    request.name.bold(),
                    request.arguments.to_string().dimmed()
                );
            }
            RunEvent::ToolResult { name, outcome, .. } => match outcome {
                Ok(_) => println!("{}✅ {name}", BAR_CHAR.bright_green()),
                Err(err) => println!(
                    "{}❌ {name}: {}",
                    BAR_CHAR.bright_red(),
                    err.to_string().dimmed()
                ),
            },
            RunEvent::Finished(result) => {
                end_stream(&mut streaming);
                if let RunResult::Failure(failure) = result {
                    println!("{}{}", BAR_CHAR.bright_red(), failure.red());
                }
                break;
            }
        }
    }
}

#[inline]
fn end_stream(streaming: &mut bool) {
    if std::mem::take(streaming) {
        println!();
    }
}

async fn read_line(lines: &mut Lines<BufReader<Stdin>>) -> Option<String> {
    match lines.next_line().await {
        Ok(line) => line,
        Err(err) => {
            error!("error reading input: {err}");
            None
        }
    }
}

fn resolve_root(root: Option<PathBuf>) -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let Some(root) = root else {
        return cwd;
    };
    let candidate = cwd.join(root);
    if candidate.is_dir() {
        candidate
    } else {
        warn!(
            "--root {} is not a directory, using the current directory",
            candidate.display()
        );
        cwd
    }
}

#[inline]
fn host_os() -> &'static str {
    match std::env::consts::OS {
        "linux" => "Linux",
        "macos" => "macOS",
        "windows" => "Windows",
        _ => "some other OS",
    }
}
