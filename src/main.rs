use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use comfy_assist::client::AssistantClient;
use comfy_assist::config::Config;
use comfy_assist::controls::{Control, ControlState};
use comfy_assist::message::{ChatMessage, MessageContent, Role};
use comfy_assist::render::{RenderedMessage, Renderer};
use comfy_assist::workflow::{extract_payload_text, run_workflow};

#[derive(Parser)]
#[command(name = "comfy-assist", version, about = "Render and exchange ComfyUI assistant messages")]
struct Cli {
    /// Config file (defaults to ~/.config/comfy-assist/config.toml)
    #[arg(long, global = true, env = "COMFY_ASSIST_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    User,
    Assistant,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    /// Markup only
    Html,
    /// Markup and bindings as JSON
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Render message content read from a file or stdin
    Render {
        file: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "assistant")]
        role: RoleArg,
        /// Treat the input as a backend message object
        #[arg(long)]
        message_json: bool,
        #[arg(long)]
        prompt_name: Option<String>,
        #[arg(long = "image")]
        images: Vec<String>,
        #[arg(long, value_enum, default_value = "html")]
        format: Format,
    },
    /// Send a message to the assistant and render the reply
    Chat {
        message: String,
        #[arg(long = "image")]
        images: Vec<String>,
        #[arg(long)]
        prompt_id: Option<String>,
        #[arg(long)]
        service: Option<String>,
        #[arg(long, value_enum, default_value = "html")]
        format: Format,
    },
    /// Render a page of stored history
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Continue from this message id
        #[arg(long)]
        before: Option<i64>,
    },
    /// Delete stored history
    ClearHistory,
    /// List models offered by a service
    Models {
        #[arg(long)]
        service: Option<String>,
    },
    /// Queue the workflow embedded in a rendered assistant reply
    RunWorkflow { file: Option<PathBuf> },
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();
}

fn read_input(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) => fs::read_to_string(path).with_context(|| format!("Error reading {}", path.display())),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf).context("Error reading stdin")?;
            Ok(buf)
        }
    }
}

fn print_rendered(rendered: &RenderedMessage, format: Format) -> Result<()> {
    match format {
        Format::Html => println!("{}", rendered.markup),
        Format::Json => println!("{}", serde_json::to_string_pretty(rendered)?),
    }
    Ok(())
}

/// Maps the final run state to the process result so a failed run exits non-zero.
fn workflow_outcome(state: ControlState) -> Result<()> {
    match state {
        ControlState::Success => Ok(()),
        ControlState::Busy => bail!("Workflow run is already in progress"),
        _ => bail!("Workflow was not queued"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::load(),
    };
    let renderer = Renderer::from_config(&config);

    match cli.command {
        Command::Render {
            file,
            role,
            message_json,
            prompt_name,
            images,
            format,
        } => {
            let input = read_input(file.as_ref())?;
            let rendered = if message_json {
                let message: ChatMessage =
                    serde_json::from_str(&input).context("Input is not a message object")?;
                renderer.render_message(&message)
            } else {
                let role = match role {
                    RoleArg::User => Role::User,
                    RoleArg::Assistant => Role::Assistant,
                };
                renderer.classify_and_render(
                    &MessageContent::Text(input),
                    role,
                    prompt_name.as_deref(),
                    &images,
                )
            };
            print_rendered(&rendered, format)?;
        }
        Command::Chat {
            message,
            images,
            prompt_id,
            service,
            format,
        } => {
            let mut client = AssistantClient::with_config(&config);
            if let Some(service) = service {
                client.set_service(service);
            }
            let reply = client.chat(&message, &images, prompt_id.as_deref()).await?;
            print_rendered(&renderer.render_assistant(&reply), format)?;
        }
        Command::History { limit, before } => {
            let client = AssistantClient::with_config(&config);
            let page = client.history(limit, before).await?;
            let (has_more, next_id) = (page.has_more, page.next_id);
            for message in page.into_messages() {
                println!("{}", renderer.render_message(&message).markup);
            }
            if has_more {
                if let Some(id) = next_id {
                    eprintln!("More history available: --before {}", id);
                }
            }
        }
        Command::ClearHistory => {
            AssistantClient::with_config(&config).clear_history().await?;
        }
        Command::Models { service } => {
            let client = AssistantClient::with_config(&config);
            for model in client.models(service.as_deref()).await? {
                match model.as_str() {
                    Some(name) => println!("{}", name),
                    None => println!("{}", model),
                }
            }
        }
        Command::RunWorkflow { file } => {
            let markup = read_input(file.as_ref())?;
            let payload = extract_payload_text(&markup).ok();
            let client = AssistantClient::with_config(&config);
            let client = &client;
            let mut control = Control::run_workflow(&config.controls);
            let state = run_workflow(&mut control, payload.as_deref(), |workflow| async move {
                client.queue_workflow(&workflow).await
            })
            .await;
            println!("{}", control.label());
            workflow_outcome(state)?;
        }
    }

    Ok(())
}
