use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    CancelOutcome, ChatBackend, ConversationController, ConversationEvent, HttpChatBackend,
    IgnoreReason, LocalChatBackend, RelayStatus, SubmitOutcome,
};
use relay::{parse_http_url, HttpInterpreter, RelayContext};
use shared::domain::{Message, Role};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Chat with the dream interpreter")]
struct Args {
    /// Relay server to talk to.
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    relay_url: String,
    /// Skip the relay server and call this interpretation endpoint directly.
    #[arg(long)]
    upstream_url: Option<String>,
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,
}

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Prompt(&'a str),
    Cancel,
    History,
    Quit,
    Unknown(&'a str),
}

fn parse_command(line: &str) -> Command<'_> {
    let trimmed = line.trim();
    match trimmed {
        "/cancel" => Command::Cancel,
        "/history" => Command::History,
        "/quit" | "/exit" => Command::Quit,
        other if other.starts_with('/') => Command::Unknown(other),
        _ => Command::Prompt(line),
    }
}

fn render_message(message: &Message) -> String {
    let speaker = match message.role {
        Role::User => "you",
        Role::Assistant => "interpreter",
    };
    format!("{speaker}> {}", message.content)
}

fn build_backend(args: &Args) -> Result<Arc<dyn ChatBackend>> {
    let timeout = Duration::from_secs(args.timeout_secs);
    match &args.upstream_url {
        Some(upstream) => {
            let endpoint = parse_http_url(upstream).context("--upstream-url")?;
            info!(%endpoint, "relaying in-process");
            let interpreter = HttpInterpreter::new(endpoint, timeout)?;
            Ok(Arc::new(LocalChatBackend::new(RelayContext::new(Arc::new(
                interpreter,
            )))))
        }
        None => {
            let backend = HttpChatBackend::new(&args.relay_url, timeout)?;
            info!(url = %backend.chat_url(), "using relay server");
            Ok(Arc::new(backend))
        }
    }
}

/// Admits the prompt before returning, so a `/cancel` on the next line
/// always finds it in flight. Only the wait for the reply is spawned.
fn submit_prompt(
    controller: &Arc<ConversationController>,
    text: &str,
) -> Result<JoinHandle<SubmitOutcome>, IgnoreReason> {
    let pending = controller.start(text)?;
    Ok(tokio::spawn(async move {
        let outcome = pending.wait().await;
        debug!(?outcome, "submit finished");
        outcome
    }))
}

async fn print_events(mut events: broadcast::Receiver<ConversationEvent>) {
    loop {
        match events.recv().await {
            Ok(ConversationEvent::MessageAppended(message)) if message.role == Role::Assistant => {
                println!("{}", render_message(&message));
            }
            Ok(ConversationEvent::RequestStarted { generation }) => {
                debug!(generation, "waiting for interpretation");
                println!("... interpreting (type /cancel to stop)");
            }
            Ok(ConversationEvent::RequestFinished {
                status: Some(RelayStatus::Failed(kind)),
                ..
            }) => {
                warn!(?kind, "interpretation failed");
            }
            Ok(ConversationEvent::RequestCancelled { .. }) => println!("(cancelled)"),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let controller = ConversationController::new(build_backend(&args)?);
    tokio::spawn(print_events(controller.subscribe_events()));

    println!("Describe your dream. Commands: /cancel /history /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Command::Prompt(text) => match submit_prompt(&controller, text) {
                Ok(_) => {}
                Err(IgnoreReason::Busy) => {
                    println!("(still waiting for the previous interpretation)");
                }
                Err(IgnoreReason::Empty) => debug!("empty prompt ignored"),
            },
            Command::Cancel => {
                if controller.cancel() == CancelOutcome::Idle {
                    println!("(nothing to cancel)");
                }
            }
            Command::History => {
                for message in controller.transcript() {
                    println!("{}", render_message(&message));
                }
            }
            Command::Quit => break,
            Command::Unknown(cmd) => println!("unknown command {cmd}"),
        }
    }

    controller.cancel();
    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
