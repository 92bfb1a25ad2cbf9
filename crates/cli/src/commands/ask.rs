//! `lantern ask` — Single-message or interactive chat in the terminal.
//!
//! Goes through the same chat service as the gateway, so replies are budgeted,
//! generated in a worker process and stored like any other chat.

use std::io::Write;

use lantern_config::AppConfig;
use lantern_core::store::ChatId;
use lantern_runtime::{ChatOutcome, ChatRequest, ChatService, NewUserMessage};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

pub async fn run(
    message: Option<String>,
    chat_id: Option<String>,
    system_prompt: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let service = lantern_gateway::build_service(&config)?;
    let mut chat_id = chat_id.map(ChatId);
    debug!(chat_id = ?chat_id.as_ref().map(|id| id.0.as_str()), "Chat session starting");

    if let Some(msg) = message {
        // Single message mode
        eprint!("  Thinking...");
        let outcome = ask_once(&service, &mut chat_id, &system_prompt, msg).await;
        eprint!("\r              \r");
        match outcome? {
            Some(reply) => println!("{reply}"),
            None => eprintln!("  [Stopped]"),
        }
        return Ok(());
    }

    println!();
    println!("  Lantern — Interactive Mode");
    println!();
    println!("  Engine:   {} ({})", config.engine.kind, config.engine.model);
    println!("  Context:  {} tokens", config.context.max_context_tokens);
    println!();
    println!("  Type your message and press Enter.");
    println!("  Ctrl+C stops a reply in progress. Type 'exit' to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "exit" {
            break;
        }

        eprint!("  ...");
        let outcome = tokio::select! {
            outcome = ask_once(&service, &mut chat_id, &system_prompt, line) => outcome,
            _ = tokio::signal::ctrl_c() => {
                let stopped = service.cancel_current().await;
                info!(stopped, "Reply interrupted");
                Ok(None)
            }
        };
        eprint!("\r     \r");

        match outcome {
            Ok(Some(reply)) => {
                println!();
                for line in reply.lines() {
                    println!("  Assistant > {line}");
                }
                println!();
            }
            Ok(None) => eprintln!("  [Stopped]"),
            Err(e) => eprintln!("  [Error] {e}"),
        }
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

/// Send one message, remembering the chat id for the next one. `None` means
/// the reply was stopped.
async fn ask_once(
    service: &ChatService,
    chat_id: &mut Option<ChatId>,
    system_prompt: &Option<String>,
    text: String,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let request = ChatRequest {
        chat_id: chat_id.clone(),
        message: NewUserMessage::text(text),
        system_prompt: system_prompt.clone(),
    };
    match service.submit_chat(request).await? {
        ChatOutcome::Reply(reply) => {
            *chat_id = Some(reply.chat_id);
            Ok(Some(reply.reply))
        }
        ChatOutcome::Stopped => Ok(None),
    }
}
