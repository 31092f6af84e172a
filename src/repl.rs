use std::io::Write as _;
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::models::{Attachment, MessageStatus, ModelTier, Role};
use crate::services::auth::KeyAccess;
use crate::services::{ChatSession, GateState, KeyringStore, SendError};

/// Key-selection capability over the system keyring: "selecting" a key
/// means pasting it at a prompt.
pub struct TerminalKeyPicker {
    keys: KeyringStore,
}

impl TerminalKeyPicker {
    pub fn new(keys: KeyringStore) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl KeyAccess for TerminalKeyPicker {
    async fn has_key(&self) -> Result<bool> {
        Ok(self.keys.retrieve().await?.is_some())
    }

    async fn open_key_selection(&self) -> Result<()> {
        print!("Paste your provider API key: ");
        std::io::stdout().flush().ok();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let line = lines
            .next_line()
            .await
            .context("Failed to read key from terminal")?
            .unwrap_or_default();
        let key = line.trim();
        if key.is_empty() {
            bail!("no key entered");
        }
        self.keys.store(key).await
    }

    async fn api_key(&self) -> Result<Option<String>> {
        self.keys.retrieve().await
    }
}

enum Flow {
    Continue,
    Quit,
}

pub async fn run(mut session: ChatSession) -> Result<()> {
    println!("Nexus ready. Type a message, or /help for commands.");

    if session.resolve_gate().await != GateState::Available {
        println!("No API key linked. Use /connect to link one.");
    }

    render_history(&session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: Vec<Attachment> = Vec::new();

    loop {
        prompt("you> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            match handle_command(command, &mut session, &mut pending, &mut lines).await {
                Ok(Flow::Quit) => break,
                Ok(Flow::Continue) => {}
                Err(e) => println!("{e:#}"),
            }
            continue;
        }

        send_message(&mut session, line, std::mem::take(&mut pending)).await;
    }

    Ok(())
}

async fn handle_command(
    command: &str,
    session: &mut ChatSession,
    pending: &mut Vec<Attachment>,
    lines: &mut Lines<BufReader<Stdin>>,
) -> Result<Flow> {
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    match name {
        "quit" | "q" => return Ok(Flow::Quit),
        "help" => {
            println!("/model [fast|deep]   show or switch the model tier");
            println!("/attach <path>       queue an image for the next message");
            println!("/clear               erase all local chat history");
            println!("/connect             link a provider API key");
            println!("/quit                leave");
        }
        "connect" => {
            session.connect().await?;
            println!("Key linked. You can chat now.");
        }
        "model" => {
            if arg.is_empty() {
                println!("model tier: {}", session.tier().label());
            } else {
                let tier = ModelTier::from_str(arg)
                    .with_context(|| format!("unknown tier {arg:?}; use fast or deep"))?;
                session.set_tier(tier)?;
                println!("model tier: {}", tier.label());
            }
        }
        "attach" => {
            if arg.is_empty() {
                bail!("usage: /attach <path>");
            }
            let path = Path::new(arg);
            let mime = mime_for_path(path)
                .with_context(|| format!("unsupported attachment type: {arg}"))?;
            let bytes =
                std::fs::read(path).with_context(|| format!("could not read {arg}"))?;
            pending.push(Attachment::from_bytes(mime, &bytes));
            println!("queued {} ({} attachment(s) pending)", arg, pending.len());
        }
        "clear" => {
            prompt("Erase all local chat history? [y/N] ");
            let answer = lines.next_line().await?.unwrap_or_default();
            if matches!(answer.trim(), "y" | "Y" | "yes") {
                session.clear_history()?;
                println!("History cleared.");
            } else {
                println!("Kept.");
            }
        }
        _ => bail!("unknown command /{name}; try /help"),
    }

    Ok(Flow::Continue)
}

async fn send_message(session: &mut ChatSession, text: String, attachments: Vec<Attachment>) {
    prompt("nexus> ");

    let result = session
        .send(text, attachments, |token| {
            print!("{token}");
            std::io::stdout().flush().ok();
        })
        .await;

    match result {
        Ok(MessageStatus::Ok) => println!(),
        Ok(_) => {
            // The notice replaced the streamed content; show it.
            let notice = session
                .messages()
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            println!();
            println!("! {notice}");
        }
        Err(SendError::Busy) => println!("Still responding to the previous message."),
        Err(SendError::NotConnected) => println!("No API key linked. Use /connect first."),
        Err(SendError::KeyUnavailable) => {
            println!("No API key could be resolved. Use /connect or set NEXUS_API_KEY.")
        }
        Err(SendError::Internal(e)) => {
            tracing::error!("turn aborted: {:#}", e);
            println!("Internal error: {e:#}");
        }
    }
}

fn render_history(session: &ChatSession) {
    for msg in session.messages() {
        let speaker = match msg.role {
            Role::User => "you",
            Role::Assistant => "nexus",
        };
        if msg.attachments.is_empty() {
            println!("{speaker}> {}", msg.content);
        } else {
            println!(
                "{speaker}> {} [{} attachment(s)]",
                msg.content,
                msg.attachments.len()
            );
        }
    }
}

fn prompt(text: &str) {
    print!("{text}");
    std::io::stdout().flush().ok();
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}
