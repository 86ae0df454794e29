//! Terminal chat widget
//!
//! Talks to a running storefront: every line is relayed to the vendor's
//! WhatsApp and answered by Maya, `/maya <question>` asks Maya only, and
//! vendor replies are printed as the mailbox poller picks them up.

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use trama::assist::WELCOME_MESSAGE;
use trama::client::{ChatInput, ChatSession, MailboxPoller, StorefrontClient};

#[derive(Parser, Debug, Clone)]
#[command(name = "trama-chat")]
#[command(about = "Chat with the Trama Hogar storefront from the terminal")]
struct ChatArgs {
    #[arg(long, default_value = "http://127.0.0.1:9002", help = "Storefront base URL")]
    server: String,

    #[arg(long, help = "Name shown to the vendor (server default if not specified)")]
    name: Option<String>,

    #[arg(long, default_value_t = 5000, help = "Mailbox poll interval in milliseconds")]
    poll_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = ChatArgs::parse();
    let client = StorefrontClient::new(&args.server);

    println!("Maya: {WELCOME_MESSAGE}");
    println!(
        "(type a message for the vendor, `{} <question>` for Maya only, Ctrl+D to quit)",
        ChatInput::ASSIST_COMMAND
    );

    let (tx, mut incoming) = mpsc::channel(32);
    let poller = MailboxPoller::new(client.clone(), Duration::from_millis(args.poll_ms));
    tokio::spawn(poller.run(tx));

    let mut session = ChatSession::new(client, args.name);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            Some(message) = incoming.recv() => {
                println!("{}: {}", message.sender_name, message.text);
                session.receive(&message);
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let Some(input) = ChatInput::parse(&line) else { continue };

                let exchange = session.submit(input).await;
                match exchange.delivery {
                    Some(outcome) if outcome.success => println!("  ✓ sent"),
                    Some(outcome) => println!(
                        "  ✗ not sent: {}",
                        outcome.error.unwrap_or_else(|| "unknown error".to_string())
                    ),
                    None => {}
                }
                println!("Maya: {}", exchange.reply);
            }
        }
    }

    Ok(())
}
