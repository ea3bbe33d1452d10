use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use carechat::{
    BackendConfig, CarechatConfig, ChatSession, ConversationContext, ConversationKind, DateGroup,
    RestBackend, SenderRole, Session,
};

/// Command line client for the carechat core
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Directory for application data
    #[clap(long, value_name = "PATH", default_value = "./carechat-data")]
    data_dir: PathBuf,

    /// Directory for application logs
    #[clap(long, value_name = "PATH", default_value = "./carechat-logs")]
    logs_dir: PathBuf,

    /// Id of the signed-in user
    #[clap(long)]
    user_id: String,

    /// Role of the signed-in user (patient, doctor, admin, reception)
    #[clap(long, default_value = "patient")]
    role: String,

    /// Access token for the backend
    #[clap(long)]
    token: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a conversation's history grouped by day
    History {
        #[clap(long)]
        conversation: String,

        /// direct, room or care-team
        #[clap(long, default_value = "direct", value_parser = parse_kind)]
        kind: ConversationKind,

        /// Number of pages to load
        #[clap(long, default_value_t = 1)]
        pages: u32,
    },
    /// Send a message and wait for it, and any assistant reply, to land
    Send {
        #[clap(long)]
        conversation: String,

        #[clap(long, default_value = "direct", value_parser = parse_kind)]
        kind: ConversationKind,

        #[clap(long)]
        body: String,
    },
}

fn parse_kind(value: &str) -> Result<ConversationKind, String> {
    match value.trim().to_lowercase().as_str() {
        "direct" => Ok(ConversationKind::Direct),
        "room" => Ok(ConversationKind::Room),
        "care-team" | "care_team" | "careteam" => Ok(ConversationKind::CareTeam),
        other => Err(format!("unknown conversation kind: {}", other)),
    }
}

fn print_groups(groups: &[DateGroup]) {
    for group in groups {
        println!("== {} ==", group.key);
        for message in &group.messages {
            let time = message
                .created_at
                .as_datetime()
                .map(|dt| dt.format("%H:%M").to_string())
                .unwrap_or_else(|| "--:--".to_string());
            println!(
                "  [{}] {} {}: {}",
                time, message.sender_role, message.sender_id, message.body
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = CarechatConfig::new(&args.data_dir, &args.logs_dir);
    carechat::init_tracing(&config.logs_dir)?;

    let backend_config = BackendConfig::from_env()?;
    let session = Session::new(
        args.user_id,
        SenderRole::from_label(&args.role),
        args.token,
    );
    let backend = Arc::new(RestBackend::new(&backend_config, &session)?);
    let chat = ChatSession::new(session, config.chat, backend.clone(), backend)?;

    match args.command {
        Command::History {
            conversation,
            kind,
            pages,
        } => {
            chat.open(ConversationContext::new(conversation, kind)).await?;
            for _ in 1..pages {
                if !chat.load_older().await? {
                    break;
                }
            }
            print_groups(&chat.date_groups());
            tracing::info!(
                target: "carechat::cli",
                "Loaded {} messages",
                chat.statistics().message_count
            );
        }
        Command::Send {
            conversation,
            kind,
            body,
        } => {
            chat.open(ConversationContext::new(conversation, kind)).await?;
            let server_id = chat.send_and_wait(&body).await?;
            println!("sent {}", server_id);

            if let Some(reply) = chat
                .messages()
                .into_iter()
                .rev()
                .find(|m| m.is_assistant_message)
            {
                println!("assistant: {}", reply.body);
            }
        }
    }

    chat.close();
    Ok(())
}
