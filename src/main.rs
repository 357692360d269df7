//! ZatChat CLI - terminal client for the ZatChat rooms-and-messages backend
//!
//! One-shot commands talk REST (plus a short socket connection where the
//! backend expects an event); `chat` opens a live session.

mod api;
mod config;
mod directory;
mod error;
mod live;
mod models;
mod reconciler;
mod socket;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use models::UserSettings;

#[derive(Parser)]
#[command(name = "zatchat-cli")]
#[command(about = "Lightweight CLI client for ZatChat", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in (creating the profile on first use)
    Login {
        /// 3-20 characters: letters, digits and underscores
        username: String,
    },

    /// Forget the logged-in user
    Logout,

    /// Show local session state and backend reachability
    Status,

    /// Show the current user's profile
    Whoami,

    /// List rooms, most recent first
    Rooms,

    /// Print a room's message history
    History {
        /// Room ID (from `rooms` output)
        room: String,

        /// Maximum number of messages to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Open a live chat session
    Chat {
        /// Room ID; defaults to the last opened room
        room: Option<String>,
    },

    /// Send a message
    Send {
        /// Room ID or username
        #[arg(short, long)]
        to: String,

        /// Message content
        message: String,

        /// ID of the message being replied to
        #[arg(short, long)]
        reply_to: Option<String>,
    },

    /// Upload a file (max 10MB) and send it
    Upload {
        /// Room ID or username
        #[arg(short, long)]
        to: String,

        path: PathBuf,
    },

    /// Delete a message
    Delete {
        message_id: String,

        /// Delete for everyone instead of only for you
        #[arg(long)]
        everyone: bool,
    },

    /// Forward messages to other rooms
    Forward {
        /// Target room IDs
        #[arg(short, long, required = true, num_args = 1..)]
        to: Vec<String>,

        /// Message IDs to forward
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Start a 1:1 chat with a user
    NewChat { user: String },

    /// Create a group with at least two other members
    CreateGroup {
        name: String,

        #[arg(required = true, num_args = 2..)]
        members: Vec<String>,
    },

    /// Add members to a group
    AddMembers {
        group: String,

        #[arg(required = true)]
        members: Vec<String>,
    },

    /// Remove a member from a group you created
    RemoveMember { group: String, user: String },

    /// Leave a group
    LeaveGroup { group: String },

    /// Rename a group
    RenameGroup { group: String, name: String },

    /// List images and files shared in a room
    Media { room: String },

    /// Show or change settings and profile
    Settings {
        #[arg(long)]
        theme: Option<String>,

        #[arg(long)]
        wallpaper: Option<String>,

        /// on or off
        #[arg(long)]
        notifications: Option<Toggle>,

        /// on or off
        #[arg(long)]
        sound: Option<Toggle>,

        #[arg(long)]
        display_name: Option<String>,

        #[arg(long)]
        bio: Option<String>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Login { username } => {
            api::login(&username).await?;
        }
        Commands::Logout => {
            api::logout().await?;
        }
        Commands::Status => {
            api::status().await?;
        }
        Commands::Whoami => {
            api::whoami().await?;
        }
        Commands::Rooms => {
            tracing::info!("Fetching rooms...");
            api::list_rooms().await?;
        }
        Commands::History { room, limit } => {
            api::show_history(&room, limit).await?;
        }
        Commands::Chat { room } => {
            live::run(room).await?;
        }
        Commands::Send {
            to,
            message,
            reply_to,
        } => {
            tracing::info!("Sending message...");
            live::actions::send(&to, &message, reply_to.as_deref()).await?;
        }
        Commands::Upload { to, path } => {
            live::actions::upload(&to, &path).await?;
        }
        Commands::Delete {
            message_id,
            everyone,
        } => {
            api::delete_message(&message_id, everyone).await?;
        }
        Commands::Forward { to, ids } => {
            live::actions::forward(&to, &ids).await?;
        }
        Commands::NewChat { user } => {
            api::new_chat(&user).await?;
        }
        Commands::CreateGroup { name, members } => {
            live::actions::create_group(&name, &members).await?;
        }
        Commands::AddMembers { group, members } => {
            live::actions::add_members(&group, &members).await?;
        }
        Commands::RemoveMember { group, user } => {
            live::actions::remove_member(&group, &user).await?;
        }
        Commands::LeaveGroup { group } => {
            live::actions::leave_group(&group).await?;
        }
        Commands::RenameGroup { group, name } => {
            live::actions::rename_group(&group, &name).await?;
        }
        Commands::Media { room } => {
            api::list_media(&room).await?;
        }
        Commands::Settings {
            theme,
            wallpaper,
            notifications,
            sound,
            display_name,
            bio,
        } => {
            let settings = UserSettings {
                theme,
                wallpaper,
                notification_enabled: notifications.map(|t| matches!(t, Toggle::On)),
                sound_enabled: sound.map(|t| matches!(t, Toggle::On)),
            };
            api::settings(settings, display_name, bio).await?;
        }
    }

    Ok(())
}
