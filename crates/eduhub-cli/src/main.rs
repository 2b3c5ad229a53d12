//! eduhub - command-line client for the eduhub learning-materials platform.
//!
//! Browse and search the shared catalog, manage favorites, rate and comment
//! on materials, and upload your own. The session survives between runs in
//! the configured token store.

mod commands;

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use eduhub_core::models::{MaterialType, SortOrder};

/// Command line interface for eduhub
#[derive(Parser, Debug)]
#[command(name = "eduhub")]
#[command(about = "Share and discover educational materials from the terminal")]
#[command(version)]
struct Cli {
    /// API base URL (overrides EDUHUB_API_URL and the config file)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in; the password is prompted for
    Login {
        /// Defaults to the last email used
        email: Option<String>,
    },
    /// Sign out and forget the stored tokens
    Logout,
    /// Show the signed-in user and their activity
    Whoami {
        #[arg(long)]
        json: bool,
    },
    /// Create an account; the password is prompted for
    Register {
        email: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        /// reCAPTCHA response token
        #[arg(long)]
        captcha: String,
    },
    /// Email a password reset link
    ForgotPassword { email: String },
    /// Set a new password from a reset link's uid and token
    ResetPassword { uid: String, token: String },
    /// Confirm an email address from a verification link's uid and token
    VerifyEmail { uid: String, token: String },
    /// List materials
    Materials(MaterialsArgs),
    /// Show one material with its rating and comments
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Upload a material from a file or a video link
    Upload {
        title: String,
        #[arg(short, long, default_value = "")]
        description: String,
        /// ficha, presentacion, video (English names accepted)
        #[arg(short = 't', long = "type", default_value = "ficha")]
        kind: MaterialType,
        #[arg(short, long, conflicts_with = "video_url")]
        file: Option<PathBuf>,
        #[arg(long)]
        video_url: Option<String>,
    },
    /// Delete one of your materials
    Delete { id: i64 },
    /// List your favorite materials
    Favorites {
        #[arg(short, long, default_value_t = 1)]
        page: usize,
    },
    /// Add a material to your favorites
    Fav { id: i64 },
    /// Remove a material from your favorites
    Unfav { id: i64 },
    /// Rate a material from 1 to 5
    Rate { id: i64, score: u8 },
    /// List a material's comments
    Comments { id: i64 },
    /// Add, edit or delete a comment
    #[command(subcommand)]
    Comment(CommentCommand),
}

#[derive(clap::Args, Debug)]
struct MaterialsArgs {
    /// Match in title or description
    #[arg(short, long, default_value = "")]
    search: String,
    #[arg(short = 't', long = "type")]
    kind: Option<MaterialType>,
    /// Owner email
    #[arg(long)]
    author: Option<String>,
    /// newest, oldest, rating, title
    #[arg(long, default_value = "newest")]
    sort: SortOrder,
    /// Created on or after (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Created on or before (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,
    /// Only materials you uploaded
    #[arg(long)]
    mine: bool,
    #[arg(short, long, default_value_t = 1)]
    page: usize,
}

#[derive(Subcommand, Debug)]
enum CommentCommand {
    /// Comment on a material
    Add { material: i64, text: String },
    /// Replace the text of one of your comments
    Edit { comment: i64, text: String },
    /// Delete one of your comments
    Delete { comment: i64 },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=eduhub_core=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    let cli = Cli::parse();
    debug!(command = ?cli.command, "eduhub starting");

    let ctx = commands::Context::open(cli.api_url).await?;
    commands::run(&ctx, cli.command).await
}
