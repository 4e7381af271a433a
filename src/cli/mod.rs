use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::app::Workspace;
use crate::config::{ConfigLoader, CONFIG_ENV, DATA_ENV};

pub mod commands;

use self::commands::{EditArgs, ExportArgs, ListArgs, LoginArgs, NewArgs, RegisterArgs, TagsArgs};

#[derive(Parser, Debug)]
#[command(
    name = "nexonotes",
    version,
    about = "Rich-text notes with tags, attachments and export"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the config file location (takes precedence over NEXONOTES_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over NEXONOTES_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an account and sign in
    Register(RegisterArgs),
    /// Sign in with email and password
    Login(LoginArgs),
    /// Forget the remembered session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Create a note
    New(NewArgs),
    /// List notes, optionally filtered and sorted
    List(ListArgs),
    /// Print a note
    Show {
        /// Note identifier
        id: String,
    },
    /// Change a note
    Edit(EditArgs),
    /// Delete a note and its attachments
    Delete {
        /// Note identifier
        id: String,
    },
    /// List the tags in use
    Tags(TagsArgs),
    /// Write a note to a standalone HTML file
    Export(ExportArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var(CONFIG_ENV, path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var(DATA_ENV, path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = Arc::new(loader.load_or_init()?);
    let mut workspace = Workspace::open_local(config, &paths)?;

    match cli.command {
        Commands::Register(args) => commands::register(&mut workspace, args),
        Commands::Login(args) => commands::login(&mut workspace, args),
        Commands::Logout => commands::logout(&mut workspace),
        Commands::Whoami => commands::whoami(&workspace),
        Commands::New(args) => commands::new_note(&workspace, args),
        Commands::List(args) => commands::list_notes(&mut workspace, args),
        Commands::Show { id } => commands::show_note(&workspace, &id),
        Commands::Edit(args) => commands::edit_note(&workspace, args),
        Commands::Delete { id } => commands::delete_note(&workspace, &id),
        Commands::Tags(args) => commands::list_tags(&mut workspace, args),
        Commands::Export(args) => {
            let dir = args.dir.clone().unwrap_or_else(|| paths.export_dir.clone());
            commands::export_note(&workspace, &args.id, &dir)
        }
    }
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(())
    })
    .map(|_| ())
}
