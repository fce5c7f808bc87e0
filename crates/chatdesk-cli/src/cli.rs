//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Override the authentication service URL
    #[arg(long)]
    pub api_url: Option<String>,

    /// Override the realtime service URL
    #[arg(long)]
    pub realtime_url: Option<String>,

    /// Data directory for the session store
    #[arg(short, long)]
    pub data_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with email and password
    Login {
        #[arg(short, long)]
        email: String,
        /// Read from CHATDESK_PASSWORD when omitted
        #[arg(short, long, env = "CHATDESK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account and sign in
    Register {
        #[arg(short, long)]
        email: String,
        #[arg(short, long, env = "CHATDESK_PASSWORD", hide_env_values = true)]
        password: String,
        /// Display name
        #[arg(short, long)]
        name: String,
    },
    /// Sign out and forget stored tokens
    Logout,
    /// Show the signed-in user's profile
    Profile,
    /// Show stored token state
    Status,
    /// Start the interactive support chat
    Chat {
        /// Room to join after connecting
        #[arg(short, long)]
        room: Option<String>,
    },
    /// Show or change the color theme
    Theme {
        #[arg(value_enum)]
        action: Option<ThemeAction>,
    },
    /// Show whether the tips of a page were dismissed
    Tips {
        /// Page name, e.g. "dashboard"
        page: String,
        /// Show the tips again next time
        #[arg(long)]
        reset: bool,
    },
    /// Inspect or write the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print an example configuration
    Example,
    /// Print where the configuration file is read from
    Path,
    /// Write the effective configuration to the configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ThemeAction {
    Light,
    Dark,
    Toggle,
}
