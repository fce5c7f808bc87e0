//! Chatdesk CLI library
//!
//! Terminal front end for the Chatdesk support chat: account commands,
//! the interactive chat session and locally stored preferences.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod prefs;
pub mod session;
pub mod tips;

pub use app::ChatdeskApp;
pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{CliError, Result};
pub use prefs::{Preferences, Theme};
