//! Command handlers for the Chatdesk CLI

use std::path::PathBuf;
use std::time::SystemTime;

use tracing::{info, warn};

use chatdesk_core::{preview_token, TokenClaims};

use crate::app::ChatdeskApp;
use crate::cli::{Cli, Commands, ConfigAction, ThemeAction};
use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::prefs::Theme;
use crate::session::ChatSession;
use crate::tips::tips_for;

/// Page whose tips accompany the chat session
const CHAT_PAGE: &str = "dashboard";

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, app: ChatdeskApp) -> Result<()> {
        match cli.command {
            Commands::Login { email, password } => {
                Self::handle_login_command(&app, &email, &password).await
            }
            Commands::Register {
                email,
                password,
                name,
            } => Self::handle_register_command(&app, &email, &password, &name).await,
            Commands::Logout => Self::handle_logout_command(&app).await,
            Commands::Profile => Self::handle_profile_command(&app).await,
            Commands::Status => Self::handle_status_command(&app),
            Commands::Chat { room } => Self::handle_chat_command(app, room).await,
            Commands::Theme { action } => Self::handle_theme_command(&app, action),
            Commands::Tips { page, reset } => Self::handle_tips_command(&app, &page, reset),
            Commands::Config { action } => {
                Self::handle_config_command(&app, action, cli.config.map(PathBuf::from))
            }
        }
    }

    async fn handle_login_command(app: &ChatdeskApp, email: &str, password: &str) -> Result<()> {
        let session = app.tokens.login(email, password).await?;
        println!("Signed in as {} ({})", session.user.email, session.user.name);
        Ok(())
    }

    async fn handle_register_command(
        app: &ChatdeskApp,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<()> {
        let session = app.tokens.register(email, password, name).await?;
        println!("Account created; signed in as {}", session.user.email);
        Ok(())
    }

    async fn handle_logout_command(app: &ChatdeskApp) -> Result<()> {
        if !app.tokens.is_authenticated() {
            println!("Not signed in");
            return Ok(());
        }
        app.tokens.logout().await;
        println!("Signed out");
        Ok(())
    }

    async fn handle_profile_command(app: &ChatdeskApp) -> Result<()> {
        Self::require_session(app)?;
        let user = app.tokens.profile().await?;
        println!("Email: {}", user.email);
        println!("Name:  {}", user.name);
        println!("ID:    {}", user.id);
        if let Some(created_at) = &user.created_at {
            println!("Since: {}", created_at);
        }
        Ok(())
    }

    /// Show stored token state
    fn handle_status_command(app: &ChatdeskApp) -> Result<()> {
        app.tokens.debug_token_state();

        let Some(access) = app.tokens.get_access_token() else {
            println!("Signed out");
            return Ok(());
        };

        println!("Signed in: {}", app.tokens.is_authenticated());
        println!("Access token:  {}", preview_token(&access));
        if let Some(refresh) = app.tokens.get_refresh_token() {
            println!("Refresh token: {}", preview_token(&refresh));
        }

        match TokenClaims::decode(&access) {
            Ok(claims) => {
                if let Some(email) = &claims.email {
                    println!("Account: {}", email);
                }
                let now = SystemTime::now();
                match claims.remaining_at(now) {
                    _ if claims.is_expired_at(now) => {
                        println!("Access token expired; it will be refreshed on next use")
                    }
                    Some(remaining) => println!("Expires in {}s", remaining.as_secs()),
                    None => println!("Access token carries no expiry"),
                }
            }
            Err(e) => warn!("Could not decode access token: {}", e),
        }
        Ok(())
    }

    async fn handle_chat_command(app: ChatdeskApp, room: Option<String>) -> Result<()> {
        Self::require_session(&app)?;

        if !app.prefs.tips_seen(CHAT_PAGE) {
            Self::print_tips(CHAT_PAGE);
            app.prefs.mark_tips_seen(CHAT_PAGE)?;
        }

        info!("Starting interactive chat");
        let client = app.realtime_client()?;
        let session = ChatSession::new(client, app.tokens.clone(), app.config.cli.clone(), room);
        session.run().await
    }

    fn handle_theme_command(app: &ChatdeskApp, action: Option<ThemeAction>) -> Result<()> {
        let theme = match action {
            None => app.prefs.theme(),
            Some(ThemeAction::Toggle) => app.prefs.toggle_theme()?,
            Some(ThemeAction::Light) => {
                app.prefs.set_theme(Theme::Light)?;
                Theme::Light
            }
            Some(ThemeAction::Dark) => {
                app.prefs.set_theme(Theme::Dark)?;
                Theme::Dark
            }
        };
        println!("Theme: {}", theme);
        Ok(())
    }

    fn handle_tips_command(app: &ChatdeskApp, page: &str, reset: bool) -> Result<()> {
        if reset {
            app.prefs.reset_tips(page)?;
            println!("Tips for {} will be shown again", page);
            return Ok(());
        }

        if app.prefs.tips_seen(page) {
            println!("Tips for {} were already dismissed (use --reset to see them again)", page);
            return Ok(());
        }

        Self::print_tips(page);
        app.prefs.mark_tips_seen(page)?;
        Ok(())
    }

    /// `config_file` is the `--config` path; the per-user file otherwise
    fn handle_config_command(
        app: &ChatdeskApp,
        action: ConfigAction,
        config_file: Option<PathBuf>,
    ) -> Result<()> {
        let path = match config_file {
            Some(path) => path,
            None => AppConfig::default_config_path()?,
        };

        match action {
            ConfigAction::Show => print!("{}", app.config.to_toml()?),
            ConfigAction::Example => print!("{}", AppConfig::example_config()),
            ConfigAction::Path => println!("{}", path.display()),
            ConfigAction::Init { force } => {
                if path.exists() && !force {
                    return Err(CliError::Config(format!(
                        "{} already exists (use --force to overwrite)",
                        path.display()
                    )));
                }
                app.config.save_to_file(&path)?;
                info!("Wrote configuration to {}", path.display());
                println!("Configuration written to {}", path.display());
            }
        }
        Ok(())
    }

    fn print_tips(page: &str) {
        let mut any = false;
        for tip in tips_for(page) {
            println!("- {}: {}", tip.title, tip.content);
            any = true;
        }
        if !any {
            println!("No tips for {}", page);
        }
    }

    fn require_session(app: &ChatdeskApp) -> Result<()> {
        if app.tokens.is_authenticated() {
            Ok(())
        } else {
            Err(CliError::NotSignedIn)
        }
    }
}
