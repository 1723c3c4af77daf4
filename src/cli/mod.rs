use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod accounts;
pub mod config;
pub mod context;
pub mod forget;
pub mod inbox;
pub mod listen;
pub mod login;
pub mod serve;
pub mod version;

use config::{default_config_path, CourierConfig};

#[derive(Parser)]
#[command(name = "courier")]
#[command(author = "Courier Project")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Session manager for messaging network accounts", long_about = None)]
pub struct Cli {
    /// Path to config file (default: ~/.local/share/courier/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log an account in interactively and store its credential
    Login {
        /// Phone number in international format (e.g., +15551234567)
        #[arg(long)]
        phone: String,
    },

    /// Keep every stored account connected and record incoming messages
    Listen,

    /// Run the HTTP API
    Serve {
        /// Listen address, overrides `[api] bind`
        #[arg(long)]
        bind: Option<String>,

        /// Also run the listener pool in this process
        #[arg(long)]
        with_listeners: bool,
    },

    /// List stored accounts
    Accounts,

    /// Show messages recorded for an account
    Inbox {
        #[arg(long)]
        account: String,

        /// Number of most recent messages to show
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Remove a stored account and its credential
    Forget {
        #[arg(long)]
        account: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },

    /// Display version information
    Version,
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Commands::Version = cli.command {
        version::execute(cli.config);
        return Ok(());
    }

    let config = load_config(cli.config)?;
    courier::logging::init(&config.logging.level, config.logging.file.as_deref())
        .map_err(|e| format!("Failed to initialize logging: {}", e))?;

    match cli.command {
        Commands::Login { phone } => login::execute(config, phone).await,
        Commands::Listen => listen::execute(config).await,
        Commands::Serve {
            bind,
            with_listeners,
        } => serve::execute(config, bind, with_listeners).await,
        Commands::Accounts => accounts::execute(config).await,
        Commands::Inbox { account, limit } => inbox::execute(config, account, limit).await,
        Commands::Forget { account, yes } => forget::execute(config, account, yes).await,
        Commands::Version => Ok(()),
    }
}

/// Load the config file (creating a default one on first run) and apply
/// environment overrides.
fn load_config(path: Option<PathBuf>) -> Result<CourierConfig, Box<dyn std::error::Error>> {
    let path = path.unwrap_or_else(default_config_path);
    let (mut config, created) = CourierConfig::load_or_create(&path)?;
    if created {
        eprintln!("📝 Created default configuration: {}", path.display());
    }
    config.apply_env();
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_login() {
        let cli = Cli::parse_from(["courier", "login", "--phone", "+15551234567"]);

        assert_eq!(cli.config, None);
        match cli.command {
            Commands::Login { phone } => assert_eq!(phone, "+15551234567"),
            _ => panic!("Expected Login command"),
        }
    }

    #[test]
    fn test_cli_parse_login_requires_phone() {
        assert!(Cli::try_parse_from(["courier", "login"]).is_err());
    }

    #[test]
    fn test_cli_parse_global_config() {
        let cli = Cli::parse_from(["courier", "listen", "--config", "/etc/courier/config.toml"]);

        assert_eq!(cli.config, Some(PathBuf::from("/etc/courier/config.toml")));
        assert!(matches!(cli.command, Commands::Listen));
    }

    #[test]
    fn test_cli_parse_serve_defaults() {
        let cli = Cli::parse_from(["courier", "serve"]);

        match cli.command {
            Commands::Serve {
                bind,
                with_listeners,
            } => {
                assert_eq!(bind, None);
                assert!(!with_listeners);
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_parse_serve_with_options() {
        let cli = Cli::parse_from([
            "courier",
            "serve",
            "--bind",
            "0.0.0.0:9000",
            "--with-listeners",
        ]);

        match cli.command {
            Commands::Serve {
                bind,
                with_listeners,
            } => {
                assert_eq!(bind, Some("0.0.0.0:9000".to_string()));
                assert!(with_listeners);
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_parse_inbox() {
        let cli = Cli::parse_from(["courier", "inbox", "--account", "+15551234567"]);

        match cli.command {
            Commands::Inbox { account, limit } => {
                assert_eq!(account, "+15551234567");
                assert_eq!(limit, 20); // default
            }
            _ => panic!("Expected Inbox command"),
        }
    }

    #[test]
    fn test_cli_parse_forget() {
        let cli = Cli::parse_from(["courier", "forget", "--account", "+15551234567", "-y"]);

        match cli.command {
            Commands::Forget { account, yes } => {
                assert_eq!(account, "+15551234567");
                assert!(yes);
            }
            _ => panic!("Expected Forget command"),
        }
    }

    #[test]
    fn test_cli_parse_accounts_and_version() {
        let cli = Cli::parse_from(["courier", "accounts"]);
        assert!(matches!(cli.command, Commands::Accounts));

        let cli = Cli::parse_from(["courier", "version"]);
        assert!(matches!(cli.command, Commands::Version));
    }
}
