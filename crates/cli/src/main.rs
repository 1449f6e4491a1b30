//! ZandMarket CLI - database migrations and operational switches.
//!
//! # Usage
//!
//! ```bash
//! # Apply pending migrations
//! zm-cli migrate
//!
//! # Pause / resume checkout
//! zm-cli ordering disable
//! zm-cli ordering enable
//! zm-cli ordering status
//!
//! # Promote an existing account to admin
//! zm-cli admin grant -e ops@zandmarket.test
//! ```
//!
//! All commands read `DATABASE_URL` (a `.env` file is honoured).

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "zm-cli")]
#[command(author, version, about = "ZandMarket CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Turn checkout on or off for the whole shop
    Ordering {
        #[command(subcommand)]
        action: OrderingAction,
    },
    /// Manage the admin flag on existing accounts
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
}

#[derive(Subcommand)]
enum OrderingAction {
    /// Show whether ordering is enabled
    Status,
    /// Accept new checkouts
    Enable,
    /// Refuse new checkouts (403)
    Disable,
}

#[derive(Subcommand)]
enum AdminAction {
    /// Give an account admin rights
    Grant {
        /// Account email address
        #[arg(short, long)]
        email: String,
    },
    /// Remove admin rights from an account
    Revoke {
        /// Account email address
        #[arg(short, long)]
        email: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CommandError> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Ordering { action } => match action {
            OrderingAction::Status => {
                commands::ordering::status().await?;
            }
            OrderingAction::Enable => commands::ordering::set(true).await?,
            OrderingAction::Disable => commands::ordering::set(false).await?,
        },
        Commands::Admin { action } => match action {
            AdminAction::Grant { email } => {
                commands::admin::set_admin(&email, true).await?;
            }
            AdminAction::Revoke { email } => {
                commands::admin::set_admin(&email, false).await?;
            }
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_admin_grant() {
        let cli = Cli::try_parse_from(["zm-cli", "admin", "grant", "-e", "ops@zandmarket.test"]);
        assert!(matches!(
            cli.map(|c| c.command),
            Ok(Commands::Admin { action: AdminAction::Grant { .. } })
        ));
    }
}
