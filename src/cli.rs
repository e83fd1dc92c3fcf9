use clap::{Parser, Subcommand};

/// Red Energy usage data sync
#[derive(Parser)]
#[command(name = "redsync", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full sync pipeline (the default when no command is given)
    Sync,

    /// Manage cached authentication state
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Force a fresh interactive login, bypassing cached tokens
    Login,
    /// Show the cached token state
    Status,
    /// Delete all cached token material
    Logout,
}
