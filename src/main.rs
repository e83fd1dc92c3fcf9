use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use redsync::api::ApiClient;
use redsync::auth::{IdpConfig, TokenManager};
use redsync::cli::{AuthCommands, Cli, Commands};
use redsync::config;
use redsync::store::sqlite::SqliteStore;
use redsync::sync::Syncer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "redsync=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = Cli::parse();

    let store = SqliteStore::connect(&cfg.database_path).await?;
    store.init().await?;

    let auth = Arc::new(TokenManager::new(
        IdpConfig::from_config(&cfg),
        Arc::new(store.clone()),
    ));

    match args.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let api = ApiClient::new(&cfg.api_base_url, auth.clone());
            let syncer = Syncer::new(store, api, cfg.preload_usage_days);
            syncer.run().await?;
        }
        Commands::Auth { command } => match command {
            AuthCommands::Login => {
                auth.login().await?;
                match auth.status().await?.access_token_expires_at {
                    Some(exp) => println!("Logged in. Access token valid until {exp}."),
                    None => println!("Logged in."),
                }
            }
            AuthCommands::Status => {
                let status = auth.status().await?;
                match status.access_token_expires_at {
                    Some(exp) if exp > chrono::Utc::now() => {
                        println!("Access token valid until {exp}.")
                    }
                    Some(exp) => println!("Access token expired at {exp}."),
                    None => println!("No access token cached."),
                }
                println!(
                    "Refresh token: {}",
                    if status.has_refresh_token {
                        "present"
                    } else {
                        "absent"
                    }
                );
            }
            AuthCommands::Logout => {
                auth.logout().await?;
                println!("Cached tokens deleted.");
            }
        },
    }

    Ok(())
}
