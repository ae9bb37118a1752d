mod chat_cmd;
mod config;
mod serve_cmd;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vinny_core::chat::RemoteBackend;
use vinny_core::distance::MatrixClient;
use vinny_core::notify::{NotifyError, Notifier, SmsGateway};
use vinny_core::tools::{DbExecutor, ToolExecutor};
use vinny_db::pool;

use config::VinnyConfig;
use serve_cmd::AppState;

#[derive(Parser)]
#[command(name = "vinny", about = "Conversational car-buying assistant")]
struct Cli {
    /// Database URL (overrides VINNY_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a vinny config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/vinny")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the vinny database (create + migrate)
    DbInit,
    /// Talk to the assistant from the terminal
    Chat,
    /// Serve the HTTP chat surface
    Serve {
        /// Bind address
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        /// Port
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

/// Notifier used when no SMS section is configured: every escalation is a
/// clean, loggable failure rather than a panic.
struct DisabledNotifier;

#[async_trait::async_trait]
impl Notifier for DisabledNotifier {
    async fn send(&self, _to: &str, _text: &str) -> Result<(), NotifyError> {
        Err(NotifyError("SMS gateway is not configured".to_string()))
    }
}

/// Assemble the production executor from resolved config.
pub fn executor_from_config(pool: sqlx::PgPool, config: &VinnyConfig) -> Arc<dyn ToolExecutor> {
    let distance = Arc::new(MatrixClient::new(
        config.maps_api_key.clone().unwrap_or_default(),
    ));
    let notifier: Arc<dyn Notifier> = match &config.sms {
        Some(sms) => Arc::new(SmsGateway::new(sms.clone())),
        None => Arc::new(DisabledNotifier),
    };
    Arc::new(DbExecutor::new(pool, distance, notifier))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            let path = config::config_path();
            if path.exists() && !force {
                anyhow::bail!(
                    "config file already exists at {} (use --force to overwrite)",
                    path.display()
                );
            }
            let mut file = config::ConfigFile::default();
            file.database.url = db_url;
            config::save_config(&file)?;
            println!("Wrote {}", path.display());
            println!("Fill in the [backend] section before running `vinny chat` or `vinny serve`.");
            Ok(())
        }

        Commands::DbInit => {
            let config = VinnyConfig::resolve(cli.database_url.as_deref())?;
            pool::ensure_database_exists(&config.db_config).await?;
            let db = pool::create_pool(&config.db_config).await?;
            pool::run_migrations(&db).await?;
            println!("Database ready at {}", config.db_config.database_url);
            Ok(())
        }

        Commands::Chat => {
            let config = VinnyConfig::resolve(cli.database_url.as_deref())?;
            let db = pool::create_pool(&config.db_config)
                .await
                .context("could not connect to the database (run `vinny db-init` first?)")?;
            chat_cmd::run_chat(db, &config).await
        }

        Commands::Serve { bind, port } => {
            let config = VinnyConfig::resolve(cli.database_url.as_deref())?;
            let db = pool::create_pool(&config.db_config)
                .await
                .context("could not connect to the database (run `vinny db-init` first?)")?;

            let executor = executor_from_config(db, &config);
            let backend_config = config.backend.clone();
            let state = Arc::new(AppState {
                store: vinny_core::session::SessionStore::new(),
                executor,
                backend_factory: Arc::new(move |_user_id| {
                    Box::new(RemoteBackend::new(backend_config.clone()))
                }),
                backend_username: config.backend_username.clone(),
                backend_secret: config.backend_secret.clone(),
            });

            serve_cmd::run_serve(state, &bind, port).await
        }
    }
}
