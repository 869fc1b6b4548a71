mod columns;
mod import;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "annot-cli")]
#[command(about = "Import conversation exports into annotation projects")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Import a CSV file into a project and follow the job until it finishes
    Import(import::ImportArgs),
    /// Show how a file's columns would be mapped, without importing anything
    Columns {
        /// CSV file to inspect
        #[arg(long)]
        file: PathBuf,
        /// JSON object of field overrides, e.g. '{"content": "Message"}'
        #[arg(long)]
        mapping: Option<String>,
        /// Print the mapping as JSON
        #[arg(long)]
        json: bool,
    },
    /// Apply pending database migrations
    Migrate,
    /// Check database connectivity
    Ping,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Import(args)) => {
            let config = annot_core::load_app_config()?;
            import::run_import(&config, args).await
        }
        Some(Commands::Columns {
            file,
            mapping,
            json,
        }) => columns::run_columns(&file, mapping.as_deref(), json),
        Some(Commands::Migrate) => {
            let config = annot_core::load_app_config()?;
            let pool = connect(&config).await?;
            let applied = annot_db::run_migrations(&pool).await?;
            println!("migrations up to date ({applied} applied)");
            Ok(())
        }
        Some(Commands::Ping) => {
            let config = annot_core::load_app_config()?;
            let pool = connect(&config).await?;
            annot_db::health_check(&pool).await?;
            println!("database ok");
            Ok(())
        }
        None => {
            println!("annot-cli: run with --help to list commands");
            Ok(())
        }
    }
}

async fn connect(config: &annot_core::AppConfig) -> anyhow::Result<sqlx::PgPool> {
    let pool_config = annot_db::PoolConfig::from_app_config(config);
    Ok(annot_db::connect_pool(&config.database_url, pool_config).await?)
}
