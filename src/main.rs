use clap::Parser;
use std::net::SocketAddr;

use lending_core::cli::{self, Cli, Commands, DbCommands};
use lending_core::config::Config;
use lending_core::{create_app, db, startup, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    startup::init_tracing(&config)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config).await,
        Commands::Products => {
            let pool = db::create_pool(&config).await?;
            let service = startup::build_lifecycle_service(&config, pool);
            cli::handle_products(&service).await
        }
        Commands::Loan(command) => {
            let pool = db::create_pool(&config).await?;
            let service = startup::build_lifecycle_service(&config, pool.clone());
            cli::handle_loan_command(&service, &pool, command).await
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;

    let report = startup::validate_environment(&config, &pool).await;
    if !report.is_valid() {
        for error in &report.errors {
            tracing::warn!("Startup check failed: {}", error);
        }
    }

    let app = create_app(AppState { db: pool });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
