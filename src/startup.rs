//! Wiring of concrete adapters into the services, and startup checks.

use anyhow::Result;
use sqlx::PgPool;
use std::sync::Arc;

use crate::adapters::{
    HttpEmailSender, LocalFileStorage, PostgresInvestmentLedger, PostgresLoanRepository,
    PostgresProductRepository, PostgresUserRepository,
};
use crate::config::Config;
use crate::services::{FundingNotifier, LoanLifecycleService};

pub fn build_lifecycle_service(config: &Config, pool: PgPool) -> LoanLifecycleService {
    let loans = Arc::new(PostgresLoanRepository::new(pool.clone()));
    let ledger = Arc::new(PostgresInvestmentLedger::new(pool.clone()));
    let products = Arc::new(PostgresProductRepository::new(pool.clone()));
    let users = Arc::new(PostgresUserRepository::new(pool));
    let storage = Arc::new(LocalFileStorage::new(config.upload_dir.clone()));
    let sender = Arc::new(HttpEmailSender::new(
        config.email_api_url.clone(),
        config.email_api_key.clone(),
    ));

    let notifier = Arc::new(FundingNotifier::new(
        ledger.clone(),
        users.clone(),
        sender,
        storage.clone(),
        config.notifier_settings(),
    ));

    LoanLifecycleService::new(
        loans,
        ledger,
        products,
        users,
        storage,
        notifier,
        config.lifecycle_settings(),
    )
}

pub struct ValidationReport {
    pub database: bool,
    pub agreement_template: bool,
    pub upload_dir: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.database && self.agreement_template && self.upload_dir
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Database Connectivity: {}", status(self.database));
        println!("Agreement Template:    {}", status(self.agreement_template));
        println!("Upload Directory:      {}", status(self.upload_dir));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  - {}", error);
            }
        }

        println!(
            "\nOverall Status: {}",
            if self.is_valid() { "PASS" } else { "FAIL" }
        );
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok {
        "OK"
    } else {
        "FAIL"
    }
}

/// Missing collaborators are reported, not fatal; the fan-out degrades on its own.
pub async fn validate_environment(config: &Config, pool: &PgPool) -> ValidationReport {
    let mut report = ValidationReport {
        database: true,
        agreement_template: true,
        upload_dir: true,
        errors: Vec::new(),
    };

    if let Err(e) = crate::db::check_health(pool).await {
        report.database = false;
        report.errors.push(format!("Database: {}", e));
    }

    match tokio::fs::metadata(&config.agreement_template_path).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => {
            report.agreement_template = false;
            report.errors.push(format!(
                "Agreement template {} is not a file",
                config.agreement_template_path.display()
            ));
        }
        Err(e) => {
            report.agreement_template = false;
            report.errors.push(format!(
                "Agreement template {}: {}",
                config.agreement_template_path.display(),
                e
            ));
        }
    }

    if let Err(e) = tokio::fs::create_dir_all(&config.upload_dir).await {
        report.upload_dir = false;
        report.errors.push(format!(
            "Upload directory {}: {}",
            config.upload_dir.display(),
            e
        ));
    }

    report
}

pub fn init_tracing(config: &Config) -> Result<()> {
    use crate::config::LogFormat;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
        LogFormat::Plain => registry.with(tracing_subscriber::fmt::layer()).try_init()?,
    }
    Ok(())
}
