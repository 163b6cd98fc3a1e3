use clap::{Parser, Subcommand};
use sqlx::PgPool;
use std::path::PathBuf;

use crate::adapters::PostgresUserRepository;
use crate::config::Config;
use crate::domain::{Actor, Loan, LoanStatus};
use crate::ports::UserRepository;
use crate::services::LoanLifecycleService;
use crate::utils::money::parse_amount;

#[derive(Parser)]
#[command(name = "lending-core")]
#[command(about = "Lending Core - P2P loan lifecycle service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Loan lifecycle commands, run on behalf of an existing user
    #[command(subcommand)]
    Loan(LoanCommands),

    /// List loan products
    Products,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum LoanCommands {
    /// List loans visible to the acting user
    List {
        #[arg(long = "as")]
        user: i64,
        /// Restrict to these statuses (repeatable)
        #[arg(long)]
        status: Vec<String>,
    },

    /// Show one loan
    Show {
        #[arg(value_name = "LOAN_ID")]
        loan_id: i64,
        #[arg(long = "as")]
        user: i64,
    },

    /// Propose a new loan against a product
    Start {
        #[arg(long = "as")]
        user: i64,
        #[arg(long)]
        product: i64,
        #[arg(long)]
        name: String,
    },

    /// Record the borrower visit with a PNG or JPEG proof
    Visit {
        #[arg(value_name = "LOAN_ID")]
        loan_id: i64,
        #[arg(long = "as")]
        user: i64,
        #[arg(long)]
        file: PathBuf,
    },

    /// Approve a visited loan
    Approve {
        #[arg(value_name = "LOAN_ID")]
        loan_id: i64,
        #[arg(long = "as")]
        user: i64,
    },

    /// Invest an amount in an approved loan
    Invest {
        #[arg(value_name = "LOAN_ID")]
        loan_id: i64,
        #[arg(long = "as")]
        user: i64,
        #[arg(long)]
        amount: String,
    },

    /// Disburse a fully invested loan
    Disburse {
        #[arg(value_name = "LOAN_ID")]
        loan_id: i64,
        #[arg(long = "as")]
        user: i64,
    },

    /// Total amount an investor has put into loans
    Exposure {
        #[arg(long = "as")]
        user: i64,
        /// Investor to report on (staff only)
        #[arg(long)]
        investor: Option<i64>,
    },
}

async fn resolve_actor(pool: &PgPool, user_id: i64) -> anyhow::Result<Actor> {
    let user = PostgresUserRepository::new(pool.clone())
        .get_by_id(user_id)
        .await
        .map_err(|e| anyhow::anyhow!("cannot act as user {}: {}", user_id, e))?;
    if !user.is_active {
        anyhow::bail!("user {} is not active", user_id);
    }
    Ok(user.actor())
}

pub async fn handle_loan_command(
    service: &LoanLifecycleService,
    pool: &PgPool,
    command: LoanCommands,
) -> anyhow::Result<()> {
    match command {
        LoanCommands::List { user, status } => {
            let actor = resolve_actor(pool, user).await?;
            let statuses = status
                .iter()
                .map(|s| s.parse::<LoanStatus>())
                .collect::<Result<Vec<_>, _>>()?;
            let loans = service.fetch_loans(actor, &statuses).await?;
            print_loan_table(&loans);
        }
        LoanCommands::Show { loan_id, user } => {
            let actor = resolve_actor(pool, user).await?;
            let loan = service.fetch_loan(actor, loan_id).await?;
            print_loan(&loan);
        }
        LoanCommands::Start {
            user,
            product,
            name,
        } => {
            let actor = resolve_actor(pool, user).await?;
            let loan = service.start_loan(actor, &name, product).await?;
            println!("✓ Loan {} proposed", loan.id);
            print_loan(&loan);
        }
        LoanCommands::Visit {
            loan_id,
            user,
            file,
        } => {
            let actor = resolve_actor(pool, user).await?;
            let attachment = tokio::fs::File::open(&file).await?;
            let loan = service
                .mark_borrower_visited(actor, loan_id, attachment)
                .await?;
            println!("✓ Loan {} visited", loan.id);
        }
        LoanCommands::Approve { loan_id, user } => {
            let actor = resolve_actor(pool, user).await?;
            let loan = service.approve_loan(actor, loan_id).await?;
            println!("✓ Loan {} is now {}", loan.id, loan.status);
        }
        LoanCommands::Invest {
            loan_id,
            user,
            amount,
        } => {
            let actor = resolve_actor(pool, user).await?;
            let amount = parse_amount(&amount)?;
            let outcome = service.invest_in_loan(actor, loan_id, amount).await?;
            println!(
                "✓ Investment {} recorded; remaining {}",
                outcome.investment.id, outcome.loan.remaining_amount
            );
            match outcome.notification {
                Some(Ok(report)) => println!(
                    "  Loan fully funded; notified {} investor(s), {} failed",
                    report.delivered.len(),
                    report.failed.len()
                ),
                Some(Err(e)) => println!("  Loan fully funded; notification failed: {}", e),
                None => {}
            }
        }
        LoanCommands::Disburse { loan_id, user } => {
            let actor = resolve_actor(pool, user).await?;
            let loan = service.disburse_loan(actor, loan_id).await?;
            println!("✓ Loan {} is now {}", loan.id, loan.status);
        }
        LoanCommands::Exposure { user, investor } => {
            let actor = resolve_actor(pool, user).await?;
            let total = service.total_invested(actor, investor).await?;
            println!("Total invested: {}", total);
        }
    }

    Ok(())
}

pub async fn handle_products(service: &LoanLifecycleService) -> anyhow::Result<()> {
    let products = service.list_products().await?;
    println!("{:<6} {:<30} {:>18} {:>10} {:>6}", "ID", "Name", "Principal", "Rate", "Term");
    println!("{}", "-".repeat(74));
    for product in products {
        println!(
            "{:<6} {:<30} {:>18} {:>10} {:>6}",
            product.id,
            product.name,
            product.principal_amount,
            product.interest_rate,
            product.term.months()
        );
    }
    Ok(())
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;

    println!("✓ Database migrations completed");
    Ok(())
}

pub async fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", config.database_url_masked());
    println!("  Upload Dir: {}", config.upload_dir.display());
    println!(
        "  Agreement Template: {}",
        config.agreement_template_path.display()
    );
    println!("  Email API URL: {}", config.email_api_url);
    println!("  Email API Key: ****");
    println!(
        "  Email Sender: {} <{}>",
        config.email_sender_name, config.email_sender_address
    );
    println!(
        "  Invest Retries: {} (backoff {} ms)",
        config.invest_max_retries, config.invest_retry_backoff_ms
    );

    let pool = crate::db::create_pool(config).await?;
    let report = crate::startup::validate_environment(config, &pool).await;
    report.print();

    if !report.is_valid() {
        anyhow::bail!("Configuration is invalid");
    }
    println!("✓ Configuration is valid");
    Ok(())
}

fn print_loan_table(loans: &[Loan]) {
    if loans.is_empty() {
        println!("No loans found");
        return;
    }

    println!(
        "{:<6} {:<28} {:<10} {:>18} {:>18}",
        "ID", "Name", "Status", "Principal", "Remaining"
    );
    println!("{}", "-".repeat(84));
    for loan in loans {
        println!(
            "{:<6} {:<28} {:<10} {:>18} {:>18}",
            loan.id, loan.name, loan.status, loan.principal_amount, loan.remaining_amount
        );
    }
}

fn print_loan(loan: &Loan) {
    println!("Loan {} - {}", loan.id, loan.name);
    println!("  Status: {}", loan.status);
    println!("  Borrower: {}", loan.borrower_id);
    println!("  Principal: {}", loan.principal_amount);
    println!("  Remaining: {}", loan.remaining_amount);
    println!("  Rate: {} over {} months", loan.interest_rate, loan.loan_term);
    println!("  Total interest: {} (ROI {}%)", loan.total_interest, loan.roi);
    if let Some(visitor) = loan.visitor_id {
        println!("  Visited by: {}", visitor);
    }
    if let Some(approver) = loan.approver_id {
        println!("  Approved by: {}", approver);
    }
    if let Some(disburser) = loan.disburser_id {
        println!("  Disbursed by: {}", disburser);
    }
    if !loan.investor_ids.is_empty() {
        println!("  Investors: {:?}", loan.investor_ids);
    }
}
