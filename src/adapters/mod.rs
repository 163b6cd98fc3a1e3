//! Implementations of the ports.

pub mod email_client;
pub mod in_memory;
pub mod local_file_storage;
pub mod postgres_investment_ledger;
pub mod postgres_loan_repository;
pub mod postgres_product_repository;
pub mod postgres_user_repository;

pub use email_client::HttpEmailSender;
pub use in_memory::InMemoryStore;
pub use local_file_storage::LocalFileStorage;
pub use postgres_investment_ledger::PostgresInvestmentLedger;
pub use postgres_loan_repository::PostgresLoanRepository;
pub use postgres_product_repository::PostgresProductRepository;
pub use postgres_user_repository::PostgresUserRepository;
