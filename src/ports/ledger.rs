use async_trait::async_trait;
use bigdecimal::BigDecimal;

use super::RepositoryResult;
use crate::domain::{Investment, InvestorTotal};

/// Read side of the investment ledger. Rows are appended only through
/// [`InvestmentTransaction::record_investment`](super::InvestmentTransaction::record_investment).
#[async_trait]
pub trait InvestmentLedger: Send + Sync {
    async fn sum_for_loan(&self, loan_id: i64) -> RepositoryResult<BigDecimal>;

    async fn sum_for_investor(&self, investor_id: i64) -> RepositoryResult<BigDecimal>;

    /// Oldest first.
    async fn list_for_loan(&self, loan_id: i64) -> RepositoryResult<Vec<Investment>>;

    /// One entry per distinct investor, ascending by investor id.
    async fn investor_totals(&self, loan_id: i64) -> RepositoryResult<Vec<InvestorTotal>>;
}
