use async_trait::async_trait;
use bigdecimal::BigDecimal;

use super::RepositoryResult;
use crate::domain::{Actor, Investment, Loan, LoanStatus, NewInvestment, NewLoan};

/// Query options for listing loans.
#[derive(Debug, Clone, Default)]
pub struct LoanFilter {
    /// Restricts the result to what this actor may see.
    pub scope: Option<Actor>,
    /// Empty means any status.
    pub statuses: Vec<LoanStatus>,
    pub borrower_id: Option<i64>,
}

impl LoanFilter {
    pub fn for_actor(actor: Actor) -> Self {
        Self {
            scope: Some(actor),
            ..Self::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[LoanStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn matches(&self, loan: &Loan) -> bool {
        self.scope.as_ref().map_or(true, |actor| loan.visible_to(actor))
            && (self.statuses.is_empty() || self.statuses.contains(&loan.status))
            && self.borrower_id.map_or(true, |id| loan.borrower_id == id)
    }
}

/// Named write operations on loans. Every `record_*` write is a
/// compare-and-set and returns `false` when the expected state no longer holds.
#[async_trait]
pub trait LoanRepository: Send + Sync {
    async fn insert(&self, loan: &NewLoan) -> RepositoryResult<Loan>;

    async fn get_by_id(&self, id: i64) -> RepositoryResult<Loan>;

    /// Newest first.
    async fn list(&self, filter: &LoanFilter) -> RepositoryResult<Vec<Loan>>;

    /// Succeeds only while no visitor is assigned.
    async fn record_visit(
        &self,
        loan_id: i64,
        visitor_id: i64,
        attachment: &str,
    ) -> RepositoryResult<bool>;

    async fn record_approval(
        &self,
        loan_id: i64,
        approver_id: i64,
        expected: LoanStatus,
        next: LoanStatus,
    ) -> RepositoryResult<bool>;

    async fn record_disbursement(
        &self,
        loan_id: i64,
        disburser_id: i64,
        expected: LoanStatus,
        next: LoanStatus,
    ) -> RepositoryResult<bool>;

    /// Opens a serializable unit of work for one investment.
    async fn begin_investment(&self) -> RepositoryResult<Box<dyn InvestmentTransaction>>;
}

/// A serializable transaction scoped to one loan.
///
/// Nothing written through it is visible to anyone else until [`commit`]
/// succeeds. Dropping it without committing rolls everything back.
///
/// [`commit`]: InvestmentTransaction::commit
#[async_trait]
pub trait InvestmentTransaction: Send {
    /// Reads the loan fresh and blocks concurrent investors on the same loan.
    async fn lock_loan(&mut self, loan_id: i64) -> RepositoryResult<Loan>;

    async fn sum_investments(&mut self, loan_id: i64) -> RepositoryResult<BigDecimal>;

    async fn record_investment(&mut self, investment: &NewInvestment)
        -> RepositoryResult<Investment>;

    async fn update_loan_status_and_remaining(
        &mut self,
        loan_id: i64,
        status: LoanStatus,
        remaining: &BigDecimal,
    ) -> RepositoryResult<()>;

    async fn commit(&mut self) -> RepositoryResult<()>;
}
