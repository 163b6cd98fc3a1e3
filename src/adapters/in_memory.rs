//! In-process store implementing every repository port.
//!
//! Investment transactions take a per-loan async lock and buffer their
//! writes until commit, so concurrent investors on the same loan are
//! linearized exactly as a serializable database would order them.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{
    Investment, InvestorTotal, Loan, LoanStatus, LoanTerm, NewInvestment, NewLoan, Product,
    RoleType, User,
};
use crate::ports::{
    InvestmentLedger, InvestmentTransaction, LoanFilter, LoanRepository, ProductRepository,
    RepositoryError, RepositoryResult, UserRepository,
};

#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    loan_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
    injected_commit_failures: AtomicUsize,
    read_delay_ms: AtomicU64,
    commit_delay_ms: AtomicU64,
}

#[derive(Default)]
struct State {
    users: BTreeMap<i64, User>,
    products: BTreeMap<i64, Product>,
    loans: BTreeMap<i64, Loan>,
    investments: Vec<Investment>,
    last_user_id: i64,
    last_product_id: i64,
    last_loan_id: i64,
    last_investment_id: i64,
}

impl State {
    fn investor_ids(&self, loan_id: i64) -> Vec<i64> {
        self.investments
            .iter()
            .filter(|inv| inv.loan_id == loan_id)
            .map(|inv| inv.investor_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn hydrated(&self, loan: &Loan) -> Loan {
        let mut loan = loan.clone();
        loan.investor_ids = self.investor_ids(loan.id);
        loan
    }

    fn loan(&self, id: i64) -> RepositoryResult<Loan> {
        self.loans
            .get(&id)
            .map(|loan| self.hydrated(loan))
            .ok_or_else(|| RepositoryError::NotFound(format!("loan {}", id)))
    }

    fn loan_mut(&mut self, id: i64) -> RepositoryResult<&mut Loan> {
        self.loans
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("loan {}", id)))
    }

    fn sum_where(&self, pred: impl Fn(&Investment) -> bool) -> BigDecimal {
        self.investments
            .iter()
            .filter(|inv| pred(inv))
            .fold(BigDecimal::from(0), |acc, inv| acc + &inv.amount)
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, name: &str, email: &str, role: RoleType) -> User {
        let mut state = self.inner.state.lock().await;
        state.last_user_id += 1;
        let user = User {
            id: state.last_user_id,
            name: name.to_string(),
            email: email.to_string(),
            role,
            is_active: true,
        };
        state.users.insert(user.id, user.clone());
        user
    }

    pub async fn add_product(
        &self,
        name: &str,
        principal_amount: BigDecimal,
        interest_rate: BigDecimal,
        term: LoanTerm,
    ) -> Product {
        let mut state = self.inner.state.lock().await;
        state.last_product_id += 1;
        let product = Product {
            id: state.last_product_id,
            name: name.to_string(),
            principal_amount,
            interest_rate,
            term,
        };
        state.products.insert(product.id, product.clone());
        product
    }

    /// Makes the next `count` investment commits fail as serialization conflicts.
    pub fn fail_next_commits(&self, count: usize) {
        self.inner
            .injected_commit_failures
            .store(count, Ordering::SeqCst);
    }

    /// Delays every in-transaction ledger read, as a slow query would.
    pub fn stall_investment_reads(&self, delay: Duration) {
        self.inner
            .read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Delays every commit before its writes are applied.
    pub fn stall_commits(&self, delay: Duration) {
        self.inner
            .commit_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub async fn investment_count(&self, loan_id: i64) -> usize {
        let state = self.inner.state.lock().await;
        state
            .investments
            .iter()
            .filter(|inv| inv.loan_id == loan_id)
            .count()
    }

    async fn loan_lock(&self, loan_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.inner.loan_locks.lock().await;
        locks.entry(loan_id).or_default().clone()
    }

    async fn injected_delay(delay: &AtomicU64) {
        let ms = delay.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn take_injected_failure(&self) -> bool {
        self.inner
            .injected_commit_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LoanRepository for InMemoryStore {
    async fn insert(&self, loan: &NewLoan) -> RepositoryResult<Loan> {
        let mut state = self.inner.state.lock().await;

        // Same rule as the partial unique index on open loans.
        let has_open = state
            .loans
            .values()
            .any(|l| l.borrower_id == loan.borrower_id && !l.status.is_terminal());
        if has_open {
            return Err(RepositoryError::Conflict(format!(
                "borrower {} already has an open loan",
                loan.borrower_id
            )));
        }

        state.last_loan_id += 1;
        let created = loan.clone().into_loan(state.last_loan_id, Utc::now());
        state.loans.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> RepositoryResult<Loan> {
        self.inner.state.lock().await.loan(id)
    }

    async fn list(&self, filter: &LoanFilter) -> RepositoryResult<Vec<Loan>> {
        let state = self.inner.state.lock().await;
        Ok(state
            .loans
            .values()
            .rev()
            .map(|loan| state.hydrated(loan))
            .filter(|loan| filter.matches(loan))
            .collect())
    }

    async fn record_visit(
        &self,
        loan_id: i64,
        visitor_id: i64,
        attachment: &str,
    ) -> RepositoryResult<bool> {
        let mut state = self.inner.state.lock().await;
        let loan = state.loan_mut(loan_id)?;
        if loan.visitor_id.is_some() {
            return Ok(false);
        }
        loan.visitor_id = Some(visitor_id);
        loan.proof_of_visit_attachment = Some(attachment.to_string());
        loan.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_approval(
        &self,
        loan_id: i64,
        approver_id: i64,
        expected: LoanStatus,
        next: LoanStatus,
    ) -> RepositoryResult<bool> {
        let mut state = self.inner.state.lock().await;
        let loan = state.loan_mut(loan_id)?;
        if loan.status != expected {
            return Ok(false);
        }
        loan.approver_id = Some(approver_id);
        loan.status = next;
        loan.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_disbursement(
        &self,
        loan_id: i64,
        disburser_id: i64,
        expected: LoanStatus,
        next: LoanStatus,
    ) -> RepositoryResult<bool> {
        let mut state = self.inner.state.lock().await;
        let loan = state.loan_mut(loan_id)?;
        if loan.status != expected {
            return Ok(false);
        }
        loan.disburser_id = Some(disburser_id);
        loan.status = next;
        loan.updated_at = Utc::now();
        Ok(true)
    }

    async fn begin_investment(&self) -> RepositoryResult<Box<dyn InvestmentTransaction>> {
        Ok(Box::new(InMemoryInvestmentTransaction {
            store: self.clone(),
            guard: None,
            locked_loan: None,
            pending_investments: Vec::new(),
            pending_update: None,
            finished: false,
        }))
    }
}

struct InMemoryInvestmentTransaction {
    store: InMemoryStore,
    guard: Option<OwnedMutexGuard<()>>,
    locked_loan: Option<i64>,
    pending_investments: Vec<Investment>,
    pending_update: Option<(i64, LoanStatus, BigDecimal)>,
    finished: bool,
}

impl InMemoryInvestmentTransaction {
    fn ensure_open(&self) -> RepositoryResult<()> {
        if self.finished {
            Err(RepositoryError::TransactionClosed)
        } else {
            Ok(())
        }
    }

    fn ensure_locked(&self, loan_id: i64) -> RepositoryResult<()> {
        match self.locked_loan {
            Some(id) if id == loan_id => Ok(()),
            _ => Err(RepositoryError::Conflict(format!(
                "loan {} is not locked by this transaction",
                loan_id
            ))),
        }
    }
}

#[async_trait]
impl InvestmentTransaction for InMemoryInvestmentTransaction {
    async fn lock_loan(&mut self, loan_id: i64) -> RepositoryResult<Loan> {
        self.ensure_open()?;
        match self.locked_loan {
            Some(id) if id == loan_id => {}
            Some(id) => {
                return Err(RepositoryError::Conflict(format!(
                    "transaction already holds loan {}",
                    id
                )))
            }
            None => {
                let lock = self.store.loan_lock(loan_id).await;
                self.guard = Some(lock.lock_owned().await);
                self.locked_loan = Some(loan_id);
            }
        }

        let state = self.store.inner.state.lock().await;
        let mut loan = state.loan(loan_id)?;
        for inv in &self.pending_investments {
            loan.attach_investor(inv.investor_id);
        }
        if let Some((_, status, remaining)) = &self.pending_update {
            loan.status = *status;
            loan.remaining_amount = remaining.clone();
        }
        Ok(loan)
    }

    async fn sum_investments(&mut self, loan_id: i64) -> RepositoryResult<BigDecimal> {
        self.ensure_open()?;
        self.ensure_locked(loan_id)?;
        InMemoryStore::injected_delay(&self.store.inner.read_delay_ms).await;
        let state = self.store.inner.state.lock().await;
        let committed = state.sum_where(|inv| inv.loan_id == loan_id);
        let pending = self
            .pending_investments
            .iter()
            .fold(BigDecimal::from(0), |acc, inv| acc + &inv.amount);
        Ok(committed + pending)
    }

    async fn record_investment(
        &mut self,
        investment: &NewInvestment,
    ) -> RepositoryResult<Investment> {
        self.ensure_open()?;
        self.ensure_locked(investment.loan_id)?;

        // Ids are handed out eagerly; a rollback leaves a gap like a sequence would.
        let id = {
            let mut state = self.store.inner.state.lock().await;
            state.last_investment_id += 1;
            state.last_investment_id
        };
        let row = Investment {
            id,
            loan_id: investment.loan_id,
            investor_id: investment.investor_id,
            amount: investment.amount.clone(),
            created_at: Utc::now(),
        };
        self.pending_investments.push(row.clone());
        Ok(row)
    }

    async fn update_loan_status_and_remaining(
        &mut self,
        loan_id: i64,
        status: LoanStatus,
        remaining: &BigDecimal,
    ) -> RepositoryResult<()> {
        self.ensure_open()?;
        self.ensure_locked(loan_id)?;
        self.pending_update = Some((loan_id, status, remaining.clone()));
        Ok(())
    }

    async fn commit(&mut self) -> RepositoryResult<()> {
        self.ensure_open()?;
        InMemoryStore::injected_delay(&self.store.inner.commit_delay_ms).await;
        self.finished = true;

        if self.store.take_injected_failure() {
            self.guard = None;
            return Err(RepositoryError::SerializationFailure(
                "could not serialize access due to concurrent update".to_string(),
            ));
        }

        {
            let mut state = self.store.inner.state.lock().await;
            if let Some((loan_id, status, remaining)) = self.pending_update.take() {
                let loan = state.loan_mut(loan_id)?;
                loan.status = status;
                loan.remaining_amount = remaining;
                loan.updated_at = Utc::now();
            }
            state.investments.append(&mut self.pending_investments);
        }

        self.guard = None;
        Ok(())
    }
}

#[async_trait]
impl InvestmentLedger for InMemoryStore {
    async fn sum_for_loan(&self, loan_id: i64) -> RepositoryResult<BigDecimal> {
        let state = self.inner.state.lock().await;
        Ok(state.sum_where(|inv| inv.loan_id == loan_id))
    }

    async fn sum_for_investor(&self, investor_id: i64) -> RepositoryResult<BigDecimal> {
        let state = self.inner.state.lock().await;
        Ok(state.sum_where(|inv| inv.investor_id == investor_id))
    }

    async fn list_for_loan(&self, loan_id: i64) -> RepositoryResult<Vec<Investment>> {
        let state = self.inner.state.lock().await;
        Ok(state
            .investments
            .iter()
            .filter(|inv| inv.loan_id == loan_id)
            .cloned()
            .collect())
    }

    async fn investor_totals(&self, loan_id: i64) -> RepositoryResult<Vec<InvestorTotal>> {
        let state = self.inner.state.lock().await;
        let mut totals: BTreeMap<i64, BigDecimal> = BTreeMap::new();
        for inv in state.investments.iter().filter(|inv| inv.loan_id == loan_id) {
            let entry = totals
                .entry(inv.investor_id)
                .or_insert_with(|| BigDecimal::from(0));
            *entry += &inv.amount;
        }
        Ok(totals
            .into_iter()
            .map(|(investor_id, amount)| InvestorTotal {
                investor_id,
                amount,
            })
            .collect())
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn get_by_id(&self, id: i64) -> RepositoryResult<User> {
        let state = self.inner.state.lock().await;
        state
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("user {}", id)))
    }

    async fn get_many(&self, ids: &[i64]) -> RepositoryResult<Vec<User>> {
        let state = self.inner.state.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.users.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl ProductRepository for InMemoryStore {
    async fn get_by_id(&self, id: i64) -> RepositoryResult<Product> {
        let state = self.inner.state.lock().await;
        state
            .products
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("product {}", id)))
    }

    async fn list(&self) -> RepositoryResult<Vec<Product>> {
        let state = self.inner.state.lock().await;
        Ok(state.products.values().cloned().collect())
    }
}
