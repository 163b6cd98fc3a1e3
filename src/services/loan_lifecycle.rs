//! Drives loans through their lifecycle on behalf of authenticated actors.
//!
//! Every operation is bounded by [`LifecycleSettings::operation_timeout`].
//! When the bound fires, the in-flight future is dropped, and with it any
//! open investment transaction, so nothing uncommitted survives. An
//! investment commit is never cut short: the deadline is checked before
//! COMMIT is issued and the commit itself runs to completion.

use bigdecimal::BigDecimal;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{timeout_at, Instant};
use uuid::Uuid;

use crate::domain::{
    Actor, Investment, Loan, LoanStatus, NewInvestment, NewLoan, Product, RoleType,
    TransitionError, User,
};
use crate::error::AppError;
use crate::ports::{
    FileStorage, InvestmentLedger, InvestmentTransaction, LoanFilter, LoanRepository,
    ProductRepository, RepositoryError, UserRepository,
};
use crate::services::funding_notifier::{FanOutReport, FundingNotifier};
use crate::utils::mime::ImageKind;
use crate::utils::money::{fits_money_scale, nearly_equal, round_money};
use crate::utils::sanitize::{sanitize_filename, sanitize_string};

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Retries after the first attempt when an investment hits a serialization conflict.
    pub invest_max_retries: u32,
    /// Base delay between retries; attempt `n` waits `n` times this.
    pub retry_backoff: Duration,
    pub operation_timeout: Duration,
    pub max_attachment_bytes: usize,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            invest_max_retries: 3,
            retry_backoff: Duration::from_millis(25),
            operation_timeout: Duration::from_secs(10),
            max_attachment_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Result of a committed investment.
#[derive(Debug)]
pub struct InvestmentOutcome {
    pub loan: Loan,
    pub investment: Investment,
    pub fully_funded: bool,
    /// Present only when this investment completed the funding.
    pub notification: Option<Result<FanOutReport, AppError>>,
}

pub struct LoanLifecycleService {
    loans: Arc<dyn LoanRepository>,
    ledger: Arc<dyn InvestmentLedger>,
    products: Arc<dyn ProductRepository>,
    users: Arc<dyn UserRepository>,
    storage: Arc<dyn FileStorage>,
    notifier: Arc<FundingNotifier>,
    settings: LifecycleSettings,
}

impl LoanLifecycleService {
    pub fn new(
        loans: Arc<dyn LoanRepository>,
        ledger: Arc<dyn InvestmentLedger>,
        products: Arc<dyn ProductRepository>,
        users: Arc<dyn UserRepository>,
        storage: Arc<dyn FileStorage>,
        notifier: Arc<FundingNotifier>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            loans,
            ledger,
            products,
            users,
            storage,
            notifier,
            settings,
        }
    }

    pub async fn list_products(&self) -> Result<Vec<Product>, AppError> {
        self.bounded(async { Ok(self.products.list().await?) }).await
    }

    /// Loans the actor may see, newest first. An empty `statuses` means any.
    pub async fn fetch_loans(
        &self,
        actor: Actor,
        statuses: &[LoanStatus],
    ) -> Result<Vec<Loan>, AppError> {
        let filter = LoanFilter::for_actor(actor).with_statuses(statuses);
        self.bounded(async { Ok(self.loans.list(&filter).await?) })
            .await
    }

    /// Loans outside the actor's scope are reported as not found.
    pub async fn fetch_loan(&self, actor: Actor, loan_id: i64) -> Result<Loan, AppError> {
        self.bounded(async {
            let loan = self.load_loan(loan_id).await?;
            if !loan.visible_to(&actor) {
                return Err(AppError::LoanNotFound(loan_id));
            }
            Ok(loan)
        })
        .await
    }

    pub async fn start_loan(
        &self,
        actor: Actor,
        name: &str,
        product_id: i64,
    ) -> Result<Loan, AppError> {
        require_role(&actor, &[RoleType::Borrower], "start a loan")?;
        let name = sanitize_string(name);
        if name.is_empty() {
            return Err(AppError::InvalidParams("loan name is required".to_string()));
        }

        self.bounded(async {
            let borrower = self.load_user(actor.user_id).await?;
            let product = self.products.get_by_id(product_id).await.map_err(|e| match e {
                RepositoryError::NotFound(_) => {
                    AppError::InvalidParams(format!("product {} does not exist", product_id))
                }
                other => AppError::Repository(other),
            })?;

            let open = LoanFilter {
                borrower_id: Some(borrower.id),
                statuses: LoanStatus::OPEN.to_vec(),
                ..LoanFilter::default()
            };
            if !self.loans.list(&open).await?.is_empty() {
                return Err(AppError::LoanAlreadyExists);
            }

            let new_loan = NewLoan::new(name, &product, &borrower)?;
            let loan = self.loans.insert(&new_loan).await.map_err(|e| match e {
                RepositoryError::Conflict(_) => AppError::LoanAlreadyExists,
                other => AppError::Repository(other),
            })?;

            tracing::info!(
                loan_id = loan.id,
                borrower_id = borrower.id,
                product_id,
                status = %loan.status,
                "Loan started"
            );
            Ok(loan)
        })
        .await
    }

    /// Stores the proof-of-visit photo and assigns the visitor.
    ///
    /// The attachment's type is sniffed from its bytes. Only PNG and JPEG
    /// are accepted.
    pub async fn mark_borrower_visited<R>(
        &self,
        actor: Actor,
        loan_id: i64,
        attachment: R,
    ) -> Result<Loan, AppError>
    where
        R: AsyncRead + Unpin + Send,
    {
        require_role(&actor, &[RoleType::FieldValidator], "mark a borrower visited")?;

        self.bounded(async {
            let loan = self.load_loan(loan_id).await?;
            if loan.visitor_id.is_some() {
                return Err(AppError::LoanAlreadyVisited);
            }

            let bytes = self.read_attachment(attachment).await?;
            let kind = ImageKind::detect(&bytes).ok_or_else(|| {
                AppError::InvalidParams("attachment must be a PNG or JPEG image".to_string())
            })?;

            let filename = sanitize_filename(&format!(
                "ProofOfVisit_{}_{}_{}.{}",
                loan.id,
                Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
                Uuid::new_v4().simple(),
                kind.extension()
            ))
            .ok_or_else(|| AppError::Internal("generated filename was rejected".to_string()))?;

            let path = self
                .storage
                .store(&bytes, &filename, kind.content_type())
                .await?;

            if !self.loans.record_visit(loan.id, actor.user_id, &path).await? {
                tracing::warn!(loan_id = loan.id, path = %path, "Visit recorded concurrently; upload left orphaned");
                return Err(AppError::LoanAlreadyVisited);
            }

            tracing::info!(loan_id = loan.id, visitor_id = actor.user_id, "Borrower visited");
            self.load_loan(loan.id).await
        })
        .await
    }

    pub async fn approve_loan(&self, actor: Actor, loan_id: i64) -> Result<Loan, AppError> {
        require_role(
            &actor,
            &[RoleType::Staff, RoleType::Superuser],
            "approve a loan",
        )?;

        self.bounded(async {
            let mut loan = self.load_loan(loan_id).await?;
            let from = loan.status;
            loan.approver_id = Some(actor.user_id);
            loan.advance_state(LoanStatus::Approved, "ApproveLoan")?;

            let applied = self
                .loans
                .record_approval(loan.id, actor.user_id, from, LoanStatus::Approved)
                .await?;
            if !applied {
                return Err(changed_concurrently(from, LoanStatus::Approved, "ApproveLoan"));
            }

            tracing::info!(loan_id = loan.id, approver_id = actor.user_id, status = %LoanStatus::Approved, "Loan approved");
            self.load_loan(loan.id).await
        })
        .await
    }

    /// Records an investment and moves the loan to `invested` once the
    /// principal is reached.
    ///
    /// The funding notification runs after commit and outside the
    /// operation bound. Its failure is reported in the outcome only.
    pub async fn invest_in_loan(
        &self,
        actor: Actor,
        loan_id: i64,
        amount: BigDecimal,
    ) -> Result<InvestmentOutcome, AppError> {
        require_role(&actor, &[RoleType::Investor], "invest in a loan")?;
        if amount <= BigDecimal::from(0) {
            return Err(AppError::InvalidParams(
                "investment amount must be positive".to_string(),
            ));
        }
        if !fits_money_scale(&amount) {
            return Err(AppError::InvalidParams(
                "investment amount has more than two decimal places".to_string(),
            ));
        }

        let deadline = Instant::now() + self.settings.operation_timeout;
        bounded_until(deadline, async {
            self.load_user(actor.user_id).await?;

            // Fast path only; the transaction re-checks against fresh state.
            let loan = self.load_loan(loan_id).await?;
            if loan.status != LoanStatus::Approved {
                return Err(AppError::LoanNotInvestable);
            }
            Ok(())
        })
        .await?;

        let (loan, investment, fully_funded) = self
            .invest_with_retries(loan_id, actor.user_id, &amount, deadline)
            .await?;

        tracing::info!(
            loan_id,
            investor_id = actor.user_id,
            amount = %amount,
            remaining = %loan.remaining_amount,
            status = %loan.status,
            "Investment recorded"
        );

        let notification = if fully_funded {
            let result = self.notifier.notify_loan_funded(&loan).await;
            if let Err(e) = &result {
                tracing::warn!(loan_id, error = %e, "Funding fan-out failed");
            }
            Some(result)
        } else {
            None
        };

        Ok(InvestmentOutcome {
            loan,
            investment,
            fully_funded,
            notification,
        })
    }

    pub async fn disburse_loan(&self, actor: Actor, loan_id: i64) -> Result<Loan, AppError> {
        require_role(&actor, &[RoleType::FieldValidator], "disburse a loan")?;

        self.bounded(async {
            let mut loan = self.load_loan(loan_id).await?;
            if loan.status != LoanStatus::Invested {
                return Err(AppError::LoanNotDisbursable);
            }

            loan.disburser_id = Some(actor.user_id);
            loan.advance_state(LoanStatus::Disbursed, "DisburseLoan")?;

            let applied = self
                .loans
                .record_disbursement(
                    loan.id,
                    actor.user_id,
                    LoanStatus::Invested,
                    LoanStatus::Disbursed,
                )
                .await?;
            if !applied {
                return Err(AppError::LoanNotDisbursable);
            }

            tracing::info!(loan_id = loan.id, disburser_id = actor.user_id, status = %LoanStatus::Disbursed, "Loan disbursed");
            self.load_loan(loan.id).await
        })
        .await
    }

    /// Total exposure of an investor across every loan.
    ///
    /// Investors may only query themselves; staff may query anyone.
    pub async fn total_invested(
        &self,
        actor: Actor,
        investor_id: Option<i64>,
    ) -> Result<BigDecimal, AppError> {
        let investor_id = match actor.role {
            RoleType::Investor => match investor_id {
                Some(id) if id != actor.user_id => {
                    return Err(AppError::Forbidden(
                        "investors may only view their own exposure".to_string(),
                    ))
                }
                _ => actor.user_id,
            },
            role if role.is_staff() => investor_id.ok_or_else(|| {
                AppError::InvalidParams("investor id is required".to_string())
            })?,
            role => {
                return Err(AppError::Forbidden(format!(
                    "{} may not view investor exposure",
                    role
                )))
            }
        };

        self.bounded(async { Ok(self.ledger.sum_for_investor(investor_id).await?) })
            .await
    }

    async fn invest_with_retries(
        &self,
        loan_id: i64,
        investor_id: i64,
        amount: &BigDecimal,
        deadline: Instant,
    ) -> Result<(Loan, Investment, bool), AppError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.try_invest(loan_id, investor_id, amount, deadline).await {
                Err(e) if e.is_retryable() && attempt <= self.settings.invest_max_retries => {
                    tracing::warn!(loan_id, investor_id, attempt, error = %e, "Investment conflicted, retrying");
                    let wake = Instant::now() + self.settings.retry_backoff * attempt;
                    if wake >= deadline {
                        return Err(AppError::DeadlineExceeded);
                    }
                    tokio::time::sleep_until(wake).await;
                }
                other => return other,
            }
        }
    }

    /// One serializable attempt. Everything up to COMMIT is bounded by
    /// `deadline`; returning early drops the transaction, which rolls back
    /// everything written through it. COMMIT itself is not bounded, so a
    /// commit the database has accepted is always reported as such.
    async fn try_invest(
        &self,
        loan_id: i64,
        investor_id: i64,
        amount: &BigDecimal,
        deadline: Instant,
    ) -> Result<(Loan, Investment, bool), AppError> {
        let mut tx = bounded_until(deadline, async {
            Ok(self.loans.begin_investment().await?)
        })
        .await?;

        let prepared = bounded_until(
            deadline,
            Self::stage_investment(&mut *tx, loan_id, investor_id, amount),
        )
        .await?;

        if Instant::now() >= deadline {
            return Err(AppError::DeadlineExceeded);
        }
        tx.commit().await?;

        Ok(prepared)
    }

    /// Writes the investment and the loan update inside `tx` without committing.
    async fn stage_investment(
        tx: &mut dyn InvestmentTransaction,
        loan_id: i64,
        investor_id: i64,
        amount: &BigDecimal,
    ) -> Result<(Loan, Investment, bool), AppError> {
        let mut loan = tx.lock_loan(loan_id).await.map_err(|e| match e {
            RepositoryError::NotFound(_) => AppError::LoanNotFound(loan_id),
            other => AppError::Repository(other),
        })?;
        if loan.status != LoanStatus::Approved {
            return Err(AppError::LoanNotInvestable);
        }

        let existing = tx.sum_investments(loan_id).await?;
        let new_total = &existing + amount;
        if new_total > loan.principal_amount {
            return Err(AppError::InvestmentAmountExceedsPrincipal {
                amount: amount.to_string(),
                remaining: round_money(&(&loan.principal_amount - &existing)).to_string(),
            });
        }

        let investment = tx
            .record_investment(&NewInvestment {
                loan_id,
                investor_id,
                amount: amount.clone(),
            })
            .await?;
        loan.attach_investor(investor_id);

        let fully_funded = nearly_equal(&new_total, &loan.principal_amount);
        if fully_funded {
            loan.advance_state(LoanStatus::Invested, "InvestInLoan")?;
        }
        loan.remaining_amount = round_money(&(&loan.principal_amount - &new_total));

        tx.update_loan_status_and_remaining(loan_id, loan.status, &loan.remaining_amount)
            .await?;

        Ok((loan, investment, fully_funded))
    }

    async fn read_attachment<R>(&self, attachment: R) -> Result<Vec<u8>, AppError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let limit = self.settings.max_attachment_bytes;
        let mut bytes = Vec::new();
        attachment
            .take(limit as u64 + 1)
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| AppError::InvalidParams(format!("could not read attachment: {}", e)))?;

        if bytes.is_empty() {
            return Err(AppError::InvalidParams("attachment is empty".to_string()));
        }
        if bytes.len() > limit {
            return Err(AppError::InvalidParams(format!(
                "attachment exceeds {} bytes",
                limit
            )));
        }
        Ok(bytes)
    }

    async fn load_loan(&self, loan_id: i64) -> Result<Loan, AppError> {
        self.loans.get_by_id(loan_id).await.map_err(|e| match e {
            RepositoryError::NotFound(_) => AppError::LoanNotFound(loan_id),
            other => AppError::Repository(other),
        })
    }

    async fn load_user(&self, user_id: i64) -> Result<User, AppError> {
        self.users.get_by_id(user_id).await.map_err(|e| match e {
            RepositoryError::NotFound(_) => AppError::UserNotFound(user_id),
            other => AppError::Repository(other),
        })
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        bounded_until(Instant::now() + self.settings.operation_timeout, operation).await
    }
}

async fn bounded_until<T, F>(deadline: Instant, operation: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    timeout_at(deadline, operation)
        .await
        .map_err(|_| AppError::DeadlineExceeded)?
}

fn require_role(actor: &Actor, allowed: &[RoleType], action: &str) -> Result<(), AppError> {
    if allowed.contains(&actor.role) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "{} may not {}",
            actor.role, action
        )))
    }
}

fn changed_concurrently(from: LoanStatus, to: LoanStatus, action: &'static str) -> AppError {
    AppError::Transition(TransitionError::IllegalTransition {
        from,
        to,
        action,
        reason: "loan changed concurrently",
    })
}
