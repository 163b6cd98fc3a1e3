//! Postgres implementation of LoanRepository and its investment transaction.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};

use crate::domain::{Investment, Loan, LoanStatus, NewInvestment, NewLoan, RoleType};
use crate::ports::{
    InvestmentTransaction, LoanFilter, LoanRepository, RepositoryError, RepositoryResult,
};

const LOAN_SELECT: &str = r#"
    SELECT l.id, l.name, l.status, l.borrower_id, l.product_id,
        l.principal_amount, l.remaining_amount, l.interest_rate, l.total_interest,
        l.roi, l.loan_term, l.visitor_id, l.approver_id, l.disburser_id,
        l.proof_of_visit_attachment, l.created_at, l.updated_at,
        ARRAY(
            SELECT DISTINCT i.investor_id FROM investments i
            WHERE i.loan_id = l.id ORDER BY i.investor_id
        ) AS investor_ids
    FROM loans l
"#;

#[derive(Clone)]
pub struct PostgresLoanRepository {
    pool: PgPool,
}

impl PostgresLoanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn compare_and_set_result(&self, loan_id: i64, rows: u64) -> RepositoryResult<bool> {
        if rows > 0 {
            return Ok(true);
        }
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM loans WHERE id = $1)")
            .bind(loan_id)
            .fetch_one(&self.pool)
            .await?;
        if exists {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound(format!("loan {}", loan_id)))
        }
    }
}

#[async_trait]
impl LoanRepository for PostgresLoanRepository {
    async fn insert(&self, loan: &NewLoan) -> RepositoryResult<Loan> {
        let (id, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO loans (
                name, status, borrower_id, product_id, principal_amount, remaining_amount,
                interest_rate, total_interest, roi, loan_term
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id, created_at
            "#,
        )
        .bind(&loan.name)
        .bind(loan.status.as_str())
        .bind(loan.borrower_id)
        .bind(loan.product_id)
        .bind(&loan.principal_amount)
        .bind(&loan.remaining_amount)
        .bind(&loan.interest_rate)
        .bind(&loan.total_interest)
        .bind(&loan.roi)
        .bind(loan.loan_term)
        .fetch_one(&self.pool)
        .await?;

        Ok(loan.clone().into_loan(id, created_at))
    }

    async fn get_by_id(&self, id: i64) -> RepositoryResult<Loan> {
        let row = sqlx::query_as::<_, LoanRow>(&format!("{} WHERE l.id = $1", LOAN_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("loan {}", id)))?
            .into_domain()
    }

    async fn list(&self, filter: &LoanFilter) -> RepositoryResult<Vec<Loan>> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new(LOAN_SELECT);
        query.push(" WHERE 1=1");

        if let Some(actor) = &filter.scope {
            match actor.role {
                RoleType::Superuser | RoleType::Staff => {}
                RoleType::Borrower => {
                    query.push(" AND l.borrower_id = ").push_bind(actor.user_id);
                }
                RoleType::Investor => {
                    query
                        .push(" AND (l.status = 'approved' OR EXISTS (SELECT 1 FROM investments i WHERE i.loan_id = l.id AND i.investor_id = ")
                        .push_bind(actor.user_id)
                        .push("))");
                }
                RoleType::FieldValidator => {
                    query
                        .push(" AND (l.visitor_id = ")
                        .push_bind(actor.user_id)
                        .push(" OR l.disburser_id = ")
                        .push_bind(actor.user_id)
                        .push(" OR (l.status = 'proposed' AND l.visitor_id IS NULL))");
                }
            }
        }

        if !filter.statuses.is_empty() {
            let statuses: Vec<String> = filter
                .statuses
                .iter()
                .map(|s| s.as_str().to_string())
                .collect();
            query.push(" AND l.status = ANY(").push_bind(statuses).push(")");
        }

        if let Some(borrower_id) = filter.borrower_id {
            query.push(" AND l.borrower_id = ").push_bind(borrower_id);
        }

        query.push(" ORDER BY l.created_at DESC, l.id DESC");

        let rows = query
            .build_query_as::<LoanRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(LoanRow::into_domain).collect()
    }

    async fn record_visit(
        &self,
        loan_id: i64,
        visitor_id: i64,
        attachment: &str,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE loans
            SET visitor_id = $1, proof_of_visit_attachment = $2, updated_at = NOW()
            WHERE id = $3 AND visitor_id IS NULL
            "#,
        )
        .bind(visitor_id)
        .bind(attachment)
        .bind(loan_id)
        .execute(&self.pool)
        .await?;

        self.compare_and_set_result(loan_id, result.rows_affected())
            .await
    }

    async fn record_approval(
        &self,
        loan_id: i64,
        approver_id: i64,
        expected: LoanStatus,
        next: LoanStatus,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE loans
            SET approver_id = $1, status = $2, updated_at = NOW()
            WHERE id = $3 AND status = $4
            "#,
        )
        .bind(approver_id)
        .bind(next.as_str())
        .bind(loan_id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        self.compare_and_set_result(loan_id, result.rows_affected())
            .await
    }

    async fn record_disbursement(
        &self,
        loan_id: i64,
        disburser_id: i64,
        expected: LoanStatus,
        next: LoanStatus,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE loans
            SET disburser_id = $1, status = $2, updated_at = NOW()
            WHERE id = $3 AND status = $4
            "#,
        )
        .bind(disburser_id)
        .bind(next.as_str())
        .bind(loan_id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        self.compare_and_set_result(loan_id, result.rows_affected())
            .await
    }

    async fn begin_investment(&self) -> RepositoryResult<Box<dyn InvestmentTransaction>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PostgresInvestmentTransaction { tx: Some(tx) }))
    }
}

/// Wraps one serializable Postgres transaction. sqlx rolls back on drop.
pub struct PostgresInvestmentTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PostgresInvestmentTransaction {
    fn conn(&mut self) -> RepositoryResult<&mut Transaction<'static, Postgres>> {
        self.tx.as_mut().ok_or(RepositoryError::TransactionClosed)
    }
}

#[async_trait]
impl InvestmentTransaction for PostgresInvestmentTransaction {
    async fn lock_loan(&mut self, loan_id: i64) -> RepositoryResult<Loan> {
        let tx = self.conn()?;

        let locked: Option<i64> = sqlx::query_scalar("SELECT id FROM loans WHERE id = $1 FOR UPDATE")
            .bind(loan_id)
            .fetch_optional(&mut **tx)
            .await?;
        if locked.is_none() {
            return Err(RepositoryError::NotFound(format!("loan {}", loan_id)));
        }

        sqlx::query_as::<_, LoanRow>(&format!("{} WHERE l.id = $1", LOAN_SELECT))
            .bind(loan_id)
            .fetch_one(&mut **tx)
            .await?
            .into_domain()
    }

    async fn sum_investments(&mut self, loan_id: i64) -> RepositoryResult<BigDecimal> {
        let tx = self.conn()?;
        let sum: BigDecimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM investments WHERE loan_id = $1",
        )
        .bind(loan_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(sum)
    }

    async fn record_investment(
        &mut self,
        investment: &NewInvestment,
    ) -> RepositoryResult<Investment> {
        let tx = self.conn()?;
        let row = sqlx::query_as::<_, InvestmentRow>(
            r#"
            INSERT INTO investments (loan_id, investor_id, amount)
            VALUES ($1, $2, $3)
            RETURNING id, loan_id, investor_id, amount, created_at
            "#,
        )
        .bind(investment.loan_id)
        .bind(investment.investor_id)
        .bind(&investment.amount)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.into_domain())
    }

    async fn update_loan_status_and_remaining(
        &mut self,
        loan_id: i64,
        status: LoanStatus,
        remaining: &BigDecimal,
    ) -> RepositoryResult<()> {
        let tx = self.conn()?;
        let result = sqlx::query(
            "UPDATE loans SET status = $1, remaining_amount = $2, updated_at = NOW() WHERE id = $3",
        )
        .bind(status.as_str())
        .bind(remaining)
        .bind(loan_id)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("loan {}", loan_id)));
        }
        Ok(())
    }

    async fn commit(&mut self) -> RepositoryResult<()> {
        let tx = self.tx.take().ok_or(RepositoryError::TransactionClosed)?;
        tx.commit().await?;
        Ok(())
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct LoanRow {
    id: i64,
    name: String,
    status: String,
    borrower_id: i64,
    product_id: i64,
    principal_amount: BigDecimal,
    remaining_amount: BigDecimal,
    interest_rate: BigDecimal,
    total_interest: BigDecimal,
    roi: String,
    loan_term: i32,
    visitor_id: Option<i64>,
    approver_id: Option<i64>,
    disburser_id: Option<i64>,
    proof_of_visit_attachment: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    investor_ids: Vec<i64>,
}

impl LoanRow {
    fn into_domain(self) -> RepositoryResult<Loan> {
        let status = self
            .status
            .parse::<LoanStatus>()
            .map_err(|e| RepositoryError::Corrupt(format!("loan {}: {}", self.id, e)))?;

        Ok(Loan {
            id: self.id,
            name: self.name,
            status,
            borrower_id: self.borrower_id,
            product_id: self.product_id,
            principal_amount: self.principal_amount,
            remaining_amount: self.remaining_amount,
            interest_rate: self.interest_rate,
            total_interest: self.total_interest,
            roi: self.roi,
            loan_term: self.loan_term,
            visitor_id: self.visitor_id,
            approver_id: self.approver_id,
            disburser_id: self.disburser_id,
            proof_of_visit_attachment: self.proof_of_visit_attachment,
            investor_ids: self.investor_ids,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct InvestmentRow {
    id: i64,
    loan_id: i64,
    investor_id: i64,
    amount: BigDecimal,
    created_at: DateTime<Utc>,
}

impl InvestmentRow {
    pub(crate) fn into_domain(self) -> Investment {
        Investment {
            id: self.id,
            loan_id: self.loan_id,
            investor_id: self.investor_id,
            amount: self.amount,
            created_at: self.created_at,
        }
    }
}
