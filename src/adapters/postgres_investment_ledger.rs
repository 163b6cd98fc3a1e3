use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::PgPool;

use super::postgres_loan_repository::InvestmentRow;
use crate::domain::{Investment, InvestorTotal};
use crate::ports::{InvestmentLedger, RepositoryResult};

#[derive(Clone)]
pub struct PostgresInvestmentLedger {
    pool: PgPool,
}

impl PostgresInvestmentLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InvestmentLedger for PostgresInvestmentLedger {
    async fn sum_for_loan(&self, loan_id: i64) -> RepositoryResult<BigDecimal> {
        let sum: BigDecimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM investments WHERE loan_id = $1",
        )
        .bind(loan_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(sum)
    }

    async fn sum_for_investor(&self, investor_id: i64) -> RepositoryResult<BigDecimal> {
        let sum: BigDecimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM investments WHERE investor_id = $1",
        )
        .bind(investor_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(sum)
    }

    async fn list_for_loan(&self, loan_id: i64) -> RepositoryResult<Vec<Investment>> {
        let rows = sqlx::query_as::<_, InvestmentRow>(
            r#"
            SELECT id, loan_id, investor_id, amount, created_at
            FROM investments
            WHERE loan_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(loan_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(InvestmentRow::into_domain).collect())
    }

    async fn investor_totals(&self, loan_id: i64) -> RepositoryResult<Vec<InvestorTotal>> {
        let rows: Vec<(i64, BigDecimal)> = sqlx::query_as(
            r#"
            SELECT investor_id, SUM(amount)
            FROM investments
            WHERE loan_id = $1
            GROUP BY investor_id
            ORDER BY investor_id
            "#,
        )
        .bind(loan_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(investor_id, amount)| InvestorTotal {
                investor_id,
                amount,
            })
            .collect())
    }
}
