use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::PgPool;

use crate::domain::{LoanTerm, Product};
use crate::ports::{ProductRepository, RepositoryError, RepositoryResult};

#[derive(Clone)]
pub struct PostgresProductRepository {
    pool: PgPool,
}

impl PostgresProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductRepository for PostgresProductRepository {
    async fn get_by_id(&self, id: i64) -> RepositoryResult<Product> {
        let row = sqlx::query_as::<_, ProductRow>(
            "SELECT id, name, principal_amount, interest_rate, loan_term FROM products WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("product {}", id)))?
            .into_domain()
    }

    async fn list(&self) -> RepositoryResult<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>(
            "SELECT id, name, principal_amount, interest_rate, loan_term FROM products ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ProductRow::into_domain).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: i64,
    name: String,
    principal_amount: BigDecimal,
    interest_rate: BigDecimal,
    loan_term: i32,
}

impl ProductRow {
    fn into_domain(self) -> RepositoryResult<Product> {
        let term = LoanTerm::from_months(self.loan_term).ok_or_else(|| {
            RepositoryError::Corrupt(format!(
                "product {}: unsupported term of {} months",
                self.id, self.loan_term
            ))
        })?;

        Ok(Product {
            id: self.id,
            name: self.name,
            principal_amount: self.principal_amount,
            interest_rate: self.interest_rate,
            term,
        })
    }
}
