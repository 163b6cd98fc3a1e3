use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::{RoleType, User};
use crate::ports::{RepositoryError, RepositoryResult, UserRepository};

#[derive(Clone)]
pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn get_by_id(&self, id: i64) -> RepositoryResult<User> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, role, is_active FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("user {}", id)))?
            .into_domain()
    }

    async fn get_many(&self, ids: &[i64]) -> RepositoryResult<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, role, is_active FROM users WHERE id = ANY($1) ORDER BY id",
        )
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(UserRow::into_domain).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    name: String,
    email: String,
    role: String,
    is_active: bool,
}

impl UserRow {
    fn into_domain(self) -> RepositoryResult<User> {
        let role = self
            .role
            .parse::<RoleType>()
            .map_err(|e| RepositoryError::Corrupt(format!("user {}: {}", self.id, e)))?;

        Ok(User {
            id: self.id,
            name: self.name,
            email: self.email,
            role,
            is_active: self.is_active,
        })
    }
}
