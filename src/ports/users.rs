use async_trait::async_trait;

use super::RepositoryResult;
use crate::domain::User;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> RepositoryResult<User>;

    /// Missing ids are skipped rather than reported.
    async fn get_many(&self, ids: &[i64]) -> RepositoryResult<Vec<User>>;
}
