use async_trait::async_trait;

use super::RepositoryResult;
use crate::domain::Product;

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> RepositoryResult<Product>;

    async fn list(&self) -> RepositoryResult<Vec<Product>>;
}
