use qbank_core::model::{AccessToken, TokenKey};

use super::SqliteRepository;
use super::mapping::{count_from_i64, db_err, map_token_row, page_bounds};
use crate::repository::{AccessTokenRepository, Page, PageRequest, StorageError};

#[async_trait::async_trait]
impl AccessTokenRepository for SqliteRepository {
    async fn insert_token(&self, token: &AccessToken) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO access_tokens (token_key, description, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ",
        )
        .bind(token.key().as_str())
        .bind(token.description())
        .bind(i64::from(token.is_active()))
        .bind(token.created_at())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_token(&self, key: &TokenKey) -> Result<Option<AccessToken>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT token_key, description, is_active, created_at
            FROM access_tokens WHERE token_key = ?1
            ",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_token_row).transpose()
    }

    async fn list_tokens(&self, page: PageRequest) -> Result<Page<AccessToken>, StorageError> {
        let (offset, limit) = page_bounds(page.offset(), page.limit())?;
        let rows = sqlx::query(
            r"
            SELECT token_key, description, is_active, created_at
            FROM access_tokens
            ORDER BY created_at DESC, token_key ASC
            LIMIT ?1 OFFSET ?2
            ",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let items = rows.iter().map(map_token_row).collect::<Result<_, _>>()?;
        Ok(Page {
            items,
            total: self.count_tokens().await?,
            request: page,
        })
    }

    async fn set_token_active(&self, key: &TokenKey, active: bool) -> Result<(), StorageError> {
        let res = sqlx::query("UPDATE access_tokens SET is_active = ?1 WHERE token_key = ?2")
            .bind(i64::from(active))
            .bind(key.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn count_tokens(&self) -> Result<u64, StorageError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM access_tokens")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        count_from_i64(total)
    }
}
