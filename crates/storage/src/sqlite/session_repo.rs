use chrono::{DateTime, Utc};
use qbank_core::model::{QuizSessionState, SessionKey};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{db_err, ser};
use crate::repository::{SessionStore, StorageError, StoredSession};

// Expiry is kept as unix seconds so purging is a plain integer comparison.

fn encode_state(state: &QuizSessionState) -> Result<String, StorageError> {
    serde_json::to_string(state).map_err(ser)
}

fn version_from_i64(v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization("session version sign".into()))
}

fn version_to_i64(v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization("session version overflow".into()))
}

fn expiry_from_secs(secs: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| StorageError::Serialization(format!("invalid session expiry {secs}")))
}

#[async_trait::async_trait]
impl SessionStore for SqliteRepository {
    async fn load(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<Option<StoredSession>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT state, version, expires_at
            FROM quiz_sessions WHERE session_key = ?1
            ",
        )
        .bind(key.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let state: QuizSessionState =
            serde_json::from_str(&row.try_get::<String, _>("state").map_err(ser)?).map_err(ser)?;
        let stored = StoredSession {
            state,
            version: version_from_i64(row.try_get("version").map_err(ser)?)?,
            expires_at: expiry_from_secs(row.try_get("expires_at").map_err(ser)?)?,
        };
        Ok((!stored.is_expired_at(now)).then_some(stored))
    }

    async fn put(
        &self,
        key: &SessionKey,
        state: &QuizSessionState,
        expires_at: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let version: i64 = sqlx::query_scalar(
            r"
            INSERT INTO quiz_sessions (session_key, state, version, expires_at)
            VALUES (?1, ?2, 1, ?3)
            ON CONFLICT(session_key) DO UPDATE SET
                state = excluded.state,
                version = quiz_sessions.version + 1,
                expires_at = excluded.expires_at
            RETURNING version
            ",
        )
        .bind(key.to_string())
        .bind(encode_state(state)?)
        .bind(expires_at.timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        version_from_i64(version)
    }

    async fn compare_and_swap(
        &self,
        key: &SessionKey,
        expected_version: u64,
        state: &QuizSessionState,
        expires_at: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let res = sqlx::query(
            r"
            UPDATE quiz_sessions
            SET state = ?1, version = version + 1, expires_at = ?2
            WHERE session_key = ?3 AND version = ?4
            ",
        )
        .bind(encode_state(state)?)
        .bind(expires_at.timestamp())
        .bind(key.to_string())
        .bind(version_to_i64(expected_version)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }
        Ok(expected_version + 1)
    }

    async fn delete(&self, key: &SessionKey) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM quiz_sessions WHERE session_key = ?1")
            .bind(key.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StorageError> {
        let res = sqlx::query("DELETE FROM quiz_sessions WHERE expires_at <= ?1")
            .bind(now.timestamp())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(res.rows_affected())
    }
}
