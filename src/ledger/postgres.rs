//! Postgres-backed token ledger.

use anyhow::{Context, Error};
use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

use super::{LedgerError, LedgerResult, NewRefreshToken, RefreshTokenRecord, TokenLedger};

const COLUMNS: &str = "id, user_id, token_hash, device_id, device_name, user_agent, ip_address, \
                       expires_at, is_revoked, revoked_at, replaced_by_id, parent_token_id, \
                       created_at, updated_at";

#[derive(Clone)]
pub struct PgTokenLedger {
    pool: PgPool,
}

impl PgTokenLedger {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TokenLedger for PgTokenLedger {
    async fn create(&self, new: NewRefreshToken) -> LedgerResult<RefreshTokenRecord> {
        let query = format!(
            r"
        INSERT INTO refresh_tokens
            (user_id, token_hash, device_id, device_name, user_agent, ip_address,
             expires_at, parent_token_id)
        VALUES ($1, $2, $3, $4, $5, $6, NOW() + ($7 * INTERVAL '1 second'), $8)
        RETURNING {COLUMNS}
    "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query.as_str()
        );
        let row = sqlx::query_as::<_, RefreshTokenRecord>(&query)
            .bind(new.user_id)
            .bind(&new.token_hash)
            .bind(&new.device.device_id)
            .bind(&new.device.device_name)
            .bind(&new.device.user_agent)
            .bind(&new.device.ip_address)
            .bind(new.ttl_seconds)
            .bind(new.parent_token_id)
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        match row {
            Ok(record) => Ok(record),
            Err(err) if is_unique_violation(&err) => Err(LedgerError::DuplicateHash),
            Err(err) => Err(Error::new(err)
                .context("failed to insert refresh token")
                .into()),
        }
    }

    async fn get(&self, id: Uuid) -> LedgerResult<Option<RefreshTokenRecord>> {
        let query = format!("SELECT {COLUMNS} FROM refresh_tokens WHERE id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let record = sqlx::query_as::<_, RefreshTokenRecord>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup refresh token by id")?;
        Ok(record)
    }

    async fn get_by_hash(&self, token_hash: &str) -> LedgerResult<Option<RefreshTokenRecord>> {
        let query = format!("SELECT {COLUMNS} FROM refresh_tokens WHERE token_hash = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let record = sqlx::query_as::<_, RefreshTokenRecord>(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup refresh token by hash")?;
        Ok(record)
    }

    async fn is_valid(&self, token_hash: &str) -> LedgerResult<bool> {
        // Strict inequality: a record expiring exactly now is already expired.
        let query = r"
        SELECT 1
        FROM refresh_tokens
        WHERE token_hash = $1
          AND is_revoked = FALSE
          AND expires_at > NOW()
        LIMIT 1
    ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to check refresh token validity")?;
        Ok(row.is_some())
    }

    async fn revoke(&self, id: Uuid, replaced_by: Option<Uuid>) -> LedgerResult<bool> {
        // Revocation is terminal: revoked_at keeps its first value, and only
        // the forward link may still be filled in afterwards.
        let query = r"
        UPDATE refresh_tokens
        SET is_revoked = TRUE,
            revoked_at = COALESCE(revoked_at, NOW()),
            replaced_by_id = COALESCE($2, replaced_by_id),
            updated_at = NOW()
        WHERE id = $1
    ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .bind(replaced_by)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke refresh token")?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_if_active(&self, id: Uuid, replaced_by: Option<Uuid>) -> LedgerResult<bool> {
        // The is_revoked guard makes concurrent rotations of the same secret
        // race on a single row update: exactly one caller wins.
        let query = r"
        UPDATE refresh_tokens
        SET is_revoked = TRUE,
            revoked_at = NOW(),
            replaced_by_id = $2,
            updated_at = NOW()
        WHERE id = $1
          AND is_revoked = FALSE
    ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .bind(replaced_by)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to conditionally revoke refresh token")?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_chain(&self, id: Uuid) -> LedgerResult<u64> {
        let Some(start) = self.get(id).await? else {
            return Ok(0);
        };

        // Chains are singly linked toward strictly older records, so this
        // walk terminates without cycle bookkeeping.
        let mut ancestors = Vec::new();
        let mut current = start;
        while let Some(parent_id) = current.parent_token_id {
            match self.get(parent_id).await? {
                Some(parent) => {
                    ancestors.push(parent.id);
                    current = parent;
                }
                None => break,
            }
        }

        if ancestors.is_empty() {
            return Ok(0);
        }

        let query = r"
        UPDATE refresh_tokens
        SET is_revoked = TRUE,
            revoked_at = NOW(),
            updated_at = NOW()
        WHERE id = ANY($1)
          AND is_revoked = FALSE
    ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(&ancestors)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke refresh token chain")?;
        Ok(result.rows_affected())
    }

    async fn revoke_all_for_user(&self, user_id: Uuid, except: Option<Uuid>) -> LedgerResult<u64> {
        let query = r"
        UPDATE refresh_tokens
        SET is_revoked = TRUE,
            revoked_at = NOW(),
            updated_at = NOW()
        WHERE user_id = $1
          AND is_revoked = FALSE
          AND ($2::uuid IS NULL OR id <> $2)
    ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(except)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke user refresh tokens")?;
        Ok(result.rows_affected())
    }

    async fn revoke_for_device(&self, user_id: Uuid, device_id: &str) -> LedgerResult<u64> {
        let query = r"
        UPDATE refresh_tokens
        SET is_revoked = TRUE,
            revoked_at = NOW(),
            updated_at = NOW()
        WHERE user_id = $1
          AND device_id = $2
          AND is_revoked = FALSE
    ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(device_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke device refresh tokens")?;
        Ok(result.rows_affected())
    }

    async fn sweep_expired(&self) -> LedgerResult<u64> {
        let query = "DELETE FROM refresh_tokens WHERE expires_at < NOW()";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to sweep expired refresh tokens")?;
        Ok(result.rows_affected())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::is_unique_violation;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("99999"),
        }));
        assert!(!is_unique_violation(&err));

        let err = sqlx::Error::RowNotFound;
        assert!(!is_unique_violation(&err));
    }
}
