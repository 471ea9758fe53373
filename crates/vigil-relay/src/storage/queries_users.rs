//! User queries for the vigil relay.

use vigil_core::db::unix_timestamp;

use super::db::Database;
use super::models::{User, UserStatus};
use super::DatabaseError;

impl Database {
    /// Create a new user. The connect token is set separately via
    /// [`Database::set_user_token`].
    pub async fn create_user(
        &self,
        id: &str,
        email: &str,
        username: &str,
        password_hash: &str,
    ) -> Result<User, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO users (id, email, username, password_hash, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(email)
        .bind(username)
        .bind(password_hash)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_user(id).await
    }

    /// Get a user by ID.
    pub async fn get_user(&self, id: &str) -> Result<User, DatabaseError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("User {id}")))
    }

    /// Get a user by email.
    pub async fn get_user_by_email(&self, email: &str) -> Result<User, DatabaseError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("User with email {email}")))
    }

    /// Find a user by the digest of their connect token.
    pub async fn get_user_by_token_digest(
        &self,
        token_digest: &str,
    ) -> Result<Option<User>, DatabaseError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE token_digest = ?")
            .bind(token_digest)
            .fetch_optional(self.pool())
            .await?;

        Ok(user)
    }

    /// Store a freshly generated connect token (digest + display hint).
    ///
    /// Regeneration invalidates live sessions; callers pair this with
    /// `disconnect_all_for_user(.., TokenRevoked, ..)`.
    pub async fn set_user_token(
        &self,
        user_id: &str,
        token_digest: &str,
        token_hint: &str,
    ) -> Result<(), DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            "UPDATE users SET token_digest = ?, token_hint = ?, token_created_at = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(token_digest)
        .bind(token_hint)
        .bind(now)
        .bind(now)
        .bind(user_id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("User {user_id}")));
        }

        Ok(())
    }

    /// Update the per-user alert preferences.
    pub async fn update_alert_preferences(
        &self,
        user_id: &str,
        alert_sound: &str,
        quiet_hours_enabled: bool,
        quiet_hours_start: Option<&str>,
        quiet_hours_end: Option<&str>,
        life_or_death: bool,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE users SET alert_sound = ?, quiet_hours_enabled = ?, quiet_hours_start = ?, \
             quiet_hours_end = ?, life_or_death = ?, updated_at = ? WHERE id = ?",
        )
        .bind(alert_sound)
        .bind(i64::from(quiet_hours_enabled))
        .bind(quiet_hours_start)
        .bind(quiet_hours_end)
        .bind(i64::from(life_or_death))
        .bind(unix_timestamp())
        .bind(user_id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("User {user_id}")));
        }

        Ok(())
    }

    /// Set a user's account status.
    pub async fn set_user_status(
        &self,
        user_id: &str,
        status: UserStatus,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE users SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(unix_timestamp())
            .bind(user_id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("User {user_id}")));
        }

        Ok(())
    }

    /// Delete a user. Devices and sessions cascade.
    pub async fn delete_user(&self, user_id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
