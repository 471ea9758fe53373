//! Hub (producer organization) queries.

use vigil_core::db::unix_timestamp;

use super::db::Database;
use super::models::{Hub, HubStatus};
use super::DatabaseError;

impl Database {
    /// Register a hub. New hubs start in `pending` until approved.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_hub(
        &self,
        id: &str,
        name: &str,
        slug: &str,
        owner_email: &str,
        api_key: &str,
        api_key_digest: &str,
        api_key_hint: &str,
    ) -> Result<Hub, DatabaseError> {
        sqlx::query(
            "INSERT INTO hubs (id, name, slug, owner_email, api_key, api_key_digest, \
             api_key_hint, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(slug)
        .bind(owner_email)
        .bind(api_key)
        .bind(api_key_digest)
        .bind(api_key_hint)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        self.get_hub(id).await
    }

    /// Get a hub by ID.
    pub async fn get_hub(&self, id: &str) -> Result<Hub, DatabaseError> {
        sqlx::query_as::<_, Hub>("SELECT * FROM hubs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Hub {id}")))
    }

    /// Look up a hub by its full API key.
    pub async fn get_hub_by_api_key(&self, api_key: &str) -> Result<Option<Hub>, DatabaseError> {
        let hub = sqlx::query_as::<_, Hub>("SELECT * FROM hubs WHERE api_key = ?")
            .bind(api_key)
            .fetch_optional(self.pool())
            .await?;

        Ok(hub)
    }

    /// Set a hub's moderation status.
    pub async fn set_hub_status(
        &self,
        hub_id: &str,
        status: HubStatus,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE hubs SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(hub_id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Hub {hub_id}")));
        }

        Ok(())
    }

    /// Suspend a hub and disconnect its active sessions in one logical
    /// operation. Returns the number of sessions disconnected.
    pub async fn suspend_hub(&self, hub_id: &str) -> Result<u64, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        let updated = sqlx::query("UPDATE hubs SET status = ? WHERE id = ?")
            .bind(HubStatus::Suspended.as_str())
            .bind(hub_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Hub {hub_id}")));
        }

        let sessions = sqlx::query(
            "UPDATE sessions SET status = 'disconnected', disconnected_at = ?, \
             disconnect_reason = 'error', disconnect_message = 'Hub suspended' \
             WHERE hub_id = ? AND status = 'active'",
        )
        .bind(unix_timestamp())
        .bind(hub_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(sessions.rows_affected())
    }

    /// Bump the hub's connection counter on a successful producer auth.
    pub async fn increment_hub_connections(&self, hub_id: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE hubs SET total_connections = total_connections + 1, last_connected_at = ? \
             WHERE id = ?",
        )
        .bind(unix_timestamp())
        .bind(hub_id)
        .execute(self.pool())
        .await?;

        Ok(())
    }
}
