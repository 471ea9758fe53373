//! Device queries for push notification targets.
//!
//! A push token maps to at most one device row; re-registration with an
//! existing token transfers ownership and clears the failure counter.

use vigil_core::db::unix_timestamp;

use super::db::Database;
use super::models::Device;
use super::DatabaseError;

impl Database {
    /// Register or update a device by push token (upsert).
    ///
    /// Re-registration transfers the row to the new user, reactivates it,
    /// and resets `failed_attempts` to 0.
    pub async fn upsert_device(
        &self,
        id: &str,
        user_id: &str,
        push_token: &str,
        platform: &str,
        device_name: Option<&str>,
    ) -> Result<Device, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO devices (id, user_id, push_token, platform, device_name, last_seen, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(push_token) DO UPDATE SET user_id = excluded.user_id, \
             platform = excluded.platform, device_name = excluded.device_name, \
             is_active = 1, failed_attempts = 0, last_fail_reason = NULL, \
             last_seen = excluded.last_seen",
        )
        .bind(id)
        .bind(user_id)
        .bind(push_token)
        .bind(platform)
        .bind(device_name)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_device_by_token(push_token)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Device for token {push_token}")))
    }

    /// Get a device by its push token.
    pub async fn get_device_by_token(
        &self,
        push_token: &str,
    ) -> Result<Option<Device>, DatabaseError> {
        let device = sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE push_token = ?")
            .bind(push_token)
            .fetch_optional(self.pool())
            .await?;

        Ok(device)
    }

    /// All active devices for a user, newest first.
    pub async fn active_devices_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<Device>, DatabaseError> {
        let devices = sqlx::query_as::<_, Device>(
            "SELECT * FROM devices WHERE user_id = ? AND is_active = 1 ORDER BY last_seen DESC",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        Ok(devices)
    }

    /// Active devices for a user restricted to one platform.
    pub async fn active_devices_for_user_on_platform(
        &self,
        user_id: &str,
        platform: &str,
    ) -> Result<Vec<Device>, DatabaseError> {
        let devices = sqlx::query_as::<_, Device>(
            "SELECT * FROM devices WHERE user_id = ? AND is_active = 1 AND platform = ? \
             ORDER BY last_seen DESC",
        )
        .bind(user_id)
        .bind(platform)
        .fetch_all(self.pool())
        .await?;

        Ok(devices)
    }

    /// Whether the user has at least one active device.
    pub async fn user_has_devices(&self, user_id: &str) -> Result<bool, DatabaseError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM devices WHERE user_id = ? AND is_active = 1",
        )
        .bind(user_id)
        .fetch_one(self.pool())
        .await?;

        Ok(count > 0)
    }

    /// Record a failed push delivery. Deactivates the device once the
    /// consecutive failure count reaches `threshold`. Returns `true` when
    /// the device was deactivated by this call.
    pub async fn record_device_failure(
        &self,
        device_id: &str,
        reason: &str,
        threshold: i64,
    ) -> Result<bool, DatabaseError> {
        sqlx::query(
            "UPDATE devices SET failed_attempts = failed_attempts + 1, last_fail_reason = ? \
             WHERE id = ?",
        )
        .bind(reason)
        .bind(device_id)
        .execute(self.pool())
        .await?;

        let result = sqlx::query(
            "UPDATE devices SET is_active = 0 WHERE id = ? AND is_active = 1 AND failed_attempts >= ?",
        )
        .bind(device_id)
        .bind(threshold)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a successful push delivery: failure counter resets.
    pub async fn record_device_success(&self, device_id: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE devices SET failed_attempts = 0, last_fail_reason = NULL, last_seen = ? \
             WHERE id = ?",
        )
        .bind(unix_timestamp())
        .bind(device_id)
        .execute(self.pool())
        .await?;

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        let db = Database::open_in_memory().await.unwrap();
        db.create_user("u1", "a@example.com", "a", "h").await.unwrap();
        db.create_user("u2", "b@example.com", "b", "h").await.unwrap();
        db
    }

    #[tokio::test]
    async fn upsert_and_list() {
        let db = test_db().await;
        db.upsert_device("d1", "u1", "tok-a", "android", Some("Pixel"))
            .await
            .unwrap();
        db.upsert_device("d2", "u1", "tok-b", "web", None).await.unwrap();

        let devices = db.active_devices_for_user("u1").await.unwrap();
        assert_eq!(devices.len(), 2);
        assert!(db.user_has_devices("u1").await.unwrap());
        assert!(!db.user_has_devices("u2").await.unwrap());
    }

    #[tokio::test]
    async fn reregistration_transfers_ownership_and_resets_failures() {
        let db = test_db().await;
        db.upsert_device("d1", "u1", "tok-a", "android", None).await.unwrap();
        db.record_device_failure("d1", "Unregistered", 3).await.unwrap();

        let device = db.upsert_device("d2", "u2", "tok-a", "ios", None).await.unwrap();
        assert_eq!(device.user_id, "u2");
        assert_eq!(device.failed_attempts, 0);
        assert_eq!(device.is_active, 1);
        // Token still maps to a single row
        assert_eq!(db.active_devices_for_user("u1").await.unwrap().len(), 0);
        assert_eq!(db.active_devices_for_user("u2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn third_consecutive_failure_deactivates() {
        let db = test_db().await;
        db.upsert_device("d1", "u1", "tok-a", "android", None).await.unwrap();

        assert!(!db.record_device_failure("d1", "timeout", 3).await.unwrap());
        assert!(!db.record_device_failure("d1", "timeout", 3).await.unwrap());
        assert!(db.record_device_failure("d1", "timeout", 3).await.unwrap());

        let device = db.get_device_by_token("tok-a").await.unwrap().unwrap();
        assert_eq!(device.is_active, 0);
        assert_eq!(device.failed_attempts, 3);
        assert!(db.active_devices_for_user("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn success_resets_failure_counter() {
        let db = test_db().await;
        db.upsert_device("d1", "u1", "tok-a", "android", None).await.unwrap();
        db.record_device_failure("d1", "timeout", 3).await.unwrap();
        db.record_device_success("d1").await.unwrap();

        let device = db.get_device_by_token("tok-a").await.unwrap().unwrap();
        assert_eq!(device.failed_attempts, 0);
        assert!(device.last_fail_reason.is_none());
    }

    #[tokio::test]
    async fn platform_filter() {
        let db = test_db().await;
        db.upsert_device("d1", "u1", "tok-a", "android", None).await.unwrap();
        db.upsert_device("d2", "u1", "tok-b", "web", None).await.unwrap();

        let web = db
            .active_devices_for_user_on_platform("u1", "web")
            .await
            .unwrap();
        assert_eq!(web.len(), 1);
        assert_eq!(web[0].push_token, "tok-b");
    }

    #[tokio::test]
    async fn deleting_user_cascades_devices() {
        let db = test_db().await;
        db.upsert_device("d1", "u1", "tok-a", "android", None).await.unwrap();
        db.delete_user("u1").await.unwrap();
        assert!(db.get_device_by_token("tok-a").await.unwrap().is_none());
    }
}
