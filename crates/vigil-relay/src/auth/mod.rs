//! Credential validation for producers and consumers.
//!
//! Translates presented credentials (hub API keys, short connect tokens,
//! consumer bearer tokens) into principal records, with one specific error
//! per rejection so the router can answer with the right error code.

pub mod jwt;
pub mod token;

pub use jwt::JwtManager;

use tracing::warn;

use crate::storage::{Database, Device, Hub, HubStatus, User};

/// Why a credential was rejected.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Invalid hub key")]
    InvalidHubKey,

    #[error("Hub is not approved (status: {status})")]
    HubNotApproved { status: String },

    #[error("Hub is suspended")]
    HubSuspended,

    #[error("Invalid user token")]
    InvalidUserToken,

    #[error("User account is suspended")]
    UserSuspended,

    #[error("Storage error: {0}")]
    Database(#[from] crate::storage::DatabaseError),
}

/// A validated user along with their active devices.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: User,
    pub devices: Vec<Device>,
}

/// Validates producer and consumer credentials against the store.
pub struct Authenticator {
    db: Database,
    jwt: JwtManager,
    accept_legacy_tokens: bool,
}

impl Authenticator {
    pub fn new(db: Database, jwt: JwtManager, accept_legacy_tokens: bool) -> Self {
        Self {
            db,
            jwt,
            accept_legacy_tokens,
        }
    }

    /// Validate a hub API key. Only `approved` hubs may open sessions.
    pub async fn validate_hub_key(&self, key: &str) -> Result<Hub, CredentialError> {
        if key.is_empty() || !key.starts_with(token::HUB_KEY_PREFIX) {
            return Err(CredentialError::InvalidHubKey);
        }

        let hub = self
            .db
            .get_hub_by_api_key(key)
            .await?
            .ok_or(CredentialError::InvalidHubKey)?;

        if hub.status == HubStatus::Suspended.as_str() {
            warn!(hub = %hub.slug, "Rejected connection from suspended hub");
            return Err(CredentialError::HubSuspended);
        }
        if hub.status != HubStatus::Approved.as_str() {
            return Err(CredentialError::HubNotApproved {
                status: hub.status.clone(),
            });
        }

        Ok(hub)
    }

    /// Validate a user connect token (short form, or the legacy prefixed
    /// form when enabled) and attach the user's active devices.
    pub async fn validate_user_token(&self, presented: &str) -> Result<Principal, CredentialError> {
        let shape_ok = token::is_short_form(presented)
            || (self.accept_legacy_tokens && token::is_legacy_form(presented));
        if !shape_ok {
            return Err(CredentialError::InvalidUserToken);
        }

        let digest = token::credential_digest(presented);
        let user = self
            .db
            .get_user_by_token_digest(&digest)
            .await?
            .ok_or(CredentialError::InvalidUserToken)?;

        if user.is_suspended() {
            return Err(CredentialError::UserSuspended);
        }

        let devices = self.db.active_devices_for_user(&user.id).await?;
        Ok(Principal { user, devices })
    }

    /// Validate a consumer bearer token and load the user it names.
    pub async fn validate_bearer(&self, bearer: &str) -> Result<User, CredentialError> {
        let claims = self
            .jwt
            .validate(bearer)
            .map_err(|_| CredentialError::InvalidUserToken)?;

        let user = self
            .db
            .get_user(&claims.sub)
            .await
            .map_err(|_| CredentialError::InvalidUserToken)?;

        if user.is_suspended() {
            return Err(CredentialError::UserSuspended);
        }

        Ok(user)
    }

    /// Regenerate a user's connect token, invalidating live sessions in
    /// the same logical operation. Returns the new raw token.
    pub async fn regenerate_user_token(&self, user_id: &str) -> Result<String, CredentialError> {
        let raw = token::generate_connect_token();
        let digest = token::credential_digest(&raw);
        let hint = token::credential_hint(&raw);

        self.db.set_user_token(user_id, &digest, &hint).await?;
        self.db
            .disconnect_all_sessions_for_user(
                user_id,
                crate::storage::DisconnectReason::TokenRevoked,
                Some("Connect token regenerated"),
            )
            .await?;

        Ok(raw)
    }
}
