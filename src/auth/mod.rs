pub mod repository;
pub mod token;

use crate::error::AuthError;
use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use repository::{ConnectionLogEvent, UserRepository};
use std::sync::Arc;
use token::TokenManager;
use tracing::{info, warn};
use uuid::Uuid;

/// A user who passed credential and account-status checks, but has not
/// yet had a session minted for them.
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub username: String,
}

/// A freshly created session: the row is already persisted, the token
/// already signed.
pub struct IssuedSession {
    pub session_id: Uuid,
    pub token: String,
}

/// Facade over credential verification, the connection-cap check, and
/// session bookkeeping (spec.md §4.3/§4.5).
pub struct AuthService {
    repo: Arc<dyn UserRepository>,
    tokens: TokenManager,
}

impl AuthService {
    pub fn new(repo: Arc<dyn UserRepository>, tokens: TokenManager) -> Self {
        Self { repo, tokens }
    }

    /// Verify username/password and the per-user connection cap.
    /// Does not create a session; call [`Self::create_session`] after.
    /// `platform`/`peer_addr` carry no bearing on the outcome — they're
    /// along for the ride so every log line ties back to the same peer.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        platform: &str,
        peer_addr: &str,
    ) -> Result<AuthenticatedUser, AuthError> {
        let user = self
            .repo
            .find_by_username(username)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?
            .ok_or(AuthError::InvalidCredentials)?;

        if !verify_password(password, &user.password_hash) {
            warn!(username, platform, peer_addr, "authentication failed: bad credentials");
            return Err(AuthError::InvalidCredentials);
        }

        if !user.enabled {
            warn!(username, platform, peer_addr, "authentication failed: account disabled");
            return Err(AuthError::AccountDisabled);
        }

        let active = self
            .repo
            .count_active_sessions(user.id)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        if active >= user.max_connections as i64 {
            warn!(username, peer_addr, active, max = user.max_connections, "max connections reached");
            return Err(AuthError::MaxConnections);
        }

        info!(username, platform, peer_addr, "authentication succeeded");
        Ok(AuthenticatedUser {
            id: user.id,
            username: user.username,
        })
    }

    /// Persist a new session row and mint its signed token.
    pub async fn create_session(
        &self,
        user: &AuthenticatedUser,
        assigned_ip: &str,
        platform: &str,
        peer_addr: &str,
        client_version: &str,
    ) -> crate::Result<IssuedSession> {
        let session_id = Uuid::new_v4();
        self.repo
            .insert_session(session_id, user.id, assigned_ip, peer_addr, platform, client_version)
            .await?;
        let token = self.tokens.issue(user.id, session_id, &user.username, platform)?;
        Ok(IssuedSession { session_id, token })
    }

    pub async fn update_session_activity(&self, session_id: Uuid) -> crate::Result<()> {
        self.repo.touch_session(session_id).await
    }

    pub async fn update_session_stats(
        &self,
        session_id: Uuid,
        bytes_sent: u64,
        bytes_received: u64,
    ) -> crate::Result<()> {
        self.repo
            .record_session_stats(session_id, bytes_sent, bytes_received)
            .await
    }

    pub async fn end_session(&self, session_id: Uuid) -> crate::Result<()> {
        self.repo.close_session(session_id).await
    }

    /// Close every session idle for more than `idle_minutes` minutes.
    /// Called periodically by the supervisor (spec.md §4.8).
    pub async fn cleanup_stale_sessions(&self, idle_minutes: i64) -> crate::Result<u64> {
        self.repo.close_stale_sessions(idle_minutes).await
    }

    /// Record a connection-lifecycle event. Logged, not propagated — an
    /// audit-log write failure must never interrupt the session it's
    /// describing.
    pub async fn log_connection_event(
        &self,
        user_id: Option<Uuid>,
        event_type: ConnectionLogEvent,
        peer_addr: Option<&str>,
        platform: Option<&str>,
        details: Option<&str>,
    ) {
        if let Err(e) = self
            .repo
            .log_connection_event(user_id, event_type, peer_addr, platform, details)
            .await
        {
            warn!("failed to write connection log: {e}");
        }
    }
}

fn verify_password(password: &str, stored_hash: &str) -> bool {
    let parsed = match PasswordHash::new(stored_hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::repository::{InMemoryUserRepository, UserRecord};
    use super::*;
    use argon2::password_hash::rand_core::OsRng;
    use argon2::password_hash::{PasswordHasher, SaltString};

    fn hash(password: &str) -> String {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .unwrap()
            .to_string()
    }

    fn service() -> (Arc<InMemoryUserRepository>, AuthService) {
        let repo = Arc::new(InMemoryUserRepository::new());
        let tokens = TokenManager::new(b"test-secret-test-secret", 3600);
        let svc = AuthService::new(repo.clone(), tokens);
        (repo, svc)
    }

    #[tokio::test]
    async fn authenticate_rejects_unknown_user() {
        let (_repo, svc) = service();
        let err = svc
            .authenticate("nobody", "pw", "macos", "203.0.113.1:5000")
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
    }

    #[tokio::test]
    async fn authenticate_rejects_wrong_password() {
        let (repo, svc) = service();
        repo.seed_user(UserRecord {
            id: Uuid::new_v4(),
            username: "alice".into(),
            password_hash: hash("correct-horse"),
            enabled: true,
            max_connections: 3,
        });
        let err = svc
            .authenticate("alice", "wrong", "macos", "203.0.113.1:5000")
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
    }

    #[tokio::test]
    async fn authenticate_rejects_disabled_account() {
        let (repo, svc) = service();
        repo.seed_user(UserRecord {
            id: Uuid::new_v4(),
            username: "bob".into(),
            password_hash: hash("letmein"),
            enabled: false,
            max_connections: 3,
        });
        let err = svc
            .authenticate("bob", "letmein", "macos", "203.0.113.1:5000")
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::AccountDisabled);
    }

    #[tokio::test]
    async fn authenticate_enforces_max_connections() {
        let (repo, svc) = service();
        let id = Uuid::new_v4();
        repo.seed_user(UserRecord {
            id,
            username: "carol".into(),
            password_hash: hash("swordfish"),
            enabled: true,
            max_connections: 1,
        });
        let user = svc
            .authenticate("carol", "swordfish", "macos", "203.0.113.1:5000")
            .await
            .unwrap();
        svc.create_session(&user, "10.8.0.2", "macos", "203.0.113.1:5000", "1.0.0")
            .await
            .unwrap();

        let err = svc
            .authenticate("carol", "swordfish", "macos", "203.0.113.1:5000")
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::MaxConnections);
    }

    #[tokio::test]
    async fn successful_authentication_issues_session_and_token() {
        let (repo, svc) = service();
        repo.seed_user(UserRecord {
            id: Uuid::new_v4(),
            username: "dave".into(),
            password_hash: hash("p4ssw0rd"),
            enabled: true,
            max_connections: 3,
        });
        let user = svc
            .authenticate("dave", "p4ssw0rd", "macos", "203.0.113.1:5000")
            .await
            .unwrap();
        let session = svc
            .create_session(&user, "10.8.0.2", "macos", "203.0.113.1:5000", "1.0.0")
            .await
            .unwrap();
        assert!(!session.token.is_empty());
    }
}
