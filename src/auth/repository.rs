//! User and session persistence.
//!
//! `UserRepository` is the seam between the auth service and storage so
//! tests can run the whole authentication/session lifecycle against an
//! in-memory fake without a database. The production implementation is
//! backed by `sqlx::PgPool`, following the `FromRow` query shape used
//! throughout the pack's VPN database modules.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub enabled: bool,
    pub max_connections: i32,
}

#[derive(Debug, Clone, FromRow)]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub assigned_ip: String,
    pub peer_addr: Option<String>,
    pub platform: Option<String>,
    pub client_version: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub bytes_sent: i64,
    pub bytes_received: i64,
    pub ended_at: Option<DateTime<Utc>>,
}

/// `connection_logs.event_type` (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLogEvent {
    Connect,
    Disconnect,
    AuthFail,
    Error,
}

impl ConnectionLogEvent {
    fn label(&self) -> &'static str {
        match self {
            ConnectionLogEvent::Connect => "connect",
            ConnectionLogEvent::Disconnect => "disconnect",
            ConnectionLogEvent::AuthFail => "auth_fail",
            ConnectionLogEvent::Error => "error",
        }
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_username(&self, username: &str) -> crate::Result<Option<UserRecord>>;
    async fn count_active_sessions(&self, user_id: Uuid) -> crate::Result<i64>;
    async fn insert_session(
        &self,
        id: Uuid,
        user_id: Uuid,
        assigned_ip: &str,
        peer_addr: &str,
        platform: &str,
        client_version: &str,
    ) -> crate::Result<()>;
    async fn touch_session(&self, id: Uuid) -> crate::Result<()>;
    async fn record_session_stats(
        &self,
        id: Uuid,
        bytes_sent: u64,
        bytes_received: u64,
    ) -> crate::Result<()>;
    async fn close_session(&self, id: Uuid) -> crate::Result<()>;
    /// Close every session whose `last_activity_at` is older than
    /// `idle_minutes` minutes and return how many were closed.
    async fn close_stale_sessions(&self, idle_minutes: i64) -> crate::Result<u64>;
    /// Append a row to `connection_logs` (spec.md §6/§8). `user_id` is
    /// `None` when the event predates knowing who the peer is, e.g. an
    /// auth failure against an unknown username.
    async fn log_connection_event(
        &self,
        user_id: Option<Uuid>,
        event_type: ConnectionLogEvent,
        peer_addr: Option<&str>,
        platform: Option<&str>,
        details: Option<&str>,
    ) -> crate::Result<()>;
}

/// `sqlx::PgPool`-backed implementation, per spec.md §6's persisted schema.
pub struct PgUserRepository {
    pool: sqlx::PgPool,
}

impl PgUserRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_username(&self, username: &str) -> crate::Result<Option<UserRecord>> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, password_hash, enabled, max_connections \
             FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn count_active_sessions(&self, user_id: Uuid) -> crate::Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sessions WHERE user_id = $1 AND ended_at IS NULL",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn insert_session(
        &self,
        id: Uuid,
        user_id: Uuid,
        assigned_ip: &str,
        peer_addr: &str,
        platform: &str,
        client_version: &str,
    ) -> crate::Result<()> {
        sqlx::query(
            "INSERT INTO sessions \
             (id, user_id, assigned_ip, peer_addr, platform, client_version, started_at, last_activity_at) \
             VALUES ($1, $2, $3, $4, $5, $6, now(), now())",
        )
        .bind(id)
        .bind(user_id)
        .bind(assigned_ip)
        .bind(peer_addr)
        .bind(platform)
        .bind(client_version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_session(&self, id: Uuid) -> crate::Result<()> {
        sqlx::query("UPDATE sessions SET last_activity_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_session_stats(
        &self,
        id: Uuid,
        bytes_sent: u64,
        bytes_received: u64,
    ) -> crate::Result<()> {
        sqlx::query(
            "UPDATE sessions SET bytes_sent = $2, bytes_received = $3, last_activity_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(bytes_sent as i64)
        .bind(bytes_received as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn close_session(&self, id: Uuid) -> crate::Result<()> {
        sqlx::query("UPDATE sessions SET ended_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close_stale_sessions(&self, idle_minutes: i64) -> crate::Result<u64> {
        let result = sqlx::query(
            "UPDATE sessions SET ended_at = now() \
             WHERE ended_at IS NULL AND last_activity_at < now() - ($1 || ' minutes')::interval",
        )
        .bind(idle_minutes)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn log_connection_event(
        &self,
        user_id: Option<Uuid>,
        event_type: ConnectionLogEvent,
        peer_addr: Option<&str>,
        platform: Option<&str>,
        details: Option<&str>,
    ) -> crate::Result<()> {
        sqlx::query(
            "INSERT INTO connection_logs (user_id, event_type, peer_addr, platform, details) \
             VALUES ($1, $2::connection_log_event, $3, $4, $5)",
        )
        .bind(user_id)
        .bind(event_type.label())
        .bind(peer_addr)
        .bind(platform)
        .bind(details)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// A recorded `connection_logs` row, kept around so tests can assert on it.
#[derive(Debug, Clone)]
pub struct ConnectionLogRecord {
    pub user_id: Option<Uuid>,
    pub event_type: ConnectionLogEvent,
    pub peer_addr: Option<String>,
    pub platform: Option<String>,
    pub details: Option<String>,
}

/// In-memory fake for unit tests — no I/O, no real clock dependency beyond
/// what the caller feeds it.
#[derive(Default)]
pub struct InMemoryUserRepository {
    users: Mutex<HashMap<String, UserRecord>>,
    sessions: Mutex<HashMap<Uuid, SessionRecord>>,
    connection_logs: Mutex<Vec<ConnectionLogRecord>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_user(&self, user: UserRecord) {
        self.users.lock().unwrap().insert(user.username.clone(), user);
    }

    pub fn connection_logs(&self) -> Vec<ConnectionLogRecord> {
        self.connection_logs.lock().unwrap().clone()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_username(&self, username: &str) -> crate::Result<Option<UserRecord>> {
        Ok(self.users.lock().unwrap().get(username).cloned())
    }

    async fn count_active_sessions(&self, user_id: Uuid) -> crate::Result<i64> {
        let count = self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.user_id == user_id && s.ended_at.is_none())
            .count();
        Ok(count as i64)
    }

    async fn insert_session(
        &self,
        id: Uuid,
        user_id: Uuid,
        assigned_ip: &str,
        peer_addr: &str,
        platform: &str,
        client_version: &str,
    ) -> crate::Result<()> {
        let now = Utc::now();
        self.sessions.lock().unwrap().insert(
            id,
            SessionRecord {
                id,
                user_id,
                assigned_ip: assigned_ip.to_string(),
                peer_addr: Some(peer_addr.to_string()),
                platform: Some(platform.to_string()),
                client_version: Some(client_version.to_string()),
                started_at: now,
                last_activity_at: now,
                bytes_sent: 0,
                bytes_received: 0,
                ended_at: None,
            },
        );
        Ok(())
    }

    async fn touch_session(&self, id: Uuid) -> crate::Result<()> {
        if let Some(s) = self.sessions.lock().unwrap().get_mut(&id) {
            s.last_activity_at = Utc::now();
        }
        Ok(())
    }

    async fn record_session_stats(
        &self,
        id: Uuid,
        bytes_sent: u64,
        bytes_received: u64,
    ) -> crate::Result<()> {
        if let Some(s) = self.sessions.lock().unwrap().get_mut(&id) {
            s.bytes_sent = bytes_sent as i64;
            s.bytes_received = bytes_received as i64;
            s.last_activity_at = Utc::now();
        }
        Ok(())
    }

    async fn close_session(&self, id: Uuid) -> crate::Result<()> {
        if let Some(s) = self.sessions.lock().unwrap().get_mut(&id) {
            s.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn close_stale_sessions(&self, idle_minutes: i64) -> crate::Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::minutes(idle_minutes);
        let mut sessions = self.sessions.lock().unwrap();
        let mut closed = 0u64;
        for s in sessions.values_mut() {
            if s.ended_at.is_none() && s.last_activity_at < cutoff {
                s.ended_at = Some(Utc::now());
                closed += 1;
            }
        }
        Ok(closed)
    }

    async fn log_connection_event(
        &self,
        user_id: Option<Uuid>,
        event_type: ConnectionLogEvent,
        peer_addr: Option<&str>,
        platform: Option<&str>,
        details: Option<&str>,
    ) -> crate::Result<()> {
        self.connection_logs.lock().unwrap().push(ConnectionLogRecord {
            user_id,
            event_type,
            peer_addr: peer_addr.map(str::to_string),
            platform: platform.map(str::to_string),
            details: details.map(str::to_string),
        });
        Ok(())
    }
}
