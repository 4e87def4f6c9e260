// server/session.rs
// Per-client session holders: each session owns at most one indexed file,
// replaced atomically under its own lock. The registry maps opaque IDs to
// sessions and sweeps idle ones.

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use esx_core::DataFile;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub const SESSION_HEADER: &str = "x-esx-session-id";
pub const SESSION_COOKIE: &str = "esx_doctor_sid";
const COOKIE_MAX_AGE_SECS: i64 = 24 * 60 * 60;

struct SessionState {
    data_file: Option<Arc<DataFile>>,
    last_seen: DateTime<Utc>,
}

pub struct Session {
    state: RwLock<SessionState>,
}

impl Session {
    fn new(data_file: Option<Arc<DataFile>>, now: DateTime<Utc>) -> Self {
        Self {
            state: RwLock::new(SessionState {
                data_file,
                last_seen: now,
            }),
        }
    }

    pub async fn data_file(&self) -> Option<Arc<DataFile>> {
        self.state.read().await.data_file.clone()
    }

    pub async fn last_seen(&self) -> DateTime<Utc> {
        self.state.read().await.last_seen
    }

    pub async fn touch(&self, now: DateTime<Utc>) {
        self.state.write().await.last_seen = now;
    }

    /// Swap the session's file. Holding the write lock here guarantees no
    /// reader still sees the old file when its backing temp is deleted, and
    /// that the deletion happens exactly once. A prior owned-temp file is
    /// removed only when the new file lives at a different path.
    pub async fn replace(&self, new: Option<Arc<DataFile>>) {
        let mut state = self.state.write().await;
        let old = state.data_file.take();
        state.data_file = new.clone();
        if let Some(old) = old {
            let path_differs = new
                .map(|n| n.path != old.path)
                .unwrap_or(true);
            if old.owned_temp && path_differs {
                if let Err(err) = std::fs::remove_file(&old.path) {
                    tracing::warn!(
                        "failed to remove temp file {}: {}",
                        old.path.display(),
                        err
                    );
                }
            }
        }
    }

    pub async fn close(&self) {
        self.replace(None).await;
    }
}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    default_file: Option<Arc<DataFile>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(default_file: Option<Arc<DataFile>>, ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            default_file,
            ttl,
        }
    }

    /// Resolve the request's session, creating one (seeded with the
    /// bootstrap file) for unknown IDs. Returns the session and the ID the
    /// response layer must re-issue as a cookie.
    pub async fn session_for(&self, headers: &HeaderMap) -> (Arc<Session>, String) {
        let now = Utc::now();
        let id = session_id_from_headers(headers).unwrap_or_else(random_session_id);

        let session = {
            let mut sessions = self.sessions.write().await;
            sessions
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Session::new(self.default_file.clone(), now)))
                .clone()
        };
        session.touch(now).await;
        (session, id)
    }

    /// Drop sessions idle past the TTL, closing each so owned temp files
    /// are released.
    pub async fn cleanup_expired(&self) {
        let now = Utc::now();
        let mut expired = Vec::new();
        {
            let mut sessions = self.sessions.write().await;
            let mut stale = Vec::new();
            for (id, session) in sessions.iter() {
                if now - session.last_seen().await > self.ttl {
                    stale.push(id.clone());
                }
            }
            for id in stale {
                if let Some(session) = sessions.remove(&id) {
                    expired.push(session);
                }
            }
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expiring idle sessions");
        }
        for session in expired {
            session.close().await;
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

pub fn cookie_header(id: &str) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, id, COOKIE_MAX_AGE_SECS
    )
}

fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(SESSION_HEADER) {
        if let Ok(value) = value.to_str() {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    let cookies = headers.get("cookie")?.to_str().ok()?;
    for pair in cookies.split(';') {
        let pair = pair.trim();
        if let Some(value) = pair.strip_prefix(SESSION_COOKIE) {
            if let Some(value) = value.strip_prefix('=') {
                let value = value.trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

fn random_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
