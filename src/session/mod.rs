//! Session table: binds the object pool, the id hash table, and the
//! last-access ordered index into the single "session manager" described
//! by the data model.
//!
//! A session is present in the hash table and the ordered index if and
//! only if it is present in the pool; [`SessionManager`] enforces this by
//! only ever mutating all three together.

use std::time::{Duration, Instant};

use rand::{rngs::OsRng, RngCore};

use crate::hashtable::{HashFn, HashTable};
use crate::pool::{Handle, Pool};
use crate::rbtree::RbTree;

pub const SESSION_ID_LEN: usize = 32;
const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
/// Cookie lifetime is fixed independently of the configurable sweep
/// timeout: 30 days, matching the Set-Cookie header the gateway emits.
const COOKIE_MAX_AGE_SECS: u64 = 2_592_000;

pub struct Session {
    pub id: [u8; SESSION_ID_LEN],
    pub created: Instant,
    pub last_access: Instant,
    pub authenticated: bool,
    tree_node: u32,
}

impl Session {
    pub fn id_str(&self) -> &str {
        std::str::from_utf8(&self.id).expect("session id is ASCII by construction")
    }
}

/// Generates a session id from the OS CSPRNG. The original generator is a
/// seeded LCG (`seed = seed * 1103515245 + 12345`); predictable session
/// ids are a vulnerability rather than a behavior worth preserving, so
/// this draws from [`OsRng`] instead.
fn generate_session_id() -> [u8; SESSION_ID_LEN] {
    let mut rng = OsRng;
    let mut id = [0u8; SESSION_ID_LEN];
    for byte in id.iter_mut() {
        let idx = (rng.next_u32() as usize) % ID_ALPHABET.len();
        *byte = ID_ALPHABET[idx];
    }
    id
}

/// Key ordering the expiry tree: `(last_access, id)`, matching the
/// original's `session_expiry_compare` tie-break on id once access times
/// collide.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ExpiryKey(u64, [u8; SESSION_ID_LEN]);

pub struct SessionManager {
    pool: Pool<Session>,
    by_id: HashTable<Handle>,
    by_access: RbTree<ExpiryKey, Handle>,
    epoch: Instant,
    session_timeout: Duration,
}

impl SessionManager {
    pub fn new(max_sessions: usize, session_timeout: Duration) -> Self {
        Self {
            pool: Pool::new(max_sessions, false),
            by_id: HashTable::new(16384, HashFn::Fnv1a),
            by_access: RbTree::new(),
            epoch: Instant::now(),
            session_timeout,
        }
    }

    #[inline]
    fn millis_since_epoch(&self, when: Instant) -> u64 {
        when.saturating_duration_since(self.epoch).as_millis() as u64
    }

    /// Creates a session. Returns `None` when the pool is exhausted
    /// (`max_sessions` concurrent sessions already live).
    pub fn create(&mut self) -> Option<&Session> {
        let now = Instant::now();
        let id = generate_session_id();
        let session = Session {
            id,
            created: now,
            last_access: now,
            authenticated: false,
            tree_node: 0,
        };

        let handle = self.pool.acquire(session)?;
        let key = ExpiryKey(self.millis_since_epoch(now), id);
        let node = self.by_access.insert(key, handle);
        self.pool.get_mut(handle).unwrap().tree_node = node;
        self.by_id.set(&id, handle);

        self.pool.get(handle)
    }

    /// Looks up a session by id and refreshes its position in the expiry
    /// index, matching `ct_session_find`'s delete-then-reinsert on every
    /// access.
    pub fn find(&mut self, id: &[u8]) -> Option<&Session> {
        if id.len() != SESSION_ID_LEN {
            return None;
        }
        let handle = *self.by_id.get(id)?;

        let now = Instant::now();
        let session = self.pool.get_mut(handle)?;
        let old_node = session.tree_node;
        self.by_access.delete(old_node);

        session.last_access = now;
        let key = ExpiryKey(self.millis_since_epoch(now), session.id);
        let new_node = self.by_access.insert(key, handle);
        session.tree_node = new_node;

        self.pool.get(handle)
    }

    pub fn authenticate(&mut self, id: &[u8]) -> bool {
        let Some(handle) = self.by_id.get(id).copied() else {
            return false;
        };
        let Some(session) = self.pool.get_mut(handle) else {
            return false;
        };
        session.authenticated = true;
        session.last_access = Instant::now();
        true
    }

    pub fn destroy(&mut self, id: &[u8]) -> bool {
        let Some(handle) = self.by_id.delete(id) else {
            return false;
        };
        if let Some(session) = self.pool.get(handle) {
            self.by_access.delete(session.tree_node);
        }
        self.pool.release(handle);
        true
    }

    /// Sweeps sessions whose `last_access` is older than `session_timeout`,
    /// walking the ordered index from its minimum (matching
    /// `ct_session_cleanup_expired`). Returns the number of sessions
    /// removed.
    pub fn sweep_expired(&mut self) -> usize {
        let now = Instant::now();
        let cutoff = now
            .checked_sub(self.session_timeout)
            .map(|t| self.millis_since_epoch(t))
            .unwrap_or(0);

        let mut removed = 0;
        while let Some(node) = self.by_access.find_min() {
            if self.by_access.key(node).0 > cutoff {
                break;
            }
            let handle = *self.by_access.value(node);
            let id = self.pool.get(handle).map(|s| s.id);
            self.by_access.delete(node);
            if let Some(id) = id {
                self.by_id.delete(&id);
            }
            self.pool.release(handle);
            removed += 1;
        }
        removed
    }

    #[inline]
    pub fn active_sessions(&self) -> usize {
        self.pool.len()
    }

    pub fn authenticated_sessions(&self) -> usize {
        let mut count = 0;
        self.by_id.foreach(|_, handle| {
            if let Some(session) = self.pool.get(*handle) {
                if session.authenticated {
                    count += 1;
                }
            }
        });
        count
    }
}

/// Builds the `Set-Cookie` value for a newly created session.
pub fn set_cookie_header(id: &[u8]) -> String {
    format!(
        "sessionId={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={COOKIE_MAX_AGE_SECS}",
        std::str::from_utf8(id).expect("session id is ASCII by construction")
    )
}

/// Extracts a session id from a `Cookie` header value, mirroring
/// `ct_session_from_cookie`'s bounded substring scan.
pub fn session_id_from_cookie(cookie_header: &str) -> Option<&str> {
    let start = cookie_header.find("sessionId=")? + "sessionId=".len();
    let rest = &cookie_header[start..];
    let end = rest
        .find(|c: char| c == ';' || c == ' ')
        .unwrap_or(rest.len());
    let candidate = &rest[..end];
    if candidate.len() == SESSION_ID_LEN {
        Some(candidate)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(8, Duration::from_secs(3600))
    }

    #[test]
    fn create_then_find_round_trips() {
        let mut mgr = manager();
        let id = mgr.create().unwrap().id;
        assert!(mgr.find(&id).is_some());
    }

    #[test]
    fn destroy_removes_from_both_structures() {
        let mut mgr = manager();
        let id = mgr.create().unwrap().id;
        assert!(mgr.destroy(&id));
        assert!(mgr.find(&id).is_none());
        assert_eq!(mgr.active_sessions(), 0);
    }

    #[test]
    fn pool_exhaustion_returns_none() {
        let mut mgr = SessionManager::new(1, Duration::from_secs(3600));
        assert!(mgr.create().is_some());
        assert!(mgr.create().is_none());
    }

    #[test]
    fn authenticate_marks_session() {
        let mut mgr = manager();
        let id = mgr.create().unwrap().id;
        assert!(mgr.authenticate(&id));
        assert!(mgr.find(&id).unwrap().authenticated);
        assert_eq!(mgr.authenticated_sessions(), 1);
    }

    #[test]
    fn sweep_expired_evicts_past_timeout_only() {
        let mut mgr = SessionManager::new(8, Duration::from_millis(0));
        mgr.create();
        mgr.create();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(mgr.sweep_expired(), 2);
        assert_eq!(mgr.active_sessions(), 0);
    }

    #[test]
    fn cookie_header_has_expected_shape() {
        let id = [b'a'; SESSION_ID_LEN];
        let cookie = set_cookie_header(&id);
        assert!(cookie.starts_with("sessionId=aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=2592000"));
    }

    #[test]
    fn session_id_from_cookie_extracts_exact_length() {
        let header = format!("other=1; sessionId={}; Path=/", "a".repeat(SESSION_ID_LEN));
        assert_eq!(
            session_id_from_cookie(&header),
            Some("a".repeat(SESSION_ID_LEN).as_str())
        );
        assert_eq!(session_id_from_cookie("sessionId=tooshort"), None);
        assert_eq!(session_id_from_cookie("nothing here"), None);
    }
}
