//! # Admin Console Authentication
//!
//! Password verification, session cookies, CSRF tokens and login rate
//! limiting for the admin console.
//!
//! The password is stored as a 32-byte random salt followed by a 32-byte
//! PBKDF2-HMAC-SHA256 key (200,000 iterations) in a single 64-byte file.
//! Sessions and CSRF tokens are random 32-byte hex values held in
//! in-memory expiring maps; expired sessions are evicted lazily on lookup
//! and expired CSRF tokens are swept once per routed request.
//!
//! CSRF tokens are deliberately NOT bound to the session that requested
//! them and are not single-use; all forms share one token namespace.

use crate::errors::{AppError, AppResult};
use crate::validation::MIN_PASSWORD_LENGTH;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use rand::RngCore;
use sha2::Sha256;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// PBKDF2 iteration count
pub const PBKDF2_ITERATIONS: u32 = 200_000;
/// Salt length in bytes
pub const SALT_LENGTH: usize = 32;
/// Derived key length in bytes
pub const KEY_LENGTH: usize = 32;
/// CSRF token lifetime
pub const CSRF_TOKEN_TTL: Duration = Duration::from_secs(3600);
/// Login rate limit: attempts allowed per rolling window
pub const LOGIN_MAX_ATTEMPTS: usize = 5;
/// Login rate limit window
pub const LOGIN_WINDOW: Duration = Duration::from_secs(300);

/// Derive a key from a password with PBKDF2-HMAC-SHA256.
///
/// The derived key length equals the hash output, so a single PBKDF2
/// block suffices.
pub fn pbkdf2_sha256(password: &[u8], salt: &[u8], iterations: u32) -> [u8; KEY_LENGTH] {
    let mut mac =
        HmacSha256::new_from_slice(password).expect("HMAC can take key of any size");
    mac.update(salt);
    mac.update(&1u32.to_be_bytes());
    let mut u = mac.finalize().into_bytes();

    let mut derived = [0u8; KEY_LENGTH];
    derived.copy_from_slice(u.as_slice());

    for _ in 1..iterations {
        let mut mac =
            HmacSha256::new_from_slice(password).expect("HMAC can take key of any size");
        mac.update(u.as_slice());
        u = mac.finalize().into_bytes();
        for (out, byte) in derived.iter_mut().zip(u.as_slice().iter()) {
            *out ^= byte;
        }
    }
    derived
}

/// Constant-time byte comparison
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Generate a 32-byte random token as hex
fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Salted password hash stored on disk
#[derive(Debug, Clone)]
pub struct PasswordFile {
    path: PathBuf,
}

impl PasswordFile {
    /// Bind to the password hash file location
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        let data = std::fs::read(&self.path).ok()?;
        if data.len() != SALT_LENGTH + KEY_LENGTH {
            warn!(path = %self.path.display(), len = data.len(), "Password file has unexpected length");
            return None;
        }
        Some((data[..SALT_LENGTH].to_vec(), data[SALT_LENGTH..].to_vec()))
    }

    /// Whether a password has been set
    pub fn has_password(&self) -> bool {
        self.load().is_some()
    }

    /// Hash and persist a new password
    pub fn set_password(&self, password: &str) -> AppResult<()> {
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }
        let mut salt = [0u8; SALT_LENGTH];
        rand::rng().fill_bytes(&mut salt);
        let key = pbkdf2_sha256(password.as_bytes(), &salt, PBKDF2_ITERATIONS);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut contents = Vec::with_capacity(SALT_LENGTH + KEY_LENGTH);
        contents.extend_from_slice(&salt);
        contents.extend_from_slice(&key);
        std::fs::write(&self.path, contents)?;
        info!(path = %self.path.display(), "Admin password updated");
        Ok(())
    }

    /// Verify a password attempt against the stored hash.
    /// Returns false when no password has been set.
    pub fn verify(&self, password: &str) -> bool {
        let Some((salt, key)) = self.load() else {
            return false;
        };
        let candidate = pbkdf2_sha256(password.as_bytes(), &salt, PBKDF2_ITERATIONS);
        constant_time_eq(&candidate, &key)
    }
}

/// In-memory session map with sliding expiry
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Instant>>,
    timeout: Duration,
}

impl SessionStore {
    /// Create a store with the given idle timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Session idle timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Create a session and return its id
    pub fn create(&self) -> String {
        self.create_at(Instant::now())
    }

    fn create_at(&self, now: Instant) -> String {
        let id = random_token();
        self.sessions.lock().insert(id.clone(), now + self.timeout);
        id
    }

    /// Verify a session id, renewing its expiry on success.
    /// Expired sessions are evicted here.
    pub fn verify(&self, session_id: &str) -> bool {
        self.verify_at(session_id, Instant::now())
    }

    fn verify_at(&self, session_id: &str, now: Instant) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(session_id) {
            Some(expires) if now <= *expires => {
                *expires = now + self.timeout;
                true
            }
            Some(_) => {
                sessions.remove(session_id);
                false
            }
            None => false,
        }
    }

    /// Destroy a session
    pub fn delete(&self, session_id: &str) {
        self.sessions.lock().remove(session_id);
    }

    /// Number of live (possibly expired-but-unswept) sessions
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no session exists
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

/// Flat expiring CSRF token map, shared by all forms
#[derive(Debug, Default)]
pub struct CsrfStore {
    tokens: Mutex<HashMap<String, Instant>>,
}

impl CsrfStore {
    /// Create an empty token store
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token
    pub fn issue(&self) -> String {
        self.issue_at(Instant::now())
    }

    fn issue_at(&self, now: Instant) -> String {
        let token = random_token();
        self.tokens
            .lock()
            .insert(token.clone(), now + CSRF_TOKEN_TTL);
        token
    }

    /// Verify a token. Tokens are not consumed on success; an expired
    /// token is removed and rejected.
    pub fn verify(&self, token: &str) -> bool {
        self.verify_at(token, Instant::now())
    }

    fn verify_at(&self, token: &str, now: Instant) -> bool {
        let mut tokens = self.tokens.lock();
        match tokens.get(token) {
            Some(expires) if now <= *expires => true,
            Some(_) => {
                tokens.remove(token);
                false
            }
            None => false,
        }
    }

    /// Drop all expired tokens; called once per routed request
    pub fn sweep_expired(&self) {
        self.sweep_expired_at(Instant::now());
    }

    fn sweep_expired_at(&self, now: Instant) {
        self.tokens.lock().retain(|_, expires| now <= *expires);
    }

    /// Number of outstanding tokens
    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    /// Whether no token is outstanding
    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}

/// Per-client-address login attempt limiter over a rolling window
#[derive(Debug, Default)]
pub struct LoginRateLimiter {
    attempts: Mutex<HashMap<String, Vec<Instant>>>,
}

impl LoginRateLimiter {
    /// Create an empty limiter
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a login attempt for `client_ip` and report whether it is
    /// still within the limit. The rejected attempt itself is not
    /// recorded, so a client cannot extend its own lockout.
    pub fn check(&self, client_ip: &str) -> bool {
        self.check_at(client_ip, Instant::now())
    }

    fn check_at(&self, client_ip: &str, now: Instant) -> bool {
        let mut attempts = self.attempts.lock();
        let entry = attempts.entry(client_ip.to_string()).or_default();
        entry.retain(|t| now.saturating_duration_since(*t) < LOGIN_WINDOW);
        if entry.len() >= LOGIN_MAX_ATTEMPTS {
            warn!(client_ip = %client_ip, "Login rate limit exceeded");
            return false;
        }
        entry.push(now);
        true
    }
}
