//! Session state: credential storage and the session-expired event.
//!
//! The client never reaches for global state. It is handed a
//! [`CredentialStore`] holding the access/refresh pair and a
//! [`SessionListener`] that is told when the session can no longer be renewed.

mod file;
mod memory;

use anyhow::Result;
use std::sync::Arc;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Storage key of the short-lived access credential.
pub const ACCESS_KEY: &str = "access";
/// Storage key of the longer-lived refresh credential.
pub const REFRESH_KEY: &str = "refresh";
/// Storage key of the logged-in user's role, written by login.
pub const ROLE_KEY: &str = "role";
/// Storage key of the logged-in user's school, written by login.
pub const SCHOOL_KEY: &str = "school";

/// String-valued key-value storage for session data.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

impl<S: CredentialStore + ?Sized> CredentialStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}

/// Receives the session-expired event raised when a token refresh fails.
///
/// The hosting application decides what to do (show a login prompt, exit).
#[cfg_attr(test, mockall::automock)]
pub trait SessionListener: Send + Sync {
    fn session_expired(&self);
}

impl<L: SessionListener + ?Sized> SessionListener for Arc<L> {
    fn session_expired(&self) {
        (**self).session_expired()
    }
}

/// Listener that ignores the event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl SessionListener for NoopListener {
    fn session_expired(&self) {}
}

/// The access/refresh credential pair issued at login.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct Credentials {
    pub access: String,
    pub refresh: String,
}

impl Credentials {
    /// Loads the pair if both halves are present.
    pub fn load<S: CredentialStore + ?Sized>(store: &S) -> Result<Option<Self>> {
        let access = store.get(ACCESS_KEY)?;
        let refresh = store.get(REFRESH_KEY)?;
        Ok(match (access, refresh) {
            (Some(access), Some(refresh)) => Some(Self { access, refresh }),
            _ => None,
        })
    }

    pub fn save<S: CredentialStore + ?Sized>(&self, store: &S) -> Result<()> {
        store.set(ACCESS_KEY, &self.access)?;
        store.set(REFRESH_KEY, &self.refresh)?;
        Ok(())
    }
}

/// Removes both credentials, terminating the session.
pub fn clear_credentials<S: CredentialStore + ?Sized>(store: &S) -> Result<()> {
    store.remove(ACCESS_KEY)?;
    store.remove(REFRESH_KEY)?;
    Ok(())
}

/// Masks a token for logging, keeping only a short prefix and suffix.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        return "*********".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}*********{}", head, tail)
}
