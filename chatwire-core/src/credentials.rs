//! Bearer-token holder shared between the HTTP client and the route guard.
//!
//! Cloning a `Credentials` yields another handle to the same slot, so clearing
//! the token after a 401 is visible to every holder.

use std::sync::{Arc, RwLock};

use secrecy::{ExposeSecret, SecretString};

#[derive(Clone, Default)]
pub struct Credentials {
    token: Arc<RwLock<Option<SecretString>>>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let creds = Self::new();
        creds.set_token(token);
        creds
    }

    pub fn set_token(&self, token: impl Into<String>) {
        let token: String = token.into();
        let mut slot = self.token.write().unwrap_or_else(|p| p.into_inner());
        *slot = if token.is_empty() {
            None
        } else {
            Some(SecretString::from(token))
        };
    }

    pub fn clear(&self) {
        let mut slot = self.token.write().unwrap_or_else(|p| p.into_inner());
        *slot = None;
    }

    pub fn is_authenticated(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }

    /// `Authorization` header value, if a token is held.
    pub fn bearer(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(|t| format!("Bearer {}", t.expose_secret()))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_slot() {
        let a = Credentials::with_token("t0k");
        let b = a.clone();
        assert_eq!(b.bearer().as_deref(), Some("Bearer t0k"));
        a.clear();
        assert!(!b.is_authenticated());
        assert_eq!(b.bearer(), None);
    }

    #[test]
    fn empty_token_counts_as_logged_out() {
        let c = Credentials::new();
        c.set_token("");
        assert!(!c.is_authenticated());
    }

    #[test]
    fn debug_does_not_leak_token() {
        let c = Credentials::with_token("super-secret");
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("super-secret"));
        assert!(dbg.contains("authenticated: true"));
    }
}
