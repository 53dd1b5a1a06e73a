// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Access-control entries consulted by protocol handlers.
//!
//! The registry is mutated only by the master (config load, reload, stop);
//! handlers take a snapshot and work on the clone, so the lock is never held
//! across a handler invocation.

use parking_lot::Mutex;
use std::fmt;

/// Authorization scheme of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Basic,
    Digest,
}

impl AuthScheme {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Some(AuthScheme::Basic),
            "digest" => Some(AuthScheme::Digest),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuthScheme::Basic => "basic",
            AuthScheme::Digest => "digest",
        }
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One access-control row: who may talk to which realm/domain, and with
/// which secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEntry {
    pub scheme: AuthScheme,
    pub user: String,
    pub realm: String,
    pub domain: String,
    pub secret: String,
}

impl AuthEntry {
    pub fn new(scheme: AuthScheme, user: &str, realm: &str, domain: &str, secret: &str) -> Self {
        Self {
            scheme,
            user: user.to_string(),
            realm: realm.to_string(),
            domain: domain.to_string(),
            secret: secret.to_string(),
        }
    }

    /// Every field must be non-empty for the entry to be usable.
    pub fn is_valid(&self) -> bool {
        !self.user.is_empty()
            && !self.realm.is_empty()
            && !self.domain.is_empty()
            && !self.secret.is_empty()
    }

    /// Identity for duplicate detection: scheme + user + realm + domain
    /// (the secret does not participate).
    pub fn same_identity(&self, other: &AuthEntry) -> bool {
        self.scheme == other.scheme
            && self.user == other.user
            && self.realm == other.realm
            && self.domain == other.domain
    }
}

/// Mutex-protected set of [`AuthEntry`] rows.
pub struct AuthRegistry {
    entries: Mutex<Vec<AuthEntry>>,
}

impl AuthRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Insert an entry. Invalid entries are rejected; an entry with the same
    /// identity as an existing one is silently ignored. Returns whether the
    /// entry landed in the registry.
    pub fn insert(&self, entry: AuthEntry) -> bool {
        if !entry.is_valid() {
            return false;
        }
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.same_identity(&entry)) {
            return false;
        }
        entries.push(entry);
        true
    }

    /// Clone the current entries for use outside the lock.
    pub fn snapshot(&self) -> Vec<AuthEntry> {
        self.entries.lock().clone()
    }

    /// Remove all entries (reload start, shutdown).
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AuthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(user: &str, secret: &str) -> AuthEntry {
        AuthEntry::new(AuthScheme::Basic, user, "router", "/", secret)
    }

    #[test]
    fn test_insert_rejects_invalid() {
        let reg = AuthRegistry::new();
        assert!(!reg.insert(AuthEntry::new(AuthScheme::Basic, "", "r", "d", "s")));
        assert!(!reg.insert(AuthEntry::new(AuthScheme::Digest, "u", "r", "d", "")));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_duplicate_identity_is_noop() {
        let reg = AuthRegistry::new();
        assert!(reg.insert(entry("admin", "one")));
        // Same identity, different secret: still a duplicate.
        assert!(!reg.insert(entry("admin", "two")));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.snapshot()[0].secret, "one");

        // Different scheme is a different identity.
        assert!(reg.insert(AuthEntry::new(AuthScheme::Digest, "admin", "router", "/", "x")));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_clear_empties_registry() {
        let reg = AuthRegistry::new();
        reg.insert(entry("a", "1"));
        reg.insert(entry("b", "2"));
        assert_eq!(reg.len(), 2);
        reg.clear();
        assert!(reg.is_empty());
    }

    #[test]
    fn test_snapshot_is_isolated() {
        let reg = AuthRegistry::new();
        reg.insert(entry("a", "1"));
        let snap = reg.snapshot();
        reg.clear();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].user, "a");
    }

    #[test]
    fn test_scheme_parse() {
        assert_eq!(AuthScheme::parse("Basic"), Some(AuthScheme::Basic));
        assert_eq!(AuthScheme::parse(" digest "), Some(AuthScheme::Digest));
        assert_eq!(AuthScheme::parse("ntlm"), None);
    }
}
