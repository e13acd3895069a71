use dashmap::DashMap;
use smol_str::SmolStr;

/// Credentials used to answer a Digest challenge.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub realm: SmolStr,
    pub username: SmolStr,
    pub secret: SmolStr,
}

impl Credentials {
    pub fn new(realm: &str, username: &str, secret: &str) -> Self {
        Self {
            realm: SmolStr::new(realm),
            username: SmolStr::new(username),
            secret: SmolStr::new(secret),
        }
    }
}

/// Credential lookup keyed by realm, read-only from the engine's perspective.
pub trait CredentialStore: Send + Sync {
    fn lookup(&self, realm: &str) -> Option<Credentials>;
}

/// In-memory credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    by_realm: DashMap<SmolStr, Credentials>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store pre-populated with the given credentials.
    pub fn with(creds: Vec<Credentials>) -> Self {
        let store = Self::new();
        for c in creds {
            store.add(c);
        }
        store
    }

    /// Adds (or replaces) credentials for a realm.
    pub fn add(&self, creds: Credentials) {
        self.by_realm.insert(creds.realm.clone(), creds);
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn lookup(&self, realm: &str) -> Option<Credentials> {
        self.by_realm.get(realm).map(|c| c.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_realm() {
        let store = MemoryCredentialStore::with(vec![
            Credentials::new("example.com", "alice", "secret"),
            Credentials::new("proxy.example.com", "alice", "other"),
        ]);

        assert_eq!(
            store.lookup("example.com").map(|c| c.secret),
            Some(SmolStr::new("secret"))
        );
        assert_eq!(
            store.lookup("proxy.example.com").map(|c| c.secret),
            Some(SmolStr::new("other"))
        );
        assert!(store.lookup("unknown").is_none());
    }

    #[test]
    fn add_replaces_existing_realm() {
        let store = MemoryCredentialStore::new();
        store.add(Credentials::new("example.com", "alice", "old"));
        store.add(Credentials::new("example.com", "alice", "new"));
        assert_eq!(
            store.lookup("example.com").map(|c| c.secret),
            Some(SmolStr::new("new"))
        );
    }
}
