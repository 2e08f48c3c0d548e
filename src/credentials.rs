//! Credential lookup for storage backends.
//!
//! Backends never read the environment directly; they ask a
//! [`CredentialProvider`], which keeps tests and embedding callers free of
//! process-global state.

#[cfg(test)]
use std::collections::HashMap;

pub trait CredentialProvider: Send + Sync {
    fn lookup(&self, key: &str) -> Option<String>;

    /// Like [`lookup`](Self::lookup) but treats empty values as absent.
    fn non_empty(&self, key: &str) -> Option<String> {
        self.lookup(key).filter(|v| !v.trim().is_empty())
    }
}

/// Reads the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialProvider for EnvCredentials {
    fn lookup(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Fixed key/value credentials for tests.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials(HashMap<String, String>);

#[cfg(test)]
impl StaticCredentials {
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
impl CredentialProvider for StaticCredentials {
    fn lookup(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_credentials_lookup() {
        let creds = StaticCredentials::new([("AWS_ACCESS_KEY_ID", "AKID"), ("EMPTY", " ")]);
        assert_eq!(creds.lookup("AWS_ACCESS_KEY_ID").as_deref(), Some("AKID"));
        assert_eq!(creds.lookup("MISSING"), None);
        assert_eq!(creds.non_empty("EMPTY"), None);
    }
}
