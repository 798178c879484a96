use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Authentication material for one SSH hop.
///
/// A session carries one `Credential` for the target and, optionally, one
/// for the jump host. Password authentication is never persisted to disk —
/// see `config::SessionRecord`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Credential {
    /// Password authentication (not stored by the config layer).
    Password(String),
    /// Private key authentication, with an optional passphrase (also not stored).
    Key {
        path: PathBuf,
        #[serde(skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
}

#[allow(dead_code)]
impl Credential {
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password(password.into())
    }

    pub fn key(path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        Self::Key {
            path: path.into(),
            passphrase,
        }
    }

    pub fn is_password(&self) -> bool {
        matches!(self, Self::Password(_))
    }

    pub fn is_key(&self) -> bool {
        matches!(self, Self::Key { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_password_builder() {
        let cred = Credential::password("hunter2");
        assert!(cred.is_password());
        assert!(!cred.is_key());
    }

    #[test]
    fn test_credential_key_builder() {
        let cred = Credential::key("/home/user/.ssh/id_ed25519", None);
        assert!(cred.is_key());
    }

    #[test]
    fn test_credential_serialization_tag() {
        let cred = Credential::password("secret");
        let json = serde_json::to_string(&cred).unwrap();
        assert!(json.contains(r#""type":"password""#));
        assert!(json.contains("secret"));

        let cred = Credential::key("/path/to/key", Some("pw".to_string()));
        let json = serde_json::to_string(&cred).unwrap();
        assert!(json.contains(r#""type":"key""#));
        assert!(json.contains("/path/to/key"));
    }

    #[test]
    fn test_credential_equality() {
        assert_eq!(Credential::password("a"), Credential::password("a"));
        assert_ne!(Credential::password("a"), Credential::password("b"));
        assert_ne!(Credential::password("a"), Credential::key("a", None));
    }
}
