use crate::models::{Credential, Endpoint, JumpConfig, SessionConfig};
use crate::utils::error::{Result, SshToolError};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ORGANIZATION: &str = "ssh-tunnel-proxy";
const APPLICATION: &str = "ssh-tunnel-proxy";
const CONFIG_FILE_NAME: &str = "session.json";

/// Which authentication method a record used, stripped of anything secret.
/// Password auth round-trips as `Password` with no content — the caller
/// must re-supply it; key auth round-trips the file path (not a secret) but
/// never the passphrase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthRecord {
    Password,
    Key { path: PathBuf },
}

impl AuthRecord {
    fn from_credential(credential: &Credential) -> Self {
        match credential {
            Credential::Password(_) => Self::Password,
            Credential::Key { path, .. } => Self::Key { path: path.clone() },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JumpRecord {
    pub endpoint: Endpoint,
    pub user: String,
    pub auth: AuthRecord,
}

/// On-disk form of a [`SessionConfig`]. Deliberately a distinct type rather
/// than reusing `SessionConfig`'s own `Serialize` impl: a plain re-export
/// would persist `Credential::Password` and key passphrases verbatim, which
/// the session-persistence contract forbids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub target: Endpoint,
    pub target_user: String,
    pub target_auth: AuthRecord,
    pub jump: Option<JumpRecord>,
    pub socks_port: u16,
    pub http_port: u16,
    pub manage_system_proxy: bool,
    pub idle_timeout_secs: u64,
    pub verify_host_keys: bool,
}

impl SessionRecord {
    pub fn from_config(cfg: &SessionConfig) -> Self {
        Self {
            target: cfg.target.clone(),
            target_user: cfg.target_user.clone(),
            target_auth: AuthRecord::from_credential(&cfg.target_credential),
            jump: cfg.jump.as_ref().map(|jump| JumpRecord {
                endpoint: jump.endpoint.clone(),
                user: jump.user.clone(),
                auth: AuthRecord::from_credential(&jump.credential),
            }),
            socks_port: cfg.socks_port,
            http_port: cfg.http_port,
            manage_system_proxy: cfg.manage_system_proxy,
            idle_timeout_secs: cfg.idle_timeout.as_secs(),
            verify_host_keys: cfg.verify_host_keys,
        }
    }

    /// Rebuilds a `SessionConfig`, substituting freshly supplied secrets for
    /// whatever was stripped on save. `target_secret`/`jump_secret` are
    /// ignored for a `Key` auth record that carries no passphrase — pass
    /// `None` when the key is unencrypted.
    pub fn into_config(
        self,
        target_secret: Option<String>,
        jump_secret: Option<String>,
    ) -> Result<SessionConfig> {
        let target_credential = Self::resolve_credential(self.target_auth, target_secret)?;

        let jump = match self.jump {
            Some(record) => Some(JumpConfig::new(
                record.endpoint,
                record.user,
                Self::resolve_credential(record.auth, jump_secret)?,
            )),
            None => None,
        };

        Ok(SessionConfig {
            target: self.target,
            target_user: self.target_user,
            target_credential,
            jump,
            socks_port: self.socks_port,
            http_port: self.http_port,
            manage_system_proxy: self.manage_system_proxy,
            idle_timeout: std::time::Duration::from_secs(self.idle_timeout_secs),
            verify_host_keys: self.verify_host_keys,
        })
    }

    fn resolve_credential(auth: AuthRecord, secret: Option<String>) -> Result<Credential> {
        match auth {
            AuthRecord::Password => {
                let password = secret.ok_or_else(|| {
                    SshToolError::ConfigError(
                        "password was not persisted; it must be supplied again".to_string(),
                    )
                })?;
                Ok(Credential::Password(password))
            }
            AuthRecord::Key { path } => Ok(Credential::Key {
                path,
                passphrase: secret,
            }),
        }
    }
}

/// Loads and saves the single active [`SessionRecord`] under the OS-standard
/// config directory, resolved via `directories::ProjectDirs`.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new() -> Result<Self> {
        let dirs = ProjectDirs::from("", ORGANIZATION, APPLICATION)
            .ok_or_else(|| SshToolError::ConfigError("could not resolve config directory".to_string()))?;
        Ok(Self {
            path: dirs.config_dir().join(CONFIG_FILE_NAME),
        })
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn save(&self, cfg: &SessionConfig) -> Result<()> {
        let record = SessionRecord::from_config(cfg);
        let json = serde_json::to_string_pretty(&record)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }

    pub async fn load(&self) -> Result<SessionRecord> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        let record: SessionRecord = serde_json::from_str(&contents)?;
        Ok(record)
    }

    pub fn exists(&self) -> bool {
        Path::new(&self.path).exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Endpoint;

    fn sample_config() -> SessionConfig {
        SessionConfig::new(
            Endpoint::new("example.com", 22),
            "alice",
            Credential::password("hunter2"),
        )
        .with_ports(1080, 8080)
    }

    #[test]
    fn test_record_strips_password() {
        let record = SessionRecord::from_config(&sample_config());
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("hunter2"));
        assert_eq!(record.target_auth, AuthRecord::Password);
    }

    #[test]
    fn test_record_keeps_key_path_not_passphrase() {
        let cfg = SessionConfig::new(
            Endpoint::new("example.com", 22),
            "alice",
            Credential::key("/home/alice/.ssh/id_ed25519", Some("secret-pass".to_string())),
        );
        let record = SessionRecord::from_config(&cfg);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("id_ed25519"));
        assert!(!json.contains("secret-pass"));
    }

    #[test]
    fn test_round_trip_requires_secret_for_password() {
        let record = SessionRecord::from_config(&sample_config());
        let err = record.clone().into_config(None, None);
        assert!(err.is_err());

        let cfg = record.into_config(Some("hunter2".to_string()), None).unwrap();
        assert_eq!(cfg.target_user, "alice");
        match cfg.target_credential {
            Credential::Password(p) => assert_eq!(p, "hunter2"),
            _ => panic!("expected password credential"),
        }
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at_path(dir.path().join("session.json"));

        assert!(!store.exists());
        store.save(&sample_config()).await.unwrap();
        assert!(store.exists());

        let record = store.load().await.unwrap();
        assert_eq!(record.socks_port, 1080);
        assert_eq!(record.http_port, 8080);
    }
}
