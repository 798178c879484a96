use super::{Credential, Endpoint};
use crate::utils::error::{Result, SshToolError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SOCKS_PORT: u16 = 10800;
pub const DEFAULT_HTTP_PORT: u16 = 10801;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// One hop of the jump chain: an SSH endpoint, a user, and a credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JumpConfig {
    pub endpoint: Endpoint,
    pub user: String,
    pub credential: Credential,
}

impl JumpConfig {
    pub fn new(endpoint: Endpoint, user: impl Into<String>, credential: Credential) -> Self {
        Self {
            endpoint,
            user: user.into(),
            credential,
        }
    }
}

/// Everything the supervisor needs to start one tunnel session.
///
/// Construction is infallible by design — the CLI builds this from flags
/// without touching the filesystem or network. Validation (non-empty host,
/// non-zero port, key file presence) happens lazily in
/// [`SessionConfig::validate`], which `Supervisor::start` calls before
/// touching the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub target: Endpoint,
    pub target_user: String,
    pub target_credential: Credential,
    #[serde(default)]
    pub jump: Option<JumpConfig>,
    #[serde(default = "default_socks_port")]
    pub socks_port: u16,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_manage_system_proxy")]
    pub manage_system_proxy: bool,
    #[serde(default = "default_idle_timeout", with = "humantime_secs")]
    pub idle_timeout: Duration,
    #[serde(default)]
    pub verify_host_keys: bool,
}

fn default_socks_port() -> u16 {
    DEFAULT_SOCKS_PORT
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_manage_system_proxy() -> bool {
    true
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)
}

/// Serializes a `Duration` as whole seconds so the JSON config stays readable.
mod humantime_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[allow(dead_code)]
impl SessionConfig {
    pub fn new(target: Endpoint, target_user: impl Into<String>, target_credential: Credential) -> Self {
        Self {
            target,
            target_user: target_user.into(),
            target_credential,
            jump: None,
            socks_port: DEFAULT_SOCKS_PORT,
            http_port: DEFAULT_HTTP_PORT,
            manage_system_proxy: true,
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            verify_host_keys: false,
        }
    }

    pub fn with_jump(mut self, jump: JumpConfig) -> Self {
        self.jump = Some(jump);
        self
    }

    pub fn with_ports(mut self, socks_port: u16, http_port: u16) -> Self {
        self.socks_port = socks_port;
        self.http_port = http_port;
        self
    }

    pub fn with_manage_system_proxy(mut self, manage: bool) -> Self {
        self.manage_system_proxy = manage;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_verify_host_keys(mut self, verify: bool) -> Self {
        self.verify_host_keys = verify;
        self
    }

    /// Validates host/port/credential invariants. Deliberately not run at
    /// construction time (see struct docs) — called once by the supervisor
    /// right before `Transport::connect`.
    pub fn validate(&self) -> Result<()> {
        Self::validate_endpoint(&self.target)?;
        Self::validate_credential(&self.target_credential)?;

        if let Some(jump) = &self.jump {
            Self::validate_endpoint(&jump.endpoint)?;
            Self::validate_credential(&jump.credential)?;
        }

        if self.socks_port == self.http_port {
            return Err(SshToolError::ConfigError(
                "SOCKS and HTTP ports must differ".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_endpoint(endpoint: &Endpoint) -> Result<()> {
        if endpoint.host.trim().is_empty() {
            return Err(SshToolError::InvalidHost(endpoint.host.clone()));
        }
        if endpoint.port == 0 {
            return Err(SshToolError::InvalidPort(endpoint.port));
        }
        Ok(())
    }

    fn validate_credential(credential: &Credential) -> Result<()> {
        if let Credential::Key { path, .. } = credential {
            if !path.exists() {
                return Err(SshToolError::KeyFileNotFound(path.display().to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionConfig {
        SessionConfig::new(
            Endpoint::new("example.com", 22),
            "user",
            Credential::password("hunter2"),
        )
    }

    #[test]
    fn test_defaults() {
        let cfg = sample();
        assert_eq!(cfg.socks_port, DEFAULT_SOCKS_PORT);
        assert_eq!(cfg.http_port, DEFAULT_HTTP_PORT);
        assert!(cfg.manage_system_proxy);
        assert!(!cfg.verify_host_keys);
        assert_eq!(cfg.idle_timeout, Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS));
    }

    #[test]
    fn test_validate_rejects_empty_host() {
        let cfg = SessionConfig::new(Endpoint::new("", 22), "user", Credential::password("x"));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let cfg = SessionConfig::new(Endpoint::new("host", 0), "user", Credential::password("x"));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_key_file() {
        let cfg = SessionConfig::new(
            Endpoint::new("host", 22),
            "user",
            Credential::key("/nonexistent/path/to/key", None),
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_same_ports() {
        let cfg = sample().with_ports(1080, 1080);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_sane_config() {
        let cfg = sample();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_jump_config_validated_too() {
        let jump = JumpConfig::new(Endpoint::new("", 22), "jumpuser", Credential::password("x"));
        let cfg = sample().with_jump(jump);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_round_trip_serialization() {
        let cfg = sample().with_ports(1080, 8080);
        let json = serde_json::to_string(&cfg).unwrap();
        let back: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.socks_port, 1080);
        assert_eq!(back.http_port, 8080);
    }
}
