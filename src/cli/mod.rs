use crate::models::session_config::{DEFAULT_HTTP_PORT, DEFAULT_SOCKS_PORT};
use crate::models::{Credential, Endpoint, JumpConfig, SessionConfig};
use crate::utils::error::{Result, SshToolError};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Gui,
    Cli,
}

/// Command-line surface for `ssh-tunnel-proxy`. Selecting `gui` (the
/// default, for compatibility with how the flag is usually typed) is not
/// supported by this build — it prints a pointer to `cli` mode and exits
/// with status 2.
#[derive(Parser, Debug)]
#[command(name = "ssh-tunnel-proxy", version, about = "User-space SOCKS5/HTTP proxy tunneled over SSH")]
pub struct Cli {
    #[arg(value_enum, default_value_t = Mode::Gui)]
    pub mode: Mode,

    #[arg(short = 'H', long)]
    pub host: Option<String>,

    #[arg(short = 'P', long)]
    pub port: Option<u16>,

    #[arg(short = 'u', long)]
    pub user: Option<String>,

    #[arg(short = 'p', long)]
    pub password: Option<String>,

    #[arg(long)]
    pub key: Option<PathBuf>,

    #[arg(long = "key-passphrase")]
    pub key_passphrase: Option<String>,

    #[arg(long = "jump-host")]
    pub jump_host: Option<String>,

    #[arg(long = "jump-port")]
    pub jump_port: Option<u16>,

    #[arg(long = "jump-user")]
    pub jump_user: Option<String>,

    #[arg(long = "jump-password")]
    pub jump_password: Option<String>,

    #[arg(long = "jump-key")]
    pub jump_key: Option<PathBuf>,

    #[arg(long = "jump-key-passphrase")]
    pub jump_key_passphrase: Option<String>,

    #[arg(short = 's', long, default_value_t = DEFAULT_SOCKS_PORT)]
    pub socks: u16,

    #[arg(long, default_value_t = DEFAULT_HTTP_PORT)]
    pub http: u16,

    /// Explicitly affirm system-proxy management. Redundant on its own since
    /// it is already the default — present for symmetry with `--no-proxy`.
    #[arg(long = "proxy")]
    pub proxy: bool,

    #[arg(long = "no-proxy")]
    pub no_proxy: bool,

    #[arg(long = "no-save")]
    pub no_save: bool,
}

impl Cli {
    pub fn manage_system_proxy(&self) -> bool {
        !self.no_proxy
    }

    /// Builds a [`SessionConfig`] from the flags, preferring a key over a
    /// password when both are given for the same hop (key-first precedence
    /// is a CLI-level choice, not something the transport retries).
    pub fn to_session_config(&self) -> Result<SessionConfig> {
        let host = self
            .host
            .clone()
            .ok_or_else(|| SshToolError::ConfigError("--host is required".to_string()))?;
        let port = self.port.unwrap_or(22);
        let user = self
            .user
            .clone()
            .ok_or_else(|| SshToolError::ConfigError("--user is required".to_string()))?;

        let target_credential = self.target_credential()?;

        let mut cfg = SessionConfig::new(Endpoint::new(host, port), user, target_credential)
            .with_ports(self.socks, self.http)
            .with_manage_system_proxy(self.manage_system_proxy());

        if let Some(jump_host) = &self.jump_host {
            let jump_user = self
                .jump_user
                .clone()
                .ok_or_else(|| SshToolError::ConfigError("--jump-user is required with --jump-host".to_string()))?;
            let jump_port = self.jump_port.unwrap_or(22);
            let jump_credential = self.jump_credential()?;

            cfg = cfg.with_jump(JumpConfig::new(
                Endpoint::new(jump_host.clone(), jump_port),
                jump_user,
                jump_credential,
            ));
        }

        Ok(cfg)
    }

    fn target_credential(&self) -> Result<Credential> {
        if let Some(key) = &self.key {
            Ok(Credential::key(key.clone(), self.key_passphrase.clone()))
        } else if let Some(password) = &self.password {
            Ok(Credential::password(password.clone()))
        } else {
            Err(SshToolError::ConfigError(
                "either --password or --key is required".to_string(),
            ))
        }
    }

    fn jump_credential(&self) -> Result<Credential> {
        if let Some(key) = &self.jump_key {
            Ok(Credential::key(key.clone(), self.jump_key_passphrase.clone()))
        } else if let Some(password) = &self.jump_password {
            Ok(Credential::password(password.clone()))
        } else {
            Err(SshToolError::ConfigError(
                "either --jump-password or --jump-key is required with --jump-host".to_string(),
            ))
        }
    }
}
