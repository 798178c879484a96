mod handler;

use crate::models::{Credential, Endpoint, JumpConfig, SessionConfig, TransportState};
use crate::utils::error::{Result, SshToolError};
use async_trait::async_trait;
use handler::ClientHandler;
use russh::client::{self, AuthResult, Handle};
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg};
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;

/// A boxed, type-erased bidirectional stream. Concretely backed by
/// `russh::ChannelStream<russh::client::Msg>` in production and by a bare
/// `TcpStream` in tests — the front-ends and the relay never care which.
pub type BoxedChannel = Pin<Box<dyn AsyncRead + AsyncWrite + Unpin + Send>>;

/// Seam between the front-ends/relay and whatever actually dials the
/// destination. Letting this be a trait (rather than a concrete
/// `SshTransportManager` reference) is what makes the SOCKS5/HTTP front-ends
/// testable without a live SSH server.
#[async_trait]
pub trait ChannelOpener: Send + Sync {
    async fn open(&self, endpoint: &Endpoint) -> Result<BoxedChannel>;
}

type SshHandle = Handle<ClientHandler>;

/// How often `watch_for_drop` probes a `Ready` session for a mid-session
/// drop (RST on the socket, remote hangup, protocol error).
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
/// Bound on how long a single keepalive probe is allowed to hang before it
/// is treated as inconclusive (not itself proof of a dead link).
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the single outbound SSH session (optionally tunneled through one
/// jump host) and hands out `direct-tcpip` channels on demand.
///
/// Transport-level failures (auth, handshake, mid-session drop) move the
/// state to `Closed` and cause every subsequent `open()` to fail with
/// `TransportDown`; per-channel `open()` failures do not.
pub struct SshTransportManager {
    session: Mutex<Option<SshHandle>>,
    /// Intermediate jump-host sessions, kept alive for as long as the target
    /// session tunnels through them. Dropped (and disconnected) in `close()`,
    /// after the target session — mirroring the jump-handle ordering in
    /// oxideterm's `ProxyConnection`.
    jump_handles: Mutex<Vec<SshHandle>>,
    state: AtomicU8,
}

fn state_to_u8(s: TransportState) -> u8 {
    match s {
        TransportState::Idle => 0,
        TransportState::Connecting => 1,
        TransportState::Ready => 2,
        TransportState::Closing => 3,
        TransportState::Closed => 4,
    }
}

fn u8_to_state(v: u8) -> TransportState {
    match v {
        0 => TransportState::Idle,
        1 => TransportState::Connecting,
        2 => TransportState::Ready,
        3 => TransportState::Closing,
        _ => TransportState::Closed,
    }
}

impl SshTransportManager {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
            jump_handles: Mutex::new(Vec::new()),
            state: AtomicU8::new(state_to_u8(TransportState::Idle)),
        }
    }

    pub fn state(&self) -> TransportState {
        u8_to_state(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, s: TransportState) {
        self.state.store(state_to_u8(s), Ordering::Release);
    }

    /// Establishes the SSH session described by `cfg`, dialing through the
    /// jump host first if one is configured, and transitions to `Ready`.
    pub async fn connect(&self, cfg: &SessionConfig) -> Result<()> {
        self.set_state(TransportState::Connecting);

        let result = self.connect_inner(cfg).await;
        match result {
            Ok(handle) => {
                *self.session.lock().await = Some(handle);
                self.set_state(TransportState::Ready);
                Ok(())
            }
            Err(e) => {
                self.set_state(TransportState::Closed);
                Err(e)
            }
        }
    }

    async fn connect_inner(&self, cfg: &SessionConfig) -> Result<SshHandle> {
        match &cfg.jump {
            None => {
                direct_connect(&cfg.target, &cfg.target_user, &cfg.target_credential, cfg.verify_host_keys).await
            }
            Some(jump) => {
                let jump_handle = direct_connect(
                    &jump.endpoint,
                    &jump.user,
                    &jump.credential,
                    cfg.verify_host_keys,
                )
                .await?;

                let channel = jump_handle
                    .channel_open_direct_tcpip(&cfg.target.host, cfg.target.port as u32, "127.0.0.1", 0)
                    .await
                    .map_err(|e| SshToolError::SshConnectionFailed(format!("jump tunnel failed: {}", e)))?;

                let stream = channel.into_stream();
                let target_handle = connect_via_stream(
                    stream,
                    &cfg.target,
                    &cfg.target_user,
                    &cfg.target_credential,
                    cfg.verify_host_keys,
                )
                .await?;

                // Keep the jump session alive for as long as the target
                // session tunnels through it; dropping it here would close
                // the direct-tcpip channel the target session runs over.
                self.jump_handles.lock().await.push(jump_handle);

                Ok(target_handle)
            }
        }
    }

    /// Requests a `direct-tcpip` channel from the (possibly jump-tunneled)
    /// target session. The host literal is forwarded unchanged — there is no
    /// local `ToSocketAddrs`/DNS lookup on `endpoint.host`.
    pub async fn open(&self, endpoint: &Endpoint) -> Result<BoxedChannel> {
        if !self.state().is_usable() {
            return Err(SshToolError::TransportDown);
        }

        let channel_result = {
            let guard = self.session.lock().await;
            let handle = guard.as_ref().ok_or(SshToolError::TransportDown)?;
            handle
                .channel_open_direct_tcpip(&endpoint.host, endpoint.port as u32, "127.0.0.1", 0)
                .await
        };

        match channel_result {
            Ok(channel) => Ok(Box::pin(channel.into_stream()) as BoxedChannel),
            Err(e) => {
                // A single channel-open refusal doesn't tell us whether the
                // session itself is still alive. Probe it before deciding:
                // if the session is dead, surface `TransportDown` and settle
                // there so every later `open()` short-circuits instead of
                // repeating this probe.
                if self.keepalive().await.is_err() {
                    self.set_state(TransportState::Closed);
                    Err(SshToolError::TransportDown)
                } else {
                    Err(SshToolError::ChannelOpenFailed(e.to_string()))
                }
            }
        }
    }

    /// Sends an SSH keepalive (`keepalive@openssh.com`) and treats a reply
    /// error as proof the session is gone. A timeout is inconclusive — the
    /// peer may just be slow — and is not itself taken as a drop.
    async fn keepalive(&self) -> Result<()> {
        let guard = self.session.lock().await;
        let handle = guard.as_ref().ok_or(SshToolError::TransportDown)?;

        match tokio::time::timeout(KEEPALIVE_TIMEOUT, handle.send_keepalive(true)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::warn!("keepalive probe failed, session is dead: {}", e);
                Err(SshToolError::TransportDown)
            }
            Err(_) => Ok(()),
        }
    }

    /// Background liveness watch: polls the session with a keepalive every
    /// [`HEALTH_CHECK_INTERVAL`] while `Ready`, and settles the transport in
    /// `Closed` the moment a probe proves the session has died. Returns as
    /// soon as the transport leaves `Ready` for any reason (an explicit
    /// `close()` included), so it never fights a caller-driven shutdown.
    pub async fn watch_for_drop(&self) {
        loop {
            if !self.state().is_usable() {
                return;
            }

            tokio::time::sleep(HEALTH_CHECK_INTERVAL).await;

            if !self.state().is_usable() {
                return;
            }

            if self.keepalive().await.is_err() {
                self.set_state(TransportState::Closed);
                return;
            }
        }
    }

    /// Begins `Closing`, drops the session handle (which fails any
    /// outstanding channel), and settles in `Closed`.
    pub async fn close(&self) {
        self.set_state(TransportState::Closing);

        if let Some(handle) = self.session.lock().await.take() {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
        }

        for jump_handle in self.jump_handles.lock().await.drain(..) {
            let _ = jump_handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
        }

        self.set_state(TransportState::Closed);
    }
}

impl Default for SshTransportManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelOpener for SshTransportManager {
    async fn open(&self, endpoint: &Endpoint) -> Result<BoxedChannel> {
        SshTransportManager::open(self, endpoint).await
    }
}

fn ssh_client_config() -> Arc<client::Config> {
    Arc::new(client::Config {
        inactivity_timeout: Some(Duration::from_secs(300)),
        ..<client::Config as Default>::default()
    })
}

async fn authenticate(handle: &mut SshHandle, user: &str, credential: &Credential) -> Result<()> {
    let result = match credential {
        Credential::Password(password) => handle
            .authenticate_password(user, password)
            .await
            .map_err(|e| SshToolError::AuthenticationFailed(e.to_string()))?,
        Credential::Key { path, passphrase } => {
            let key_data = tokio::fs::read_to_string(path)
                .await
                .map_err(|_| SshToolError::KeyFileNotFound(path.display().to_string()))?;

            let key = match passphrase {
                Some(pass) => PrivateKey::from_openssh(key_data.trim())
                    .map_err(|e| SshToolError::AuthenticationFailed(format!("failed to load key: {}", e)))?
                    .decrypt(pass.as_bytes())
                    .map_err(|e| SshToolError::AuthenticationFailed(format!("failed to decrypt key: {}", e)))?,
                None => PrivateKey::from_openssh(key_data.trim())
                    .map_err(|e| SshToolError::AuthenticationFailed(format!("failed to load key: {}", e)))?,
            };

            let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), None);
            handle
                .authenticate_publickey(user, key_with_alg)
                .await
                .map_err(|e| SshToolError::AuthenticationFailed(e.to_string()))?
        }
    };

    if !matches!(result, AuthResult::Success) {
        return Err(SshToolError::AuthenticationFailed(
            "server rejected credential".to_string(),
        ));
    }

    Ok(())
}

async fn direct_connect(
    endpoint: &Endpoint,
    user: &str,
    credential: &Credential,
    verify_host_keys: bool,
) -> Result<SshHandle> {
    tracing::info!("connecting to {} as {}", endpoint, user);

    let handler = ClientHandler::new(verify_host_keys);
    let mut handle = client::connect(ssh_client_config(), (endpoint.host.as_str(), endpoint.port), handler)
        .await
        .map_err(|e| SshToolError::SshConnectionFailed(e.to_string()))?;

    authenticate(&mut handle, user, credential).await?;
    tracing::info!("authenticated to {}", endpoint);
    Ok(handle)
}

/// SSH-over-SSH: authenticates a second hop over a stream that is itself a
/// `direct-tcpip` channel of a prior hop. This is the technique that makes
/// jump-host support real rather than a stub.
async fn connect_via_stream(
    stream: russh::ChannelStream<russh::client::Msg>,
    endpoint: &Endpoint,
    user: &str,
    credential: &Credential,
    verify_host_keys: bool,
) -> Result<SshHandle> {
    tracing::info!("connecting to {} over jump tunnel", endpoint);

    let handler = ClientHandler::new(verify_host_keys);
    let mut handle = client::connect_stream(ssh_client_config(), stream, handler)
        .await
        .map_err(|e| SshToolError::SshConnectionFailed(e.to_string()))?;

    authenticate(&mut handle, user, credential).await?;
    tracing::info!("authenticated to {} over jump tunnel", endpoint);
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_idle() {
        let manager = SshTransportManager::new();
        assert_eq!(manager.state(), TransportState::Idle);
    }

    #[tokio::test]
    async fn test_open_before_connect_fails_with_transport_down() {
        let manager = SshTransportManager::new();
        let err = manager.open(&Endpoint::new("example.com", 80)).await;
        assert!(matches!(err, Err(SshToolError::TransportDown)));
    }

    #[tokio::test]
    async fn test_close_on_idle_transport_is_a_noop() {
        let manager = SshTransportManager::new();
        manager.close().await;
        assert_eq!(manager.state(), TransportState::Closed);
    }
}
