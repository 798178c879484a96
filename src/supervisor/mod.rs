use crate::frontend::{http, socks5, MAX_CONCURRENT_RELAYS};
use crate::models::{Counters, CountersSnapshot, SessionConfig};
use crate::system_proxy::SystemProxyHook;
use crate::transport::{ChannelOpener, SshTransportManager};
use crate::utils::error::{Result, SshToolError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Bound on how long `stop()` waits for in-flight relays to drain after the
/// transport closes, before abandoning whatever is still live.
const STOP_DRAIN_TIMEOUT: Duration = Duration::from_secs(3);
const STOP_DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Coarse session lifecycle state, independent of the transport's own
/// finer-grained [`crate::models::TransportState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupervisorSnapshot {
    pub state: SupervisorState,
    pub counters: CountersSnapshot,
    pub last_error: Option<String>,
    /// Identifies one start/stop lifecycle, for correlating log lines across
    /// a session's listeners. Regenerated on every `start()`.
    pub session_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
}

/// The shared, `Arc`-held state backing a `Supervisor`. Split out from
/// `Supervisor` itself so the background transport-health watcher spawned in
/// `start_inner` can hold its own clone of the `Arc` and drive the same
/// teardown path `stop()` uses, without `main.rs` needing to wrap
/// `Supervisor` in an `Arc` of its own.
struct Inner {
    state: Mutex<SupervisorState>,
    transport: Arc<SshTransportManager>,
    counters: Arc<Counters>,
    last_error: Mutex<Option<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
    system_proxy: Arc<dyn SystemProxyHook>,
    managing_system_proxy: Mutex<bool>,
    session_id: Mutex<Option<Uuid>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl Inner {
    async fn abort_tasks(&self) {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
    }

    async fn wait_for_relays_to_drain(&self) {
        let deadline = tokio::time::Instant::now() + STOP_DRAIN_TIMEOUT;
        while self.counters.snapshot().active_relays > 0 {
            if tokio::time::Instant::now() >= deadline {
                tracing::debug!(
                    "stop(): {} relay(s) still active after drain window, abandoning",
                    self.counters.snapshot().active_relays
                );
                break;
            }
            tokio::time::sleep(STOP_DRAIN_POLL_INTERVAL).await;
        }
    }

    /// Runs on the watcher task once `transport.watch_for_drop()` returns,
    /// i.e. once a keepalive probe has proven the session is dead. A no-op if
    /// an explicit `stop()` already won the race and moved the state off
    /// `Running` first.
    async fn handle_transport_drop(self: Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            if *state != SupervisorState::Running {
                return;
            }
            *state = SupervisorState::Stopping;
        }

        tracing::warn!("ssh session dropped mid-session, stopping tunnel");

        self.abort_tasks().await;
        self.transport.close().await;
        self.wait_for_relays_to_drain().await;

        if *self.managing_system_proxy.lock().await {
            let _ = self.system_proxy.clear();
            *self.managing_system_proxy.lock().await = false;
        }

        *self.last_error.lock().await = Some("SSH session disconnected unexpectedly".to_string());
        *self.session_id.lock().await = None;
        *self.started_at.lock().await = None;
        *self.state.lock().await = SupervisorState::Stopped;
    }
}

/// Owns the SSH transport and both front-end listeners for one session, and
/// drives them through `STOPPED -> STARTING -> RUNNING -> STOPPING ->
/// STOPPED`. Only one session is ever active at a time — a second `start()`
/// while already running is rejected rather than layered on top.
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(system_proxy: Arc<dyn SystemProxyHook>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SupervisorState::Stopped),
                transport: Arc::new(SshTransportManager::new()),
                counters: Arc::new(Counters::new()),
                last_error: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
                watch_task: Mutex::new(None),
                system_proxy,
                managing_system_proxy: Mutex::new(false),
                session_id: Mutex::new(None),
                started_at: Mutex::new(None),
            }),
        }
    }

    pub async fn state(&self) -> SupervisorState {
        *self.inner.state.lock().await
    }

    pub async fn snapshot(&self) -> SupervisorSnapshot {
        SupervisorSnapshot {
            state: *self.inner.state.lock().await,
            counters: self.inner.counters.snapshot(),
            last_error: self.inner.last_error.lock().await.clone(),
            session_id: *self.inner.session_id.lock().await,
            started_at: *self.inner.started_at.lock().await,
        }
    }

    /// Validates `cfg`, dials the SSH transport (through a jump host if
    /// configured), binds both listeners, and spawns their accept loops plus
    /// a background health watcher. On any failure the session is left
    /// `Stopped` with `last_error` set — nothing partially started is left
    /// running.
    pub async fn start(&self, cfg: SessionConfig) -> Result<()> {
        {
            let mut state = self.inner.state.lock().await;
            if *state != SupervisorState::Stopped {
                return Err(SshToolError::ConfigError(
                    "a session is already running".to_string(),
                ));
            }
            *state = SupervisorState::Starting;
        }

        match self.start_inner(&cfg).await {
            Ok(()) => {
                *self.inner.session_id.lock().await = Some(Uuid::new_v4());
                *self.inner.started_at.lock().await = Some(Utc::now());
                *self.inner.state.lock().await = SupervisorState::Running;
                *self.inner.last_error.lock().await = None;
                Ok(())
            }
            Err(e) => {
                self.inner.transport.close().await;
                self.inner.abort_tasks().await;
                *self.inner.last_error.lock().await = Some(e.user_message());
                *self.inner.state.lock().await = SupervisorState::Stopped;
                Err(e)
            }
        }
    }

    async fn start_inner(&self, cfg: &SessionConfig) -> Result<()> {
        cfg.validate()?;

        self.inner.transport.connect(cfg).await?;

        let socks_listener = TcpListener::bind(("127.0.0.1", cfg.socks_port))
            .await
            .map_err(|_| SshToolError::PortInUse(cfg.socks_port))?;
        let http_listener = TcpListener::bind(("127.0.0.1", cfg.http_port))
            .await
            .map_err(|_| SshToolError::PortInUse(cfg.http_port))?;

        let opener: Arc<dyn ChannelOpener> = self.inner.transport.clone();
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_RELAYS));

        let socks_task = tokio::spawn(socks5::serve(
            socks_listener,
            opener.clone(),
            self.inner.counters.clone(),
            cfg.idle_timeout,
            semaphore.clone(),
        ));
        let http_task = tokio::spawn(http::serve(
            http_listener,
            opener,
            self.inner.counters.clone(),
            cfg.idle_timeout,
            semaphore,
        ));

        *self.inner.tasks.lock().await = vec![socks_task, http_task];

        let watch_inner = self.inner.clone();
        let watch_transport = self.inner.transport.clone();
        *self.inner.watch_task.lock().await = Some(tokio::spawn(async move {
            watch_transport.watch_for_drop().await;
            watch_inner.handle_transport_drop().await;
        }));

        if cfg.manage_system_proxy {
            let local = "127.0.0.1".parse().expect("loopback address is valid");
            self.inner
                .system_proxy
                .set(
                    std::net::SocketAddr::new(local, cfg.http_port),
                    std::net::SocketAddr::new(local, cfg.socks_port),
                )
                .map_err(|e| SshToolError::ConfigError(e.to_string()))?;
            *self.inner.managing_system_proxy.lock().await = true;
        }

        Ok(())
    }

    /// Tears the session down: stops accepting new connections, stops the
    /// health watcher, closes the transport (the cascade that fails every
    /// outstanding channel and drives each live relay to exit on its next
    /// read/write), waits a bounded amount of time for `active_relays` to
    /// reach zero, restores the system proxy if this session set it, and
    /// settles back in `Stopped`. Any relay still live after the drain
    /// window is abandoned — its socket is closed by the OS on process exit,
    /// per spec.
    pub async fn stop(&self) {
        {
            let mut state = self.inner.state.lock().await;
            if *state != SupervisorState::Running {
                return;
            }
            *state = SupervisorState::Stopping;
        }

        self.inner.abort_tasks().await;
        if let Some(watch_task) = self.inner.watch_task.lock().await.take() {
            watch_task.abort();
        }
        self.inner.transport.close().await;
        self.inner.wait_for_relays_to_drain().await;

        if *self.inner.managing_system_proxy.lock().await {
            let _ = self.inner.system_proxy.clear();
            *self.inner.managing_system_proxy.lock().await = false;
        }

        *self.inner.session_id.lock().await = None;
        *self.inner.started_at.lock().await = None;
        *self.inner.state.lock().await = SupervisorState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Endpoint;
    use crate::system_proxy::NoopSystemProxyHook;

    #[tokio::test]
    async fn test_initial_state_is_stopped() {
        let supervisor = Supervisor::new(Arc::new(NoopSystemProxyHook));
        assert_eq!(supervisor.state().await, SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_start_with_invalid_config_leaves_supervisor_stopped() {
        let supervisor = Supervisor::new(Arc::new(NoopSystemProxyHook));
        let cfg = SessionConfig::new(
            Endpoint::new("", 22),
            "user",
            crate::models::Credential::password("x"),
        );

        let result = supervisor.start(cfg).await;
        assert!(result.is_err());
        assert_eq!(supervisor.state().await, SupervisorState::Stopped);
        assert!(supervisor.snapshot().await.last_error.is_some());
    }

    #[tokio::test]
    async fn test_stop_on_stopped_supervisor_is_a_noop() {
        let supervisor = Supervisor::new(Arc::new(NoopSystemProxyHook));
        supervisor.stop().await;
        assert_eq!(supervisor.state().await, SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_drain_wait_returns_immediately_when_no_relays_active() {
        let supervisor = Supervisor::new(Arc::new(NoopSystemProxyHook));
        let start = tokio::time::Instant::now();
        supervisor.inner.wait_for_relays_to_drain().await;
        assert!(start.elapsed() < STOP_DRAIN_TIMEOUT);
    }

    #[tokio::test]
    async fn test_drain_wait_gives_up_after_timeout_when_relay_never_exits() {
        let supervisor = Supervisor::new(Arc::new(NoopSystemProxyHook));
        supervisor.inner.counters.relay_started();

        let start = tokio::time::Instant::now();
        supervisor.inner.wait_for_relays_to_drain().await;
        assert!(start.elapsed() >= STOP_DRAIN_TIMEOUT);
        assert_eq!(supervisor.inner.counters.snapshot().active_relays, 1);
    }

    #[tokio::test]
    async fn test_transport_drop_while_running_stops_the_supervisor() {
        let supervisor = Supervisor::new(Arc::new(NoopSystemProxyHook));
        *supervisor.inner.state.lock().await = SupervisorState::Running;

        supervisor.inner.clone().handle_transport_drop().await;

        assert_eq!(supervisor.state().await, SupervisorState::Stopped);
        assert!(supervisor.snapshot().await.last_error.is_some());
    }

    #[tokio::test]
    async fn test_transport_drop_while_stopped_is_a_noop() {
        let supervisor = Supervisor::new(Arc::new(NoopSystemProxyHook));

        supervisor.inner.clone().handle_transport_drop().await;

        assert_eq!(supervisor.state().await, SupervisorState::Stopped);
        assert!(supervisor.snapshot().await.last_error.is_none());
    }
}
