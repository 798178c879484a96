use std::net::SocketAddr;

/// Hook for pointing the host OS's system-wide proxy settings at this
/// session's listeners, and restoring them on stop.
///
/// The only implementation shipped here is [`NoopSystemProxyHook`] — wiring
/// a real one (macOS `networksetup`, Windows registry, GNOME `gsettings`,
/// ...) is platform-specific plumbing the rest of the crate does not need to
/// know about.
pub trait SystemProxyHook: Send + Sync {
    fn set(&self, http: SocketAddr, socks: SocketAddr) -> anyhow::Result<()>;
    fn clear(&self) -> anyhow::Result<()>;
}

/// Default hook: does nothing. Used whenever `manage_system_proxy` is off,
/// and as the implementation until a platform-specific hook is wired in.
pub struct NoopSystemProxyHook;

impl SystemProxyHook for NoopSystemProxyHook {
    fn set(&self, http: SocketAddr, socks: SocketAddr) -> anyhow::Result<()> {
        tracing::debug!("system proxy hook: set (noop) http={} socks={}", http, socks);
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        tracing::debug!("system proxy hook: clear (noop)");
        Ok(())
    }
}
