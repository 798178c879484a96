use super::MAX_CONCURRENT_RELAYS;
use crate::models::{Counters, Endpoint};
use crate::relay;
use crate::transport::ChannelOpener;
use crate::utils::error::Result;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

const SOCKS5_VERSION: u8 = 0x05;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const REPLY_SUCCESS: u8 = 0x00;
const REPLY_REFUSED: u8 = 0x05;
const REPLY_CMD_NOT_SUPPORTED: u8 = 0x07;

/// Runs the SOCKS5 accept loop until the listener itself errors (e.g. the
/// supervisor closed it on `stop()`). One connection task is spawned per
/// accepted socket; each acquires an admission permit before reading a
/// single byte of the handshake.
pub async fn serve(
    listener: TcpListener,
    opener: Arc<dyn ChannelOpener>,
    counters: Arc<Counters>,
    idle_timeout: Duration,
    semaphore: Arc<Semaphore>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::info!("SOCKS5 listener stopped accepting: {}", e);
                break;
            }
        };

        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("SOCKS5 connection from {} rejected: at capacity", peer);
                continue;
            }
        };

        let opener = opener.clone();
        let counters = counters.clone();

        tokio::spawn(async move {
            let _permit = permit;
            counters.relay_started();
            if let Err(e) = handle_connection(stream, &opener, &counters, idle_timeout).await {
                tracing::debug!("SOCKS5 connection from {} ended: {}", peer, e);
            }
            counters.relay_finished();
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    opener: &Arc<dyn ChannelOpener>,
    counters: &Arc<Counters>,
    idle_timeout: Duration,
) -> Result<()> {
    let mut header = [0u8; 2];
    if stream.read_exact(&mut header).await.is_err() || header[0] != SOCKS5_VERSION {
        return Ok(());
    }

    let nmethods = header[1] as usize;
    let mut methods = vec![0u8; nmethods];
    if stream.read_exact(&mut methods).await.is_err() {
        return Ok(());
    }

    if stream.write_all(&[SOCKS5_VERSION, 0x00]).await.is_err() {
        return Ok(());
    }

    let mut req = [0u8; 4];
    if stream.read_exact(&mut req).await.is_err() || req[0] != SOCKS5_VERSION {
        return Ok(());
    }

    if req[1] != CMD_CONNECT {
        let _ = send_reply(&mut stream, REPLY_CMD_NOT_SUPPORTED).await;
        return Ok(());
    }

    let endpoint = match read_address(&mut stream, req[3]).await {
        Some(endpoint) => endpoint,
        None => return Ok(()),
    };

    tracing::debug!("SOCKS5 CONNECT {}", endpoint);

    let channel = match opener.open(&endpoint).await {
        Ok(channel) => channel,
        Err(e) => {
            tracing::info!("SOCKS5 upstream open to {} failed: {}", endpoint, e);
            let _ = send_reply(&mut stream, REPLY_REFUSED).await;
            return Ok(());
        }
    };

    send_reply(&mut stream, REPLY_SUCCESS).await?;

    relay::run(stream, channel, idle_timeout, counters).await
}

async fn read_address(stream: &mut TcpStream, atyp: u8) -> Option<Endpoint> {
    match atyp {
        ATYP_IPV4 => {
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.ok()?;
            let host = Ipv4Addr::from(buf).to_string();
            let port = read_port(stream).await?;
            Some(Endpoint::new(host, port))
        }
        ATYP_DOMAIN => {
            let mut len_buf = [0u8; 1];
            stream.read_exact(&mut len_buf).await.ok()?;
            let len = len_buf[0] as usize;
            let mut domain = vec![0u8; len];
            stream.read_exact(&mut domain).await.ok()?;
            let host = String::from_utf8(domain).ok()?;
            let port = read_port(stream).await?;
            Some(Endpoint::new(host, port))
        }
        ATYP_IPV6 => {
            let mut buf = [0u8; 16];
            stream.read_exact(&mut buf).await.ok()?;
            let host = Ipv6Addr::from(buf).to_string();
            let port = read_port(stream).await?;
            Some(Endpoint::new(host, port))
        }
        _ => None,
    }
}

async fn read_port(stream: &mut TcpStream) -> Option<u16> {
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await.ok()?;
    Some(u16::from_be_bytes(buf))
}

async fn send_reply(stream: &mut TcpStream, code: u8) -> Result<()> {
    let reply = [
        SOCKS5_VERSION,
        code,
        0x00, // reserved
        ATYP_IPV4,
        0,
        0,
        0,
        0, // bound address, zeroed
        0,
        0, // bound port, zeroed
    ];
    stream.write_all(&reply).await?;
    Ok(())
}

/// Builds the default admission semaphore shared across both front-ends.
pub fn default_semaphore() -> Arc<Semaphore> {
    Arc::new(Semaphore::new(MAX_CONCURRENT_RELAYS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::BoxedChannel;
    use async_trait::async_trait;
    use tokio::net::TcpListener as TokioListener;

    /// Dials a plain local `TcpStream` instead of an SSH channel — enough to
    /// stand in for a fake in-process SSH server when exercising the
    /// front-end's framing and cancellation behavior.
    struct LoopbackOpener {
        target: std::net::SocketAddr,
    }

    #[async_trait]
    impl ChannelOpener for LoopbackOpener {
        async fn open(&self, _endpoint: &Endpoint) -> Result<BoxedChannel> {
            let stream = TcpStream::connect(self.target).await?;
            Ok(Box::pin(stream))
        }
    }

    async fn start_echo_server() -> std::net::SocketAddr {
        let listener = TokioListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    loop {
                        use tokio::io::{AsyncReadExt, AsyncWriteExt};
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if stream.write_all(&buf[..n]).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_socks5_happy_path_connect_and_echo() {
        let echo_addr = start_echo_server().await;
        let opener: Arc<dyn ChannelOpener> = Arc::new(LoopbackOpener { target: echo_addr });
        let counters = Arc::new(Counters::new());

        let listener = TokioListener::bind("127.0.0.1:0").await.unwrap();
        let front_addr = listener.local_addr().unwrap();
        let semaphore = default_semaphore();

        let counters_clone = counters.clone();
        tokio::spawn(async move {
            serve(listener, opener, counters_clone, Duration::from_secs(5), semaphore).await;
        });

        let mut client = TcpStream::connect(front_addr).await.unwrap();
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x00]);

        let domain = b"example";
        let mut request = vec![0x05, 0x01, 0x00, 0x03, domain.len() as u8];
        request.extend_from_slice(domain);
        request.extend_from_slice(&80u16.to_be_bytes());
        client.write_all(&request).await.unwrap();

        let mut connect_reply = [0u8; 10];
        client.read_exact(&mut connect_reply).await.unwrap();
        assert_eq!(connect_reply[..2], [0x05, 0x00]);

        let payload = vec![0x42u8; 1000];
        client.write_all(&payload).await.unwrap();

        let mut echoed = vec![0u8; 1000];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(echoed, payload);

        drop(client);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snap = counters.snapshot();
        assert_eq!(snap.bytes_up, 1000);
        assert_eq!(snap.bytes_down, 1000);
    }

    #[tokio::test]
    async fn test_udp_associate_refused() {
        let echo_addr = start_echo_server().await;
        let opener: Arc<dyn ChannelOpener> = Arc::new(LoopbackOpener { target: echo_addr });
        let counters = Arc::new(Counters::new());
        let listener = TokioListener::bind("127.0.0.1:0").await.unwrap();
        let front_addr = listener.local_addr().unwrap();
        let semaphore = default_semaphore();

        tokio::spawn(async move {
            serve(listener, opener, counters, Duration::from_secs(5), semaphore).await;
        });

        let mut client = TcpStream::connect(front_addr).await.unwrap();
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();

        // CMD = 0x03 (UDP ASSOCIATE)
        client
            .write_all(&[0x05, 0x03, 0x00, 0x01, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();

        let mut connect_reply = [0u8; 10];
        client.read_exact(&mut connect_reply).await.unwrap();
        assert_eq!(connect_reply[1], REPLY_CMD_NOT_SUPPORTED);
    }

    #[tokio::test]
    async fn test_malformed_greeting_closes_without_extra_reply() {
        let echo_addr = start_echo_server().await;
        let opener: Arc<dyn ChannelOpener> = Arc::new(LoopbackOpener { target: echo_addr });
        let counters = Arc::new(Counters::new());
        let listener = TokioListener::bind("127.0.0.1:0").await.unwrap();
        let front_addr = listener.local_addr().unwrap();
        let semaphore = default_semaphore();

        tokio::spawn(async move {
            serve(listener, opener, counters, Duration::from_secs(5), semaphore).await;
        });

        let mut client = TcpStream::connect(front_addr).await.unwrap();
        // Wrong version byte.
        client.write_all(&[0x04, 0x01, 0x00]).await.unwrap();

        let mut buf = [0u8; 4];
        let n = tokio::time::timeout(Duration::from_millis(200), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0, "server must not reply to a malformed greeting");
    }
}
