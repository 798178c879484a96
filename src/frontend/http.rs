use super::MAX_CONCURRENT_RELAYS;
use crate::models::{Counters, Endpoint};
use crate::relay;
use crate::transport::ChannelOpener;
use crate::utils::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

const MAX_HEADER_LINES: usize = 256;

/// Runs the HTTP/CONNECT proxy accept loop. Structurally mirrors
/// `frontend::socks5::serve` — same admission semaphore, same
/// accept-then-spawn-then-relay shape — but speaks HTTP/1.1 instead of the
/// SOCKS5 wire format.
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
                tracing::info!("HTTP listener stopped accepting: {}", e);
                break;
            }
        };

        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("HTTP connection from {} rejected: at capacity", peer);
                continue;
            }
        };

        let opener = opener.clone();
        let counters = counters.clone();

        tokio::spawn(async move {
            let _permit = permit;
            counters.relay_started();
            if let Err(e) = handle_connection(stream, &opener, &counters, idle_timeout).await {
                tracing::debug!("HTTP connection from {} ended: {}", peer, e);
            }
            counters.relay_finished();
        });
    }
}

struct Request {
    method: String,
    target: String,
    version: String,
    header_lines: Vec<String>,
}

async fn handle_connection(
    stream: TcpStream,
    opener: &Arc<dyn ChannelOpener>,
    counters: &Arc<Counters>,
    idle_timeout: Duration,
) -> Result<()> {
    let mut reader = BufReader::new(stream);

    let request = match read_request(&mut reader).await {
        Some(request) => request,
        None => {
            let _ = write_status_line(&mut reader, 400, "Bad Request").await;
            return Ok(());
        }
    };

    if request.method.eq_ignore_ascii_case("CONNECT") {
        handle_connect(reader, &request, opener, counters, idle_timeout).await
    } else {
        handle_forward(reader, &request, opener, counters, idle_timeout).await
    }
}

/// Reads the request line and headers up to (and including) the blank line
/// terminator. Returns `None` on a malformed request line, truncated
/// headers, or a request that exceeds `MAX_HEADER_LINES`.
async fn read_request(reader: &mut BufReader<TcpStream>) -> Option<Request> {
    let mut line = String::new();
    reader.read_line(&mut line).await.ok()?;
    let line = line.trim_end();
    let mut parts = line.splitn(3, ' ');
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();
    let version = parts.next()?.to_string();
    if method.is_empty() || target.is_empty() || !version.starts_with("HTTP/") {
        return None;
    }

    let mut header_lines = Vec::new();
    for _ in 0..MAX_HEADER_LINES {
        let mut header_line = String::new();
        let n = reader.read_line(&mut header_line).await.ok()?;
        if n == 0 {
            return None;
        }
        let trimmed = header_line.trim_end();
        if trimmed.is_empty() {
            return Some(Request {
                method,
                target,
                version,
                header_lines,
            });
        }
        header_lines.push(trimmed.to_string());
    }
    None
}

/// Parses an absolute-URI or `host:port` authority into an `Endpoint`,
/// defaulting to port 80 for a bare `http://host` target and 443 for
/// `CONNECT host:port`.
fn parse_authority(target: &str, default_port: u16) -> Option<Endpoint> {
    let authority = if let Some(rest) = target.strip_prefix("http://") {
        rest.split_once('/').map(|(a, _)| a).unwrap_or(rest)
    } else {
        target
    };

    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port: u16 = port.parse().ok()?;
            Some(Endpoint::new(host, port))
        }
        _ => Some(Endpoint::new(authority, default_port)),
    }
}

async fn handle_connect(
    mut reader: BufReader<TcpStream>,
    request: &Request,
    opener: &Arc<dyn ChannelOpener>,
    counters: &Arc<Counters>,
    idle_timeout: Duration,
) -> Result<()> {
    let endpoint = match parse_authority(&request.target, 443) {
        Some(endpoint) => endpoint,
        None => {
            let _ = write_status_line(&mut reader, 400, "Bad Request").await;
            return Ok(());
        }
    };

    tracing::debug!("HTTP CONNECT {}", endpoint);

    let channel = match opener.open(&endpoint).await {
        Ok(channel) => channel,
        Err(e) => {
            tracing::info!("HTTP CONNECT upstream open to {} failed: {}", endpoint, e);
            let _ = write_status_line(&mut reader, 502, "Bad Gateway").await;
            return Ok(());
        }
    };

    write_status_line(&mut reader, 200, "Connection Established").await?;

    relay::run(reader, channel, idle_timeout, counters).await
}

async fn handle_forward(
    mut reader: BufReader<TcpStream>,
    request: &Request,
    opener: &Arc<dyn ChannelOpener>,
    counters: &Arc<Counters>,
    idle_timeout: Duration,
) -> Result<()> {
    if !request.target.starts_with("http://") {
        let _ = write_status_line(&mut reader, 400, "Bad Request").await;
        return Ok(());
    }

    let endpoint = match parse_authority(&request.target, 80) {
        Some(endpoint) => endpoint,
        None => {
            let _ = write_status_line(&mut reader, 400, "Bad Request").await;
            return Ok(());
        }
    };

    let origin_form = request
        .target
        .strip_prefix("http://")
        .and_then(|rest| rest.find('/').map(|i| &rest[i..]))
        .unwrap_or("/");

    tracing::debug!("HTTP forward {} {}", request.target, endpoint);

    let mut channel = match opener.open(&endpoint).await {
        Ok(channel) => channel,
        Err(e) => {
            tracing::info!("HTTP forward upstream open to {} failed: {}", endpoint, e);
            let _ = write_status_line(&mut reader, 502, "Bad Gateway").await;
            return Ok(());
        }
    };

    let mut out = format!("{} {} {}\r\n", request.method, origin_form, request.version);
    for header in &request.header_lines {
        if let Some((name, _)) = header.split_once(':') {
            let lowered = name.trim().to_ascii_lowercase();
            if lowered == "proxy-connection" || lowered == "proxy-authorization" {
                continue;
            }
            if lowered == "connection" {
                continue;
            }
        }
        out.push_str(header);
        out.push_str("\r\n");
    }
    out.push_str("Connection: close\r\n\r\n");

    channel.write_all(out.as_bytes()).await?;

    relay::run(reader, channel, idle_timeout, counters).await
}

async fn write_status_line(stream: &mut BufReader<TcpStream>, code: u16, reason: &str) -> Result<()> {
    let response = format!("HTTP/1.1 {} {}\r\n\r\n", code, reason);
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

/// Builds the default admission semaphore for the HTTP front-end. Separate
/// from `socks5::default_semaphore` today because each front-end owns its
/// own listener and its own relay population; the supervisor may choose to
/// share one semaphore across both if a single global cap is preferred.
pub fn default_semaphore() -> Arc<Semaphore> {
    Arc::new(Semaphore::new(MAX_CONCURRENT_RELAYS))
}
