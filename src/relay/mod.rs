use crate::models::Counters;
use crate::utils::error::{Result, SshToolError};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Buffer size for each direction's copy loop. The spec requires >= 32 KiB;
/// 64 KiB matches the teacher's own tunnel-handling buffers scaled up for
/// throughput.
const RELAY_BUFFER_SIZE: usize = 64 * 1024;

/// Copies bytes both ways between `left` and `right` until one side hits
/// EOF/error or neither side sees activity for `idle_timeout`.
///
/// Generic over any `AsyncRead + AsyncWrite` pair, so it serves the SOCKS5
/// front-end, the HTTP front-end, and tests equally — none of them know
/// whether the other side is a live `russh` channel or a loopback
/// `TcpStream`.
///
/// On exit both streams have been given a chance to shut down their write
/// half; per-direction byte counts are added to `counters` as each write
/// completes (not as each read completes), so `bytes_up`/`bytes_down`
/// reflect bytes actually delivered.
pub async fn run<L, R>(mut left: L, mut right: R, idle_timeout: Duration, counters: &Arc<Counters>) -> Result<()>
where
    L: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + AsyncWrite + Unpin,
{
    let mut left_buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut right_buf = vec![0u8; RELAY_BUFFER_SIZE];

    loop {
        tokio::select! {
            result = tokio::time::timeout(idle_timeout, left.read(&mut left_buf)) => {
                match result {
                    Err(_elapsed) => break,
                    Ok(Ok(0)) => break,
                    Ok(Ok(n)) => {
                        right.write_all(&left_buf[..n]).await.map_err(SshToolError::IoError)?;
                        counters.add_bytes_up(n as u64);
                    }
                    Ok(Err(e)) => {
                        if is_benign_close(&e) {
                            break;
                        }
                        return Err(SshToolError::RelayFailed(e.to_string()));
                    }
                }
            }
            result = tokio::time::timeout(idle_timeout, right.read(&mut right_buf)) => {
                match result {
                    Err(_elapsed) => break,
                    Ok(Ok(0)) => break,
                    Ok(Ok(n)) => {
                        left.write_all(&right_buf[..n]).await.map_err(SshToolError::IoError)?;
                        counters.add_bytes_down(n as u64);
                    }
                    Ok(Err(e)) => {
                        if is_benign_close(&e) {
                            break;
                        }
                        return Err(SshToolError::RelayFailed(e.to_string()));
                    }
                }
            }
        }
    }

    let _ = left.shutdown().await;
    let _ = right.shutdown().await;
    Ok(())
}

fn is_benign_close(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
    )
}
