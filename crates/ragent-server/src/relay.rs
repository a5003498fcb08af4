//! Bidirectional relay loop
//!
//! Two independent copy loops, one per direction. Each owns the read half of
//! one connection and the write half of the other, plus its own byte counter.
//! When either loop ends the whole session is torn down.

use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, info};

/// Byte-forwarding options
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Per-direction read buffer size
    pub buffer_size: usize,
    /// How often each direction reports cumulative bytes moved
    pub progress_interval: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            progress_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client (remote) to local service
    ToUpstream,
    /// Local service to client (remote)
    ToDownstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ToUpstream => f.write_str("remote->local"),
            Direction::ToDownstream => f.write_str("local->remote"),
        }
    }
}

/// How a copy loop ended
#[derive(Debug)]
pub enum Termination {
    Eof,
    ReadFailed(std::io::Error),
    WriteFailed(std::io::Error),
}

/// Bytes moved by a finished session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub to_upstream: u64,
    pub to_downstream: u64,
}

/// Relay bytes between an admitted client connection and the upstream service
/// until either side closes or fails. Both connections are shut down and
/// dropped before this returns.
pub async fn relay<D, U>(downstream: D, upstream: U, options: &RelayOptions) -> RelayStats
where
    D: AsyncRead + AsyncWrite + Send,
    U: AsyncRead + AsyncWrite + Send,
{
    let (mut down_read, mut down_write) = tokio::io::split(downstream);
    let (mut up_read, mut up_write) = tokio::io::split(upstream);
    let mut stats = RelayStats::default();

    let (first, ended) = tokio::select! {
        end = copy_simplex(
            Direction::ToUpstream,
            &mut down_read,
            &mut up_write,
            options,
            &mut stats.to_upstream,
        ) => (Direction::ToUpstream, end),
        end = copy_simplex(
            Direction::ToDownstream,
            &mut up_read,
            &mut down_write,
            options,
            &mut stats.to_downstream,
        ) => (Direction::ToDownstream, end),
    };
    debug!("{} ended first: {:?}", first, ended);

    // Closing both sides terminates the opposite direction's pending read
    let _ = up_write.shutdown().await;
    let _ = down_write.shutdown().await;

    stats
}

/// Copy one direction until a zero-length read or an error
pub async fn copy_simplex<R, W>(
    direction: Direction,
    reader: &mut R,
    writer: &mut W,
    options: &RelayOptions,
    total: &mut u64,
) -> Termination
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; options.buffer_size.max(1)];
    let mut last_report = Instant::now();

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return Termination::Eof,
            Ok(n) => n,
            Err(e) => return Termination::ReadFailed(e),
        };

        if let Err(e) = writer.write_all(&buf[..n]).await {
            return Termination::WriteFailed(e);
        }
        if let Err(e) = writer.flush().await {
            return Termination::WriteFailed(e);
        }
        *total += n as u64;

        if last_report.elapsed() >= options.progress_interval {
            info!(direction = %direction, bytes = *total, "Relay progress");
            last_report = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_copy_simplex_preserves_order() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let mut reader = &data[..];
        let mut out = Vec::new();
        let mut total = 0;

        let end = copy_simplex(
            Direction::ToUpstream,
            &mut reader,
            &mut out,
            &RelayOptions::default(),
            &mut total,
        )
        .await;

        assert!(matches!(end, Termination::Eof));
        assert_eq!(total, data.len() as u64);
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_relay_forwards_both_directions() {
        let (mut client, downstream) = duplex(64);
        let (upstream, mut service) = duplex(64);

        let session = tokio::spawn(async move {
            relay(downstream, upstream, &RelayOptions::default()).await
        });

        client.write_all(b"ping from client").await.unwrap();
        let mut buf = [0u8; 16];
        service.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping from client");

        service.write_all(b"pong from service").await.unwrap();
        let mut buf = [0u8; 17];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong from service");

        drop(client);
        let stats = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.to_upstream, 16);
        assert_eq!(stats.to_downstream, 17);
    }

    #[tokio::test]
    async fn test_upstream_close_tears_down_client_side() {
        let (mut client, downstream) = duplex(64);
        let (upstream, service) = duplex(64);

        let session = tokio::spawn(async move {
            relay(downstream, upstream, &RelayOptions::default()).await
        });

        drop(service);

        // The client sees EOF once the session is torn down
        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert!(rest.is_empty());

        tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_client_close_tears_down_upstream_side() {
        let (client, downstream) = duplex(64);
        let (upstream, mut service) = duplex(64);

        let session = tokio::spawn(async move {
            relay(downstream, upstream, &RelayOptions::default()).await
        });

        drop(client);

        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), service.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();

        let stats = session.await.unwrap();
        assert_eq!(stats, RelayStats::default());
    }

    #[tokio::test]
    async fn test_large_transfer_with_small_buffer() {
        let (mut client, downstream) = duplex(1024);
        let (upstream, mut service) = duplex(1024);
        let options = RelayOptions {
            buffer_size: 7,
            ..Default::default()
        };

        let session = tokio::spawn(async move { relay(downstream, upstream, &options).await });

        let payload: Vec<u8> = (0..100_000u32).map(|i| (i * 31 % 256) as u8).collect();
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            client.write_all(&payload).await.unwrap();
            client
        });

        let mut received = vec![0u8; expected.len()];
        service.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);

        drop(writer.await.unwrap());
        let stats = session.await.unwrap();
        assert_eq!(stats.to_upstream, expected.len() as u64);
    }
}
