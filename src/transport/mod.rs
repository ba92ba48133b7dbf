//! Peer transport.
//!
//! A [`Transport`] is a pair of ordered byte streams to the other role: an
//! inbound stream read as newline-terminated control lines or raw payload,
//! and an outbound stream written the same way. Every inbound read is
//! bounded by an optional timeout so a stalled peer cannot hang the session.
//!
//! How the streams are obtained (SSH, local subprocess, in-memory pipe) is
//! the business of a [`Connector`].

pub mod server;

use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};
use crate::protocol::{self, TargetHello};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;

/// Longest accepted control line, terminator included
pub const MAX_LINE_LEN: usize = 4096;

/// Default limit for a single inbound read
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(300);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Bidirectional byte-stream channel to the peer role.
pub struct Transport {
    reader: BufReader<BoxedReader>,
    writer: BoxedWriter,
    io_timeout: Option<Duration>,
    child: Option<Child>,
    line: Vec<u8>,
}

impl Transport {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: BufReader::new(Box::new(reader)),
            writer: Box::new(writer),
            io_timeout: None,
            child: None,
            line: Vec::with_capacity(128),
        }
    }

    /// Bound every inbound read by `timeout` (`None` waits forever).
    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Tie a child process to this transport; it is waited for in [`finish`].
    ///
    /// [`finish`]: Transport::finish
    pub fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout
    }

    pub fn set_io_timeout(&mut self, timeout: Option<Duration>) {
        self.io_timeout = timeout;
    }

    /// Read one control line without its terminator.
    ///
    /// Returns `None` on a clean end of stream before any byte of the line.
    pub async fn read_line(&mut self, what: &'static str) -> Result<Option<String>> {
        let limit = self.io_timeout;
        self.line.clear();
        let reader = &mut self.reader;
        let line = &mut self.line;
        let n = with_timeout(limit, what, async move {
            let mut bounded = reader.take(MAX_LINE_LEN as u64);
            bounded.read_until(b'\n', line).await
        })
        .await?;

        if n == 0 {
            return Ok(None);
        }
        if self.line.last() != Some(&b'\n') {
            if self.line.len() >= MAX_LINE_LEN {
                return Err(Error::Framing(format!(
                    "{} line exceeds {} bytes",
                    what, MAX_LINE_LEN
                )));
            }
            return Err(Error::Framing(format!(
                "stream closed in the middle of {} line",
                what
            )));
        }
        self.line.pop();
        let text = std::str::from_utf8(&self.line)
            .map_err(|_| Error::Framing(format!("{} line is not valid UTF-8", what)))?;
        Ok(Some(text.to_string()))
    }

    /// Read a control line, treating end of stream as a framing error.
    pub async fn expect_line(&mut self, what: &'static str) -> Result<String> {
        self.read_line(what)
            .await?
            .ok_or_else(|| Error::Framing(format!("stream closed while waiting for {}", what)))
    }

    /// Fill `buf` with raw payload bytes.
    pub async fn read_payload(&mut self, buf: &mut [u8], what: &'static str) -> Result<()> {
        let limit = self.io_timeout;
        let reader = &mut self.reader;
        let expected = buf.len();
        with_timeout(limit, what, async move { reader.read_exact(buf).await })
            .await
            .map_err(|e| match e {
                Error::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                    Error::Framing(format!(
                        "stream closed before {} ({} bytes) was complete",
                        what, expected
                    ))
                }
                other => other,
            })?;
        Ok(())
    }

    /// Write a control line and flush it immediately.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Write raw payload bytes and flush.
    pub async fn write_payload(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Close the session from the driving side.
    ///
    /// Shuts down the outbound stream, requires the inbound stream to reach
    /// end of stream with nothing left unread, then reaps the child process.
    pub async fn finish(mut self) -> Result<()> {
        self.writer.flush().await?;
        self.writer.shutdown().await?;

        if let Some(extra) = self.read_line("end of session").await? {
            return Err(Error::Framing(format!(
                "peer sent unexpected data after the last block: {:?}",
                extra
            )));
        }

        if let Some(mut child) = self.child.take() {
            let limit = self.io_timeout;
            let status = with_timeout(limit, "target exit", child.wait()).await?;
            if !status.success() {
                return Err(Error::Connection(format!(
                    "target process exited with {}",
                    status
                )));
            }
        }
        Ok(())
    }
}

async fn with_timeout<T, F>(limit: Option<Duration>, what: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match limit {
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .map_err(|_| Error::Timeout { what, after })?
            .map_err(Error::from),
        None => fut.await.map_err(Error::from),
    }
}

// =============================================================================
// Connectors
// =============================================================================

/// What the source asks of the target it connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRequest {
    /// Device path on the target host
    pub device: String,
    /// Block size the target should use
    pub block_size: u64,
    /// Digest algorithm the target should use
    pub digest: DigestAlgorithm,
    /// Number of bytes to synchronise (the source device size)
    pub length: u64,
}

/// Produces a transport to a freshly started target role.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Human-readable description for logs.
    fn describe(&self) -> String;

    /// Start a target for `request` and return the raw channel to it.
    async fn connect(&self, request: &TargetRequest) -> Result<Transport>;
}

/// Bounded retry policy for establishing the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Delays double up to this cap
    pub max_delay: Duration,
    /// Time allowed for the target's identity line
    pub handshake_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Connect and read the target's identity line, retrying startup failures.
///
/// A spawn failure, a stream that closes before the identity line, or a
/// handshake timeout is retried. Anything else is returned as is.
pub async fn connect_with_retry<C>(
    connector: &C,
    request: &TargetRequest,
    policy: &RetryPolicy,
    io_timeout: Option<Duration>,
) -> Result<(Transport, TargetHello)>
where
    C: Connector + ?Sized,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        if attempt > 1 {
            tracing::info!("Retrying ({} of {})", attempt, attempts);
        }

        match handshake(connector, request, policy).await {
            Ok((mut transport, hello)) => {
                transport.set_io_timeout(io_timeout);
                return Ok((transport, hello));
            }
            Err(e) if is_retryable(&e) => {
                tracing::warn!(
                    "Error connecting to or invoking blocksync on {}: {}",
                    connector.describe(),
                    e
                );
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(policy.delay_after(attempt)).await;
                }
            }
            Err(e) => return Err(e),
        }
    }

    let cause = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no attempt made".to_string());
    Err(Error::Connection(format!(
        "could not reach target via {} after {} attempts: {}",
        connector.describe(),
        attempts,
        cause
    )))
}

async fn handshake<C>(
    connector: &C,
    request: &TargetRequest,
    policy: &RetryPolicy,
) -> Result<(Transport, TargetHello)>
where
    C: Connector + ?Sized,
{
    let mut transport = connector
        .connect(request)
        .await?
        .with_io_timeout(Some(policy.handshake_timeout));
    let hello = protocol::read_hello(&mut transport).await?;
    Ok((transport, hello))
}

fn is_retryable(err: &Error) -> bool {
    match err {
        Error::Connection(_) | Error::Timeout { .. } | Error::Io(_) => true,
        Error::Framing(msg) => msg.starts_with("stream closed"),
        _ => false,
    }
}
