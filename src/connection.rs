use crate::error::{IscpError, Result};
use crate::protocol::{command_to_packet, decode_frame, parse_message, MAX_PAYLOAD};
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};

/// How long a single readiness check waits while draining stale messages
pub(crate) const DRAIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Low-level eISCP control connection
///
/// Owns the TCP stream and a read buffer, so a packet split across reads
/// (or interrupted by a receive timeout) is completed on the next receive.
pub struct Connection {
    stream: TcpStream,
    read_buf: BytesMut,
}

impl Connection {
    /// Connect to a receiver, giving up after `connect_timeout`
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        tracing::info!("Connecting to {}:{}", host, port);

        let stream = timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {}:{} timed out", host, port),
                )
            })??;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            read_buf: BytesMut::with_capacity(1024),
        })
    }

    /// Send a wire command such as `PWR01`
    pub async fn send(&mut self, command: &str) -> Result<()> {
        tracing::debug!("Sending: {}", command);
        let packet = command_to_packet(command)?;
        self.stream.write_all(&packet).await?;
        Ok(())
    }

    /// Receive the next message, waiting at most `wait`
    ///
    /// Returns `Ok(None)` if no complete message arrived in time. Bytes of a
    /// partially received packet stay buffered for the next call.
    pub async fn receive(&mut self, wait: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + wait;

        loop {
            if let Some(payload) = decode_frame(&mut self.read_buf, MAX_PAYLOAD)? {
                let message = parse_message(&payload)?;
                tracing::debug!("Received: {}", message);
                return Ok(Some(message));
            }

            match timeout_at(deadline, self.stream.read_buf(&mut self.read_buf)).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => {
                    tracing::info!("Connection closed by receiver");
                    return Err(IscpError::ConnectionClosed);
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Discard everything that is already waiting on the connection
    ///
    /// Best effort: messages arriving after the drain are not affected.
    pub async fn drain(&mut self) -> Result<usize> {
        let mut discarded = 0;
        while let Some(message) = self.receive(DRAIN_TIMEOUT).await? {
            tracing::debug!("Discarding stale message: {}", message);
            discarded += 1;
        }
        Ok(discarded)
    }

    /// Wait for a reply whose 3-character code matches `command`
    ///
    /// Unrelated messages are discarded. Polls in slices of `poll_interval`
    /// until `response_timeout` has elapsed.
    pub async fn wait_for_response(
        &mut self,
        command: &str,
        poll_interval: Duration,
        response_timeout: Duration,
    ) -> Result<String> {
        let deadline = Instant::now() + response_timeout;
        let code = command.get(..3).unwrap_or(command);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(IscpError::ResponseTimeout {
                    command: command.to_string(),
                });
            }

            if let Some(message) = self.receive(poll_interval.min(remaining)).await? {
                if message.get(..3) == Some(code) {
                    return Ok(message);
                }
                tracing::debug!("Ignoring {} while waiting for {}", message, code);
            }
        }
    }

    /// Drain stale messages, send `command` and wait for its reply
    pub async fn request_response(
        &mut self,
        command: &str,
        poll_interval: Duration,
        response_timeout: Duration,
    ) -> Result<String> {
        self.drain().await?;
        self.send(command).await?;
        self.wait_for_response(command, poll_interval, response_timeout)
            .await
    }

    /// Shut down the write half and drop the stream
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            tracing::warn!("Error closing connection: {}", e);
        }
    }
}
