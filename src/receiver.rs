use crate::commands::Translator;
use crate::connection::Connection;
use crate::error::{IscpError, Result};
use crate::types::{DecodedCommand, DeviceInfo, DEFAULT_PORT};
use std::fmt;
use std::time::Duration;

/// Timeouts used by a [`Receiver`]
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// How long to wait for the TCP connection to be established
    pub connect_timeout: Duration,

    /// How long to wait for a matching reply to a command
    ///
    /// Receivers are documented to answer within 50ms, but in practice
    /// they can take a lot longer.
    pub response_timeout: Duration,

    /// Slice used when polling for replies
    pub poll_interval: Duration,

    /// How long the background worker waits for queued commands per iteration
    pub queue_wait: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            queue_wait: Duration::from_millis(10),
        }
    }
}

/// A networked receiver
///
/// The control connection is opened on first use and stays open until
/// [`Receiver::disconnect`] is called. A `Receiver` is driven by one task
/// at a time; use [`crate::AsyncReceiver`] to handle unsolicited messages
/// in the background.
///
/// # Example
///
/// ```no_run
/// use eiscp::{Receiver, Translator};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let translator = Translator::builtin()?;
///     let mut receiver = Receiver::new("192.168.1.125", 60128);
///
///     let reply = receiver.command(&translator, "main.volume=40").await?;
///     println!("{}", reply);
///
///     receiver.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct Receiver {
    host: String,
    port: u16,
    info: Option<DeviceInfo>,
    config: ReceiverConfig,
    connection: Option<Connection>,
}

impl Receiver {
    /// Create a handle for the receiver at `host:port` without connecting
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_config(host, port, ReceiverConfig::default())
    }

    /// Create a handle with custom timeouts
    pub fn with_config(host: impl Into<String>, port: u16, config: ReceiverConfig) -> Self {
        Self {
            host: host.into(),
            port,
            info: None,
            config,
            connection: None,
        }
    }

    /// Create a handle from a discovery reply
    pub(crate) fn discovered(host: impl Into<String>, info: DeviceInfo) -> Self {
        let mut receiver = Self::new(host, info.iscp_port);
        receiver.info = Some(info);
        receiver
    }

    /// Get the receiver's host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get the receiver's control port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Discovery information, if this handle came from discovery
    pub fn info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }

    /// Get the timeouts in use
    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Replace the timeouts (takes effect on the next operation)
    pub fn set_config(&mut self, config: ReceiverConfig) {
        self.config = config;
    }

    /// Whether the control connection is open
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Open the control connection if it isn't open yet
    pub async fn ensure_connected(&mut self) -> Result<&mut Connection> {
        if self.connection.is_none() {
            let connection =
                Connection::connect(&self.host, self.port, self.config.connect_timeout).await?;
            tracing::info!("Connected to {}", self);
            self.connection = Some(connection);
        }
        self.connection.as_mut().ok_or(IscpError::NotConnected)
    }

    /// Close the control connection
    pub async fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close().await;
            tracing::info!("Disconnected from {}", self);
        }
    }

    /// Send a wire command without waiting for a reply
    pub async fn send(&mut self, command: &str) -> Result<()> {
        self.ensure_connected().await?.send(command).await
    }

    /// Receive the next message, waiting at most `wait`
    pub async fn receive(&mut self, wait: Duration) -> Result<Option<String>> {
        self.ensure_connected().await?.receive(wait).await
    }

    /// Send a wire command and wait for the reply with the same 3-character code
    ///
    /// Messages that were already waiting before the call are discarded, as
    /// are unrelated messages arriving while waiting. Fails with
    /// [`IscpError::ResponseTimeout`] if no match arrives in time.
    pub async fn request_response(&mut self, command: &str) -> Result<String> {
        let poll_interval = self.config.poll_interval;
        let response_timeout = self.config.response_timeout;
        self.ensure_connected()
            .await?
            .request_response(command, poll_interval, response_timeout)
            .await
    }

    /// Wait for a reply matching `command` without sending anything
    pub(crate) async fn wait_for_response(&mut self, command: &str) -> Result<String> {
        let poll_interval = self.config.poll_interval;
        let response_timeout = self.config.response_timeout;
        self.ensure_connected()
            .await?
            .wait_for_response(command, poll_interval, response_timeout)
            .await
    }

    /// Send a raw wire command like `MVL50` and return the raw reply
    pub async fn raw(&mut self, command: &str) -> Result<String> {
        self.request_response(command).await
    }

    /// Execute a human-readable command and decode the reply
    ///
    /// ```no_run
    /// # use eiscp::{Receiver, Translator};
    /// # async fn run(receiver: &mut Receiver, translator: &Translator) -> eiscp::Result<()> {
    /// receiver.command(translator, "power on").await?;
    /// receiver.command(translator, "zone2.volume=66").await?;
    /// receiver.command(translator, "source:net").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn command(&mut self, translator: &Translator, text: &str) -> Result<DecodedCommand> {
        let wire = translator.command_to_wire(text)?;
        let reply = self.request_response(&wire).await?;
        translator.wire_to_zoned_command(&reply)
    }

    /// Turn the receiver power on
    pub async fn power_on(&mut self) -> Result<String> {
        self.request_response("PWR01").await
    }

    /// Turn the receiver power off
    pub async fn power_off(&mut self) -> Result<String> {
        self.request_response("PWR00").await
    }
}

impl fmt::Display for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let model = self
            .info
            .as_ref()
            .map(|info| info.model_name.as_str())
            .filter(|name| !name.is_empty())
            .unwrap_or("unknown");
        write!(f, "Receiver({}) {}:{}", model, self.host, self.port)
    }
}

impl fmt::Debug for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("info", &self.info)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let receiver = Receiver::new("192.168.1.125", 60128);
        assert_eq!(receiver.to_string(), "Receiver(unknown) 192.168.1.125:60128");

        let info = DeviceInfo::parse("!1ECNTX-NR609/60129/DX/0009B0D1AB42").unwrap();
        let receiver = Receiver::discovered("10.0.0.7", info);
        assert_eq!(receiver.port(), 60129);
        assert_eq!(receiver.to_string(), "Receiver(TX-NR609) 10.0.0.7:60129");
    }

    #[test]
    fn test_not_connected_until_used() {
        let receiver = Receiver::default();
        assert!(!receiver.is_connected());
        assert_eq!(receiver.port(), DEFAULT_PORT);
    }
}
