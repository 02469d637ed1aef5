use thiserror::Error;

/// Result type for eISCP operations
pub type Result<T> = std::result::Result<T, IscpError>;

/// Errors that can occur when talking to an eISCP receiver
#[derive(Error, Debug)]
pub enum IscpError {
    /// Packet header violates the wire format (bad magic, wrong header size)
    ///
    /// The stream is out of sync after this; the caller should disconnect
    /// and reconnect.
    #[error("Malformed packet header: {0}")]
    MalformedHeader(String),

    /// Outbound payload does not fit the 32-bit length field
    #[error("Payload of {size} bytes exceeds maximum of {max}")]
    PayloadTooLarge {
        /// Payload length
        size: usize,
        /// Largest encodable length
        max: usize,
    },

    /// ISCP message payload does not have the expected preamble
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Zone name is not known to the command table
    #[error("\"{0}\" is not a valid zone")]
    UnknownZone(String),

    /// Command name or prefix is not known in the given zone
    #[error("\"{command}\" is not a valid command in zone \"{zone}\"")]
    UnknownCommand {
        /// The command token as given
        command: String,
        /// The zone it was looked up in
        zone: String,
    },

    /// Argument is neither a known value alias nor inside a numeric range
    #[error("\"{argument}\" is not a valid argument for command \"{command}\" in zone \"{zone}\"")]
    UnknownArgument {
        /// The argument as given
        argument: String,
        /// The command it was passed to
        command: String,
        /// The zone of the command
        zone: String,
    },

    /// No zone's command table recognizes the 3-character prefix
    #[error("Cannot convert ISCP message to command: {0}")]
    UnrecognizedWireCommand(String),

    /// Free-form command string could not be split into command and argument
    #[error("Invalid command string: {0}")]
    InvalidCommand(String),

    /// No matching reply arrived before the response deadline
    #[error("Timeout waiting for response to {command}")]
    ResponseTimeout {
        /// The wire command that went unanswered
        command: String,
    },

    /// Operation requires a running connection
    #[error("Not connected")]
    NotConnected,

    /// Connection was closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON deserialization error (command table loading)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IscpError {
    /// Whether this error leaves the connection out of sync or unusable
    ///
    /// Translation failures and response timeouts are recoverable; wire
    /// format violations and transport failures require a reconnect.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IscpError::MalformedHeader(_)
                | IscpError::MalformedMessage(_)
                | IscpError::ConnectionClosed
                | IscpError::Io(_)
        )
    }
}
