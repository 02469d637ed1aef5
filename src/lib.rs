//! Rust library for controlling Onkyo and Pioneer networked A/V receivers
//!
//! This library speaks eISCP, the Ethernet variant of the receivers' serial
//! control protocol. It supports:
//!
//! - Discovery via UDP broadcast on every local network
//! - Human-readable commands (`"zone2.volume=66"`) translated to wire
//!   commands (`ZVL42`) and back
//! - Request/response over a long-lived TCP control connection
//! - A background worker that delivers unsolicited status messages to a
//!   callback while still supporting request/response
//!
//! # Quick Start
//!
//! ```no_run
//! use eiscp::{discover, Translator};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let translator = Translator::builtin()?;
//!
//!     for mut receiver in discover(Duration::from_secs(1)).await {
//!         println!("Found {}", receiver);
//!
//!         let power = receiver.command(&translator, "power query").await?;
//!         println!("Power: {}", power.value);
//!
//!         receiver.disconnect().await;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Direct Connection
//!
//! If you know the IP address of a receiver, you can connect directly:
//!
//! ```no_run
//! use eiscp::Receiver;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut receiver = Receiver::new("192.168.1.125", 60128);
//!     let reply = receiver.raw("MVLQSTN").await?;
//!     println!("Volume: {}", reply);
//!     receiver.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Protocol**: eISCP packet framing and ISCP message parsing
//! - **Commands**: command table and the text <-> wire command translator
//! - **Discovery**: UDP broadcast discovery
//! - **Connection**: TCP control channel with polled, timed receives
//! - **Receiver**: device handle with lazy connect and request/response
//! - **Worker**: background task serializing all I/O for one receiver

mod commands;
mod connection;
mod discovery;
mod error;
pub mod protocol;
mod receiver;
mod types;
mod worker;

// Public exports
pub use commands::{
    parse_command, CommandDescriptor, CommandTable, Names, ParsedCommand, Translator,
    ValueDescriptor, ValueToken, ZoneDescriptor,
};
pub use connection::Connection;
pub use discovery::{discover, DISCOVERY_PORT};
pub use error::{IscpError, Result};
pub use receiver::{Receiver, ReceiverConfig};
pub use types::{CommandValue, DecodedCommand, DeviceInfo, DEFAULT_PORT, DEFAULT_ZONE};
pub use worker::{AsyncReceiver, CommandQueue, MessageCallback, PendingResponse, WorkerStatus};
