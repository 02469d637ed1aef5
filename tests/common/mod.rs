#![allow(dead_code)]

use eiscp::protocol::{decode_header, encode_packet, parse_message, HEADER_SIZE};
use eiscp::{Receiver, ReceiverConfig};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Bind a fake receiver on loopback
pub async fn fake_receiver() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Receiver handle with short timeouts for tests
pub fn receiver(port: u16) -> Receiver {
    Receiver::with_config(
        "127.0.0.1",
        port,
        ReceiverConfig {
            connect_timeout: Duration::from_secs(2),
            response_timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(20),
            queue_wait: Duration::from_millis(10),
        },
    )
}

/// Read one command the client sent, `None` once the client hangs up
pub async fn read_command(stream: &mut TcpStream) -> Option<String> {
    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header).await.ok()?;
    let header = decode_header(&header).unwrap();
    let mut payload = vec![0u8; header.data_size as usize];
    stream.read_exact(&mut payload).await.ok()?;
    Some(parse_message(&payload).unwrap())
}

/// Packet the way a real receiver frames its messages
pub fn reply_packet(command: &str) -> Vec<u8> {
    encode_packet(format!("!1{}\x1a\r\n", command).as_bytes())
        .unwrap()
        .to_vec()
}

/// Write a message the way a real receiver does
pub async fn write_message(stream: &mut TcpStream, command: &str) {
    stream.write_all(&reply_packet(command)).await.unwrap();
}
