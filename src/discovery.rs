use crate::error::Result;
use crate::protocol::{decode_packet, encode_packet, strip_terminators};
use crate::receiver::Receiver;
use crate::types::DeviceInfo;
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;

/// UDP port receivers listen on for discovery queries
pub const DISCOVERY_PORT: u16 = 60128;

/// Discovery queries: Onkyo and the Pioneer variant
const QUERIES: [&str; 2] = ["!xECNQSTN", "!pECNQSTN"];

const MAX_DATAGRAM: usize = 1024;

/// Find receivers on all local networks
///
/// Broadcasts a discovery query on every usable IPv4 interface, then waits
/// on each socket until no reply arrives for `timeout`. Devices answering
/// on several interfaces are reported once, keyed by their identifier.
/// Never fails: interfaces that can't be used are logged and skipped.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     for receiver in eiscp::discover(Duration::from_secs(1)).await {
///         println!("Found {}", receiver);
///     }
/// }
/// ```
pub async fn discover(timeout: Duration) -> Vec<Receiver> {
    let mut sockets = Vec::new();
    for (local, broadcast) in broadcast_addresses() {
        match send_queries(local, broadcast).await {
            Ok(socket) => sockets.push(socket),
            Err(e) => tracing::warn!("Discovery on {} failed: {}", local, e),
        }
    }

    let mut found = BTreeMap::new();
    for socket in &sockets {
        collect_responses(socket, timeout, &mut found).await;
    }

    tracing::info!("Discovered {} receiver(s)", found.len());
    found.into_values().collect()
}

/// `(local address, broadcast address)` of every usable interface
fn broadcast_addresses() -> Vec<(Ipv4Addr, Ipv4Addr)> {
    let mut addresses = Vec::new();

    for interface in netdev::get_interfaces() {
        if !interface.is_up() || interface.is_loopback() {
            continue;
        }
        for net in &interface.ipv4 {
            if net.prefix_len() >= 32 {
                continue;
            }
            tracing::debug!(
                "Interface {}: {} broadcast {}",
                interface.name,
                net.addr(),
                net.broadcast()
            );
            addresses.push((net.addr(), net.broadcast()));
        }
    }

    if addresses.is_empty() {
        tracing::debug!("No broadcast-capable interface found, using limited broadcast");
        addresses.push((Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST));
    }

    addresses
}

async fn send_queries(local: Ipv4Addr, broadcast: Ipv4Addr) -> Result<UdpSocket> {
    let socket = UdpSocket::bind((local, 0)).await?;
    socket.set_broadcast(true)?;

    for query in QUERIES {
        let packet = encode_packet(query.as_bytes())?;
        socket.send_to(&packet, (broadcast, DISCOVERY_PORT)).await?;
    }
    tracing::debug!("Sent discovery query from {} to {}", local, broadcast);

    Ok(socket)
}

/// Read replies until none arrives for `timeout`
pub(crate) async fn collect_responses(
    socket: &UdpSocket,
    timeout: Duration,
    found: &mut BTreeMap<String, Receiver>,
) {
    let mut buf = [0u8; MAX_DATAGRAM];

    loop {
        match tokio::time::timeout(timeout, socket.recv_from(&mut buf)).await {
            Err(_) => break,
            Ok(Err(e)) => {
                tracing::warn!("Discovery receive failed: {}", e);
                break;
            }
            Ok(Ok((len, addr))) => {
                record_response(found, addr, &buf[..len]);
            }
        }
    }
}

/// Parse one discovery reply and add it to `found`
///
/// A later reply with the same identifier replaces the earlier one.
pub(crate) fn record_response(
    found: &mut BTreeMap<String, Receiver>,
    addr: SocketAddr,
    datagram: &[u8],
) -> bool {
    let payload = match decode_packet(datagram) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::debug!("Ignoring malformed discovery reply from {}: {}", addr, e);
            return false;
        }
    };

    let text = String::from_utf8_lossy(strip_terminators(payload));
    let Some(info) = DeviceInfo::parse(text.trim()) else {
        tracing::debug!("Ignoring unexpected discovery reply from {}: {:?}", addr, text);
        return false;
    };

    tracing::info!("Found {} at {} ({})", info.model_name, addr.ip(), info.identifier);
    let identifier = info.identifier.clone();
    found.insert(identifier, Receiver::discovered(addr.ip().to_string(), info));
    true
}
