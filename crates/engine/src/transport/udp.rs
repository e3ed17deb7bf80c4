// LAN transport: JSON datagrams on an IPv4 multicast group.
//
// Every engine on the group binds the same port, joins the group, and sends
// each message as one datagram. Multicast loopback stays on so engines on the
// same host hear each other (and themselves; the engine filters self-echo).

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::{Inbound, Transport, TransportError, INBOUND_CHANNEL_CAPACITY};
use crate::config::MulticastConfig;

/// Largest payload a single UDP datagram can carry over IPv4.
const MAX_DATAGRAM_BYTES: usize = 65_507;

#[derive(Debug, Clone)]
pub struct UdpMulticastTransport {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
}

impl UdpMulticastTransport {
    /// Bind the group port and join the multicast group.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(config: &MulticastConfig) -> Result<Self, TransportError> {
        let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.port))?;
        socket.join_multicast_v4(&config.multicast_group, &Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_loop_v4(true)?;
        let target = SocketAddr::V4(SocketAddrV4::new(config.multicast_group, config.port));
        let transport = Self::from_std(socket, target)?;

        debug!(
            group = %config.multicast_group,
            port = config.port,
            "joined presence multicast group"
        );
        Ok(transport)
    }

    /// Wrap a bound socket that sends every message to `target`.
    fn from_std(socket: std::net::UdpSocket, target: SocketAddr) -> Result<Self, TransportError> {
        socket.set_nonblocking(true)?;
        Ok(Self { socket: Arc::new(UdpSocket::from_std(socket)?), target })
    }
}

impl Transport for UdpMulticastTransport {
    fn send(&self, message: &Value) -> Result<(), TransportError> {
        let bytes = serde_json::to_vec(message)?;
        self.socket.try_send_to(&bytes, self.target)?;
        Ok(())
    }

    fn listen(&self) -> Result<Inbound, TransportError> {
        let socket = self.socket.clone();
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    received = socket.recv_from(&mut buf) => match received {
                        Ok((size, from)) => match serde_json::from_slice::<Value>(&buf[..size]) {
                            Ok(value) => {
                                if tx.send(Ok(value)).await.is_err() {
                                    break;
                                }
                            }
                            Err(error) => {
                                trace!(%from, %error, "dropping undecodable datagram");
                            }
                        },
                        Err(error) => {
                            warn!(%error, "multicast receive failed");
                            let _ = tx.send(Err(TransportError::Io(error))).await;
                            break;
                        }
                    },
                }
            }
        });

        Ok(rx)
    }
}
