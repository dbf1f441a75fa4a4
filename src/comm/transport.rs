//! transport.rs
//! Datagram transports used by the sensor and control roles.
//!
//! - `UdpTransport`: socket2-configured UDP socket (bind for receiving, send_to for commands)
//! - `ChannelTransport`: in-process pair over crossbeam channels (mock gateway, tests)
//!
//! Receives are bounded by a timeout so owning loops can observe their stop flag.

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::{
    io::ErrorKind,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    time::Duration,
};
use log::debug;

use crate::error::{AffError, Result};

pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(100);
const CHANNEL_CAPACITY: usize = 256;

pub trait Transport: Send {
    /// Sends one datagram; returns the number of bytes written.
    fn send(&mut self, data: &[u8]) -> Result<usize>;

    /// Receives one datagram of at most `bufsize` bytes.
    /// Returns `AffError::Timeout` when nothing arrives within the receive timeout.
    fn recv(&mut self, bufsize: usize) -> Result<Vec<u8>>;

    fn close(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, data: &[u8]) -> Result<usize> {
        (**self).send(data)
    }

    fn recv(&mut self, bufsize: usize) -> Result<Vec<u8>> {
        (**self).recv(bufsize)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Resolves `host:port` to the first matching socket address.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| AffError::NotReady(format!("no address for {host}:{port}")))
}

// ============================================================================
// UDP
// ============================================================================

pub struct UdpTransport {
    socket: Option<UdpSocket>,
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
}

fn udp_socket(domain_of: &SocketAddr) -> Result<Socket> {
    let socket = Socket::new(Domain::for_address(*domain_of), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    {
        socket.set_reuse_port(true).ok();
    }
    Ok(socket)
}

impl UdpTransport {
    /// Bound socket for receiving sensory frames at `local`.
    pub fn bind(local: SocketAddr, timeout: Option<Duration>) -> Result<Self> {
        let socket = udp_socket(&local)?;
        socket.bind(&SockAddr::from(local))?;
        socket.set_read_timeout(timeout)?;
        let socket: UdpSocket = socket.into();
        let local = socket.local_addr().ok().or(Some(local));
        debug!("udp transport bound at {local:?}");
        Ok(Self { socket: Some(socket), local, remote: None })
    }

    /// Unconnected socket that sends every datagram to `remote`.
    pub fn sender(remote: SocketAddr) -> Result<Self> {
        let any: SocketAddr = match remote {
            SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
            SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
        };
        let socket = Socket::new(Domain::for_address(remote), Type::DGRAM, Some(Protocol::UDP))?;
        socket.bind(&SockAddr::from(any))?;
        let socket: UdpSocket = socket.into();
        let local = socket.local_addr().ok();
        Ok(Self { socket: Some(socket), local, remote: Some(remote) })
    }

    pub fn with_remote(mut self, remote: SocketAddr) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    fn socket(&self) -> Result<&UdpSocket> {
        self.socket
            .as_ref()
            .ok_or_else(|| AffError::NotReady("socket is not created".into()))
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, data: &[u8]) -> Result<usize> {
        let remote = self
            .remote
            .ok_or_else(|| AffError::NotReady("no remote address is provided".into()))?;
        Ok(self.socket()?.send_to(data, remote)?)
    }

    fn recv(&mut self, bufsize: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; bufsize];
        match self.socket()?.recv_from(&mut buf) {
            Ok((n, _)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Err(AffError::Timeout)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!("udp transport closed ({:?})", self.local);
        }
    }
}

// ============================================================================
// In-process channel pair
// ============================================================================

pub struct ChannelTransport {
    tx: Option<Sender<Vec<u8>>>,
    rx: Receiver<Vec<u8>>,
    timeout: Duration,
}

impl ChannelTransport {
    /// Two connected endpoints: what one sends, the other receives.
    pub fn pair() -> (Self, Self) {
        Self::pair_with_timeout(DEFAULT_RECV_TIMEOUT)
    }

    pub fn pair_with_timeout(timeout: Duration) -> (Self, Self) {
        let (a_tx, b_rx) = bounded(CHANNEL_CAPACITY);
        let (b_tx, a_rx) = bounded(CHANNEL_CAPACITY);
        (
            Self { tx: Some(a_tx), rx: a_rx, timeout },
            Self { tx: Some(b_tx), rx: b_rx, timeout },
        )
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, data: &[u8]) -> Result<usize> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| AffError::NotReady("channel is closed".into()))?;
        // A full channel drops the datagram, as an unread UDP socket would.
        match tx.try_send(data.to_vec()) {
            Ok(()) | Err(TrySendError::Full(_)) => Ok(data.len()),
            Err(TrySendError::Disconnected(_)) => Err(AffError::Cancelled),
        }
    }

    fn recv(&mut self, bufsize: usize) -> Result<Vec<u8>> {
        match self.rx.recv_timeout(self.timeout) {
            Ok(mut data) => {
                data.truncate(bufsize);
                Ok(data)
            }
            Err(RecvTimeoutError::Timeout) => Err(AffError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(AffError::Cancelled),
        }
    }

    fn close(&mut self) {
        self.tx = None;
    }
}
