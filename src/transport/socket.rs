//! Datagram socket lifecycle.
//!
//! Owns the UDP socket for one connection: server bind with port-range
//! search and wildcard fallback, client socket creation, the replacement
//! socket for a client port hop, and the per-socket IP options (DSCP/ECN
//! marking, path-MTU discovery off, TOS ancillary delivery on receive).
//!
//! `std::net` covers creation, bind, and send; receive goes through a raw
//! `recvmsg` so the sender address, kernel truncation flag, and received
//! TOS byte all come back from a single syscall.

use std::io;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use tracing::{debug, warn};

use crate::core::constants::{PORT_RANGE_HIGH, PORT_RANGE_LOW, RECEIVE_MTU};
use crate::core::error::NetError;

/// TOS byte stamped on every outbound datagram: DSCP AF42 plus the ECT(0)
/// ECN codepoint.
pub const DSCP_AF42_ECT0: u8 = 0x92;

/// Congestion Experienced: both ECN bits set in the TOS byte.
const ECN_CE: u8 = 0x03;

/// Ancillary buffer for `recvmsg`; one TOS cmsg needs far less.
const CONTROL_BUFFER_SIZE: usize = 64;

/// Facts about one received datagram.
#[derive(Debug, Clone, Copy)]
pub struct RecvMeta {
    /// Payload length in the receive buffer.
    pub len: usize,
    /// Sender address as reported by the kernel.
    pub from: SocketAddr,
    /// The datagram arrived carrying the CE codepoint.
    pub congestion_experienced: bool,
}

/// A configured UDP socket plus its receive buffer.
pub struct DatagramSocket {
    inner: UdpSocket,
    recv_buffer: Vec<u8>,
}

impl DatagramSocket {
    /// Bind a server socket.
    ///
    /// A desired port is honored exactly (0 means no preference); otherwise
    /// ports are searched from [`PORT_RANGE_LOW`] to [`PORT_RANGE_HIGH`]
    /// inclusive. If the desired address cannot be bound at all, the
    /// wildcard address is tried once before giving up.
    pub fn bind_server(
        desired_addr: Option<&str>,
        desired_port: Option<u16>,
    ) -> Result<Self, NetError> {
        if let Some(node) = desired_addr {
            match Self::bind_range(Some(node), desired_port) {
                Ok(socket) => return Ok(socket),
                Err(err) => {
                    warn!(addr = node, %err, "could not bind desired address, trying wildcard");
                }
            }
        }
        Self::bind_range(None, desired_port)
    }

    fn bind_range(node: Option<&str>, desired_port: Option<u16>) -> Result<Self, NetError> {
        let (low, high) = match desired_port {
            Some(port) if port != 0 => (port, port),
            _ => (PORT_RANGE_LOW, PORT_RANGE_HIGH),
        };

        let mut last_err: Option<io::Error> = None;
        for port in low..=high {
            for addr in resolve(node, port)? {
                match UdpSocket::bind(addr) {
                    Ok(socket) => return Ok(Self::from_socket(socket)),
                    Err(err) => {
                        debug!(%addr, %err, "could not bind candidate address");
                        last_err = Some(err);
                    }
                }
            }
        }

        Err(NetError::BindExhausted {
            low,
            high,
            source: last_err
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no candidates")),
        })
    }

    /// Client socket: an ephemeral local port in the remote's address family.
    pub fn for_remote(remote: &SocketAddr) -> Result<Self, NetError> {
        let local = SocketAddr::new(wildcard_of(remote), 0);
        let socket = UdpSocket::bind(local)?;
        Ok(Self::from_socket(socket))
    }

    /// Replacement socket for a client port hop: a wildcard bind in the
    /// remote's family, searched over the same port range as the server.
    pub fn rebind_in_range(remote: &SocketAddr) -> Result<Self, NetError> {
        let ip = wildcard_of(remote);
        let mut last_err: Option<io::Error> = None;
        for port in PORT_RANGE_LOW..=PORT_RANGE_HIGH {
            match UdpSocket::bind(SocketAddr::new(ip, port)) {
                Ok(socket) => return Ok(Self::from_socket(socket)),
                Err(err) => last_err = Some(err),
            }
        }
        Err(NetError::BindExhausted {
            low: PORT_RANGE_LOW,
            high: PORT_RANGE_HIGH,
            source: last_err
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no candidates")),
        })
    }

    fn from_socket(socket: UdpSocket) -> Self {
        configure(&socket);
        Self {
            inner: socket,
            recv_buffer: vec![0u8; RECEIVE_MTU],
        }
    }

    /// Send one datagram to an explicit destination.
    ///
    /// The socket is never connected; explicit destinations are what make
    /// roaming and port hopping work.
    pub fn send_to(&self, datagram: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.inner.send_to(datagram, addr)
    }

    /// Block for one datagram, capturing sender address, truncation, and the
    /// received TOS byte.
    ///
    /// The payload stays in the internal buffer; read it with
    /// [`Self::datagram`] using the returned length.
    pub fn recv_meta(&mut self) -> Result<RecvMeta, NetError> {
        let fd = self.inner.as_raw_fd();

        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut control = [0u8; CONTROL_BUFFER_SIZE];
        let mut iov = libc::iovec {
            iov_base: self.recv_buffer.as_mut_ptr() as *mut libc::c_void,
            iov_len: self.recv_buffer.len(),
        };

        let mut header: libc::msghdr = unsafe { mem::zeroed() };
        header.msg_name = &mut storage as *mut libc::sockaddr_storage as *mut libc::c_void;
        header.msg_namelen = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        header.msg_iov = &mut iov;
        header.msg_iovlen = 1;
        header.msg_control = control.as_mut_ptr() as *mut libc::c_void;
        header.msg_controllen = control.len() as _;

        // Safety: every pointer in `header` references a live local buffer
        // for the duration of the call.
        let received = unsafe { libc::recvmsg(fd, &mut header, 0) };
        if received < 0 {
            return Err(NetError::Socket(io::Error::last_os_error()));
        }
        if header.msg_flags & libc::MSG_TRUNC != 0 {
            return Err(NetError::Oversize);
        }

        let congestion_experienced =
            received_tos(&header).is_some_and(|tos| tos & ECN_CE == ECN_CE);
        let from = decode_sockaddr(&storage)?;

        Ok(RecvMeta {
            len: received as usize,
            from,
            congestion_experienced,
        })
    }

    /// Payload of the last received datagram.
    pub fn datagram(&self, len: usize) -> &[u8] {
        &self.recv_buffer[..len]
    }

    /// Local address this socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Bound the blocking receive (SO_RCVTIMEO). `None` blocks forever.
    pub fn set_recv_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.inner.set_read_timeout(timeout)
    }
}

impl AsRawFd for DatagramSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

/// Wildcard address in the same family as `addr`.
fn wildcard_of(addr: &SocketAddr) -> IpAddr {
    match addr {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

/// Resolve `(node, port)` to bind or connect candidates, in resolver order.
///
/// `None` stands for the wildcard address, IPv4 first.
fn resolve(node: Option<&str>, port: u16) -> Result<Vec<SocketAddr>, NetError> {
    match node {
        Some(host) => {
            let addrs: Vec<SocketAddr> = (host, port)
                .to_socket_addrs()
                .map_err(|source| NetError::Resolve {
                    host: host.to_string(),
                    source,
                })?
                .collect();
            if addrs.is_empty() {
                return Err(NetError::NoAddress {
                    host: host.to_string(),
                });
            }
            Ok(addrs)
        }
        None => Ok(vec![
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
        ]),
    }
}

/// Resolve a remote endpoint, returning the first usable address.
pub(crate) fn resolve_first(host: &str, port: u16) -> Result<SocketAddr, NetError> {
    let candidates = resolve(Some(host), port)?;
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| NetError::NoAddress {
            host: host.to_string(),
        })
}

/// Apply the per-socket IP options. All are best-effort: a platform that
/// lacks one proceeds without it.
fn configure(socket: &UdpSocket) {
    let fd = socket.as_raw_fd();

    // Let datagrams fragment rather than be dropped on narrow paths.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    if let Err(err) = set_ip_option(fd, libc::IP_MTU_DISCOVER, libc::IP_PMTUDISC_DONT) {
        debug!(%err, "could not disable path-MTU discovery");
    }

    if let Err(err) = set_ip_option(fd, libc::IP_TOS, libc::c_int::from(DSCP_AF42_ECT0)) {
        debug!(%err, "could not set DSCP/ECN marking");
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    if let Err(err) = set_ip_option(fd, libc::IP_RECVTOS, 1) {
        warn!(%err, "could not request TOS ancillary data");
    }
}

fn set_ip_option(fd: RawFd, option: libc::c_int, value: libc::c_int) -> io::Result<()> {
    // Safety: fd is a valid open socket; `value` outlives the call.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IP,
            option,
            &value as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Walk the control messages of a `recvmsg` result for the IP_TOS byte.
fn received_tos(header: &libc::msghdr) -> Option<u8> {
    // Safety: the CMSG_* macros only walk the control buffer that recvmsg
    // just filled in, bounded by msg_controllen.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(header);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::IPPROTO_IP && (*cmsg).cmsg_type == libc::IP_TOS {
                return Some(*libc::CMSG_DATA(cmsg));
            }
            cmsg = libc::CMSG_NXTHDR(header, cmsg);
        }
    }
    None
}

/// Convert a kernel sockaddr into a `SocketAddr`.
///
/// The family list is closed: anything but INET/INET6 coming back from a
/// UDP socket is a bug, not a runtime condition.
fn decode_sockaddr(storage: &libc::sockaddr_storage) -> Result<SocketAddr, NetError> {
    match i32::from(storage.ss_family) {
        libc::AF_INET => {
            // Safety: the family tag says this storage holds a sockaddr_in.
            let sin =
                unsafe { &*(storage as *const libc::sockaddr_storage as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            Ok(SocketAddr::new(IpAddr::V4(ip), u16::from_be(sin.sin_port)))
        }
        libc::AF_INET6 => {
            // Safety: the family tag says this storage holds a sockaddr_in6.
            let sin6 = unsafe {
                &*(storage as *const libc::sockaddr_storage as *const libc::sockaddr_in6)
            };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Ok(SocketAddr::new(
                IpAddr::V6(ip),
                u16::from_be(sin6.sin6_port),
            ))
        }
        other => Err(NetError::UnknownAddressFamily(other)),
    }
}
