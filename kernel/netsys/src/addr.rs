//! IPv4 endpoint codec.
//!
//! Converts between the stack's view of an endpoint (address octets plus a
//! host-order port) and the Linux `struct sockaddr_in` exchanged with
//! userspace by bind/connect/accept/getsockname/getpeername.

use core::fmt;

use crate::errno::{Errno, SysResult};
use crate::wait::UserBuffer;

/// AF_INET constant (IPv4)
pub const AF_INET: u16 = 2;

/// `sizeof(struct sockaddr_in)` on Linux.
pub const SOCKADDR_IN_LEN: usize = 16;

/// IPv4 address, octets in network order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ipv4Addr(pub [u8; 4]);

impl Ipv4Addr {
    /// INADDR_ANY
    pub const ANY: Ipv4Addr = Ipv4Addr([0, 0, 0, 0]);
    pub const LOCALHOST: Ipv4Addr = Ipv4Addr([127, 0, 0, 1]);

    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Ipv4Addr([a, b, c, d])
    }

    pub const fn octets(self) -> [u8; 4] {
        self.0
    }
}

impl fmt::Debug for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

/// One side of a TCP connection as the stack reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Endpoint {
    pub addr: Ipv4Addr,
    /// Port in host byte order.
    pub port: u16,
}

impl Endpoint {
    pub const fn new(addr: Ipv4Addr, port: u16) -> Self {
        Endpoint { addr, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// struct sockaddr_in (Linux x86_64 ABI compatible)
///
/// `sin_port` and `sin_addr` hold their values in network byte order, so the
/// in-memory layout is exactly the wire layout.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SockAddrIn {
    /// Address family (AF_INET = 2), native byte order
    pub sin_family: u16,
    /// Port number (network byte order)
    pub sin_port: u16,
    /// IPv4 address (network byte order)
    pub sin_addr: u32,
    /// Padding to 16 bytes (Linux ABI)
    pub sin_zero: [u8; 8],
}

impl SockAddrIn {
    pub fn from_endpoint(ep: Endpoint) -> Self {
        SockAddrIn {
            sin_family: AF_INET,
            sin_port: ep.port.to_be(),
            sin_addr: u32::from_ne_bytes(ep.addr.0),
            sin_zero: [0; 8],
        }
    }

    /// Port in host byte order.
    pub fn port(&self) -> u16 {
        u16::from_be(self.sin_port)
    }

    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr(self.sin_addr.to_ne_bytes())
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.ip(), self.port())
    }

    /// Decode a caller-supplied address.
    ///
    /// Fails with EINVAL when shorter than `sockaddr_in` and with
    /// EAFNOSUPPORT for any family other than AF_INET.
    pub fn parse(bytes: &[u8]) -> SysResult<Self> {
        if bytes.len() < SOCKADDR_IN_LEN {
            return Err(Errno::EINVAL);
        }
        let family = u16::from_ne_bytes([bytes[0], bytes[1]]);
        if family != AF_INET {
            return Err(Errno::EAFNOSUPPORT);
        }
        let mut sin_zero = [0u8; 8];
        sin_zero.copy_from_slice(&bytes[8..16]);
        Ok(SockAddrIn {
            sin_family: family,
            sin_port: u16::from_ne_bytes([bytes[2], bytes[3]]),
            sin_addr: u32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            sin_zero,
        })
    }

    pub fn to_bytes(&self) -> [u8; SOCKADDR_IN_LEN] {
        let mut out = [0u8; SOCKADDR_IN_LEN];
        out[0..2].copy_from_slice(&self.sin_family.to_ne_bytes());
        out[2..4].copy_from_slice(&self.sin_port.to_ne_bytes());
        out[4..8].copy_from_slice(&self.sin_addr.to_ne_bytes());
        out[8..16].copy_from_slice(&self.sin_zero);
        out
    }
}

/// Store an endpoint into caller memory the way the kernel fills
/// `(struct sockaddr *addr, socklen_t *addrlen)` pairs.
///
/// The address is truncated to the caller's buffer; the full length of
/// `sockaddr_in` is always reported through `addrlen`.
pub fn write_sockaddr(
    ep: Endpoint,
    addr: &mut dyn UserBuffer,
    addrlen: Option<&mut dyn UserBuffer>,
) {
    let bytes = SockAddrIn::from_endpoint(ep).to_bytes();
    addr.write(&bytes);
    if let Some(len) = addrlen {
        len.write(&(SOCKADDR_IN_LEN as u32).to_ne_bytes());
    }
}
