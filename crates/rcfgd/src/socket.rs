// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Listening and accepted network endpoints.
//!
//! A [`Socket`] wraps one OS descriptor plus the metadata the engine needs:
//! address family, socket kind, the protocol tag inherited by accepted
//! connections, and cleanup flags. Sockets are exclusively owned; they move
//! from the listening set into a queue slot and from there into a worker,
//! never aliased. Dropping a socket closes the descriptor and unlinks the
//! path for filesystem unix listeners.
//!
//! Address forms by domain:
//! - `local`: filesystem path, or `@name` for the abstract namespace
//! - `inet` / `inet6`: `ip:port`; a multicast group address on a datagram
//!   socket binds the port and joins the group
//! - `netlink`: kernel uevent group bitmask (usually `1`)

use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::path::Path;
use std::time::Duration;

use socket2::{Domain, SockAddr, Type};

use crate::config;
use crate::proto::ProtocolTag;

// ===== Errors =====

/// Errors from socket setup and accept.
#[derive(Debug)]
pub enum SocketError {
    Io(io::Error),
    /// Address string did not parse or does not fit the domain.
    Addr(String),
    /// Domain/kind/protocol combination is not supported.
    Unsupported(String),
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketError::Io(e) => write!(f, "socket I/O error: {}", e),
            SocketError::Addr(s) => write!(f, "bad socket address: {}", s),
            SocketError::Unsupported(s) => write!(f, "unsupported socket config: {}", s),
        }
    }
}

impl std::error::Error for SocketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SocketError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SocketError {
    fn from(e: io::Error) -> Self {
        SocketError::Io(e)
    }
}

// ===== Spec =====

/// Address family of a configured endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockDomain {
    Local,
    Inet,
    Inet6,
    Netlink,
}

impl SockDomain {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "unix" => Some(SockDomain::Local),
            "inet" | "inet4" | "ipv4" => Some(SockDomain::Inet),
            "inet6" | "ipv6" => Some(SockDomain::Inet6),
            "netlink" => Some(SockDomain::Netlink),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SockDomain::Local => "local",
            SockDomain::Inet => "inet",
            SockDomain::Inet6 => "inet6",
            SockDomain::Netlink => "netlink",
        }
    }
}

/// Socket kind of a configured endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockKind {
    Stream,
    Dgram,
    Raw,
}

impl SockKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stream" => Some(SockKind::Stream),
            "dgram" | "datagram" => Some(SockKind::Dgram),
            "raw" => Some(SockKind::Raw),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SockKind::Stream => "stream",
            SockKind::Dgram => "dgram",
            SockKind::Raw => "raw",
        }
    }
}

/// Everything needed to (re)create one listening socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketSpec {
    pub domain: SockDomain,
    pub kind: SockKind,
    pub tag: ProtocolTag,
    pub address: String,
}

impl SocketSpec {
    pub fn new(domain: SockDomain, kind: SockKind, tag: ProtocolTag, address: &str) -> Self {
        Self {
            domain,
            kind,
            tag,
            address: address.to_string(),
        }
    }

    /// Parse one configured socket row. Unknown domains, kinds or protocol
    /// names reject the row.
    pub fn parse(
        domain: &str,
        kind: &str,
        protocol: &str,
        address: &str,
    ) -> Result<Self, SocketError> {
        let domain = SockDomain::parse(domain)
            .ok_or_else(|| SocketError::Unsupported(format!("domain '{}'", domain)))?;
        let kind = SockKind::parse(kind)
            .ok_or_else(|| SocketError::Unsupported(format!("type '{}'", kind)))?;
        let tag = ProtocolTag::parse(protocol);
        if !tag.is_known() {
            return Err(SocketError::Unsupported(format!("protocol '{}'", protocol)));
        }
        if address.trim().is_empty() {
            return Err(SocketError::Addr("empty address".to_string()));
        }
        Ok(Self::new(domain, kind, tag, address.trim()))
    }
}

impl fmt::Display for SocketSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{} {}",
            self.domain.as_str(),
            self.kind.as_str(),
            self.tag.as_str(),
            self.address
        )
    }
}

// ===== Socket =====

/// One listening or accepted endpoint. Not `Clone`: ownership moves between
/// the listening set, a queue slot and a worker.
#[derive(Debug)]
pub struct Socket {
    inner: socket2::Socket,
    domain: SockDomain,
    kind: SockKind,
    tag: ProtocolTag,
    address: String,
    needs_unlink: bool,
}

impl Socket {
    /// Create a listening socket from its spec: bind, listen for stream
    /// kinds, join multicast groups for datagram group addresses, and mark
    /// the descriptor close-on-exec.
    pub fn listen(spec: &SocketSpec) -> Result<Socket, SocketError> {
        match spec.domain {
            SockDomain::Local => Self::listen_local(spec),
            SockDomain::Inet | SockDomain::Inet6 => Self::listen_inet(spec),
            SockDomain::Netlink => Self::listen_netlink(spec),
        }
    }

    fn listen_local(spec: &SocketSpec) -> Result<Socket, SocketError> {
        let ty = match spec.kind {
            SockKind::Stream => Type::STREAM,
            SockKind::Dgram => Type::DGRAM,
            SockKind::Raw => {
                return Err(SocketError::Unsupported(
                    "raw sockets are netlink-only".to_string(),
                ))
            }
        };
        let sock = socket2::Socket::new(Domain::UNIX, ty, None)?;
        set_cloexec(sock.as_raw_fd())?;

        let needs_unlink;
        let addr = if let Some(name) = spec.address.strip_prefix('@') {
            needs_unlink = false;
            abstract_addr(name)?
        } else {
            let path = Path::new(&spec.address);
            if let Some(dir) = path.parent() {
                if !dir.as_os_str().is_empty() {
                    let _ = fs::create_dir_all(dir);
                }
            }
            // Stale path from an unclean shutdown would fail the bind.
            if path.exists() {
                let _ = fs::remove_file(path);
            }
            needs_unlink = true;
            SockAddr::unix(path)?
        };
        sock.bind(&addr)?;
        if spec.kind == SockKind::Stream {
            sock.listen(config::ACCEPT_BACKLOG)?;
            sock.set_nonblocking(true)?;
        }
        Ok(Socket {
            inner: sock,
            domain: spec.domain,
            kind: spec.kind,
            tag: spec.tag,
            address: spec.address.clone(),
            needs_unlink,
        })
    }

    fn listen_inet(spec: &SocketSpec) -> Result<Socket, SocketError> {
        let sockaddr: SocketAddr = spec
            .address
            .parse()
            .map_err(|_| SocketError::Addr(spec.address.clone()))?;
        if (spec.domain == SockDomain::Inet) != sockaddr.is_ipv4() {
            return Err(SocketError::Addr(format!(
                "{} does not match domain {}",
                spec.address,
                spec.domain.as_str()
            )));
        }
        let domain = if sockaddr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let ty = match spec.kind {
            SockKind::Stream => Type::STREAM,
            SockKind::Dgram => Type::DGRAM,
            SockKind::Raw => {
                return Err(SocketError::Unsupported(
                    "raw sockets are netlink-only".to_string(),
                ))
            }
        };
        let sock = socket2::Socket::new(domain, ty, None)?;
        set_cloexec(sock.as_raw_fd())?;
        sock.set_reuse_address(true)?;

        match (spec.kind, sockaddr) {
            (SockKind::Stream, _) => {
                sock.bind(&sockaddr.into())?;
                sock.listen(config::ACCEPT_BACKLOG)?;
                sock.set_nonblocking(true)?;
            }
            (SockKind::Dgram, SocketAddr::V4(a)) if a.ip().is_multicast() => {
                let any = SocketAddr::from((Ipv4Addr::UNSPECIFIED, a.port()));
                sock.bind(&any.into())?;
                sock.join_multicast_v4(a.ip(), &Ipv4Addr::UNSPECIFIED)?;
            }
            (SockKind::Dgram, SocketAddr::V6(a)) if a.ip().is_multicast() => {
                let any = SocketAddr::from((Ipv6Addr::UNSPECIFIED, a.port()));
                sock.bind(&any.into())?;
                sock.join_multicast_v6(a.ip(), 0)?;
            }
            (SockKind::Dgram, _) => {
                sock.bind(&sockaddr.into())?;
            }
            (SockKind::Raw, _) => unreachable!(),
        }
        Ok(Socket {
            inner: sock,
            domain: spec.domain,
            kind: spec.kind,
            tag: spec.tag,
            address: spec.address.clone(),
            needs_unlink: false,
        })
    }

    fn listen_netlink(spec: &SocketSpec) -> Result<Socket, SocketError> {
        let groups: u32 = if spec.address.is_empty() {
            1
        } else {
            spec.address
                .parse()
                .map_err(|_| SocketError::Addr(format!("netlink groups '{}'", spec.address)))?
        };
        let ty = match spec.kind {
            SockKind::Raw => libc::SOCK_RAW,
            _ => libc::SOCK_DGRAM,
        };
        // SAFETY: socket(2) with constant, valid arguments.
        let fd = unsafe { libc::socket(libc::PF_NETLINK, ty, libc::NETLINK_KOBJECT_UEVENT) };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: fd was just created above and is exclusively owned here.
        let sock = unsafe { socket2::Socket::from_raw_fd(fd) };
        set_cloexec(fd)?;

        // SAFETY: sockaddr_nl is plain old data; zeroed is a valid initial state.
        let mut nl: libc::sockaddr_nl = unsafe { mem::zeroed() };
        nl.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        nl.nl_pid = 0; // kernel assigns a unique port id
        nl.nl_groups = groups;
        // SAFETY: nl is fully initialized and the length matches its type.
        let rc = unsafe {
            libc::bind(
                fd,
                &nl as *const libc::sockaddr_nl as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(Socket {
            inner: sock,
            domain: spec.domain,
            kind: spec.kind,
            tag: spec.tag,
            address: spec.address.clone(),
            needs_unlink: false,
        })
    }

    /// Take one connection off a ready listener.
    ///
    /// Stream listeners accept(2); datagram and netlink listeners hand over
    /// a duplicate of themselves, and the worker receives the pending
    /// datagram directly. Accepted sockets inherit the listener's protocol
    /// tag and get bounded read/write timeouts.
    pub fn accept(&self) -> Result<Socket, SocketError> {
        match self.kind {
            SockKind::Stream => {
                let (conn, peer) = self.inner.accept()?;
                set_cloexec(conn.as_raw_fd())?;
                let _ = conn.set_read_timeout(Some(config::CONN_READ_TIMEOUT));
                let _ = conn.set_write_timeout(Some(config::CONN_READ_TIMEOUT));
                Ok(Socket {
                    inner: conn,
                    domain: self.domain,
                    kind: self.kind,
                    tag: self.tag,
                    address: describe_peer(&peer),
                    needs_unlink: false,
                })
            }
            SockKind::Dgram | SockKind::Raw => {
                let dup = self.inner.try_clone()?;
                let _ = dup.set_read_timeout(Some(config::CONN_READ_TIMEOUT));
                Ok(Socket {
                    inner: dup,
                    domain: self.domain,
                    kind: self.kind,
                    tag: self.tag,
                    address: self.address.clone(),
                    needs_unlink: false,
                })
            }
        }
    }

    pub fn tag(&self) -> ProtocolTag {
        self.tag
    }

    pub fn domain(&self) -> SockDomain {
        self.domain
    }

    pub fn kind(&self) -> SockKind {
        self.kind
    }

    /// Address spec for listeners, peer description for accepted sockets.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Spec that recreates this listener (used to re-arm after accept
    /// failures).
    pub fn respec(&self) -> SocketSpec {
        SocketSpec::new(self.domain, self.kind, self.tag, &self.address)
    }

    pub fn local_addr(&self) -> io::Result<SockAddr> {
        self.inner.local_addr()
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.inner.set_read_timeout(timeout)
    }

    /// Receive one datagram along with the peer address.
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SockAddr)> {
        // SAFETY: u8 and MaybeUninit<u8> have identical layout and recv_from
        // only writes into the buffer.
        let uninit =
            unsafe { &mut *(buf as *mut [u8] as *mut [mem::MaybeUninit<u8>]) };
        self.inner.recv_from(uninit)
    }

    /// Send one datagram to `addr`.
    pub fn send_to(&self, buf: &[u8], addr: &SockAddr) -> io::Result<usize> {
        self.inner.send_to(buf, addr)
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.inner).read(buf)
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&self.inner).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&self.inner).flush()
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if self.needs_unlink {
            let _ = fs::remove_file(&self.address);
        }
    }
}

impl fmt::Display for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{} {}",
            self.domain.as_str(),
            self.kind.as_str(),
            self.tag.as_str(),
            self.address
        )
    }
}

#[cfg(test)]
impl Socket {
    /// Bare unbound socket for queue and dispatch tests.
    pub(crate) fn test_new(tag: ProtocolTag, label: &str) -> Socket {
        let inner =
            socket2::Socket::new(Domain::UNIX, Type::DGRAM, None).expect("test socket");
        Socket {
            inner,
            domain: SockDomain::Local,
            kind: SockKind::Dgram,
            tag,
            address: label.to_string(),
            needs_unlink: false,
        }
    }

    /// Connected stream pair for handler tests: the left end is a tagged
    /// accepted-connection `Socket`, the right end plays the peer.
    pub(crate) fn test_pair(tag: ProtocolTag) -> (Socket, socket2::Socket) {
        let (ours, peer) =
            socket2::Socket::pair(Domain::UNIX, Type::STREAM, None).expect("socketpair");
        let timeout = Some(Duration::from_millis(200));
        ours.set_read_timeout(timeout).expect("read timeout");
        peer.set_read_timeout(timeout).expect("peer timeout");
        let sock = Socket {
            inner: ours,
            domain: SockDomain::Local,
            kind: SockKind::Stream,
            tag,
            address: "test-pair".to_string(),
            needs_unlink: false,
        };
        (sock, peer)
    }
}

fn describe_peer(peer: &SockAddr) -> String {
    if let Some(sa) = peer.as_socket() {
        return sa.to_string();
    }
    #[cfg(unix)]
    if let Some(path) = peer.as_pathname() {
        return path.display().to_string();
    }
    "peer".to_string()
}

fn abstract_addr(name: &str) -> Result<SockAddr, SocketError> {
    let bytes = name.as_bytes();
    // SAFETY: sockaddr_storage is plain old data; zeroed is a valid state.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    // SAFETY: sockaddr_un fits inside sockaddr_storage by definition.
    let un = unsafe { &mut *(&mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr_un) };
    if bytes.len() + 1 > un.sun_path.len() {
        return Err(SocketError::Addr(format!("abstract name too long: @{}", name)));
    }
    un.sun_family = libc::AF_UNIX as libc::sa_family_t;
    // Abstract names start with a NUL byte in sun_path.
    for (i, b) in bytes.iter().enumerate() {
        un.sun_path[i + 1] = *b as libc::c_char;
    }
    let len = (mem::size_of::<libc::sa_family_t>() + 1 + bytes.len()) as libc::socklen_t;
    // SAFETY: storage holds a valid abstract-namespace sockaddr_un of length len.
    Ok(unsafe { SockAddr::new(storage, len) })
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl F_GETFD/F_SETFD on a descriptor we own.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above; adds FD_CLOEXEC to the existing flags.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::thread;

    #[test]
    fn test_spec_parse() {
        let spec = SocketSpec::parse("local", "stream", "http", "/tmp/x.sock").unwrap();
        assert_eq!(spec.domain, SockDomain::Local);
        assert_eq!(spec.kind, SockKind::Stream);
        assert_eq!(spec.tag, ProtocolTag::Http);

        assert!(SocketSpec::parse("carrier-pigeon", "stream", "http", "a").is_err());
        assert!(SocketSpec::parse("inet", "seqpacket", "http", "a").is_err());
        assert!(SocketSpec::parse("inet", "stream", "gopher", "a").is_err());
        assert!(SocketSpec::parse("inet", "stream", "http", "  ").is_err());
    }

    #[test]
    fn test_local_stream_listen_and_accept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("l.sock");
        let spec = SocketSpec::new(
            SockDomain::Local,
            SockKind::Stream,
            ProtocolTag::Ctrl,
            path.to_str().unwrap(),
        );
        let listener = Socket::listen(&spec).unwrap();
        assert!(path.exists());

        let mut client = std::os::unix::net::UnixStream::connect(&path).unwrap();
        client.write_all(b"x").unwrap();

        // Nonblocking listener: the connection may still be in flight.
        let mut accepted = None;
        for _ in 0..100 {
            match listener.accept() {
                Ok(s) => {
                    accepted = Some(s);
                    break;
                }
                Err(SocketError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => panic!("accept failed: {}", e),
            }
        }
        let accepted = accepted.expect("no connection accepted");
        assert_eq!(accepted.tag(), ProtocolTag::Ctrl);
        assert_eq!(accepted.kind(), SockKind::Stream);
    }

    #[test]
    fn test_unlink_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.sock");
        let spec = SocketSpec::new(
            SockDomain::Local,
            SockKind::Stream,
            ProtocolTag::Ctrl,
            path.to_str().unwrap(),
        );
        let listener = Socket::listen(&spec).unwrap();
        assert!(path.exists());
        drop(listener);
        assert!(!path.exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_abstract_listen() {
        let name = format!("@rcfgd-test-{}", std::process::id());
        let spec = SocketSpec::new(SockDomain::Local, SockKind::Stream, ProtocolTag::Ctrl, &name);
        let listener = Socket::listen(&spec).unwrap();
        assert_eq!(listener.address(), name);
        // No filesystem artifact for abstract names.
        assert!(!Path::new(&name).exists());
    }

    #[test]
    fn test_inet_stream_ephemeral_bind() {
        let spec = SocketSpec::new(
            SockDomain::Inet,
            SockKind::Stream,
            ProtocolTag::Http,
            "127.0.0.1:0",
        );
        let listener = Socket::listen(&spec).unwrap();
        let local = listener.local_addr().unwrap().as_socket().unwrap();
        assert!(local.port() != 0);
    }

    #[test]
    fn test_dgram_accept_hands_over_datagram() {
        let spec = SocketSpec::new(
            SockDomain::Inet,
            SockKind::Dgram,
            ProtocolTag::Discovery,
            "127.0.0.1:0",
        );
        let listener = Socket::listen(&spec).unwrap();
        let local = listener.local_addr().unwrap().as_socket().unwrap();

        let client = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        client.send_to(b"probe", local).unwrap();

        let conn = listener.accept().unwrap();
        assert_eq!(conn.tag(), ProtocolTag::Discovery);
        let mut buf = [0u8; 64];
        let (n, peer) = conn.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"probe");
        assert!(peer.as_socket().is_some());
    }
}
