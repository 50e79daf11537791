//! Shared TCP listener construction.

use std::io;
use std::net::SocketAddr;

/// Accept backlog for all server variants.
const BACKLOG: i32 = 1024;

/// Parse a `host:port` listen string into a socket address.
pub(crate) fn parse_listen_addr(listen: &str) -> io::Result<SocketAddr> {
    listen
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// Create a non-blocking TCP listener with SO_REUSEADDR set.
///
/// Built through socket2 so the backlog and socket options are explicit.
/// Callers that want blocking accepts (the threads variant) flip the
/// socket back with `set_nonblocking(false)`.
pub(crate) fn bind_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}
