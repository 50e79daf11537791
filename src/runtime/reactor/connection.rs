//! Per-connection state for the reactor.
//!
//! Each accepted connection pairs a non-blocking socket with one
//! fixed-capacity echo buffer: reads append at the fill level, writes
//! drain from the front and compact. All filled bytes are by definition
//! pending echo output, so a single fill counter is the whole state
//! machine.

use crate::runtime::reactor::buffer::BufferPool;
use mio::net::TcpStream;
use slab::Slab;
use std::io::{self, Read, Write};
use std::time::Instant;

/// A single client connection owned by the reactor.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    /// Index of this connection's echo buffer in the pool.
    buf_idx: usize,
    /// Bytes in the buffer awaiting echo.
    filled: usize,
    /// Last successful read or write, for idle expiry.
    last_activity: Instant,
}

impl Connection {
    pub fn new(stream: TcpStream, buf_idx: usize) -> Self {
        Self {
            stream,
            buf_idx,
            filled: 0,
            last_activity: Instant::now(),
        }
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Read available bytes into the buffer's free tail.
    ///
    /// Returns the number of bytes read this call; `Ok(0)` means either
    /// the buffer is full (backpressure: no reads until a write drains
    /// it) or the socket has nothing more to give. A peer close shows up
    /// as `UnexpectedEof` so the caller tears the connection down.
    pub fn fill(&mut self, buffers: &mut BufferPool) -> io::Result<usize> {
        let buf = buffers.get_mut(self.buf_idx);
        let mut total = 0;

        while self.filled < buf.len() {
            match self.stream.read(&mut buf[self.filled..]) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed"));
                }
                Ok(n) => {
                    self.filled += n;
                    total += n;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if total > 0 {
            self.last_activity = Instant::now();
        }
        Ok(total)
    }

    /// Write pending bytes back to the peer and compact the buffer.
    ///
    /// Writes as much as the socket accepts, then discards the echoed
    /// prefix and shifts any remainder to the front so the tail is free
    /// for further reads. Returns the number of bytes written this call.
    pub fn flush(&mut self, buffers: &mut BufferPool) -> io::Result<usize> {
        let buf = buffers.get_mut(self.buf_idx);
        let mut written = 0;

        while written < self.filled {
            match self.stream.write(&buf[written..self.filled]) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if written > 0 {
            buf.copy_within(written..self.filled, 0);
            self.filled -= written;
            self.last_activity = Instant::now();
        }
        Ok(written)
    }

    /// Release this connection's buffer back to the pool.
    ///
    /// Buffered bytes are discarded; teardown is terminal.
    pub fn release(self, buffers: &mut BufferPool) -> TcpStream {
        buffers.free(self.buf_idx);
        self.stream
    }
}

/// Registry of live connections, keyed by poll token.
///
/// A capacity-capped slab: slot indices are the stable connection
/// identifiers handed to the multiplexer, resolved back here on each
/// ready event.
pub struct ConnectionTable {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionTable {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Insert a new connection, returning its slot id.
    ///
    /// At capacity the connection is handed back so the caller can
    /// release its buffer before dropping the socket.
    pub fn insert(&mut self, conn: Connection) -> Result<usize, Connection> {
        if self.connections.len() >= self.max_connections {
            return Err(conn);
        }
        Ok(self.connections.insert(conn))
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    pub fn remove(&mut self, id: usize) -> Option<Connection> {
        self.connections.try_remove(id)
    }

    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Iterate over (id, connection) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Connection)> {
        self.connections.iter()
    }
}
