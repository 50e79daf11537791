//! Thread-per-connection echo server.
//!
//! The oldest model of the three: a blocking accept loop hands each
//! connection to its own OS thread, which owns a blocking read/write
//! echo loop. Isolation is total (threads share nothing but the live
//! connection counter) at the cost of one thread per client.

use crate::config::Config;
use crate::runtime::{bind_listener, parse_listen_addr};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// The bound blocking server.
pub struct Server {
    listener: TcpListener,
    buffer_size: usize,
    max_connections: usize,
}

impl Server {
    /// Bind the listener. Fatal on failure; the server must not serve.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let addr = parse_listen_addr(&config.listen)?;
        let listener = bind_listener(addr)?;
        listener.set_nonblocking(false)?;

        Ok(Self {
            listener,
            buffer_size: config.buffer_size,
            max_connections: config.max_connections,
        })
    }

    /// The address the listener actually bound (resolves port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever, one worker thread per connection.
    pub fn run(self) -> io::Result<()> {
        let addr = self.local_addr()?;
        info!(addr = %addr, "Thread-per-connection server listening");

        let active = Arc::new(AtomicUsize::new(0));

        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    if active.load(Ordering::Relaxed) >= self.max_connections {
                        warn!(peer = %peer_addr, "Connection limit reached, rejecting");
                        continue; // dropping the stream closes it
                    }

                    debug!(peer = %peer_addr, "Accepted connection");
                    active.fetch_add(1, Ordering::Relaxed);

                    let active = Arc::clone(&active);
                    let buffer_size = self.buffer_size;

                    thread::Builder::new()
                        .name(format!("conn-{peer_addr}"))
                        .spawn(move || {
                            if let Err(e) = serve_client(stream, buffer_size) {
                                debug!(peer = %peer_addr, error = %e, "Connection error");
                            }
                            active.fetch_sub(1, Ordering::Relaxed);
                        })?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Transient accept failures (e.g. fd exhaustion)
                    // should not take the listener down.
                    error!(error = %e, "Accept error");
                }
            }
        }
    }
}

/// Bind and run the blocking server.
pub fn run(config: &Config) -> io::Result<()> {
    Server::bind(config)?.run()
}

/// Blocking echo loop for one client; returns on EOF or error.
fn serve_client(mut stream: TcpStream, buffer_size: usize) -> io::Result<()> {
    let mut buf = vec![0u8; buffer_size];

    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => return Ok(()), // peer closed
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        stream.write_all(&buf[..n])?;
    }
}
