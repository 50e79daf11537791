//! Reactor event loop.
//!
//! Readiness-based model: a single thread blocks in poll, then performs
//! non-blocking accept/read/write syscalls on whatever became ready.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! mio reports readiness edges rather than levels, so each ready
//! connection is driven until its socket would block: a readable event
//! fills the echo buffer and drains it, a writable event drains and
//! then resumes reads stalled on a previously-full buffer. Stopping
//! after one syscall per event, as a level-triggered selector would
//! allow, can stall a stream forever here.

use crate::config::Config;
use crate::runtime::reactor::buffer::BufferPool;
use crate::runtime::reactor::connection::{Connection, ConnectionTable};
use crate::runtime::reactor::readiness::Readiness;
use crate::runtime::{bind_listener, parse_listen_addr};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Events drained per wait.
const EVENT_BATCH: usize = 1024;

/// The bound, registered reactor, ready to run.
///
/// Owns the listener, the multiplexer, the connection table, and the
/// buffer pool; nothing else ever touches them.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    connections: ConnectionTable,
    buffers: BufferPool,
    idle_timeout: Option<Duration>,
}

impl EventLoop {
    /// Bind the listener and register it with the multiplexer.
    ///
    /// Failure here is fatal: the server must not proceed to serving.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let addr = parse_listen_addr(&config.listen)?;
        let std_listener = bind_listener(addr)?;
        let local_addr = std_listener.local_addr()?;
        let mut listener = TcpListener::from_std(std_listener);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let idle_timeout =
            (config.idle_timeout > 0).then(|| Duration::from_secs(config.idle_timeout));

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENT_BATCH),
            listener,
            local_addr,
            connections: ConnectionTable::new(config.max_connections),
            // One echo buffer per connection slot, so pool exhaustion
            // and the connection cap coincide.
            buffers: BufferPool::new(config.max_connections, config.buffer_size),
            idle_timeout,
        })
    }

    /// The address the listener actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the reactor until a fatal multiplexer error.
    ///
    /// Per-connection failures never escape this loop; only a
    /// non-transient failure of the wait itself ends it.
    pub fn run(self) -> io::Result<()> {
        let EventLoop {
            mut poll,
            mut events,
            listener,
            local_addr,
            mut connections,
            mut buffers,
            idle_timeout,
        } = self;

        info!(
            addr = %local_addr,
            pool_buffers = buffers.available(),
            buffer_size = buffers.buffer_size(),
            "Reactor listening"
        );

        loop {
            if let Err(e) = poll.poll(&mut events, idle_timeout) {
                // EINTR just means a signal landed mid-wait.
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "Readiness wait failed");
                return Err(e);
            }

            // Each batch is processed exactly once and discarded; the
            // poll re-reports readiness still applicable next cycle.
            for event in events.iter() {
                let token = event.token();
                let kinds = Readiness::classify(
                    token == LISTENER_TOKEN,
                    event.is_readable(),
                    event.is_writable(),
                );

                for kind in kinds {
                    match kind {
                        Readiness::Acceptable => {
                            accept_ready(&mut poll, &listener, &mut connections, &mut buffers);
                        }
                        Readiness::Readable => {
                            let Token(conn_id) = token;
                            // May have been torn down earlier in this batch
                            if !connections.contains(conn_id) {
                                continue;
                            }
                            if let Err(e) = handle_readable(conn_id, &mut connections, &mut buffers)
                            {
                                debug!(conn_id, error = %e, "Connection error");
                                close_connection(&mut poll, &mut connections, &mut buffers, conn_id);
                            }
                        }
                        Readiness::Writable => {
                            let Token(conn_id) = token;
                            if !connections.contains(conn_id) {
                                continue;
                            }
                            if let Err(e) = handle_writable(conn_id, &mut connections, &mut buffers)
                            {
                                debug!(conn_id, error = %e, "Connection error");
                                close_connection(&mut poll, &mut connections, &mut buffers, conn_id);
                            }
                        }
                    }
                }
            }

            if let Some(timeout) = idle_timeout {
                sweep_idle(&mut poll, &mut connections, &mut buffers, timeout);
            }
        }
    }
}

/// Drain the accept queue.
///
/// Accept failures are local to the listener event: logged, never fatal
/// to the loop. Connections beyond the cap are accepted and immediately
/// closed.
fn accept_ready(
    poll: &mut Poll,
    listener: &TcpListener,
    connections: &mut ConnectionTable,
    buffers: &mut BufferPool,
) {
    loop {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                let Some(buf_idx) = buffers.alloc() else {
                    warn!(peer = %peer_addr, "Connection limit reached, rejecting");
                    continue; // dropping the stream closes it
                };

                let conn_id = match connections.insert(Connection::new(stream, buf_idx)) {
                    Ok(id) => id,
                    Err(conn) => {
                        warn!(peer = %peer_addr, "Connection limit reached, rejecting");
                        conn.release(buffers);
                        continue;
                    }
                };

                if let Some(conn) = connections.get_mut(conn_id) {
                    // Both interests at once: a connection may be ready
                    // to read and write within the same cycle.
                    if let Err(e) = poll.registry().register(
                        conn.stream_mut(),
                        Token(conn_id),
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        warn!(conn_id, error = %e, "Failed to register connection");
                        close_connection(poll, connections, buffers, conn_id);
                        continue;
                    }
                }

                debug!(conn_id, peer = %peer_addr, active = connections.len(), "Accepted connection");
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(error = %e, "Accept error");
                break;
            }
        }
    }
}

/// Pull available bytes into the echo buffer, echoing as we go.
fn handle_readable(
    conn_id: usize,
    connections: &mut ConnectionTable,
    buffers: &mut BufferPool,
) -> io::Result<()> {
    // Already torn down earlier in this batch
    let Some(conn) = connections.get_mut(conn_id) else {
        return Ok(());
    };

    loop {
        let read = conn.fill(buffers)?;
        let wrote = conn.flush(buffers)?;
        if read == 0 && wrote == 0 {
            break;
        }
    }
    Ok(())
}

/// Drain buffered bytes, then resume reads the full buffer was blocking.
fn handle_writable(
    conn_id: usize,
    connections: &mut ConnectionTable,
    buffers: &mut BufferPool,
) -> io::Result<()> {
    let Some(conn) = connections.get_mut(conn_id) else {
        return Ok(());
    };

    loop {
        let wrote = conn.flush(buffers)?;
        let read = conn.fill(buffers)?;
        if wrote == 0 && read == 0 {
            break;
        }
    }
    Ok(())
}

/// Tear down one connection: cancel its registration, close the socket,
/// return its buffer. Strictly local; other connections are untouched.
fn close_connection(
    poll: &mut Poll,
    connections: &mut ConnectionTable,
    buffers: &mut BufferPool,
    conn_id: usize,
) {
    if let Some(mut conn) = connections.remove(conn_id) {
        let _ = poll.registry().deregister(conn.stream_mut());
        conn.release(buffers);
        debug!(conn_id, "Connection closed");
    }
}

/// Close connections whose last activity predates the idle timeout.
fn sweep_idle(
    poll: &mut Poll,
    connections: &mut ConnectionTable,
    buffers: &mut BufferPool,
    timeout: Duration,
) {
    let now = Instant::now();
    let stale: Vec<usize> = connections
        .iter()
        .filter(|(_, conn)| now.duration_since(conn.last_activity()) >= timeout)
        .map(|(id, _)| id)
        .collect();

    for conn_id in stale {
        debug!(conn_id, "Idle timeout");
        close_connection(poll, connections, buffers, conn_id);
    }
}
