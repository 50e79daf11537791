//! Task-per-connection echo server.
//!
//! The completion-driven model: each connection is an async task whose
//! read and write completions re-arm the next operation. Sequential
//! awaits express the accept -> read -> write continuation chain; the
//! tokio scheduler plays the role of the completion dispatcher.

use crate::config::Config;
use crate::runtime::{bind_listener, parse_listen_addr};
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// The bound async server.
pub struct Server {
    listener: std::net::TcpListener,
    buffer_size: usize,
    max_connections: usize,
}

impl Server {
    /// Bind the listener. Fatal on failure; the server must not serve.
    ///
    /// Binding happens synchronously so callers learn the resolved
    /// address before the runtime spins up; the socket is handed to
    /// tokio once `run` starts.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let addr = parse_listen_addr(&config.listen)?;
        let listener = bind_listener(addr)?;

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

    /// Build a runtime and serve until a fatal error.
    pub fn run(self) -> io::Result<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.serve())
    }

    async fn serve(self) -> io::Result<()> {
        let listener = TcpListener::from_std(self.listener)?;
        let addr = listener.local_addr()?;
        info!(addr = %addr, "Task-per-connection server listening");

        let connection_limit = Arc::new(Semaphore::new(self.max_connections));
        let buffer_size = self.buffer_size;

        loop {
            // Wait for a connection slot
            let permit = connection_limit
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    debug!(peer = %peer_addr, "Accepted connection");

                    tokio::spawn(async move {
                        if let Err(e) = echo_stream(stream, buffer_size).await {
                            debug!(peer = %peer_addr, error = %e, "Connection error");
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                }
            }
        }
    }
}

/// Bind and run the async server.
pub fn run(config: &Config) -> io::Result<()> {
    Server::bind(config)?.run()
}

/// Echo loop for one connection; returns on EOF or error.
async fn echo_stream(mut stream: TcpStream, buffer_size: usize) -> io::Result<()> {
    let mut buffer = BytesMut::with_capacity(buffer_size);

    loop {
        buffer.clear();
        let n = stream.read_buf(&mut buffer).await?;
        if n == 0 {
            // EOF
            return Ok(());
        }
        stream.write_all(&buffer).await?;
    }
}
