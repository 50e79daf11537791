//! Readiness-based reactor, the default server implementation.
//!
//! A single thread owns the listener, the multiplexer, and every
//! connection; the only blocking call is the readiness wait. See
//! [`event_loop`] for the cycle itself.

mod buffer;
mod connection;
mod event_loop;
mod readiness;

pub use event_loop::EventLoop;

use crate::config::Config;

/// Bind and run the reactor. Blocks until a fatal multiplexer error.
pub fn run(config: &Config) -> std::io::Result<()> {
    EventLoop::bind(config)?.run()
}
