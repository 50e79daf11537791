//! Echo server runtimes.
//!
//! Three implementations of the same wire behavior:
//! - `threads`: blocking I/O, one OS thread per connection
//! - `reactor`: non-blocking I/O multiplexed by a single-threaded
//!   readiness event loop
//! - `tasks`: async I/O, one tokio task per connection
//!
//! All share `listener` for socket construction and the connection
//! limit from [`Config`].

mod listener;
pub mod reactor;
pub mod tasks;
pub mod threads;

pub(crate) use listener::{bind_listener, parse_listen_addr};

use crate::config::{Config, RuntimeType};

/// Run the configured server implementation. Blocks until a fatal error.
pub fn run(config: Config) -> std::io::Result<()> {
    match config.runtime {
        RuntimeType::Threads => threads::run(&config),
        RuntimeType::Reactor => reactor::run(&config),
        RuntimeType::Tasks => tasks::run(&config),
    }
}
