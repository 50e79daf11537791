//! echo-trio: one TCP echo server, three concurrency models
//!
//! The same byte-for-byte echo service implemented three ways:
//! - `threads`: one blocking OS thread per connection
//! - `reactor`: a single-threaded readiness-based event loop (the default)
//! - `tasks`: an async task per connection on a tokio runtime
//!
//! Select the implementation with `--runtime`; everything else about the
//! wire behavior is identical across the three.

use echo_trio::config::Config;
use echo_trio::runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        runtime = ?config.runtime,
        buffer_size = config.buffer_size,
        max_connections = config.max_connections,
        idle_timeout = config.idle_timeout,
        "Starting echo server"
    );

    runtime::run(config)?;
    Ok(())
}
