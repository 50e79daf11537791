//! A minimal TCP echo server implemented in three I/O concurrency models.
//!
//! The library surface exists so the runtimes can be driven in-process
//! by integration tests; the `echo-trio` binary is the intended entry
//! point.

pub mod config;
pub mod runtime;
