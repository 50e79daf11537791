//! End-to-end echo tests.
//!
//! Each test binds a server on an ephemeral port, runs it on a
//! background thread, and drives it with plain blocking sockets.

use echo_trio::config::{Config, RuntimeType};
use echo_trio::runtime::{reactor, tasks, threads};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

fn test_config(runtime: RuntimeType) -> Config {
    Config {
        listen: "127.0.0.1:0".to_string(),
        runtime,
        buffer_size: 100,
        max_connections: 32,
        idle_timeout: 0,
        log_level: "info".to_string(),
    }
}

/// Start the configured server on a background thread and return the
/// address it bound. The thread runs until the process exits.
fn spawn_server(config: Config) -> SocketAddr {
    match config.runtime {
        RuntimeType::Reactor => {
            let server = reactor::EventLoop::bind(&config).unwrap();
            let addr = server.local_addr();
            thread::spawn(move || {
                let _ = server.run();
            });
            addr
        }
        RuntimeType::Threads => {
            let server = threads::Server::bind(&config).unwrap();
            let addr = server.local_addr().unwrap();
            thread::spawn(move || {
                let _ = server.run();
            });
            addr
        }
        RuntimeType::Tasks => {
            let server = tasks::Server::bind(&config).unwrap();
            let addr = server.local_addr().unwrap();
            thread::spawn(move || {
                let _ = server.run();
            });
            addr
        }
    }
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    stream
}

fn assert_round_trip(addr: SocketAddr) {
    let mut stream = connect(addr);
    stream.write_all(b"ping\n").unwrap();

    let mut out = [0u8; 5];
    stream.read_exact(&mut out).unwrap();
    assert_eq!(&out, b"ping\n");
}

#[test]
fn reactor_round_trip() {
    let addr = spawn_server(test_config(RuntimeType::Reactor));
    assert_round_trip(addr);
}

#[test]
fn threads_round_trip() {
    let addr = spawn_server(test_config(RuntimeType::Threads));
    assert_round_trip(addr);
}

#[test]
fn tasks_round_trip() {
    let addr = spawn_server(test_config(RuntimeType::Tasks));
    assert_round_trip(addr);
}

#[test]
fn echo_preserves_order_across_writes() {
    let addr = spawn_server(test_config(RuntimeType::Reactor));
    let mut stream = connect(addr);

    for chunk in [&b"one "[..], b"two ", b"three"] {
        stream.write_all(chunk).unwrap();
    }

    let mut out = [0u8; 13];
    stream.read_exact(&mut out).unwrap();
    assert_eq!(&out, b"one two three");
}

/// A payload far larger than the 100-byte echo buffer streams through
/// repeated fill/drain cycles without loss or reordering.
#[test]
fn payload_larger_than_buffer_is_echoed_completely() {
    let addr = spawn_server(test_config(RuntimeType::Reactor));
    let mut stream = connect(addr);

    let payload: Vec<u8> = (0..8192u32).map(|i| (i % 251) as u8).collect();

    let mut writer = stream.try_clone().unwrap();
    let expected = payload.clone();
    let sender = thread::spawn(move || {
        writer.write_all(&payload).unwrap();
    });

    let mut out = vec![0u8; expected.len()];
    stream.read_exact(&mut out).unwrap();
    assert_eq!(out, expected);

    sender.join().unwrap();
}

#[test]
fn concurrent_clients_are_isolated() {
    let mut config = test_config(RuntimeType::Reactor);
    config.max_connections = 64;
    let addr = spawn_server(config);

    let handles: Vec<_> = (0..50u32)
        .map(|i| {
            thread::spawn(move || {
                let mut stream = connect(addr);
                let payload: Vec<u8> = (0..256u32).map(|j| (i * 31 + j) as u8).collect();

                for _ in 0..8 {
                    stream.write_all(&payload).unwrap();
                    let mut out = vec![0u8; payload.len()];
                    stream.read_exact(&mut out).unwrap();
                    assert_eq!(out, payload, "client {i} saw foreign bytes");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn abrupt_disconnect_leaves_others_serving() {
    let addr = spawn_server(test_config(RuntimeType::Reactor));

    let mut survivor = connect(addr);
    survivor.write_all(b"before").unwrap();
    let mut out = [0u8; 6];
    survivor.read_exact(&mut out).unwrap();
    assert_eq!(&out, b"before");

    // Vanish mid-stream without reading the echo back.
    let mut doomed = connect(addr);
    doomed.write_all(b"half a message").unwrap();
    drop(doomed);

    // The survivor is unaffected.
    survivor.write_all(b"after").unwrap();
    let mut out = [0u8; 5];
    survivor.read_exact(&mut out).unwrap();
    assert_eq!(&out, b"after");
}

#[test]
fn close_without_sending_is_silent() {
    let addr = spawn_server(test_config(RuntimeType::Reactor));

    let quiet = connect(addr);
    drop(quiet);

    // Teardown of the silent client does not disturb the next one.
    assert_round_trip(addr);
}

#[test]
fn connections_over_limit_are_rejected() {
    let mut config = test_config(RuntimeType::Reactor);
    config.max_connections = 2;
    let addr = spawn_server(config);

    let mut first = connect(addr);
    let mut second = connect(addr);
    for stream in [&mut first, &mut second] {
        stream.write_all(b"hi").unwrap();
        let mut out = [0u8; 2];
        stream.read_exact(&mut out).unwrap();
    }

    // The third connection is accepted and immediately closed.
    let mut rejected = connect(addr);
    let mut buf = [0u8; 1];
    match rejected.read(&mut buf) {
        Ok(0) => {}  // clean close
        Err(_) => {} // reset
        Ok(n) => panic!("rejected connection received {n} bytes"),
    }

    // Established clients keep their slots.
    first.write_all(b"still here").unwrap();
    let mut out = [0u8; 10];
    first.read_exact(&mut out).unwrap();
    assert_eq!(&out, b"still here");
}

#[test]
fn idle_connections_are_closed() {
    let mut config = test_config(RuntimeType::Reactor);
    config.idle_timeout = 1;
    let addr = spawn_server(config);

    let mut stream = connect(addr);
    stream.write_all(b"ping\n").unwrap();
    let mut out = [0u8; 5];
    stream.read_exact(&mut out).unwrap();

    // Stay silent past the timeout; the sweep closes us.
    thread::sleep(Duration::from_millis(2500));

    let mut buf = [0u8; 1];
    match stream.read(&mut buf) {
        Ok(0) => {}  // server closed its side
        Err(_) => {} // reset
        Ok(n) => panic!("idle connection received {n} bytes"),
    }
}

#[test]
fn threads_variant_streams_large_payloads() {
    let addr = spawn_server(test_config(RuntimeType::Threads));
    let mut stream = connect(addr);

    let payload: Vec<u8> = (0..4096u32).map(|i| (i % 241) as u8).collect();

    let mut writer = stream.try_clone().unwrap();
    let expected = payload.clone();
    let sender = thread::spawn(move || {
        writer.write_all(&payload).unwrap();
    });

    let mut out = vec![0u8; expected.len()];
    stream.read_exact(&mut out).unwrap();
    assert_eq!(out, expected);

    sender.join().unwrap();
}

#[test]
fn tasks_variant_streams_large_payloads() {
    let addr = spawn_server(test_config(RuntimeType::Tasks));
    let mut stream = connect(addr);

    let payload: Vec<u8> = (0..4096u32).map(|i| (i % 239) as u8).collect();

    let mut writer = stream.try_clone().unwrap();
    let expected = payload.clone();
    let sender = thread::spawn(move || {
        writer.write_all(&payload).unwrap();
    });

    let mut out = vec![0u8; expected.len()];
    stream.read_exact(&mut out).unwrap();
    assert_eq!(out, expected);

    sender.join().unwrap();
}
