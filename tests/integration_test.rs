use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use redis_lite::network::listener::run_accept_loop;
use redis_lite::server::data::Server;
use redis_lite::server::metadata::{MasterInfo, ReplicaInfo, ServerMetadata};

/// Spins up a real server on an ephemeral port and returns a connected
/// client stream. Each test gets its own listener, so tests can run
/// concurrently without fighting over a fixed port.
fn spawn_test_server() -> TcpStream {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let metadata = ServerMetadata {
        listening_port: addr.port(),
        replica_info: ReplicaInfo::Master(MasterInfo {
            replication_id: "0123456789abcdef0123456789abcdef01234567".to_string(),
        }),
        config_store: HashMap::new(),
    };
    let server = Arc::new(Server::new(metadata));

    thread::spawn(move || run_accept_loop(listener, server));
    thread::sleep(Duration::from_millis(50));

    TcpStream::connect(addr).unwrap()
}

fn read_reply(stream: &mut TcpStream) -> String {
    let mut buf = [0u8; 1024];
    let n = stream.read(&mut buf).unwrap();
    String::from_utf8_lossy(&buf[..n]).into_owned()
}

#[test]
fn ping_replies_with_pong() {
    let mut stream = spawn_test_server();
    stream.write_all(b"*1\r\n$4\r\nPING\r\n").unwrap();
    assert_eq!(read_reply(&mut stream), "+PONG\r\n");
}

#[test]
fn echo_replies_with_the_same_bulk_string() {
    let mut stream = spawn_test_server();
    stream
        .write_all(b"*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n")
        .unwrap();
    assert_eq!(read_reply(&mut stream), "$5\r\nhello\r\n");
}

#[test]
fn set_then_get_round_trips_a_value() {
    let mut stream = spawn_test_server();
    stream
        .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
        .unwrap();
    assert_eq!(read_reply(&mut stream), "+OK\r\n");

    stream.write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").unwrap();
    assert_eq!(read_reply(&mut stream), "$3\r\nbar\r\n");
}

#[test]
fn get_on_missing_key_replies_with_null_bulk_string() {
    let mut stream = spawn_test_server();
    stream
        .write_all(b"*2\r\n$3\r\nGET\r\n$7\r\nmissing\r\n")
        .unwrap();
    assert_eq!(read_reply(&mut stream), "$-1\r\n");
}

#[test]
fn set_with_px_expires_the_key() {
    let mut stream = spawn_test_server();
    stream
        .write_all(b"*5\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\nPX\r\n$2\r\n10\r\n")
        .unwrap();
    assert_eq!(read_reply(&mut stream), "+OK\r\n");

    thread::sleep(Duration::from_millis(50));

    stream.write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n").unwrap();
    assert_eq!(read_reply(&mut stream), "$-1\r\n");
}

#[test]
fn keys_glob_returns_matching_keys() {
    let mut stream = spawn_test_server();
    stream
        .write_all(b"*3\r\n$3\r\nSET\r\n$5\r\nhello\r\n$1\r\n1\r\n")
        .unwrap();
    read_reply(&mut stream);
    stream
        .write_all(b"*3\r\n$3\r\nSET\r\n$5\r\nworld\r\n$1\r\n2\r\n")
        .unwrap();
    read_reply(&mut stream);

    stream.write_all(b"*2\r\n$4\r\nKEYS\r\n$2\r\nh*\r\n").unwrap();
    assert_eq!(read_reply(&mut stream), "*1\r\n$5\r\nhello\r\n");
}

#[test]
fn unknown_command_replies_with_err_and_keeps_connection_open() {
    let mut stream = spawn_test_server();
    stream
        .write_all(b"*1\r\n$8\r\nBOGUSCMD\r\n")
        .unwrap();
    let reply = read_reply(&mut stream);
    assert!(reply.starts_with("-ERR"));

    stream.write_all(b"*1\r\n$4\r\nPING\r\n").unwrap();
    assert_eq!(read_reply(&mut stream), "+PONG\r\n");
}

#[test]
fn malformed_frame_replies_with_err_then_closes_the_connection() {
    let mut stream = spawn_test_server();
    stream.write_all(b"!not-a-resp-type\r\n").unwrap();

    let reply = read_reply(&mut stream);
    assert!(reply.starts_with("-ERR"), "expected an error reply, got {reply:?}");

    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).unwrap();
    assert_eq!(n, 0, "server should have closed the connection after the error reply");
}

#[test]
fn psync_from_a_client_replies_with_fullresync_and_an_rdb_payload() {
    let mut stream = spawn_test_server();
    stream
        .write_all(b"*3\r\n$5\r\nPSYNC\r\n$1\r\n?\r\n$2\r\n-1\r\n")
        .unwrap();

    let mut buf = [0u8; 256];
    let n = stream.read(&mut buf).unwrap();
    let reply = String::from_utf8_lossy(&buf[..n]);
    assert!(reply.starts_with("+FULLRESYNC"));
}
