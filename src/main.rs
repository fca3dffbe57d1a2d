use std::net::TcpListener;
use std::sync::Arc;

use redis_lite::common::{log_error, log_info};
use redis_lite::network::listener::{handle_connection, run_accept_loop, ConnectionRole};
use redis_lite::replication::handshake::{Handshaker, HandshakeConfig};
use redis_lite::server::config::Config;
use redis_lite::server::data::Server;
use redis_lite::server::metadata::ServerMetadata;

const HOST: &str = "127.0.0.1";

/// Performs the replica handshake against the configured master and then
/// keeps reading the ongoing command stream off the same connection,
/// applying each write locally exactly as `handle_connection` would for a
/// regular client.
fn run_replica(server: Arc<Server>, master_host: String, master_port: u16, listening_port: u16) {
    let handshaker = Handshaker::new(HandshakeConfig {
        master_host,
        master_port,
        replica_listening_port: listening_port,
    });
    match handshaker.perform_handshake() {
        Ok(conn) => {
            let stream = conn.try_clone().expect("cloning replication socket");
            handle_connection(stream, server, ConnectionRole::MasterLink);
        }
        Err(err) => log_error!("replication handshake failed: {err}"),
    }
}

fn main() {
    let config = Config::new();
    log_info!("parsed cli args: {config:?}");

    let listening_port = config.get_listening_port();
    let master_address = config.master_address();
    let metadata = ServerMetadata::generate(&config);
    let server = Arc::new(Server::new(metadata));

    let listener = TcpListener::bind((HOST, listening_port)).expect("failed to bind listener");
    log_info!("listening on {HOST}:{listening_port}");

    if let Some((master_host, master_port)) = master_address {
        let server = server.clone();
        std::thread::spawn(move || {
            run_replica(server, master_host, master_port, listening_port);
        });
    }

    run_accept_loop(listener, server);
}
