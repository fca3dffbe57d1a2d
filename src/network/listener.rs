use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use crate::common::{log_error, log_info, log_warn};
use crate::parser::command::parse_message;
use crate::parser::resp::Token;
use crate::server::data::Server;
use crate::server::handler::CommandHandler;

use super::connection::{Connection, ConnectionError};

/// Distinguishes an ordinary client socket from the single outbound
/// connection a replica opens to its master. The dispatcher uses this,
/// not the node's global master/slave status, to decide whether a command
/// is due a reply: a direct client connection to a `--replicaof` node
/// still gets normal client replies, while writes arriving over the
/// master link are applied silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Client,
    MasterLink,
}

/// Services one client (or master replication stream) connection until it
/// closes or sends a frame the RESP layer cannot recover from. Protocol
/// errors write a `-ERR` reply before closing the connection; argument/arity
/// errors (`Command::Invalid`) reply with `-ERR` and keep it open, matching
/// the two-tier error model the command parser encodes.
pub fn handle_connection(stream: TcpStream, server: Arc<Server>, role: ConnectionRole) {
    let peer = stream.peer_addr();
    let mut conn = Connection::new(stream);
    let mut handler = CommandHandler::new(server.clone(), role);

    loop {
        let (command, raw) = match conn.try_parse(parse_message) {
            Ok(result) => {
                let raw = conn.get_buffer()[..result.len].to_vec();
                conn.consume(result.len);
                (result.command, raw)
            }
            Err(ConnectionError::Closed) => break,
            Err(ConnectionError::Io(err)) => {
                log_error!("read error from {peer:?}: {err}");
                break;
            }
            Err(ConnectionError::Parse(err)) => {
                log_warn!("closing connection from {peer:?} after protocol error: {err}");
                let reply = Token::SimpleError(format!("ERR {err}"));
                let _ = conn.write_message(&reply.serialize());
                break;
            }
        };

        if let Err(err) = handler.handle_command(&mut conn, &command, &raw) {
            log_warn!("closing connection from {peer:?} after write error: {err}");
            break;
        }
    }

    server.remove_replica_if_connected(peer);
}

/// Accepts connections forever, handing each off to its own thread. The
/// accept thread itself never touches shared state beyond cloning the
/// `Arc<Server>` handle.
pub fn run_accept_loop(listener: TcpListener, server: Arc<Server>) {
    for incoming in listener.incoming() {
        match incoming {
            Ok(stream) => {
                log_info!("accepted connection from {:?}", stream.peer_addr());
                let server = server.clone();
                std::thread::spawn(move || handle_connection(stream, server, ConnectionRole::Client));
            }
            Err(err) => log_error!("failed to accept incoming connection: {err}"),
        }
    }
}
