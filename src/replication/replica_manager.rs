use std::collections::HashMap;
use std::io::Write;
use std::net::{SocketAddr, TcpStream};

use crate::common::log_warn;

pub struct Replica {
    stream: TcpStream,
}

impl Replica {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

/// Tracks the replica connections registered after a successful PSYNC, so
/// a master can fan out write commands to all of them (spec's "propagate
/// verbatim to every connected replica" requirement). Keyed by the peer
/// address of the replica's own TCP connection, not its listening port.
#[derive(Default)]
pub struct ReplicaManager {
    replicas: HashMap<SocketAddr, Replica>,
}

impl ReplicaManager {
    pub fn new() -> Self {
        Self {
            replicas: HashMap::new(),
        }
    }

    pub fn add_replica(&mut self, replica: Replica) -> std::io::Result<()> {
        let addr = replica.stream.peer_addr()?;
        self.replicas.insert(addr, replica);
        Ok(())
    }

    pub fn remove_replica(&mut self, addr: SocketAddr) -> Option<Replica> {
        self.replicas.remove(&addr)
    }

    pub fn connected_count(&self) -> usize {
        self.replicas.len()
    }

    /// Writes `message` to every registered replica, dropping (and logging)
    /// any whose socket has gone bad rather than propagating the write
    /// failure back to the client that issued the original command.
    pub fn propagate_message_to_replicas(&mut self, message: &[u8]) {
        self.replicas.retain(|addr, replica| {
            if let Err(err) = replica.stream.write_all(message) {
                log_warn!("dropping replica {addr}, write failed: {err}");
                false
            } else {
                true
            }
        });
    }
}
