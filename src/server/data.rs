use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::common::{log_info, log_warn};
use crate::replication::replica_manager::{Replica, ReplicaManager};
use crate::storage::keyspace::Keyspace;
use crate::storage::rdb;

use super::metadata::{ReplicaInfo, ServerMetadata};

pub struct MasterLiveData {
    pub replication_offset: usize,
    pub replica_manager: ReplicaManager,
}

pub struct SlaveLiveData {
    pub offset: usize,
    pub heartbeat_recv_time: Option<Instant>,
}

pub enum LiveData {
    Master(MasterLiveData),
    Slave(SlaveLiveData),
}

impl LiveData {
    fn new(info: &ReplicaInfo) -> LiveData {
        match info {
            ReplicaInfo::Master(..) => LiveData::Master(MasterLiveData {
                replication_offset: 0,
                replica_manager: ReplicaManager::new(),
            }),
            ReplicaInfo::Slave(..) => LiveData::Slave(SlaveLiveData {
                offset: 0,
                heartbeat_recv_time: None,
            }),
        }
    }
}

/// All server state shared across connection threads. `keyspace` is
/// internally synchronized (see `storage::keyspace::Keyspace`) so only the
/// replication bookkeeping needs its own mutex here.
pub struct Server {
    pub metadata: ServerMetadata,
    pub keyspace: Keyspace,
    pub live_data: Mutex<LiveData>,
    /// Backs `CONFIG GET`: seeded at startup from the static config store
    /// plus the node's own role/replid/replicaof, and grown at runtime by
    /// `REPLCONF`, which records each option a connecting replica reports
    /// under `replica_<name>`.
    config_store: Mutex<HashMap<String, String>>,
}

impl Server {
    pub fn new(metadata: ServerMetadata) -> Server {
        let keyspace = Keyspace::new();
        if let Some(path) = metadata.rdb_path() {
            Self::load_rdb_file(&keyspace, &path);
        }
        let live_data = Mutex::new(LiveData::new(&metadata.replica_info));
        let config_store = Mutex::new(Self::seed_config_store(&metadata));
        Server {
            metadata,
            keyspace,
            live_data,
            config_store,
        }
    }

    fn seed_config_store(metadata: &ServerMetadata) -> HashMap<String, String> {
        let mut store = metadata.config_store.clone();
        match &metadata.replica_info {
            ReplicaInfo::Master(info) => {
                store.insert("role".to_string(), "master".to_string());
                store.insert("master_replid".to_string(), info.replication_id.clone());
            }
            ReplicaInfo::Slave(info) => {
                store.insert("role".to_string(), "slave".to_string());
                store.insert(
                    "replicaof".to_string(),
                    format!("{} {}", info.master_host, info.master_port),
                );
            }
        }
        store
    }

    fn load_rdb_file(keyspace: &Keyspace, path: &std::path::Path) {
        if !path.exists() {
            log_info!("no RDB file found at {}, starting with an empty keyspace", path.display());
            return;
        }
        match rdb::load_file(path) {
            Ok(entries) => {
                let count = entries.len();
                for entry in entries {
                    keyspace.set_absolute(&entry.key, &entry.value, entry.deadline);
                }
                log_info!("loaded {count} keys from {}", path.display());
            }
            Err(err) => log_warn!("failed to load RDB file {}: {err}", path.display()),
        }
    }

    pub fn set(&self, key: &[u8], value: &[u8], expiry: Option<Duration>) {
        self.keyspace.set_relative(key, value, expiry);
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.keyspace.get(key)
    }

    pub fn keys(&self, glob: &[u8]) -> Vec<Vec<u8>> {
        self.keyspace.keys(glob)
    }

    pub fn config_get(&self, name: &[u8]) -> Option<String> {
        let name = String::from_utf8_lossy(name).to_lowercase();
        if name == "master_repl_offset" {
            return Some(self.replication_offset().to_string());
        }
        self.config_store.lock().unwrap().get(&name).cloned()
    }

    /// Persists a REPLCONF option reported by a connecting replica, keyed
    /// as `replica_<name>` so it doesn't collide with the node's own
    /// config keys.
    pub fn record_replconf_option(&self, name: &str, value: &str) {
        let key = format!("replica_{}", name.to_lowercase());
        self.config_store.lock().unwrap().insert(key, value.to_string());
    }

    pub fn add_replica(&self, replica: Replica) -> std::io::Result<()> {
        if let LiveData::Master(master_data) = &mut *self.live_data.lock().unwrap() {
            master_data.replica_manager.add_replica(replica)?;
            log_info!(
                "new replica connected, total replicas: {}",
                master_data.replica_manager.connected_count()
            );
        }
        Ok(())
    }

    /// Convenience for the connection-teardown path, where the peer
    /// address was already captured as a `Result` from `peer_addr()` and
    /// may have failed if the socket was already gone.
    pub fn remove_replica_if_connected(&self, addr: std::io::Result<SocketAddr>) {
        if let Ok(addr) = addr {
            self.remove_replica(addr);
        }
    }

    pub fn remove_replica(&self, addr: SocketAddr) {
        if let LiveData::Master(master_data) = &mut *self.live_data.lock().unwrap() {
            if master_data.replica_manager.remove_replica(addr).is_some() {
                log_info!(
                    "replica {addr} disconnected, remaining replicas: {}",
                    master_data.replica_manager.connected_count()
                );
            }
        }
    }

    /// Propagates a write command's raw bytes (as received off the wire,
    /// not re-serialized) to every connected replica and advances the
    /// master's replication offset by the same amount, keeping the two in
    /// lockstep byte-for-byte.
    pub fn propagate(&self, message: &[u8]) {
        if let LiveData::Master(master_data) = &mut *self.live_data.lock().unwrap() {
            master_data
                .replica_manager
                .propagate_message_to_replicas(message);
            master_data.replication_offset += message.len();
        }
    }

    pub fn replication_offset(&self) -> usize {
        match &*self.live_data.lock().unwrap() {
            LiveData::Master(data) => data.replication_offset,
            LiveData::Slave(data) => data.offset,
        }
    }

    pub fn record_heartbeat(&self) {
        if let LiveData::Slave(data) = &mut *self.live_data.lock().unwrap() {
            data.heartbeat_recv_time = Some(Instant::now());
        }
    }

    pub fn advance_slave_offset(&self, by: usize) {
        if let LiveData::Slave(data) = &mut *self.live_data.lock().unwrap() {
            data.offset += by;
        }
    }
}
