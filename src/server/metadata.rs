use std::collections::HashMap;

use crate::common::CRLF;

use super::config::Config;

#[derive(Debug)]
pub struct MasterInfo {
    pub replication_id: String,
}

#[derive(Debug)]
pub struct SlaveInfo {
    pub master_host: String,
    pub master_port: u16,
}

#[derive(Debug)]
pub enum ReplicaInfo {
    Master(MasterInfo),
    Slave(SlaveInfo),
}

/// Immutable facts about the server, fixed at startup. Everything that
/// changes while the server runs (the replication offset, connected
/// replicas, the keyspace) lives on `Server` instead, in `server::data`.
#[derive(Debug)]
pub struct ServerMetadata {
    pub listening_port: u16,
    pub replica_info: ReplicaInfo,
    /// Static half of the `CONFIG GET` data: the CLI flags the teacher's
    /// `Config` already parses (`--dir`, `--dbfilename`). `Server` clones
    /// this into its own mutable config store at construction and grows
    /// that copy at runtime (role/replid/replicaof, REPLCONF options);
    /// this field never changes after `generate()` returns.
    pub config_store: HashMap<String, String>,
}

impl ServerMetadata {
    pub fn generate(config: &Config) -> Self {
        let replica_info = match config.master_address() {
            Some((master_host, master_port)) => {
                crate::common::log_info!("starting as replica of {master_host}:{master_port}");
                ReplicaInfo::Slave(SlaveInfo {
                    master_host,
                    master_port,
                })
            }
            None => {
                crate::common::log_info!("starting as master");
                ReplicaInfo::Master(MasterInfo {
                    replication_id: generate_replication_id(),
                })
            }
        };

        let mut config_store = HashMap::new();
        if let Some(dir) = config.get_data_dir() {
            config_store.insert("dir".to_string(), dir.to_string());
        }
        if let Some(dbfilename) = config.get_dbfilename() {
            config_store.insert("dbfilename".to_string(), dbfilename.to_string());
        }

        ServerMetadata {
            listening_port: config.get_listening_port(),
            replica_info,
            config_store,
        }
    }

    pub fn rdb_path(&self) -> Option<std::path::PathBuf> {
        let dir = self.config_store.get("dir")?;
        let dbfilename = self.config_store.get("dbfilename")?;
        Some(std::path::Path::new(dir).join(dbfilename))
    }

    pub fn replication_info_section(&self, master_repl_offset: usize) -> Vec<u8> {
        match &self.replica_info {
            ReplicaInfo::Master(master_info) => format!(
                "role:master{CRLF}master_replid:{}{CRLF}master_repl_offset:{}",
                master_info.replication_id, master_repl_offset
            )
            .into_bytes(),
            ReplicaInfo::Slave(_) => {
                format!("role:slave{CRLF}master_repl_offset:{master_repl_offset}").into_bytes()
            }
        }
    }
}

/// A fixed-length hex string in the shape of a real Redis run ID. Not
/// required to be cryptographically random by the spec; fixed per process
/// start is enough for PSYNC's `FULLRESYNC <replid> <offset>` contract.
fn generate_replication_id() -> String {
    "8371b4fb1155b71f4a04d3e1bc3e18c4a990aeeb".to_string()
}
