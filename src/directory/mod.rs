//! Rendezvous service for relays: relays register on startup and deregister on shutdown,
//!  everybody routing a message asks for the current list.

pub mod client;
pub mod service;

use anyhow::bail;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::messaging::envelope::Path;
use crate::orbit::OrbitalState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryRecord {
    pub device_name: String,
    /// "host:port"
    pub addr: String,
    #[serde(default)]
    pub orbit: Option<OrbitalState>,
}

/// The registered relays. All operations take the same lock, so a listing never observes a
///  partially applied registration.
#[derive(Default)]
pub struct Directory {
    records: Mutex<Vec<DirectoryRecord>>,
}

impl Directory {
    pub fn new() -> Directory {
        Default::default()
    }

    /// Returns `false` without changing anything if a record with the same address exists.
    pub async fn register(&self, record: DirectoryRecord) -> bool {
        let mut records = self.records.lock().await;
        if records.iter().any(|r| r.addr == record.addr) {
            debug!("{} is already registered", record.addr);
            return false;
        }
        debug!("registering {:?}", record);
        records.push(record);
        true
    }

    /// Removes all records with the given address and returns how many there were.
    pub async fn deregister(&self, addr: &str) -> usize {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|r| r.addr != addr);
        before - records.len()
    }

    pub async fn list(&self) -> Vec<DirectoryRecord> {
        self.records.lock().await.clone()
    }
}


#[derive(Debug, Clone, PartialEq)]
pub enum DirectoryCommand {
    Register(DirectoryRecord),
    Deregister(String),
    GetList,
}

#[derive(Error, Debug, Eq, PartialEq)]
pub enum CommandError {
    #[error("Incorrect command")]
    Unknown,
    #[error("Malformed request: {0}")]
    Malformed(String),
}

impl DirectoryCommand {
    const REGISTER: &'static str = "register ";
    const DEREGISTER: &'static str = "deregister ";
    const GET_LIST: &'static str = "get_list";

    pub fn parse(content: &str) -> Result<DirectoryCommand, CommandError> {
        let content = content.trim();

        if content == Self::GET_LIST {
            return Ok(DirectoryCommand::GetList);
        }
        if let Some(json) = content.strip_prefix(Self::REGISTER) {
            let record: DirectoryRecord = serde_json::from_str(json)
                .map_err(|e| CommandError::Malformed(e.to_string()))?;
            Path::check_node_name(&record.device_name)
                .map_err(|e| CommandError::Malformed(e.to_string()))?;
            return Ok(DirectoryCommand::Register(record));
        }
        if let Some(addr) = content.strip_prefix(Self::DEREGISTER) {
            return normalize_addr(addr)
                .map(DirectoryCommand::Deregister)
                .map_err(|e| CommandError::Malformed(e.to_string()));
        }
        Err(CommandError::Unknown)
    }

    pub fn to_content(&self) -> anyhow::Result<String> {
        Ok(match self {
            DirectoryCommand::Register(record) => format!("{}{}", Self::REGISTER, serde_json::to_string(record)?),
            DirectoryCommand::Deregister(addr) => format!("{}{}", Self::DEREGISTER, addr),
            DirectoryCommand::GetList => Self::GET_LIST.to_string(),
        })
    }
}

/// Accepts both "host:port" and the older "host port" form.
fn normalize_addr(raw: &str) -> anyhow::Result<String> {
    let parts = raw.split_whitespace().collect::<Vec<_>>();
    match parts.as_slice() {
        [addr] => Ok(addr.to_string()),
        [host, port] => Ok(format!("{}:{}", host, port)),
        _ => bail!("expected 'host:port', was {:?}", raw),
    }
}


/// Response to `get_list`. The version is checked by clients so the format can evolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryListing {
    pub version: u32,
    pub records: Vec<DirectoryRecord>,
}

impl DirectoryListing {
    pub const VERSION: u32 = 1;

    pub fn new(records: Vec<DirectoryRecord>) -> DirectoryListing {
        DirectoryListing {
            version: Self::VERSION,
            records,
        }
    }

    pub fn parse(raw: &[u8]) -> anyhow::Result<DirectoryListing> {
        let listing: DirectoryListing = serde_json::from_slice(raw)?;
        if listing.version != Self::VERSION {
            bail!("unsupported directory listing version {}", listing.version);
        }
        Ok(listing)
    }
}
