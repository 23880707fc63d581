use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{DirectoryConfig, GROUND_STATION_NAME};
use crate::directory::{CommandError, Directory, DirectoryCommand, DirectoryListing};
use crate::messaging::ack::Ack;
use crate::messaging::envelope::{Envelope, EnvelopeCodec};
use crate::node::server::{MessageHandler, Server};
use crate::util::clock::local_datetime_string;

pub const CONTENT_FIELD: &str = "content";

/// Answers sealed directory requests. Every request gets exactly one plain-text response: an
///  acknowledgment, or the JSON listing for `get_list`.
pub struct DirectoryService {
    directory: Arc<Directory>,
    codec: EnvelopeCodec,
}

impl DirectoryService {
    pub fn new(directory: Arc<Directory>, shared_key: &[u8]) -> anyhow::Result<DirectoryService> {
        Ok(DirectoryService {
            directory,
            codec: EnvelopeCodec::new(shared_key)?,
        })
    }

    async fn execute(&self, command: DirectoryCommand) -> String {
        match command {
            DirectoryCommand::Register(record) => {
                if record.device_name == GROUND_STATION_NAME {
                    warn!("rejecting registration with reserved name {:?} from {}", record.device_name, record.addr);
                    return Ack::error(format!("Malformed request: device name {:?} is reserved", GROUND_STATION_NAME)).to_string();
                }
                if record.orbit.is_none() {
                    warn!("{} registered without orbital parameters - it will not be considered for routing", record.device_name);
                }

                let name = record.device_name.clone();
                if self.directory.register(record).await {
                    info!("registered relay {}", name);
                    format!("Satellite registered at {}", local_datetime_string())
                }
                else {
                    "Satellite already registered".to_string()
                }
            }
            DirectoryCommand::Deregister(addr) => {
                let num_removed = self.directory.deregister(&addr).await;
                info!("deregistered {} ({} record(s) removed)", addr, num_removed);
                format!("Satellite deregistered at {}", local_datetime_string())
            }
            DirectoryCommand::GetList => {
                let listing = DirectoryListing::new(self.directory.list().await);
                debug!("sending list of {} relays", listing.records.len());
                match serde_json::to_string(&listing) {
                    Ok(json) => json,
                    Err(e) => Ack::error(format!("Failed to encode listing: {}", e)).to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl MessageHandler for DirectoryService {
    async fn on_message(&self, peer: SocketAddr, frame: &[u8]) -> String {
        let payload = match Envelope::from_bytes(frame).and_then(|envelope| self.codec.open_verified(&envelope)) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("rejecting request from {}: {}", peer, e);
                return Ack::from(&e).to_string();
            }
        };

        let content = match payload.get(CONTENT_FIELD) {
            Some(Value::String(content)) => content,
            _ => {
                warn!("request from {} has no content", peer);
                return Ack::error("Malformed request: missing content").to_string();
            }
        };

        match DirectoryCommand::parse(content) {
            Ok(command) => self.execute(command).await,
            Err(CommandError::Unknown) => {
                warn!("incorrect command from {}: {:?}", peer, content);
                CommandError::Unknown.to_string()
            }
            Err(e) => {
                warn!("malformed command from {}: {}", peer, e);
                Ack::Error(e.to_string()).to_string()
            }
        }
    }
}

/// Runs a directory until `shutdown` completes.
pub async fn run_directory(config: DirectoryConfig, shutdown: impl std::future::Future<Output=()>) -> anyhow::Result<()> {
    let service = DirectoryService::new(Arc::new(Directory::new()), &config.shared_key)?;
    let server = Server::bind(config.server).await?;
    server.run(Arc::new(service), shutdown).await
}
