use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::directory::service::CONTENT_FIELD;
use crate::directory::{DirectoryCommand, DirectoryListing, DirectoryRecord};
use crate::messaging::ack::Ack;
use crate::messaging::envelope::{EnvelopeCodec, Path, Payload};
use crate::messaging::frame::request;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DirectoryClient: Send + Sync + 'static {
    async fn register(&self, record: &DirectoryRecord) -> anyhow::Result<Ack>;

    async fn deregister(&self, addr: &str) -> anyhow::Result<Ack>;

    async fn list(&self) -> anyhow::Result<Vec<DirectoryRecord>>;
}

/// Talks to a directory over TCP, opening a fresh connection for every request.
pub struct TcpDirectoryClient {
    directory_addr: String,
    codec: Arc<EnvelopeCodec>,
    request_timeout: Duration,
}

impl TcpDirectoryClient {
    pub fn new(directory_addr: impl Into<String>, codec: Arc<EnvelopeCodec>) -> TcpDirectoryClient {
        TcpDirectoryClient {
            directory_addr: directory_addr.into(),
            codec,
            request_timeout: Duration::from_secs(10),
        }
    }

    async fn send(&self, command: &DirectoryCommand) -> anyhow::Result<Vec<u8>> {
        let mut payload = Payload::new();
        payload.insert(CONTENT_FIELD.to_string(), Value::String(command.to_content()?));
        let envelope = self.codec.seal(&payload, Path::new())?;

        trace!("sending {:?} to directory at {}", command, self.directory_addr);
        timeout(self.request_timeout, async {
            let mut stream = TcpStream::connect(&self.directory_addr).await?;
            request(&mut stream, &envelope.to_bytes()).await
        })
            .await
            .map_err(|_| anyhow!("directory at {} did not respond within {:?}", self.directory_addr, self.request_timeout))?
    }

    async fn send_for_ack(&self, command: &DirectoryCommand) -> anyhow::Result<Ack> {
        let ack = Ack::from_bytes(&self.send(command).await?);
        debug!("directory acknowledged {:?}: {}", command, ack);
        match ack {
            Ack::Error(_) => bail!("directory rejected request: {}", ack),
            ack => Ok(ack),
        }
    }
}

#[async_trait]
impl DirectoryClient for TcpDirectoryClient {
    async fn register(&self, record: &DirectoryRecord) -> anyhow::Result<Ack> {
        self.send_for_ack(&DirectoryCommand::Register(record.clone())).await
    }

    async fn deregister(&self, addr: &str) -> anyhow::Result<Ack> {
        self.send_for_ack(&DirectoryCommand::Deregister(addr.to_string())).await
    }

    async fn list(&self) -> anyhow::Result<Vec<DirectoryRecord>> {
        let response = self.send(&DirectoryCommand::GetList).await?;
        if let Ack::Error(_) = Ack::from_bytes(&response) {
            bail!("directory rejected request: {}", String::from_utf8_lossy(&response));
        }
        Ok(DirectoryListing::parse(&response)?.records)
    }
}
