use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{info, trace, warn};

use crate::config::{GroundStationConfig, GROUND_STATION_NAME};
use crate::messaging::ack::Ack;
use crate::messaging::envelope::{Envelope, EnvelopeCodec, Path, Payload};
use crate::node::server::{MessageHandler, Server};
use crate::util::clock::unix_now_secs;

/// A message that reached the ground station
#[derive(Debug, Clone)]
pub struct Delivery {
    pub device_name: Option<String>,
    /// the full travel path, ending with the ground station
    pub path: Path,
    /// `None` if the payload carries no timestamp
    pub latency_seconds: Option<f64>,
    pub payload: Payload,
}

pub struct DeliveryNotifier {
    sender: broadcast::Sender<Delivery>,
}
impl DeliveryNotifier {
    pub fn new() -> DeliveryNotifier {
        let (sender, _) = broadcast::channel(128);

        DeliveryNotifier {
            sender
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Delivery> {
        self.sender.subscribe()
    }

    pub fn send_delivery(&self, delivery: Delivery) {
        trace!("delivery: {:?}", delivery);
        let _ = self.sender.send(delivery);
    }
}

impl Default for DeliveryNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Terminus of every route: validates, measures end-to-end latency and acknowledges. It never
///  forwards.
pub struct GroundStationHandler {
    codec: EnvelopeCodec,
    notifier: Arc<DeliveryNotifier>,
}

impl GroundStationHandler {
    pub fn new(shared_key: &[u8], notifier: Arc<DeliveryNotifier>) -> anyhow::Result<GroundStationHandler> {
        Ok(GroundStationHandler {
            codec: EnvelopeCodec::new(shared_key)?,
            notifier,
        })
    }
}

#[async_trait]
impl MessageHandler for GroundStationHandler {
    async fn on_message(&self, peer: SocketAddr, frame: &[u8]) -> String {
        let envelope = match Envelope::from_bytes(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("rejecting message from {}: {}", peer, e);
                return Ack::from(&e).to_string();
            }
        };
        let payload = match self.codec.open_verified(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("rejecting message from {} via {}: {}", peer, envelope.path, e);
                return Ack::from(&e).to_string();
            }
        };

        let receive_time = unix_now_secs();
        let latency_seconds = payload.get("timestamp")
            .and_then(|t| t.as_f64())
            .map(|sent| receive_time - sent);

        let mut path = envelope.path;
        path.push(GROUND_STATION_NAME);
        info!("message travel path: {}", path);
        match latency_seconds {
            Some(latency) => info!("total time taken in message travel: {:.6}s", latency),
            None => warn!("message has no timestamp - latency unknown"),
        }
        info!("received data: {}", serde_json::Value::Object(payload.clone()));

        self.notifier.send_delivery(Delivery {
            device_name: payload.get("device_name").and_then(|n| n.as_str()).map(|n| n.to_string()),
            path,
            latency_seconds,
            payload,
        });

        Ack::ok(format!("Data received from Satellite at {}", receive_time)).to_string()
    }
}

pub struct GroundStation {
    server: Server,
    handler: Arc<GroundStationHandler>,
    notifier: Arc<DeliveryNotifier>,
}

impl GroundStation {
    pub async fn new(config: GroundStationConfig) -> anyhow::Result<GroundStation> {
        let notifier = Arc::new(DeliveryNotifier::new());
        let handler = Arc::new(GroundStationHandler::new(&config.shared_key, notifier.clone())?);
        let server = Server::bind(config.server).await?;

        Ok(GroundStation {
            server,
            handler,
            notifier,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.server.local_addr()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Delivery> {
        self.notifier.subscribe()
    }

    pub async fn run(self, shutdown: impl Future<Output=()>) -> anyhow::Result<()> {
        self.server.run(self.handler, shutdown).await
    }
}
