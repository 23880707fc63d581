//! A tracker is a sensor node on an animal. It samples telemetry at a fixed interval and sends
//!  it, in order, to whichever relay is currently closest. Telemetry is queued while no relay
//!  is reachable and sent once one is.

pub mod outbound_queue;
pub mod sender;
pub mod telemetry;

use std::future::Future;
use std::sync::Arc;

use tokio::select;
use tokio::sync::watch;
use tracing::info;

use crate::config::TrackerConfig;
use crate::directory::client::{DirectoryClient, TcpDirectoryClient};
use crate::messaging::envelope::{EnvelopeCodec, Path};
use crate::routing::Router;
use crate::tracker::outbound_queue::OutboundQueue;
use crate::tracker::sender::{run_producer, TrackerSender};
use crate::tracker::telemetry::{TelemetryExtension, TelemetryProducer};
use crate::util::random::Random;

pub struct Tracker<X: TelemetryExtension, R: Random> {
    config: Arc<TrackerConfig>,
    producer: TelemetryProducer<X, R>,
    codec: Arc<EnvelopeCodec>,
    directory: Arc<dyn DirectoryClient>,
    queue: Arc<OutboundQueue>,
}

impl <X: TelemetryExtension, R: Random + Send + 'static> Tracker<X, R> {
    pub fn new(config: TrackerConfig, producer: TelemetryProducer<X, R>) -> anyhow::Result<Tracker<X, R>> {
        let codec = Arc::new(EnvelopeCodec::new(&config.shared_key)?);
        let directory = Arc::new(TcpDirectoryClient::new(config.directory_addr.clone(), codec.clone()));
        Self::new_with_directory(config, producer, codec, directory)
    }

    pub fn new_with_directory(config: TrackerConfig, producer: TelemetryProducer<X, R>, codec: Arc<EnvelopeCodec>, directory: Arc<dyn DirectoryClient>) -> anyhow::Result<Tracker<X, R>> {
        Path::check_node_name(&config.device_name)?;
        Ok(Tracker {
            config: Arc::new(config),
            producer,
            codec,
            directory,
            queue: Arc::new(OutboundQueue::new()),
        })
    }

    pub fn queue(&self) -> Arc<OutboundQueue> {
        self.queue.clone()
    }

    /// Runs the producer and the sender until `shutdown` completes. Telemetry that is still
    ///  queued at that point is lost.
    pub async fn run(self, shutdown: impl Future<Output=()>) {
        let (position_send, position_recv) = watch::channel(self.producer.position());
        let router = Router::new(self.directory, None);
        let sender = TrackerSender::new(self.config.clone(), self.codec, router, self.queue.clone(), position_recv);

        info!("[{}] starting data transmission", self.config.device_name);
        select! {
            _ = run_producer(self.producer, self.queue.clone(), position_send, self.config.sample_interval) => {}
            _ = sender.run() => {}
            _ = shutdown => {}
        }
        info!("[{}] stopping transmission - {} message(s) still queued", self.config.device_name, self.queue.len().await);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SHARED_KEY;
    use crate::directory::client::MockDirectoryClient;
    use crate::tracker::telemetry::Terrestrial;
    use crate::util::random::RngRandom;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_queues_while_no_relay_is_known() {
        let mut directory = MockDirectoryClient::new();
        directory.expect_list()
            .returning(|| Ok(vec![]));

        let mut config = TrackerConfig::new("Lonely");
        config.sample_interval = Duration::from_secs(6);
        config.retry_backoff = Duration::from_secs(5);

        let producer = TelemetryProducer::<_, RngRandom>::new(Some("Lonely".to_string()), Terrestrial);
        let codec = Arc::new(EnvelopeCodec::new(DEFAULT_SHARED_KEY).unwrap());
        let tracker = Tracker::new_with_directory(config, producer, codec, Arc::new(directory)).unwrap();
        let queue = tracker.queue();

        let (stop_send, stop_recv) = oneshot::channel::<()>();
        let running = tokio::spawn(tracker.run(async move { let _ = stop_recv.await; }));

        sleep(Duration::from_secs(31)).await;
        assert_eq!(queue.len().await, 6);
        assert_eq!(queue.head().await.unwrap().seq, 0);

        stop_send.send(()).unwrap();
        running.await.unwrap();
    }

    #[test]
    fn test_device_name_must_fit_on_path() {
        let producer = TelemetryProducer::<_, RngRandom>::new(Some("Bird-->Marine".to_string()), Terrestrial);
        assert!(Tracker::new(TrackerConfig::new("Bird-->Marine"), producer).is_err());

        let producer = TelemetryProducer::<_, RngRandom>::new(None, Terrestrial);
        assert!(Tracker::new(TrackerConfig::new(" "), producer).is_err());
    }
}
