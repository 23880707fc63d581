use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::TrackerConfig;
use crate::messaging::ack::Ack;
use crate::messaging::envelope::{EnvelopeCodec, Path};
use crate::messaging::frame::request;
use crate::orbit::geo::GeoPoint;
use crate::routing::{HopSelection, Router, RoutingError};
use crate::tracker::outbound_queue::{OutboundQueue, QueueItem};
use crate::tracker::telemetry::{TelemetryExtension, TelemetryProducer};
use crate::util::clock::unix_now_secs;
use crate::util::random::Random;

/// Samples telemetry at a fixed interval, appends it to the queue and publishes the tracker's
///  current position for routing.
pub async fn run_producer<X: TelemetryExtension, R: Random>(
    mut producer: TelemetryProducer<X, R>,
    queue: Arc<OutboundQueue>,
    position: watch::Sender<GeoPoint>,
    sample_interval: Duration,
) {
    let mut ticks = interval(sample_interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticks.tick().await;

        let payload = producer.sample();
        let _ = position.send(producer.position());
        let seq = queue.push(payload).await;
        info!("[{}] queued message #{} - {} pending", producer.device_name(), seq + 1, queue.len().await);
    }
}

/// an established connection to a relay
struct Link {
    stream: TcpStream,
    relay_name: String,
    relay_addr: String,
    local_addr: SocketAddr,
    /// items with a lower sequence number were queued before this link was established
    first_fresh_seq: u64,
}

#[derive(Debug)]
enum Outcome {
    Delivered(Ack),
    /// the relay will never accept the item
    Rejected(Ack),
    /// the relay accepted the item but could not deliver it, worth retrying
    Failed(Ack),
    /// no relay to send to right now; an existing connection is kept
    Unroutable(RoutingError),
}

/// Drains the outbound queue in order over a persistent connection to the closest relay.
pub struct TrackerSender {
    config: Arc<TrackerConfig>,
    codec: Arc<EnvelopeCodec>,
    router: Router,
    queue: Arc<OutboundQueue>,
    position: watch::Receiver<GeoPoint>,
}

impl TrackerSender {
    pub fn new(config: Arc<TrackerConfig>, codec: Arc<EnvelopeCodec>, router: Router, queue: Arc<OutboundQueue>, position: watch::Receiver<GeoPoint>) -> TrackerSender {
        TrackerSender {
            config,
            codec,
            router,
            queue,
            position,
        }
    }

    pub async fn run(self) {
        let mut link = None;

        loop {
            let item = self.queue.wait_for_head().await;
            let order = item.payload.get("message_order").cloned().unwrap_or_default();

            match self.try_send(&mut link, &item).await {
                Ok(Outcome::Delivered(ack)) => {
                    info!("[{}] message {} acknowledged: {}", self.config.device_name, order, ack);
                    self.queue.remove_head(item.seq).await;
                }
                Ok(Outcome::Rejected(ack)) => {
                    error!("[{}] message {} was rejected and is dropped: {}", self.config.device_name, order, ack);
                    self.queue.remove_head(item.seq).await;
                }
                Ok(Outcome::Failed(ack)) => {
                    warn!("[{}] message {} was not delivered: {} - retrying in {:?}", self.config.device_name, order, ack, self.config.retry_backoff);
                    sleep(self.config.retry_backoff).await;
                }
                Ok(Outcome::Unroutable(e)) => {
                    warn!("[{}] message {} cannot be routed: {} - retrying in {:?}", self.config.device_name, order, e, self.config.retry_backoff);
                    sleep(self.config.retry_backoff).await;
                }
                Err(e) => {
                    warn!("[{}] connection error: {} - retrying in {:?}", self.config.device_name, e, self.config.retry_backoff);
                    link = None;
                    sleep(self.config.retry_backoff).await;
                }
            }
        }
    }

    async fn try_send(&self, link: &mut Option<Link>, item: &QueueItem) -> anyhow::Result<Outcome> {
        let position = *self.position.borrow();
        let now = unix_now_secs();
        let path = Path::starting_at(self.config.device_name.clone());

        let hop = match self.router.next_hop(&position, &path, now).await {
            Ok(hop) => hop,
            Err(e) => return Ok(Outcome::Unroutable(e)),
        };

        let reuse = matches!(link, Some(l) if l.relay_addr == hop.candidate.addr);
        if !reuse {
            if let Some(old) = link.take() {
                info!("[{}] handing over from {} to {}", self.config.device_name, old.relay_name, hop.candidate.device_name);
            }
            *link = Some(self.connect(&hop).await?);
        }
        let Some(l) = link.as_mut() else {
            bail!("no connection to {}", hop.candidate.addr);
        };

        let mut payload = item.payload.clone();
        payload.insert("source_ip".to_string(), json!(l.local_addr.ip().to_string()));
        payload.insert("source_port".to_string(), json!(l.local_addr.port()));
        payload.insert("restored".to_string(), json!(item.seq < l.first_fresh_seq));
        let envelope = self.codec.seal(&payload, path)?;

        debug!("simulating propagation delay of {:?} to {}", hop.delay, hop.candidate.device_name);
        sleep(hop.delay).await;

        let raw_ack = timeout(self.config.ack_timeout, request(&mut l.stream, &envelope.to_bytes())).await
            .map_err(|_| anyhow!("no acknowledgment from {} within {:?}", l.relay_name, self.config.ack_timeout))??;

        Ok(match Ack::from_bytes(&raw_ack) {
            ack @ Ack::Ok(_) => Outcome::Delivered(ack),
            ack if ack.is_rejection() => Outcome::Rejected(ack),
            ack => Outcome::Failed(ack),
        })
    }

    async fn connect(&self, hop: &HopSelection) -> anyhow::Result<Link> {
        let stream = timeout(self.config.ack_timeout, TcpStream::connect(&hop.candidate.addr)).await
            .map_err(|_| anyhow!("connecting to {} timed out", hop.candidate.addr))??;
        let local_addr = stream.local_addr()?;
        info!("[{}] connected to {} at {} from {}", self.config.device_name, hop.candidate.device_name, hop.candidate.addr, local_addr);

        let first_fresh_seq = self.queue.next_seq().await;
        let pending = self.queue.len().await;
        if pending > 1 {
            info!("[{}] {} messages in queue, sending them first", self.config.device_name, pending);
        }

        Ok(Link {
            stream,
            relay_name: hop.candidate.device_name.clone(),
            relay_addr: hop.candidate.addr.clone(),
            local_addr,
            first_fresh_seq,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SHARED_KEY;
    use crate::directory::client::{DirectoryClient, MockDirectoryClient};
    use crate::directory::DirectoryRecord;
    use crate::messaging::envelope::{Envelope, Payload};
    use crate::messaging::frame::{read_frame, write_frame};
    use crate::orbit::{Direction, OrbitalState};
    use crate::tracker::telemetry::Terrestrial;
    use crate::util::random::RngRandom;
    use std::sync::Mutex;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    const DEVICE: &str = "TestTracker";

    fn codec() -> Arc<EnvelopeCodec> {
        Arc::new(EnvelopeCodec::new(DEFAULT_SHARED_KEY).unwrap())
    }

    fn config() -> Arc<TrackerConfig> {
        let mut config = TrackerConfig::new(DEVICE);
        config.retry_backoff = Duration::from_millis(20);
        config.ack_timeout = Duration::from_secs(5);
        Arc::new(config)
    }

    /// a relay that stays (almost) still above the given point
    fn record_above(name: &str, addr: &str, lat: f64, long: f64) -> DirectoryRecord {
        DirectoryRecord {
            device_name: name.to_string(),
            addr: addr.to_string(),
            orbit: Some(OrbitalState::new(lat, long, 0.0, Direction::Prograde, 1e12, unix_now_secs(), 550.0).unwrap()),
        }
    }

    fn directory_of(records: Arc<Mutex<Vec<DirectoryRecord>>>) -> Arc<dyn DirectoryClient> {
        let mut directory = MockDirectoryClient::new();
        directory.expect_list()
            .returning(move || Ok(records.lock().unwrap().clone()));
        Arc::new(directory)
    }

    fn payload(n: u64) -> Payload {
        let mut payload = Payload::new();
        payload.insert("message_order".to_string(), json!(n));
        payload.insert("device_name".to_string(), json!(DEVICE));
        payload
    }

    #[derive(Debug)]
    struct Received {
        connection: usize,
        payload: Payload,
        path: Path,
    }

    /// Fake relay that decrypts and reports every frame. `ack_for` decides the response for
    ///  (connection number, message order); `None` drops the connection without acknowledging.
    async fn fake_relay(ack_for: fn(usize, u64) -> Option<&'static str>) -> (String, mpsc::UnboundedReceiver<Received>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (send, recv) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let codec = codec();
            let mut connection = 0;
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                connection += 1;
                let send = send.clone();
                let codec = codec.clone();
                tokio::spawn(async move {
                    while let Ok(Some(frame)) = read_frame(&mut stream).await {
                        let envelope = Envelope::from_bytes(&frame).unwrap();
                        let payload = codec.open_verified(&envelope).unwrap();
                        let order = payload.get("message_order").and_then(|o| o.as_u64()).unwrap();
                        let _ = send.send(Received { connection, payload, path: envelope.path });

                        match ack_for(connection, order) {
                            Some(ack) => write_frame(&mut stream, ack.as_bytes()).await.unwrap(),
                            None => return,
                        }
                    }
                });
            }
        });
        (addr, recv)
    }

    async fn start_sender(queue: Arc<OutboundQueue>, directory: Arc<dyn DirectoryClient>) -> watch::Sender<GeoPoint> {
        let (position_send, position_recv) = watch::channel(GeoPoint::on_surface(0.0, 0.0));
        let sender = TrackerSender::new(config(), codec(), Router::new(directory, None), queue, position_recv);
        tokio::spawn(sender.run());
        position_send
    }

    async fn wait_until_empty(queue: &OutboundQueue) {
        timeout(Duration::from_secs(10), async {
            while !queue.is_empty().await {
                sleep(Duration::from_millis(10)).await;
            }
        }).await.unwrap();
    }

    #[tokio::test]
    async fn test_order_preserved_across_dropped_connection() {
        // first connection dies after receiving message 1, before acknowledging it
        let (addr, mut received) = fake_relay(|connection, _| if connection == 1 { None } else { Some("Data received and forwarded") }).await;
        let directory = directory_of(Arc::new(Mutex::new(vec![record_above("R1", &addr, 0.0, 0.0)])));

        let queue = Arc::new(OutboundQueue::new());
        for n in 1..=3 {
            queue.push(payload(n)).await;
        }
        let _position = start_sender(queue.clone(), directory).await;
        wait_until_empty(&queue).await;

        let mut deliveries = Vec::new();
        while let Ok(r) = received.try_recv() {
            deliveries.push((r.connection, r.payload.get("message_order").and_then(|o| o.as_u64()).unwrap()));
            assert_eq!(r.path.to_string(), DEVICE);
            assert_eq!(r.payload.get("source_ip").and_then(|i| i.as_str()), Some("127.0.0.1"));
            assert!(r.payload.get("source_port").and_then(|p| p.as_u64()).is_some());
        }
        assert_eq!(deliveries, vec![(1, 1), (2, 1), (2, 2), (2, 3)]);
    }

    #[tokio::test]
    async fn test_restored_flag() {
        let (addr, mut received) = fake_relay(|_, _| Some("ok")).await;
        let directory = directory_of(Arc::new(Mutex::new(vec![record_above("R1", &addr, 0.0, 0.0)])));

        let queue = Arc::new(OutboundQueue::new());
        queue.push(payload(1)).await;
        queue.push(payload(2)).await;
        let _position = start_sender(queue.clone(), directory).await;
        wait_until_empty(&queue).await;

        queue.push(payload(3)).await;
        wait_until_empty(&queue).await;

        let restored = |r: Received| r.payload.get("restored").and_then(|r| r.as_bool()).unwrap();
        assert!(restored(received.recv().await.unwrap()));
        assert!(restored(received.recv().await.unwrap()));
        assert!(!restored(received.recv().await.unwrap()));
    }

    #[tokio::test]
    async fn test_rejected_item_is_dropped_and_failed_item_is_retried() {
        let (addr, mut received) = fake_relay(|_, order| match order {
            1 => Some("Error: Checksum mismatch detected!"),
            _ => Some("ok"),
        }).await;
        let directory = directory_of(Arc::new(Mutex::new(vec![record_above("R1", &addr, 0.0, 0.0)])));

        let queue = Arc::new(OutboundQueue::new());
        queue.push(payload(1)).await;
        queue.push(payload(2)).await;
        let _position = start_sender(queue.clone(), directory).await;
        wait_until_empty(&queue).await;

        let orders = [received.recv().await.unwrap(), received.recv().await.unwrap()]
            .map(|r| r.payload.get("message_order").and_then(|o| o.as_u64()).unwrap());
        assert_eq!(orders, [1, 2]);
        assert!(received.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_downstream_failure_is_retried() {
        static ATTEMPTS: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

        let (addr, mut received) = fake_relay(|_, _| {
            if ATTEMPTS.fetch_add(1, std::sync::atomic::Ordering::AcqRel) == 0 {
                Some("Error: No route to a ground station")
            }
            else {
                Some("ok")
            }
        }).await;
        let directory = directory_of(Arc::new(Mutex::new(vec![record_above("R1", &addr, 0.0, 0.0)])));

        let queue = Arc::new(OutboundQueue::new());
        queue.push(payload(1)).await;
        let _position = start_sender(queue.clone(), directory).await;
        wait_until_empty(&queue).await;

        let first = received.recv().await.unwrap();
        let second = received.recv().await.unwrap();
        assert_eq!(first.payload.get("message_order"), second.payload.get("message_order"));
        assert_eq!(first.connection, second.connection);
    }

    #[tokio::test]
    async fn test_directory_outage_keeps_connection() {
        let (addr, mut received) = fake_relay(|_, _| Some("ok")).await;
        let record = record_above("R1", &addr, 0.0, 0.0);

        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut directory = MockDirectoryClient::new();
        directory.expect_list()
            .returning(move || {
                if calls.fetch_add(1, std::sync::atomic::Ordering::AcqRel) == 1 {
                    Err(anyhow!("directory unreachable"))
                }
                else {
                    Ok(vec![record.clone()])
                }
            });

        let queue = Arc::new(OutboundQueue::new());
        let _position = start_sender(queue.clone(), Arc::new(directory)).await;

        queue.push(payload(1)).await;
        wait_until_empty(&queue).await;
        queue.push(payload(2)).await;
        wait_until_empty(&queue).await;

        let first = received.recv().await.unwrap();
        let second = received.recv().await.unwrap();
        assert_eq!(second.payload.get("message_order").and_then(|o| o.as_u64()), Some(2));
        assert_eq!(first.connection, 1);
        assert_eq!(second.connection, 1);
    }

    #[tokio::test]
    async fn test_handover_to_closer_relay() {
        let (addr_a, mut received_a) = fake_relay(|_, _| Some("ok")).await;
        let (addr_b, mut received_b) = fake_relay(|_, _| Some("ok")).await;

        let records = Arc::new(Mutex::new(vec![
            record_above("A", &addr_a, 0.0, 0.0),
            record_above("B", &addr_b, 40.0, 40.0),
        ]));
        let directory = directory_of(records.clone());

        let queue = Arc::new(OutboundQueue::new());
        let position = start_sender(queue.clone(), directory).await;

        queue.push(payload(1)).await;
        wait_until_empty(&queue).await;
        assert_eq!(received_a.recv().await.unwrap().payload.get("message_order").and_then(|o| o.as_u64()), Some(1));

        // the tracker moved: B is closer now
        position.send(GeoPoint::on_surface(39.0, 39.0)).unwrap();
        queue.push(payload(2)).await;
        wait_until_empty(&queue).await;
        assert_eq!(received_b.recv().await.unwrap().payload.get("message_order").and_then(|o| o.as_u64()), Some(2));
        assert!(received_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_relay_retries_until_one_registers() {
        let (addr, mut received) = fake_relay(|_, _| Some("ok")).await;
        let records = Arc::new(Mutex::new(vec![]));
        let directory = directory_of(records.clone());

        let queue = Arc::new(OutboundQueue::new());
        queue.push(payload(1)).await;
        let _position = start_sender(queue.clone(), directory).await;

        sleep(Duration::from_millis(100)).await;
        assert_eq!(queue.len().await, 1);

        records.lock().unwrap().push(record_above("R1", &addr, 0.0, 0.0));
        wait_until_empty(&queue).await;
        assert!(received.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_producer_interval() {
        let queue = Arc::new(OutboundQueue::new());
        let producer = TelemetryProducer::<_, RngRandom>::new(None, Terrestrial);
        let (position_send, position_recv) = watch::channel(GeoPoint::on_surface(1000.0, 1000.0));

        tokio::spawn(run_producer(producer, queue.clone(), position_send, Duration::from_secs(6)));

        sleep(Duration::from_secs(20)).await;
        // ticks at 0, 6, 12 and 18 seconds
        assert_eq!(queue.len().await, 4);
        assert!(position_recv.borrow().lat <= 90.0);

        let orders = {
            let mut orders = Vec::new();
            while let Some(head) = queue.head().await {
                orders.push(head.payload.get("message_order").and_then(|o| o.as_u64()).unwrap());
                queue.remove_head(head.seq).await;
            }
            orders
        };
        assert_eq!(orders, vec![1, 2, 3, 4]);
    }
}
